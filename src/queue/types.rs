use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::Payload;

/// Timing and retry limits for the delivery queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeliverySettings {
    /// Attempts per message, including the first one.
    pub max_retry: u32,
    /// Pause after an ack before the next message is sent.
    pub ack_delay: Duration,
    /// Backoff base; the wait after a nack is `nack_delay * attempts`.
    pub nack_delay: Duration,
    /// How long an attempt may stay in flight.
    pub timeout: Duration,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            max_retry: super::DEFAULT_MAX_RETRY,
            ack_delay: Duration::from_millis(super::DEFAULT_ACK_DELAY_MS),
            nack_delay: Duration::from_millis(super::DEFAULT_NACK_DELAY_MS),
            timeout: Duration::from_millis(super::DEFAULT_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Joins the back of the backlog.
    Normal,
    /// Jumps to the front of the backlog. Never interrupts the in-flight message.
    High,
}

/// Marks a message as part of a replaceable batch.
///
/// Enqueuing a message with generation `n` drops every pending message of the
/// same group whose generation is lower than `n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupersedeTag {
    pub group: String,
    pub generation: u64,
}

impl SupersedeTag {
    pub fn new(group: &str, generation: u64) -> Self {
        Self {
            group: group.to_string(),
            generation,
        }
    }
}

/// What a caller hands to `enqueue`.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub payload: Payload,
    /// Short description used in logs, e.g. "position" or "update #2".
    pub kind: String,
    pub priority: Priority,
    pub supersede: Option<SupersedeTag>,
}

impl Envelope {
    pub fn new(payload: Payload, kind: impl Into<String>) -> Self {
        Self {
            payload,
            kind: kind.into(),
            priority: Priority::Normal,
            supersede: None,
        }
    }

    pub fn high_priority(mut self) -> Self {
        self.priority = Priority::High;
        self
    }

    pub fn superseding(mut self, tag: SupersedeTag) -> Self {
        self.supersede = Some(tag);
        self
    }
}

/// A message owned by the queue until it is acked, given up or dropped.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub id: Uuid,
    pub payload: Payload,
    pub kind: String,
    pub priority: Priority,
    pub supersede: Option<SupersedeTag>,
    /// Number of sends so far.
    pub attempts: u32,
    pub enqueued_at: OffsetDateTime,
}

impl OutboundMessage {
    pub(super) fn from_envelope(envelope: Envelope) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload: envelope.payload,
            kind: envelope.kind,
            priority: envelope.priority,
            supersede: envelope.supersede,
            attempts: 0,
            enqueued_at: OffsetDateTime::now_utc(),
        }
    }

    /// True if `tag` replaces this message.
    pub(super) fn superseded_by(&self, tag: &SupersedeTag) -> bool {
        matches!(&self.supersede, Some(own) if own.group == tag.group && own.generation < tag.generation)
    }
}

/// Identifies one send attempt. Never reused within a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttemptToken(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOutcome {
    Ack,
    Nack,
}

/// Event emitted as messages move through the queue.
#[derive(Debug, Clone)]
pub struct DeliveryEvent {
    pub message_id: Uuid,
    pub kind: String,
    /// Attempt number the event refers to (0 for messages never sent).
    pub attempt: u32,
    pub event_type: DeliveryEventType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryEventType {
    /// Handed to the transport.
    Sent(AttemptToken),
    Acked,
    /// Rejected; the message goes back to the front after `retry_in`.
    Nacked { retry_in: std::time::Duration },
    /// No reply within the timeout; the message is presumed lost.
    TimedOut,
    /// Rejected on the last allowed attempt; the message is dropped.
    GivenUp,
    /// Removed from the backlog by a newer batch of the same group.
    Superseded,
    /// A reply for an attempt that is no longer in flight. Ignored.
    LateReply(AttemptToken, TransportOutcome),
}

/// Counters and backlog size at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub backlog: usize,
    pub in_flight: bool,
    pub delivered: u64,
    pub given_up: u64,
    pub timed_out: u64,
    pub superseded: u64,
}
