use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::RelayError;
use crate::models::Payload;
use crate::queue::types::*;
use crate::transport::Transport;

pub(super) enum Command {
    Enqueue(OutboundMessage),
}

/// Where the queue is in its send cycle.
pub(super) enum QueueState {
    /// Nothing in flight and nothing scheduled.
    Idle,
    /// One attempt awaiting ack, nack or timeout.
    InFlight {
        token: AttemptToken,
        message: OutboundMessage,
        deadline: Instant,
    },
    /// Post-ack pause or nack backoff before the next send.
    Waiting { until: Instant },
}

impl QueueState {
    pub(super) fn deadline(&self) -> Option<Instant> {
        match self {
            QueueState::Idle => None,
            QueueState::InFlight { deadline, .. } => Some(*deadline),
            QueueState::Waiting { until } => Some(*until),
        }
    }
}

/// Shared between the queue task and its handles.
#[derive(Default)]
pub(super) struct Counters {
    pub(super) backlog: AtomicUsize,
    pub(super) in_flight: AtomicBool,
    pub(super) delivered: AtomicU64,
    pub(super) given_up: AtomicU64,
    pub(super) timed_out: AtomicU64,
    pub(super) superseded: AtomicU64,
}

/// Attempt that was sent, kept so late replies can be attributed.
pub(super) struct SentAttempt {
    pub(super) token: AttemptToken,
    pub(super) message_id: Uuid,
    pub(super) kind: String,
    pub(super) attempt: u32,
}

/// Number of past attempts remembered for late-reply logging.
pub(super) const ATTEMPT_HISTORY: usize = 64;

/// Serializes messages over a transport that allows one outstanding send.
///
/// The queue runs as its own task and owns the backlog; callers only talk to
/// it through a `DeliveryHandle`. Each message is attempted until it is acked,
/// rejected `max_retry` times, or lost to a timeout.
///
/// - High-priority messages go to the front of the backlog, others to the back
/// - A nacked message returns to the front after `nack_delay * attempts`
/// - A timed-out message is dropped and the queue moves on
/// - Replies carry the attempt token; replies for old attempts are ignored
pub struct DeliveryQueue<T: Transport> {
    pub(super) transport: Arc<T>,
    pub(super) settings: DeliverySettings,
    pub(super) backlog: VecDeque<OutboundMessage>,
    pub(super) state: QueueState,
    pub(super) next_token: u64,
    pub(super) history: VecDeque<SentAttempt>,
    pub(super) commands: mpsc::UnboundedReceiver<Command>,
    pub(super) replies_tx: mpsc::UnboundedSender<(AttemptToken, TransportOutcome)>,
    pub(super) replies_rx: mpsc::UnboundedReceiver<(AttemptToken, TransportOutcome)>,
    pub(super) event_tx: broadcast::Sender<DeliveryEvent>,
    pub(super) counters: Arc<Counters>,
    /// Set once every handle is gone; the queue drains and stops.
    pub(super) closing: bool,
}

impl<T: Transport> DeliveryQueue<T> {
    /// Creates the queue and a handle to it without starting the task.
    pub fn new(
        transport: Arc<T>,
        settings: DeliverySettings,
        event_buffer: usize,
    ) -> (Self, DeliveryHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(event_buffer);
        let counters = Arc::new(Counters::default());

        log::info!(
            "Creating DeliveryQueue: max_retry={}, timeout={:?}, nack_delay={:?}, ack_delay={:?}",
            settings.max_retry,
            settings.timeout,
            settings.nack_delay,
            settings.ack_delay
        );

        let queue = Self {
            transport,
            settings,
            backlog: VecDeque::new(),
            state: QueueState::Idle,
            next_token: 1,
            history: VecDeque::with_capacity(ATTEMPT_HISTORY),
            commands: command_rx,
            replies_tx,
            replies_rx,
            event_tx: event_tx.clone(),
            counters: counters.clone(),
            closing: false,
        };
        let handle = DeliveryHandle {
            commands: command_tx,
            event_tx,
            counters,
        };
        (queue, handle)
    }

    /// Creates the queue and runs it on the current runtime.
    pub fn spawn(transport: Arc<T>, settings: DeliverySettings) -> (DeliveryHandle, JoinHandle<()>) {
        let (queue, handle) = Self::new(transport, settings, super::DEFAULT_EVENT_BUFFER);
        let task = tokio::spawn(queue.run());
        (handle, task)
    }
}

/// Cheap, cloneable entry point to a running `DeliveryQueue`.
#[derive(Clone)]
pub struct DeliveryHandle {
    commands: mpsc::UnboundedSender<Command>,
    event_tx: broadcast::Sender<DeliveryEvent>,
    counters: Arc<Counters>,
}

impl DeliveryHandle {
    /// Queues a payload; sending starts right away if the queue is idle.
    pub fn enqueue(&self, payload: Payload, kind: &str, priority: Priority) -> Result<Uuid, RelayError> {
        let mut envelope = Envelope::new(payload, kind);
        envelope.priority = priority;
        self.enqueue_envelope(envelope)
    }

    pub fn enqueue_envelope(&self, envelope: Envelope) -> Result<Uuid, RelayError> {
        let message = OutboundMessage::from_envelope(envelope);
        let id = message.id;
        self.commands
            .send(Command::Enqueue(message))
            .map_err(|_| RelayError::QueueClosed)?;
        Ok(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.event_tx.subscribe()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            backlog: self.counters.backlog.load(Ordering::Relaxed),
            in_flight: self.counters.in_flight.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            given_up: self.counters.given_up.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
            superseded: self.counters.superseded.load(Ordering::Relaxed),
        }
    }
}
