use std::sync::atomic::Ordering;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::RelayError;
use crate::queue::q_core::{Command, DeliveryQueue, QueueState, SentAttempt, ATTEMPT_HISTORY};
use crate::queue::types::*;
use crate::transport::{ReplyHandle, Transport};

impl<T: Transport> DeliveryQueue<T> {
    /// Drives the queue until every handle is dropped and the backlog is drained.
    pub async fn run(mut self) {
        loop {
            if self.closing && matches!(self.state, QueueState::Idle) && self.backlog.is_empty() {
                log::info!("Delivery queue drained, stopping");
                break;
            }

            let deadline = self.state.deadline();
            let sleep = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now));

            tokio::select! {
                biased;

                reply = self.replies_rx.recv() => {
                    // the queue holds a sender, so the channel never closes
                    if let Some((token, outcome)) = reply {
                        self.on_reply(token, outcome);
                    }
                }

                command = self.commands.recv(), if !self.closing => {
                    match command {
                        Some(Command::Enqueue(message)) => self.on_enqueue(message),
                        None => {
                            log::info!("All queue handles dropped, draining {} messages", self.backlog.len());
                            self.closing = true;
                        }
                    }
                }

                _ = sleep, if deadline.is_some() => self.on_deadline(),
            }

            self.publish_stats();
        }
    }

    fn on_enqueue(&mut self, message: OutboundMessage) {
        if let Some(tag) = message.supersede.clone() {
            self.drop_superseded(&tag);
        }

        log::debug!(
            "Queued {} ({:?} priority, {} waiting)",
            message.kind,
            message.priority,
            self.backlog.len()
        );

        match message.priority {
            Priority::High => self.backlog.push_front(message),
            Priority::Normal => self.backlog.push_back(message),
        }

        if matches!(self.state, QueueState::Idle) {
            self.send_next();
        }
    }

    fn drop_superseded(&mut self, tag: &SupersedeTag) {
        let mut dropped = Vec::new();
        self.backlog.retain(|m| {
            if m.superseded_by(tag) {
                dropped.push((m.id, m.kind.clone(), m.attempts));
                false
            } else {
                true
            }
        });

        for (message_id, kind, attempt) in dropped {
            log::debug!("Dropping stale {} (superseded by {} #{})", kind, tag.group, tag.generation);
            self.counters.superseded.fetch_add(1, Ordering::Relaxed);
            self.emit(message_id, kind, attempt, DeliveryEventType::Superseded);
        }
    }

    /// Pops the head of the backlog and hands it to the transport, or goes idle.
    fn send_next(&mut self) {
        let Some(mut message) = self.backlog.pop_front() else {
            self.state = QueueState::Idle;
            return;
        };

        message.attempts += 1;
        let token = AttemptToken(self.next_token);
        self.next_token += 1;

        log::debug!("Sending {} (attempt {}, token {})", message.kind, message.attempts, token.0);
        self.remember(token, &message);
        self.emit(
            message.id,
            message.kind.clone(),
            message.attempts,
            DeliveryEventType::Sent(token),
        );

        let deadline = Instant::now() + self.settings.timeout;
        self.transport
            .send(&message.payload, ReplyHandle::new(token, self.replies_tx.clone()));
        self.state = QueueState::InFlight {
            token,
            message,
            deadline,
        };
    }

    fn on_reply(&mut self, token: AttemptToken, outcome: TransportOutcome) {
        match std::mem::replace(&mut self.state, QueueState::Idle) {
            QueueState::InFlight {
                token: current,
                message,
                ..
            } if current == token => match outcome {
                TransportOutcome::Ack => self.on_ack(message),
                TransportOutcome::Nack => self.on_nack(message),
            },
            other => {
                self.state = other;
                self.on_late_reply(token, outcome);
            }
        }
    }

    fn on_ack(&mut self, message: OutboundMessage) {
        let waited = OffsetDateTime::now_utc() - message.enqueued_at;
        log::info!(
            "Sending {} succeeded after {} attempt(s), {}ms since enqueue",
            message.kind,
            message.attempts,
            waited.whole_milliseconds()
        );
        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        self.emit(message.id, message.kind, message.attempts, DeliveryEventType::Acked);
        self.pause_then_send(self.settings.ack_delay);
    }

    fn on_nack(&mut self, message: OutboundMessage) {
        if message.attempts < self.settings.max_retry {
            let retry_in = self.settings.nack_delay * message.attempts;
            log::warn!(
                "{}, retrying in {:?}",
                RelayError::TransportNack {
                    kind: message.kind.clone(),
                    attempt: message.attempts
                },
                retry_in
            );
            self.emit(
                message.id,
                message.kind.clone(),
                message.attempts,
                DeliveryEventType::Nacked { retry_in },
            );
            self.backlog.push_front(message);
            self.pause_then_send(retry_in);
        } else {
            log::error!(
                "{}",
                RelayError::DeliveryExhausted {
                    kind: message.kind.clone(),
                    attempts: message.attempts
                }
            );
            self.counters.given_up.fetch_add(1, Ordering::Relaxed);
            self.emit(message.id, message.kind, message.attempts, DeliveryEventType::GivenUp);
            self.send_next();
        }
    }

    fn on_deadline(&mut self) {
        match std::mem::replace(&mut self.state, QueueState::Idle) {
            QueueState::InFlight { message, .. } => {
                log::warn!(
                    "{}",
                    RelayError::TransportTimeout {
                        kind: message.kind.clone(),
                        attempt: message.attempts
                    }
                );
                self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
                self.emit(message.id, message.kind, message.attempts, DeliveryEventType::TimedOut);
                self.send_next();
            }
            QueueState::Waiting { .. } => self.send_next(),
            QueueState::Idle => {}
        }
    }

    fn on_late_reply(&mut self, token: AttemptToken, outcome: TransportOutcome) {
        let (message_id, kind, attempt) = self
            .history
            .iter()
            .find(|a| a.token == token)
            .map(|a| (a.message_id, a.kind.clone(), a.attempt))
            .unwrap_or_else(|| (Uuid::nil(), "unknown".to_string(), 0));

        log::debug!(
            "Ignoring late {:?} for {} (token {}, attempt {})",
            outcome,
            kind,
            token.0,
            attempt
        );
        self.emit(
            message_id,
            kind,
            attempt,
            DeliveryEventType::LateReply(token, outcome),
        );
    }

    fn pause_then_send(&mut self, delay: Duration) {
        if delay.is_zero() {
            self.send_next();
        } else {
            self.state = QueueState::Waiting {
                until: Instant::now() + delay,
            };
        }
    }

    fn remember(&mut self, token: AttemptToken, message: &OutboundMessage) {
        if self.history.len() == ATTEMPT_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(SentAttempt {
            token,
            message_id: message.id,
            kind: message.kind.clone(),
            attempt: message.attempts,
        });
    }

    fn emit(&self, message_id: Uuid, kind: String, attempt: u32, event_type: DeliveryEventType) {
        let _ = self.event_tx.send(DeliveryEvent {
            message_id,
            kind,
            attempt,
            event_type,
        });
    }

    fn publish_stats(&self) {
        self.counters.backlog.store(self.backlog.len(), Ordering::Relaxed);
        self.counters.in_flight.store(
            matches!(self.state, QueueState::InFlight { .. }),
            Ordering::Relaxed,
        );
    }
}
