//! The link to the watch, seen from the delivery queue.
//!
//! A transport accepts one payload at a time and eventually calls back with an
//! ack or a nack through the `ReplyHandle` it was given, or never calls back at
//! all. The queue's own timer covers the silent case.

use std::time::Duration;
use tokio::sync::mpsc;

use crate::models::Payload;
use crate::queue::{AttemptToken, TransportOutcome};

pub trait Transport: Send + Sync + 'static {
    /// Starts sending `payload`. Must not block; the outcome is reported
    /// through `reply`, possibly after this call returns.
    fn send(&self, payload: &Payload, reply: ReplyHandle);
}

/// Single-use callback for one send attempt.
///
/// Consuming `ack`/`nack` guarantees at most one outcome per attempt. Replies
/// that arrive after the queue moved on are recognised by their token and
/// ignored.
#[derive(Debug)]
pub struct ReplyHandle {
    token: AttemptToken,
    tx: mpsc::UnboundedSender<(AttemptToken, TransportOutcome)>,
}

impl ReplyHandle {
    pub(crate) fn new(
        token: AttemptToken,
        tx: mpsc::UnboundedSender<(AttemptToken, TransportOutcome)>,
    ) -> Self {
        Self { token, tx }
    }

    pub fn token(&self) -> AttemptToken {
        self.token
    }

    pub fn ack(self) {
        self.reply(TransportOutcome::Ack);
    }

    pub fn nack(self) {
        self.reply(TransportOutcome::Nack);
    }

    fn reply(self, outcome: TransportOutcome) {
        if self.tx.send((self.token, outcome)).is_err() {
            log::debug!("Reply {:?} for attempt {:?} after queue shutdown", outcome, self.token);
        }
    }
}

/// Stand-in link for running without a watch.
///
/// Logs every payload and replies after `latency`. A share of sends is nacked
/// and another share never answered, so retries and timeouts get exercised.
#[derive(Debug, Clone)]
pub struct SimulatedLink {
    pub latency: Duration,
    pub nack_ratio: f64,
    pub silent_ratio: f64,
}

impl Default for SimulatedLink {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(50),
            nack_ratio: 0.2,
            silent_ratio: 0.0,
        }
    }
}

impl Transport for SimulatedLink {
    fn send(&self, payload: &Payload, reply: ReplyHandle) {
        log::info!("-> watch {}", payload.to_json_string());
        let roll: f64 = rand::random();
        let nack = roll < self.nack_ratio;
        let silent = !nack && roll < self.nack_ratio + self.silent_ratio;
        let latency = self.latency;

        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            if nack {
                reply.nack();
            } else if silent {
                log::debug!("Simulated link dropped attempt {:?}", reply.token());
            } else {
                reply.ack();
            }
        });
    }
}
