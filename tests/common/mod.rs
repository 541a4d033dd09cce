#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Once;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use station_relay::models::{Coordinate, Payload, Station, StationList};
use station_relay::queue::{AttemptToken, DeliveryEvent};
use station_relay::transport::{ReplyHandle, Transport};

static INIT: Once = Once::new();

pub fn init() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// How the mock link answers one send.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reply {
    Ack,
    Nack,
    /// Never answer.
    Silent,
    /// Keep the reply handle so the test can answer later.
    Hold,
}

#[derive(Debug, Clone)]
pub struct SentRecord {
    pub token: AttemptToken,
    pub payload: Payload,
    pub at: Instant,
}

/// Scripted transport: answers sends in order from `script`, then with `fallback`.
pub struct MockTransport {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    sent: Mutex<Vec<SentRecord>>,
    held: Mutex<HashMap<AttemptToken, ReplyHandle>>,
}

impl MockTransport {
    pub fn new(script: Vec<Reply>, fallback: Reply) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            sent: Mutex::new(Vec::new()),
            held: Mutex::new(HashMap::new()),
        }
    }

    pub fn acking() -> Self {
        Self::new(Vec::new(), Reply::Ack)
    }

    pub fn sent(&self) -> Vec<SentRecord> {
        self.sent.lock().clone()
    }

    pub fn sent_payloads(&self) -> Vec<Payload> {
        self.sent.lock().iter().map(|r| r.payload.clone()).collect()
    }

    /// Values of `key` in send order, for payloads that carry it as a string.
    pub fn sent_names(&self, key: &str) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|r| r.payload.get(key).and_then(|v| v.as_str()).map(str::to_string))
            .collect()
    }

    pub fn held_tokens(&self) -> Vec<AttemptToken> {
        let mut tokens: Vec<_> = self.held.lock().keys().copied().collect();
        tokens.sort();
        tokens
    }

    pub fn ack(&self, token: AttemptToken) {
        let handle = self.held.lock().remove(&token).expect("no held reply for token");
        handle.ack();
    }

    pub fn nack(&self, token: AttemptToken) {
        let handle = self.held.lock().remove(&token).expect("no held reply for token");
        handle.nack();
    }
}

impl Transport for MockTransport {
    fn send(&self, payload: &Payload, reply: ReplyHandle) {
        self.sent.lock().push(SentRecord {
            token: reply.token(),
            payload: payload.clone(),
            at: Instant::now(),
        });
        let action = self.script.lock().pop_front().unwrap_or(self.fallback);
        match action {
            Reply::Ack => reply.ack(),
            Reply::Nack => reply.nack(),
            Reply::Silent => {}
            Reply::Hold => {
                self.held.lock().insert(reply.token(), reply);
            }
        }
    }
}

/// Lets the queue task run until it is waiting on a timer or a reply.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn drain_events(rx: &mut broadcast::Receiver<DeliveryEvent>) -> Vec<DeliveryEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn named(name: &str) -> Payload {
    Payload::new().with("name", name)
}

pub fn budapest() -> Coordinate {
    Coordinate::new(47.4925, 19.0514).unwrap()
}

pub fn station(id: u64, lat: f64, lon: f64, bikes: u32) -> Station {
    Station {
        id: id.to_string(),
        name: format!("Station {}", id),
        coordinate: Coordinate::new(lat, lon).unwrap(),
        bikes_available: bikes,
        racks_total: 20,
    }
}

/// `count` stations on a line heading north-east from the city center,
/// station `i` being the i-th closest.
pub fn station_line(count: usize) -> StationList {
    let stations = (0..count)
        .map(|i| {
            let step = (i + 1) as f64 * 0.001;
            station(i as u64 + 1, 47.4925 + step, 19.0514 + step, (i % 30) as u32)
        })
        .collect();
    StationList::new(stations).unwrap()
}
