// Re-export all necessary types and interfaces
mod types;
mod q_core;
mod q_impl;

// Public exports from the queue module
pub use types::*;
pub use q_core::{DeliveryHandle, DeliveryQueue};

// Constants
/// Default number of attempts per message
pub const DEFAULT_MAX_RETRY: u32 = 5;

/// Default pause after an ack, in milliseconds
pub const DEFAULT_ACK_DELAY_MS: u64 = 0;

/// Default backoff base after a nack, in milliseconds
pub const DEFAULT_NACK_DELAY_MS: u64 = 200;

/// Default time to wait for an ack or nack, in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Default capacity of the delivery event channel
pub const DEFAULT_EVENT_BUFFER: usize = 256;
