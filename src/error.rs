use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Reference point has not been set")]
    UninitializedReference,

    #[error("Transport rejected {kind} (attempt {attempt})")]
    TransportNack { kind: String, attempt: u32 },

    #[error("Sending {kind} timed out (attempt {attempt})")]
    TransportTimeout { kind: String, attempt: u32 },

    #[error("Giving up on sending {kind} after {attempts} attempts")]
    DeliveryExhausted { kind: String, attempts: u32 },

    #[error("Delivery queue is closed")]
    QueueClosed,

    #[error("Station source failed: {0}")]
    Source(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
