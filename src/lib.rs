//! At-least-once relay of short messages to a wearable over a link that allows
//! one outstanding message, plus the station geometry those messages carry.

pub mod config;
pub mod error;
pub mod geodesy;
pub mod models;
pub mod queue;
pub mod ranker;
pub mod service;
pub mod source;
pub mod transport;

pub use error::RelayError;
