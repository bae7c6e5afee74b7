//! Broker WebSocket adapter: session client and wire protocol.

pub mod client;
pub mod protocol;

pub use client::{StreamClient, StreamConfig, StreamHandle, WS_URL_MOCK, WS_URL_PROD};
pub use protocol::{Backoff, BackoffStep, InboundMessage, ReconnectPolicy};
