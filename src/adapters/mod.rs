//! Adapters Layer - External System Implementations
//!
//! This module contains implementations of the port traits:
//! - REST: broker HTTP API client (token, quotes, balance, orders)
//! - Stream: broker WebSocket session (conditions, executions)
//! - CLI: command-line interface and console event rendering

pub mod cli;
pub mod rest;
pub mod stream;

pub use rest::{RestBrokerClient, RestConfig};
pub use stream::{StreamClient, StreamConfig, StreamHandle};
