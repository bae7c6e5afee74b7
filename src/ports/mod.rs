//! Ports Layer - Trait definitions for external dependencies
//!
//! Following hexagonal architecture, these abstract:
//! - Broker REST operations (login, quotes, balance, orders)
//! - Stream events/commands exchanged with the WebSocket session
//! - Events/commands exchanged with the presentation adapter

pub mod broker;
pub mod events;
pub mod mocks;

pub use broker::{
    BalanceSnapshot, BrokerError, BrokerPort, ConditionChannel, HoldingRow, OrderOutcome, Quote,
};
pub use events::{
    ConnectionPhase, CoordinatorCommand, SignalRow, StreamCommand, StreamEvent, StreamStatus,
    UiEvent,
};
pub use mocks::MockBroker;
