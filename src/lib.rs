#![allow(dead_code, unused_imports, unused_variables)]
//! Sentry Trader - condition-signal auto trader library
//!
//! Subscribes to a brokerage's server-side condition screening feed,
//! market-buys on signal, and exits positions on take-profit/stop-loss
//! thresholds evaluated against polled quotes.
//!
//! # Modules
//!
//! - `domain`: Core trading state and types (Position, PendingSignal,
//!   TradingState, schema-tolerant field extraction)
//! - `ports`: Trait abstractions and message types (BrokerPort, stream
//!   events/commands, presentation events/commands, mocks)
//! - `adapters`: External implementations (broker REST, broker WebSocket,
//!   CLI/console)
//! - `config`: Configuration loading and validation
//! - `application`: The trading coordinator

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
