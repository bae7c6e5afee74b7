//! Broker REST adapter: token lifecycle, quotes, balance, market orders.

pub mod client;

pub use client::{RestBrokerClient, RestConfig, BASE_MOCK, BASE_PROD};
