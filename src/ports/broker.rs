use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::OrderSide;

/// Broker REST error taxonomy. Transient network failures are retried
/// inside the adapter before surfacing; what escapes is terminal for the
/// individual call.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("malformed broker response: {0}")]
    Malformed(String),

    #[error("broker rejected request ({code}): {message}")]
    Rejected { code: String, message: String },
}

/// Merged price snapshot: the primary price/volume sub-query plus the
/// best-quote sub-query. Best bid/ask are absent when the secondary
/// sub-query failed (degraded result, not an error).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub name: Option<String>,
    pub price: i64,
    pub change_rate: f64,
    pub volume: i64,
    pub best_bid: Option<i64>,
    pub best_ask: Option<i64>,
}

/// One holding row in a balance snapshot; used to warm the name cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldingRow {
    pub symbol: String,
    pub name: String,
}

/// Account snapshot with the canonical orderable cash figure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub cash: i64,
    pub holdings: Vec<HoldingRow>,
}

/// Normalized order submission outcome. Order calls never surface
/// transport errors as `Err`; failures map to `accepted == false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderOutcome {
    pub accepted: bool,
    pub code: String,
    pub message: String,
}

impl OrderOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            code: "-1".to_string(),
            message: message.into(),
        }
    }
}

/// A server-side saved screening query; subscribing to its channel yields
/// realtime "symbol now matches" events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionChannel {
    pub seq: String,
    pub name: String,
}

impl ConditionChannel {
    /// Parse one condition-list row. Upstream delivers either a
    /// `[seq, name]` pair (stream transport) or an alias-keyed object
    /// (REST transport).
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        use crate::domain::fields::{self, CONDITION_NAME_KEYS, CONDITION_SEQ_KEYS};

        match value {
            serde_json::Value::Array(pair) if pair.len() >= 2 => {
                let seq = pair[0].as_str().map(str::trim)?.to_string();
                let name = pair[1].as_str().map(str::trim)?.to_string();
                (!seq.is_empty() && !name.is_empty()).then_some(Self { seq, name })
            }
            serde_json::Value::Object(fields) => {
                let seq = fields::extract_string(fields, CONDITION_SEQ_KEYS)?;
                let name = fields::extract_string(fields, CONDITION_NAME_KEYS)?;
                (!seq.is_empty() && !name.is_empty()).then_some(Self { seq, name })
            }
            _ => None,
        }
    }
}

/// Abstract broker REST operations the coordinator consumes.
#[async_trait]
pub trait BrokerPort: Send + Sync {
    /// Exchange credentials for a session token, replacing any current one.
    async fn login(&self) -> Result<(), BrokerError>;

    /// Ensure a token valid beyond the safety margin, re-logging-in if
    /// needed. Failure is fatal for the calling operation.
    async fn ensure_session(&self) -> Result<(), BrokerError>;

    /// Current session token, if logged in.
    async fn access_token(&self) -> Option<String>;

    /// Merged price snapshot for one symbol.
    async fn get_price(&self, symbol: &str) -> Result<Quote, BrokerError>;

    /// Orderable cash and holdings.
    async fn get_balance(&self) -> Result<BalanceSnapshot, BrokerError>;

    /// Submit a market order. Failures are reported in the outcome.
    async fn submit_market_order(&self, side: OrderSide, symbol: &str, qty: i64) -> OrderOutcome;

    /// Saved condition channels available to this account.
    async fn get_condition_list(&self) -> Result<Vec<ConditionChannel>, BrokerError>;
}
