//! Typed message surface between the stream client, the coordinator, and
//! the presentation adapter.
//!
//! The stream client delivers a tagged union of event kinds over a channel
//! consumed by the coordinator's single event loop; nothing runs re-entrant
//! callbacks on the stream task.

use serde_json::{Map, Value};

use super::broker::ConditionChannel;

/// Connection lifecycle of the stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    /// Transport is up, login frame sent, ack pending.
    Connected,
    Authenticated,
    /// Terminal: explicit login rejection or shutdown. No reconnects.
    Stopped,
}

/// Observable stream-session state, published on a watch channel.
#[derive(Debug, Clone, Default)]
pub struct StreamStatus {
    pub phase: ConnectionPhase,
    pub subscriptions: usize,
    pub reconnect_attempts: u32,
}

impl StreamStatus {
    pub fn is_connected(&self) -> bool {
        matches!(
            self.phase,
            ConnectionPhase::Connected | ConnectionPhase::Authenticated
        )
    }

    pub fn is_authenticated(&self) -> bool {
        self.phase == ConnectionPhase::Authenticated
    }
}

/// Events the stream client emits to the coordinator.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Result of the login handshake; `success == false` is terminal for
    /// the stream session.
    LoginResult { success: bool, message: String },
    /// Condition-channel list delivered over the stream transport.
    ConditionList { channels: Vec<ConditionChannel> },
    /// A symbol newly matches the subscribed condition.
    ConditionHit { symbol: String },
    /// Raw execution notification; the coordinator owns parsing because
    /// the schema varies across upstream versions.
    Execution { fields: Map<String, Value> },
    /// Anything the client could not classify, forwarded fail-open.
    Unclassified { raw: Value },
}

/// Commands marshalled onto the stream task, which solely owns the socket.
#[derive(Debug, Clone)]
pub enum StreamCommand {
    Subscribe { seq: String },
    Unsubscribe { seq: String },
    RequestConditionList,
    Disconnect,
}

/// One row of the signal table shown by the presentation adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalRow {
    pub time: String,
    pub symbol: String,
    pub name: String,
    pub price: i64,
    pub change_rate: f64,
    pub volume: i64,
}

/// Events the coordinator emits for the presentation adapter.
#[derive(Debug, Clone)]
pub enum UiEvent {
    AccountUpdate {
        cash: i64,
        position_count: usize,
    },
    LogEntry {
        time: String,
        action: String,
        details: String,
        symbol: Option<String>,
    },
    ConditionListUpdate {
        channels: Vec<ConditionChannel>,
    },
    /// New signal table row.
    SignalDetected(SignalRow),
    /// Overwrite of an existing signal table row.
    SignalRealtimeUpdate(SignalRow),
}

/// Commands the presentation adapter sends into the coordinator.
#[derive(Debug, Clone)]
pub enum CoordinatorCommand {
    StartTrading,
    StopTrading,
    ChangeCondition { seq: String },
    /// Toggle a symbol's membership in the rejected set.
    RejectSymbol { symbol: String },
    ClearRejected,
    ChangeStrategy { name: String },
    ResyncBalance,
    Shutdown,
}
