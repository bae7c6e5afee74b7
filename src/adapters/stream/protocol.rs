//! Wire protocol for the broker WebSocket session.
//!
//! Frame construction and inbound classification live here so the stream
//! client deals only in typed messages. Everything unknown classifies as
//! `Unclassified` and is forwarded fail-open rather than dropped.

use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::domain::fields;
use crate::ports::broker::ConditionChannel;

pub const TRNM_LOGIN: &str = "LOGIN";
pub const TRNM_PING: &str = "PING";
pub const TRNM_CONDITION_LIST: &str = "CNSRLST";
pub const TRNM_CONDITION_SUBSCRIBE: &str = "CNSRREQ";
pub const TRNM_CONDITION_UNSUBSCRIBE: &str = "CNSRCLR";
pub const TRNM_CONDITION_REALTIME: &str = "CNSR";

/// `type` discriminator of an execution notification.
pub const EXECUTION_MSG_TYPE: &str = "00";

/// Realtime condition event markers.
const CONDITION_EVENT_ADD: &str = "ADD";

/// Candidate keys for the symbol in condition snapshot / realtime rows.
const CONDITION_SYMBOL_KEYS: &[&str] = &["jmcode", "stk_cd", "stck_shrn_iscd"];

// ----- outbound frames -------------------------------------------------

pub fn login_frame(token: &str) -> Value {
    json!({ "trnm": TRNM_LOGIN, "token": token })
}

pub fn subscribe_frame(seq: &str) -> Value {
    json!({
        "trnm": TRNM_CONDITION_SUBSCRIBE,
        "seq": seq,
        // 1 selects search + realtime subscription, 0 is one-shot search
        "search_type": "1",
        "stex_tp": "K",
    })
}

pub fn unsubscribe_frame(seq: &str) -> Value {
    json!({ "trnm": TRNM_CONDITION_UNSUBSCRIBE, "seq": seq })
}

pub fn condition_list_frame() -> Value {
    json!({ "trnm": TRNM_CONDITION_LIST })
}

// ----- inbound classification ------------------------------------------

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Transport keep-alive; echoed back verbatim, never an app event.
    Ping(Value),
    LoginAck { success: bool, message: String },
    ConditionList(Vec<ConditionChannel>),
    /// List-form snapshot: every symbol currently matching the condition.
    ConditionSnapshot(Vec<String>),
    /// Single add/remove event on a subscribed condition.
    ConditionRealtime { symbol: String, added: bool },
    UnsubscribeAck,
    /// Raw execution notification fields, parsed by the coordinator.
    Execution(Map<String, Value>),
    Unclassified(Value),
}

pub fn classify(message: Value) -> InboundMessage {
    let trnm = message.get("trnm").and_then(Value::as_str).unwrap_or("");

    match trnm {
        TRNM_PING => return InboundMessage::Ping(message),
        TRNM_LOGIN => {
            let success = fields::is_success_code(message.get("return_code"));
            let message = message
                .get("return_msg")
                .and_then(Value::as_str)
                .unwrap_or(if success { "login ok" } else { "login rejected" })
                .to_string();
            return InboundMessage::LoginAck { success, message };
        }
        TRNM_CONDITION_LIST => {
            let channels = message
                .get("data")
                .or_else(|| message.get("output1"))
                .and_then(Value::as_array)
                .map(|rows| rows.iter().filter_map(ConditionChannel::from_value).collect())
                .unwrap_or_default();
            return InboundMessage::ConditionList(channels);
        }
        TRNM_CONDITION_SUBSCRIBE => {
            let symbols = message
                .get("data")
                .and_then(Value::as_array)
                .map(|rows| {
                    rows.iter()
                        .filter_map(|row| row.as_object())
                        .filter_map(|obj| fields::extract_string(obj, CONDITION_SYMBOL_KEYS))
                        .map(|raw| fields::normalize_symbol(&raw))
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default();
            return InboundMessage::ConditionSnapshot(symbols);
        }
        TRNM_CONDITION_REALTIME => {
            let added = message
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|t| t.eq_ignore_ascii_case(CONDITION_EVENT_ADD));
            let symbol = message
                .as_object()
                .and_then(|obj| fields::extract_string(obj, CONDITION_SYMBOL_KEYS))
                .map(|raw| fields::normalize_symbol(&raw))
                .unwrap_or_default();
            if !symbol.is_empty() {
                return InboundMessage::ConditionRealtime { symbol, added };
            }
            return InboundMessage::Unclassified(message);
        }
        TRNM_CONDITION_UNSUBSCRIBE => return InboundMessage::UnsubscribeAck,
        _ => {}
    }

    // Execution notifications carry no trnm; the `type` field discriminates.
    if message.get("type").and_then(Value::as_str) == Some(EXECUTION_MSG_TYPE) {
        if let Some(obj) = message.as_object() {
            return InboundMessage::Execution(obj.clone());
        }
    }

    InboundMessage::Unclassified(message)
}

// ----- reconnection policy ---------------------------------------------

/// Reconnect timing: exponential backoff per attempt, capped, with a long
/// cooldown after the attempt cap that resets the cycle. The stream never
/// gives up permanently; only an explicit login rejection is terminal.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub cooldown: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            max_attempts: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStep {
    /// Wait this long, then retry the connection.
    Retry(Duration),
    /// Attempt cap reached: wait out the cooldown; the backoff has reset.
    Cooldown(Duration),
}

/// Per-connection backoff state driven by [`ReconnectPolicy`].
#[derive(Debug)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
    delay: Duration,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        let delay = policy.base_delay;
        Self {
            policy,
            attempt: 0,
            delay,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Advance after a connection failure.
    pub fn next_step(&mut self) -> BackoffStep {
        if self.attempt >= self.policy.max_attempts {
            let cooldown = self.policy.cooldown;
            self.reset();
            return BackoffStep::Cooldown(cooldown);
        }
        let wait = self.delay.min(self.policy.max_delay);
        self.attempt += 1;
        self.delay = (self.delay * 2).min(self.policy.max_delay);
        BackoffStep::Retry(wait)
    }

    /// A successful connection resets the cycle.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.delay = self.policy.base_delay;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_ping_echoes_payload() {
        let frame = json!({"trnm": "PING", "nonce": "abc"});
        match classify(frame.clone()) {
            InboundMessage::Ping(payload) => assert_eq!(payload, frame),
            other => panic!("expected Ping, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_login_ack() {
        let ok = classify(json!({"trnm": "LOGIN", "return_code": 0}));
        assert_eq!(
            ok,
            InboundMessage::LoginAck {
                success: true,
                message: "login ok".to_string()
            }
        );
        let rejected = classify(json!({
            "trnm": "LOGIN", "return_code": "1", "return_msg": "token expired"
        }));
        assert_eq!(
            rejected,
            InboundMessage::LoginAck {
                success: false,
                message: "token expired".to_string()
            }
        );
    }

    #[test]
    fn test_classify_condition_list_pair_rows() {
        let msg = json!({
            "trnm": "CNSRLST",
            "return_code": 0,
            "data": [["0", "Volume spike"], ["3", "Gap up"]],
        });
        match classify(msg) {
            InboundMessage::ConditionList(channels) => {
                assert_eq!(channels.len(), 2);
                assert_eq!(channels[1].seq, "3");
                assert_eq!(channels[1].name, "Gap up");
            }
            other => panic!("expected ConditionList, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_condition_snapshot() {
        let msg = json!({
            "trnm": "CNSRREQ",
            "data": [{"jmcode": "A005930"}, {"stk_cd": "000660"}, {"noise": true}],
        });
        assert_eq!(
            classify(msg),
            InboundMessage::ConditionSnapshot(vec!["005930".to_string(), "000660".to_string()])
        );
    }

    #[test]
    fn test_classify_condition_realtime_add_and_del() {
        let add = classify(json!({"trnm": "CNSR", "type": "ADD", "stk_cd": "005930"}));
        assert_eq!(
            add,
            InboundMessage::ConditionRealtime {
                symbol: "005930".to_string(),
                added: true
            }
        );
        let del = classify(json!({"trnm": "CNSR", "type": "DEL", "jmcode": "005930"}));
        assert_eq!(
            del,
            InboundMessage::ConditionRealtime {
                symbol: "005930".to_string(),
                added: false
            }
        );
    }

    #[test]
    fn test_classify_execution_by_type_discriminator() {
        let msg = json!({"type": "00", "stk_cd": "005930", "exec_price": "75000"});
        match classify(msg) {
            InboundMessage::Execution(fields) => {
                assert_eq!(fields.get("stk_cd").unwrap(), "005930");
            }
            other => panic!("expected Execution, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_unknown_is_fail_open() {
        let msg = json!({"trnm": "MYSTERY", "payload": 1});
        assert!(matches!(classify(msg), InboundMessage::Unclassified(_)));
    }

    #[test]
    fn test_subscribe_frame_fields() {
        let frame = subscribe_frame("5");
        assert_eq!(frame["trnm"], "CNSRREQ");
        assert_eq!(frame["seq"], "5");
        assert_eq!(frame["search_type"], "1");
        assert_eq!(frame["stex_tp"], "K");
    }

    #[test]
    fn test_backoff_doubles_then_cools_down() {
        let mut backoff = Backoff::new(ReconnectPolicy::default());
        assert_eq!(
            backoff.next_step(),
            BackoffStep::Retry(Duration::from_secs(2))
        );
        assert_eq!(
            backoff.next_step(),
            BackoffStep::Retry(Duration::from_secs(4))
        );
        assert_eq!(
            backoff.next_step(),
            BackoffStep::Retry(Duration::from_secs(8))
        );
        assert_eq!(
            backoff.next_step(),
            BackoffStep::Cooldown(Duration::from_secs(60))
        );
        // cooldown resets the cycle
        assert_eq!(
            backoff.next_step(),
            BackoffStep::Retry(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_backoff_caps_at_max_delay() {
        let mut backoff = Backoff::new(ReconnectPolicy {
            max_attempts: 8,
            ..ReconnectPolicy::default()
        });
        let mut waits = Vec::new();
        for _ in 0..8 {
            match backoff.next_step() {
                BackoffStep::Retry(d) => waits.push(d.as_secs()),
                BackoffStep::Cooldown(_) => panic!("cooldown before attempt cap"),
            }
        }
        assert_eq!(waits, vec![2, 4, 8, 16, 32, 60, 60, 60]);
    }

    #[test]
    fn test_backoff_reset_on_success() {
        let mut backoff = Backoff::new(ReconnectPolicy::default());
        backoff.next_step();
        backoff.next_step();
        backoff.reset();
        assert_eq!(
            backoff.next_step(),
            BackoffStep::Retry(Duration::from_secs(2))
        );
    }
}
