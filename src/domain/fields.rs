//! Schema-tolerant field extraction for broker payloads.
//!
//! Upstream messages name the same logical field differently across API
//! versions and transports. Every alias list lives here as an ordered
//! candidate-key table, tried in priority order, so schema drift is a
//! one-place edit. Business logic never touches raw keys.

use serde_json::{Map, Value};

use super::position::OrderSide;

/// Equivalent "success" encodings of a broker `return_code`.
pub const SUCCESS_CODES: &[&str] = &["0", "00", "000"];

/// Candidate keys for the current price in a quote payload.
pub const QUOTE_PRICE_KEYS: &[&str] =
    &["stck_prpr", "close_pric", "cur_prc", "last_price", "lastPrice"];

/// Candidate keys for the day-change rate in a quote payload.
pub const QUOTE_CHANGE_RATE_KEYS: &[&str] = &["flu_rt", "prdy_ctrt", "stck_prdy_ctrt"];

/// Candidate keys for the accumulated volume in a quote payload.
pub const QUOTE_VOLUME_KEYS: &[&str] = &["trde_qty", "acml_vol", "stck_vol"];

/// Candidate keys for the display name in a quote payload.
pub const QUOTE_NAME_KEYS: &[&str] = &["stk_nm", "name", "hts_kor_isnm", "itm_nm"];

/// Candidate keys for the best bid / best ask in the secondary quote query.
pub const QUOTE_BEST_BID_KEYS: &[&str] = &["buy_fpr_bid", "bid_req_base", "best_bid"];
pub const QUOTE_BEST_ASK_KEYS: &[&str] = &["sel_fpr_bid", "ask_req_base", "best_ask"];

/// Candidate keys for the orderable cash amount in a balance payload.
pub const BALANCE_CASH_KEYS: &[&str] =
    &["d2_pymn_alow_amt", "ord_psbl_cash_amt", "can_order_amt", "dbst_bal"];

/// Candidate keys in a condition-channel list row (dict form).
pub const CONDITION_SEQ_KEYS: &[&str] = &["seq", "cnd_sq", "cond_indx"];
pub const CONDITION_NAME_KEYS: &[&str] = &["name", "cnd_nm", "cond_nm"];

/// Candidate keys in an execution notification.
pub const EXEC_SYMBOL_KEYS: &[&str] = &["stk_cd", "stock_code", "stck_shrn_iscd", "jmcode"];
pub const EXEC_PRICE_KEYS: &[&str] = &["exec_price", "cntr_pr", "cntr_uv"];
pub const EXEC_QTY_KEYS: &[&str] = &["exec_qty", "cntr_qty"];
pub const EXEC_SIDE_KEYS: &[&str] = &["buy_sell_tp", "buy_sell_dvcd", "sell_tp"];
pub const EXEC_ORDER_NO_KEYS: &[&str] = &["odno", "order_no", "ord_no"];

/// Normalized execution notification, parsed out of a raw field map.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub symbol: String,
    pub side: OrderSide,
    pub price: i64,
    pub quantity: i64,
    pub order_no: Option<String>,
}

impl ExecutionReport {
    /// Parse an execution notification. Returns `None` when any required
    /// field is missing, unparseable, or non-positive; callers discard such
    /// payloads with a diagnostic rather than mutating state.
    pub fn from_raw(fields: &Map<String, Value>) -> Option<Self> {
        let symbol = normalize_symbol(&extract_string(fields, EXEC_SYMBOL_KEYS)?);
        if symbol.is_empty() {
            return None;
        }
        let price = extract_int(fields, EXEC_PRICE_KEYS)?;
        let quantity = extract_int(fields, EXEC_QTY_KEYS)?;
        if price <= 0 || quantity <= 0 {
            return None;
        }
        let side = parse_side(&extract_string(fields, EXEC_SIDE_KEYS)?)?;
        let order_no = extract_string(fields, EXEC_ORDER_NO_KEYS);

        Some(Self {
            symbol,
            side,
            price,
            quantity,
            order_no,
        })
    }
}

/// True when `return_code` is one of the equivalent success encodings.
/// The broker emits it as integer `0` or as string `"0"`, `"00"`, `"000"`.
pub fn is_success_code(code: Option<&Value>) -> bool {
    match code {
        Some(Value::String(s)) => SUCCESS_CODES.contains(&s.trim()),
        Some(Value::Number(n)) => SUCCESS_CODES.contains(&n.to_string().as_str()),
        _ => false,
    }
}

/// Strip the venue prefix from a symbol (`A005930` -> `005930`).
pub fn normalize_symbol(raw: &str) -> String {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix('A') {
        s = rest;
    }
    if !s.is_empty() && (s.len() != 6 || !s.chars().all(|c| c.is_ascii_digit())) {
        tracing::warn!(symbol = raw, "unexpected symbol format");
    }
    s.to_string()
}

/// First candidate key present with a non-null value.
pub fn first_value<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| fields.get(*k))
        .find(|v| !v.is_null())
}

/// First candidate key rendered as a trimmed string, if any.
pub fn extract_string(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    first_value(fields, keys).and_then(scalar_string)
}

/// First candidate key parsed as a lenient integer, if any.
pub fn extract_int(fields: &Map<String, Value>, keys: &[&str]) -> Option<i64> {
    first_value(fields, keys).map(lenient_int)
}

/// First candidate key parsed as a price magnitude, if any.
pub fn extract_price(fields: &Map<String, Value>, keys: &[&str]) -> Option<i64> {
    first_value(fields, keys).map(lenient_price)
}

/// First candidate key parsed as a lenient float, if any.
pub fn extract_float(fields: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    first_value(fields, keys).map(lenient_float)
}

/// Integer parsing tolerant of thousands separators and a `+` prefix.
/// Unparseable input maps to 0, which downstream positivity guards reject.
pub fn lenient_int(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().unwrap_or_else(|| n.as_f64().unwrap_or(0.0) as i64),
        Value::String(s) => {
            let cleaned: String = s.trim().replace(',', "").replace('+', "");
            cleaned.parse().unwrap_or(0)
        }
        _ => 0,
    }
}

/// Price parsing: like [`lenient_int`] but the broker prefixes quote prices
/// with `+`/`-` to signal direction; only the magnitude is a price.
pub fn lenient_price(value: &Value) -> i64 {
    match value {
        Value::String(s) => {
            let cleaned = s.trim().replace(',', "");
            let cleaned = cleaned
                .strip_prefix('+')
                .or_else(|| cleaned.strip_prefix('-'))
                .unwrap_or(&cleaned);
            cleaned.parse().unwrap_or(0)
        }
        _ => lenient_int(value).abs(),
    }
}

/// Float parsing tolerant of thousands separators and a `%` suffix.
pub fn lenient_float(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => {
            let cleaned: String = s.trim().replace(',', "").replace('%', "");
            cleaned.parse().unwrap_or(0.0)
        }
        _ => 0.0,
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_side(raw: &str) -> Option<OrderSide> {
    match raw.trim() {
        "1" | "01" | "buy" | "BUY" => Some(OrderSide::Buy),
        "2" | "02" | "sell" | "SELL" => Some(OrderSide::Sell),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_success_code_encodings() {
        assert!(is_success_code(Some(&json!(0))));
        assert!(is_success_code(Some(&json!("0"))));
        assert!(is_success_code(Some(&json!("00"))));
        assert!(is_success_code(Some(&json!("000"))));
        assert!(!is_success_code(Some(&json!("-1"))));
        assert!(!is_success_code(Some(&json!(200))));
        assert!(!is_success_code(Some(&json!(null))));
        assert!(!is_success_code(None));
    }

    #[test]
    fn test_normalize_symbol_strips_prefix() {
        assert_eq!(normalize_symbol("A005930"), "005930");
        assert_eq!(normalize_symbol(" 005930 "), "005930");
        assert_eq!(normalize_symbol(""), "");
    }

    #[test]
    fn test_lenient_parsing() {
        assert_eq!(lenient_int(&json!("12,345")), 12_345);
        assert_eq!(lenient_int(&json!("+120")), 120);
        assert_eq!(lenient_int(&json!(77)), 77);
        assert_eq!(lenient_int(&json!("garbage")), 0);
        assert_eq!(lenient_price(&json!("-75,000")), 75_000);
        assert_eq!(lenient_price(&json!("+75,000")), 75_000);
        assert_eq!(lenient_float(&json!("3.25%")), 3.25);
        assert_eq!(lenient_float(&json!("1,234.5")), 1_234.5);
    }

    #[test]
    fn test_first_value_priority_order() {
        let fields = map(json!({"cntr_pr": "100", "exec_price": "200"}));
        // exec_price comes first in the table even though cntr_pr sorts first
        assert_eq!(extract_price(&fields, EXEC_PRICE_KEYS), Some(200));
    }

    #[test]
    fn test_first_value_skips_null() {
        let fields = map(json!({"exec_price": null, "cntr_pr": "150"}));
        assert_eq!(extract_price(&fields, EXEC_PRICE_KEYS), Some(150));
    }

    #[test]
    fn test_execution_report_buy() {
        let fields = map(json!({
            "odno": "12345",
            "stk_cd": "A005930",
            "exec_price": "75,000",
            "exec_qty": "10",
            "buy_sell_tp": "1"
        }));
        let report = ExecutionReport::from_raw(&fields).unwrap();
        assert_eq!(report.symbol, "005930");
        assert_eq!(report.side, OrderSide::Buy);
        assert_eq!(report.price, 75_000);
        assert_eq!(report.quantity, 10);
        assert_eq!(report.order_no.as_deref(), Some("12345"));
    }

    #[test]
    fn test_execution_report_alias_fallbacks() {
        let fields = map(json!({
            "stck_shrn_iscd": "000660",
            "cntr_pr": "182000",
            "cntr_qty": "3",
            "buy_sell_dvcd": "2"
        }));
        let report = ExecutionReport::from_raw(&fields).unwrap();
        assert_eq!(report.symbol, "000660");
        assert_eq!(report.side, OrderSide::Sell);
        assert_eq!(report.price, 182_000);
        assert_eq!(report.quantity, 3);
    }

    #[test]
    fn test_execution_report_rejects_missing_fields() {
        // no quantity
        let fields = map(json!({"stk_cd": "005930", "exec_price": "100", "buy_sell_tp": "1"}));
        assert!(ExecutionReport::from_raw(&fields).is_none());
        // zero quantity
        let fields = map(json!({
            "stk_cd": "005930", "exec_price": "100", "exec_qty": "0", "buy_sell_tp": "1"
        }));
        assert!(ExecutionReport::from_raw(&fields).is_none());
        // unknown side marker
        let fields = map(json!({
            "stk_cd": "005930", "exec_price": "100", "exec_qty": "1", "buy_sell_tp": "9"
        }));
        assert!(ExecutionReport::from_raw(&fields).is_none());
        // unparseable price maps to 0 and is rejected
        let fields = map(json!({
            "stk_cd": "005930", "exec_price": "abc", "exec_qty": "1", "buy_sell_tp": "1"
        }));
        assert!(ExecutionReport::from_raw(&fields).is_none());
    }
}
