//! Broker REST client.
//!
//! Owns the session token (exchanged for credentials, refreshed before the
//! expiry safety margin) and wraps the price / balance / order endpoints
//! with bounded retry on transient network failure. Order submissions never
//! surface transport errors past this boundary; they map to a rejected
//! outcome instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use reqwest::Client;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::domain::fields::{
    self, is_success_code, normalize_symbol, BALANCE_CASH_KEYS, QUOTE_BEST_ASK_KEYS,
    QUOTE_BEST_BID_KEYS, QUOTE_CHANGE_RATE_KEYS, QUOTE_NAME_KEYS, QUOTE_PRICE_KEYS,
    QUOTE_VOLUME_KEYS,
};
use crate::domain::OrderSide;
use crate::ports::broker::{
    BalanceSnapshot, BrokerError, BrokerPort, ConditionChannel, HoldingRow, OrderOutcome, Quote,
};

/// Production REST endpoint.
pub const BASE_PROD: &str = "https://api.kiwoom.com";
/// Paper-trading REST endpoint.
pub const BASE_MOCK: &str = "https://mockapi.kiwoom.com";

const API_CONDITION_LIST: &str = "ka03001";
const API_STOCK_PRICE: &str = "ka10006";
const API_BEST_QUOTE: &str = "ka10004";
const API_BALANCE: &str = "ka01690";
const API_BUY_ORDER: &str = "kt10000";
const API_SELL_ORDER: &str = "kt10001";

const TRADE_TYPE_MARKET: &str = "3";
const EXCHANGE_KRX: &str = "KRX";

/// REST client configuration.
#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: String,
    pub app_key: String,
    pub app_secret: String,
    /// Token is refreshed when its remaining lifetime drops below this.
    pub token_refresh_margin: chrono::TimeDelta,
    pub login_timeout: Duration,
    pub call_timeout: Duration,
    pub max_login_attempts: u32,
    pub max_call_attempts: u32,
    pub max_order_attempts: u32,
}

impl RestConfig {
    pub fn new(app_key: String, app_secret: String, use_mock: bool) -> Self {
        Self {
            base_url: if use_mock { BASE_MOCK } else { BASE_PROD }.to_string(),
            app_key,
            app_secret,
            token_refresh_margin: chrono::TimeDelta::minutes(5),
            login_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(5),
            max_login_attempts: 3,
            max_call_attempts: 2,
            max_order_attempts: 2,
        }
    }
}

#[derive(Debug, Clone)]
struct SessionToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl SessionToken {
    fn needs_refresh(&self, now: DateTime<Utc>, margin: chrono::TimeDelta) -> bool {
        now >= self.expires_at - margin
    }
}

/// Broker REST API client.
#[derive(Debug, Clone)]
pub struct RestBrokerClient {
    config: RestConfig,
    http: Client,
    token: Arc<RwLock<Option<SessionToken>>>,
}

impl RestBrokerClient {
    pub fn new(config: RestConfig) -> Result<Self, BrokerError> {
        let http = Client::builder()
            .build()
            .map_err(|e| BrokerError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            config,
            http,
            token: Arc::new(RwLock::new(None)),
        })
    }

    // ----- authentication ---------------------------------------------

    async fn try_login(&self) -> Result<SessionToken, LoginFailure> {
        let url = format!("{}/oauth2/token", self.config.base_url);
        let body = json!({
            "grant_type": "client_credentials",
            "appkey": self.config.app_key,
            "secretkey": self.config.app_secret,
        });

        let response = self
            .http
            .post(&url)
            .timeout(self.config.login_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    LoginFailure::Retryable(e.to_string())
                } else {
                    LoginFailure::Fatal(BrokerError::Network(e.to_string()))
                }
            })?;

        let status = response.status();
        let body: Value = response.json().await.map_err(|e| {
            LoginFailure::Fatal(BrokerError::Malformed(format!("login response: {e}")))
        })?;

        if !status.is_success() {
            let message = body
                .get("return_msg")
                .and_then(Value::as_str)
                .unwrap_or("login rejected")
                .to_string();
            return Err(LoginFailure::Fatal(BrokerError::Auth(message)));
        }

        let token = body
            .get("token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                LoginFailure::Fatal(BrokerError::Auth("token field missing".to_string()))
            })?;

        if body.get("return_code").is_some() && !is_success_code(body.get("return_code")) {
            let message = body
                .get("return_msg")
                .and_then(Value::as_str)
                .unwrap_or("unknown login error")
                .to_string();
            return Err(LoginFailure::Fatal(BrokerError::Auth(message)));
        }

        Ok(SessionToken {
            value: token.to_string(),
            expires_at: parse_expiry(body.get("expires_dt").and_then(Value::as_str)),
        })
    }

    async fn current_token(&self) -> Result<String, BrokerError> {
        self.ensure_session().await?;
        self.token
            .read()
            .await
            .as_ref()
            .map(|t| t.value.clone())
            .ok_or_else(|| BrokerError::Auth("no session token".to_string()))
    }

    // ----- common call machinery --------------------------------------

    /// POST one market-data request (`api-id` header selects the query)
    /// with bounded retry on transient failures. HTTP 200 bodies without a
    /// `return_code` are treated as success.
    async fn call_api(&self, path: &str, api_id: &str, params: Value) -> Result<Value, BrokerError> {
        let token = self.current_token().await?;
        let url = format!("{}{}", self.config.base_url, path);

        let mut last_error = BrokerError::Network("no attempt made".to_string());
        for attempt in 0..self.config.max_call_attempts {
            let result = self
                .http
                .post(&url)
                .timeout(self.config.call_timeout)
                .header("authorization", format!("Bearer {token}"))
                .header("cont-yn", "N")
                .header("next-key", "")
                .header("api-id", api_id)
                .json(&params)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    let mut body: Value = response.json().await.map_err(|e| {
                        BrokerError::Malformed(format!("[{api_id}] json parse: {e}"))
                    })?;
                    if !status.is_success() {
                        return Err(BrokerError::Rejected {
                            code: status.as_u16().to_string(),
                            message: format!("[{api_id}] HTTP {status}"),
                        });
                    }
                    if let Some(obj) = body.as_object_mut() {
                        obj.entry("return_code").or_insert(json!("0"));
                    }
                    return Ok(body);
                }
                Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                    last_error = BrokerError::Network(format!("[{api_id}] {e}"));
                    let wait = Duration::from_millis(500u64 << attempt);
                    warn!(api_id, attempt, "transient failure, retrying in {wait:?}");
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(BrokerError::Network(format!("[{api_id}] {e}"))),
            }
        }
        Err(last_error)
    }

    async fn submit_order(
        &self,
        api_id: &str,
        symbol: &str,
        qty: i64,
    ) -> OrderOutcome {
        let token = match self.current_token().await {
            Ok(token) => token,
            Err(e) => {
                error!(%e, "order blocked: no valid session");
                return OrderOutcome::failure(e.to_string());
            }
        };

        let url = format!("{}/api/dostk/ordr", self.config.base_url);
        let params = json!({
            "dmst_stex_tp": EXCHANGE_KRX,
            "stk_cd": symbol,
            "ord_qty": qty.to_string(),
            "ord_uv": "",
            "trde_tp": TRADE_TYPE_MARKET,
            "cond_uv": "",
        });

        let mut last_failure = OrderOutcome::failure("no attempt made");
        for attempt in 0..self.config.max_order_attempts {
            let result = self
                .http
                .post(&url)
                .timeout(self.config.call_timeout)
                .header("authorization", format!("Bearer {token}"))
                .header("cont-yn", "N")
                .header("next-key", "")
                .header("api-id", api_id)
                .json(&params)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status_ok = response.status().is_success();
                    return match response.json::<Value>().await {
                        Ok(body) => order_outcome(status_ok, &body),
                        Err(e) => OrderOutcome::failure(format!("order response parse: {e}")),
                    };
                }
                Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                    last_failure = OrderOutcome::failure(e.to_string());
                    let wait = Duration::from_millis(300u64 << attempt);
                    warn!(api_id, attempt, "order send failed, retrying in {wait:?}");
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return OrderOutcome::failure(e.to_string()),
            }
        }
        last_failure
    }
}

enum LoginFailure {
    Retryable(String),
    Fatal(BrokerError),
}

#[async_trait]
impl BrokerPort for RestBrokerClient {
    async fn login(&self) -> Result<(), BrokerError> {
        let mut last_error = String::new();
        for attempt in 0..self.config.max_login_attempts {
            match self.try_login().await {
                Ok(token) => {
                    info!(expires_at = %token.expires_at, "broker login succeeded");
                    *self.token.write().await = Some(token);
                    return Ok(());
                }
                Err(LoginFailure::Fatal(e)) => {
                    error!(%e, "broker login failed");
                    return Err(e);
                }
                Err(LoginFailure::Retryable(msg)) => {
                    last_error = msg;
                    if attempt + 1 < self.config.max_login_attempts {
                        let wait = Duration::from_secs(1u64 << attempt);
                        warn!(attempt, "login attempt failed, retrying in {wait:?}");
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }
        Err(BrokerError::Network(format!(
            "login retries exhausted: {last_error}"
        )))
    }

    async fn ensure_session(&self) -> Result<(), BrokerError> {
        let valid = self
            .token
            .read()
            .await
            .as_ref()
            .is_some_and(|t| !t.needs_refresh(Utc::now(), self.config.token_refresh_margin));
        if valid {
            return Ok(());
        }
        info!("session token missing or near expiry, re-authenticating");
        self.login().await
    }

    async fn access_token(&self) -> Option<String> {
        self.token.read().await.as_ref().map(|t| t.value.clone())
    }

    async fn get_price(&self, symbol: &str) -> Result<Quote, BrokerError> {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() {
            return Err(BrokerError::Malformed("empty symbol".to_string()));
        }
        let params = json!({ "stk_cd": symbol });

        // Primary sub-query: price / change rate / volume. Its failure
        // fails the whole call.
        let price_body = self
            .call_api("/api/dostk/mrkcond", API_STOCK_PRICE, params.clone())
            .await?;
        if !is_success_code(price_body.get("return_code")) {
            return Err(BrokerError::Rejected {
                code: render_code(price_body.get("return_code")),
                message: render_message(&price_body),
            });
        }

        // Secondary sub-query: best bid/ask. Failure degrades the result.
        let best_quote = match self
            .call_api("/api/dostk/mrkcond", API_BEST_QUOTE, params)
            .await
        {
            Ok(body) if is_success_code(body.get("return_code")) => Some(body),
            Ok(_) | Err(_) => {
                debug!(symbol, "best-quote sub-query unavailable, degrading");
                None
            }
        };

        let mut merged = flatten_output(&price_body);
        if let Some(body) = &best_quote {
            for (k, v) in flatten_output(body) {
                merged.entry(k).or_insert(v);
            }
        }

        let price = fields::extract_price(&merged, QUOTE_PRICE_KEYS).unwrap_or(0);
        if price <= 0 {
            return Err(BrokerError::Malformed(format!(
                "no parseable price for {symbol}"
            )));
        }

        Ok(Quote {
            symbol,
            name: fields::extract_string(&merged, QUOTE_NAME_KEYS),
            price,
            change_rate: fields::extract_float(&merged, QUOTE_CHANGE_RATE_KEYS).unwrap_or(0.0),
            volume: fields::extract_int(&merged, QUOTE_VOLUME_KEYS).unwrap_or(0),
            best_bid: fields::extract_price(&merged, QUOTE_BEST_BID_KEYS).filter(|p| *p > 0),
            best_ask: fields::extract_price(&merged, QUOTE_BEST_ASK_KEYS).filter(|p| *p > 0),
        })
    }

    async fn get_balance(&self) -> Result<BalanceSnapshot, BrokerError> {
        let params = json!({ "qry_dt": Local::now().format("%Y%m%d").to_string() });
        let body = self.call_api("/api/dostk/acnt", API_BALANCE, params).await?;
        if !is_success_code(body.get("return_code")) {
            return Err(BrokerError::Rejected {
                code: render_code(body.get("return_code")),
                message: render_message(&body),
            });
        }
        Ok(parse_balance(&body))
    }

    async fn submit_market_order(&self, side: OrderSide, symbol: &str, qty: i64) -> OrderOutcome {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() || qty <= 0 {
            return OrderOutcome::failure(format!("invalid order: symbol={symbol} qty={qty}"));
        }
        let api_id = match side {
            OrderSide::Buy => API_BUY_ORDER,
            OrderSide::Sell => API_SELL_ORDER,
        };
        info!(%side, symbol, qty, "submitting market order");
        let outcome = self.submit_order(api_id, &symbol, qty).await;
        if outcome.accepted {
            info!(%side, symbol, "order accepted: {}", outcome.message);
        } else {
            error!(%side, symbol, "order rejected: {}", outcome.message);
        }
        outcome
    }

    async fn get_condition_list(&self) -> Result<Vec<ConditionChannel>, BrokerError> {
        let body = self
            .call_api("/api/dostk/mrkcond", API_CONDITION_LIST, json!({}))
            .await?;
        if !is_success_code(body.get("return_code")) {
            return Err(BrokerError::Rejected {
                code: render_code(body.get("return_code")),
                message: render_message(&body),
            });
        }
        let rows = body
            .get("output1")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let channels: Vec<ConditionChannel> = rows
            .iter()
            .filter_map(ConditionChannel::from_value)
            .collect();
        info!(count = channels.len(), "condition list fetched");
        Ok(channels)
    }
}

// ----- pure helpers ----------------------------------------------------

/// Lift `output1[0]` / `output2[0]` record contents to the top level and
/// keep top-level quote-family keys, so alias extraction sees one flat map.
fn flatten_output(body: &Value) -> Map<String, Value> {
    let mut flat = Map::new();
    let Some(obj) = body.as_object() else {
        return flat;
    };

    for key in ["output1", "output2"] {
        if let Some(first) = obj
            .get(key)
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .and_then(Value::as_object)
        {
            for (k, v) in first {
                flat.insert(k.clone(), v.clone());
            }
        }
    }

    for (k, v) in obj {
        let quote_family = k.starts_with("stck_")
            || k.starts_with("acml_")
            || matches!(k.as_str(), "flu_rt" | "trde_qty" | "stk_nm" | "cur_prc");
        if quote_family {
            flat.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    flat
}

fn parse_balance(body: &Value) -> BalanceSnapshot {
    let empty = Map::new();
    let fields_map = body.as_object().unwrap_or(&empty);
    let cash = fields::extract_int(fields_map, BALANCE_CASH_KEYS).unwrap_or(0).max(0);

    let mut holdings = Vec::new();
    if let Some(rows) = body.get("day_bal_rt").and_then(Value::as_array) {
        for row in rows {
            let Some(obj) = row.as_object() else { continue };
            let symbol = fields::extract_string(obj, &["stk_cd"])
                .map(|s| normalize_symbol(&s))
                .unwrap_or_default();
            let name = fields::extract_string(obj, &["stk_nm"]).unwrap_or_default();
            if !symbol.is_empty() {
                holdings.push(HoldingRow { symbol, name });
            }
        }
    }

    BalanceSnapshot { cash, holdings }
}

fn order_outcome(status_ok: bool, body: &Value) -> OrderOutcome {
    let code = match body.get("return_code") {
        Some(code) => render_code(Some(code)),
        None if status_ok => "0".to_string(),
        None => "-1".to_string(),
    };
    OrderOutcome {
        accepted: fields::SUCCESS_CODES.contains(&code.as_str()),
        code,
        message: render_message(body),
    }
}

fn render_code(code: Option<&Value>) -> String {
    match code {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => "-1".to_string(),
    }
}

fn render_message(body: &Value) -> String {
    body.get("return_msg")
        .and_then(Value::as_str)
        .unwrap_or("unknown broker response")
        .to_string()
}

/// Parse `expires_dt` (`%Y%m%d%H%M%S`, broker-local clock); fall back to
/// one hour from now when absent or malformed.
fn parse_expiry(expires_dt: Option<&str>) -> DateTime<Utc> {
    let fallback = Utc::now() + chrono::TimeDelta::hours(1);
    let Some(raw) = expires_dt.filter(|s| !s.is_empty()) else {
        return fallback;
    };
    match NaiveDateTime::parse_from_str(raw, "%Y%m%d%H%M%S") {
        Ok(naive) => match naive.and_local_timezone(Local) {
            chrono::LocalResult::Single(local) => local.with_timezone(&Utc),
            _ => fallback,
        },
        Err(e) => {
            warn!(raw, %e, "could not parse token expiry");
            fallback
        }
    }
}
