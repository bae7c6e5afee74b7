//! Trading coordinator.
//!
//! Owns the whole trading session: REST login, stream session lifecycle,
//! and every piece of mutable trading state. The coordinator is a
//! single-owner actor — one event loop consumes stream events, presentation
//! commands, and the two poll timers, so check-then-act sequences
//! ("position count below limit, then buy") never race across tasks.
//! Order submission and its optimistic state update complete within one
//! handler turn, which is what lets execution notifications refine, never
//! precede, the optimistic bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::adapters::stream::{StreamClient, StreamConfig};
use crate::domain::fields::normalize_symbol;
use crate::domain::{ExecutionReport, OrderSide, Position, PriceSnapshot, TradingState};
use crate::ports::broker::{BrokerError, BrokerPort};
use crate::ports::events::{
    CoordinatorCommand, SignalRow, StreamCommand, StreamEvent, StreamStatus, UiEvent,
};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("initialization failed: {0}")]
    Init(String),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// One named exit rule: thresholds in percent relative to entry price.
/// `stop_loss_pct` is negative; both boundaries are inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct SellStrategy {
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

impl Default for SellStrategy {
    fn default() -> Self {
        Self {
            stop_loss_pct: -2.0,
            take_profit_pct: 3.0,
        }
    }
}

/// Daily trading-hours window, boundaries inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradingWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TradingWindow {
    pub fn contains(&self, t: NaiveTime) -> bool {
        self.start <= t && t <= self.end
    }
}

impl Default for TradingWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        }
    }
}

/// Runtime settings the coordinator reads at start and on strategy switch.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Condition channel subscribed after initialization.
    pub condition_seq: String,
    /// Maximum price per share the auto-buy will pay.
    pub buy_amount: i64,
    /// Maximum number of concurrently open positions.
    pub max_positions: usize,
    pub window: TradingWindow,
    /// Named sell strategies; `active_strategy` selects one.
    pub strategies: HashMap<String, SellStrategy>,
    pub active_strategy: String,
    /// TP/SL evaluation period.
    pub poll_interval: Duration,
    /// Pending-signal refresh period.
    pub refresh_interval: Duration,
    /// Pending signals older than this are purged.
    pub pending_retention: TimeDelta,
    pub connect_timeout: Duration,
    pub auth_timeout: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        let mut strategies = HashMap::new();
        strategies.insert("default".to_string(), SellStrategy::default());
        Self {
            condition_seq: "0".to_string(),
            buy_amount: 5_000,
            max_positions: 10,
            window: TradingWindow::default(),
            strategies,
            active_strategy: "default".to_string(),
            poll_interval: Duration::from_secs(5),
            refresh_interval: Duration::from_secs(5),
            pending_retention: TimeDelta::hours(1),
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(5),
        }
    }
}

/// The trading/session coordinator. Generic over the broker port so tests
/// drive it with a recording mock.
pub struct TradingCoordinator<B: BrokerPort> {
    broker: Arc<B>,
    settings: CoordinatorSettings,
    strategy: SellStrategy,
    state: TradingState,
    is_trading: bool,
    ui: mpsc::UnboundedSender<UiEvent>,
    stream: mpsc::Sender<StreamCommand>,
}

impl<B: BrokerPort> TradingCoordinator<B> {
    pub fn new(
        broker: Arc<B>,
        settings: CoordinatorSettings,
        ui: mpsc::UnboundedSender<UiEvent>,
        stream: mpsc::Sender<StreamCommand>,
    ) -> Self {
        let strategy = match settings.strategies.get(&settings.active_strategy) {
            Some(strategy) => strategy.clone(),
            None => {
                warn!(
                    name = settings.active_strategy,
                    "active sell strategy not configured, using defaults"
                );
                SellStrategy::default()
            }
        };
        Self {
            broker,
            settings,
            strategy,
            state: TradingState::new(),
            is_trading: false,
            ui,
            stream,
        }
    }

    // ----- read-side accessors (presentation / tests) ------------------

    pub fn state(&self) -> &TradingState {
        &self.state
    }

    pub fn is_trading(&self) -> bool {
        self.is_trading
    }

    pub fn strategy(&self) -> &SellStrategy {
        &self.strategy
    }

    pub fn condition_seq(&self) -> &str {
        &self.settings.condition_seq
    }

    // ----- lifecycle ---------------------------------------------------

    /// Initialize the session and run the event loop until shutdown.
    ///
    /// Initialization phases, each of which can fail terminally:
    /// REST login, stream transport connect (bounded), stream
    /// authentication (bounded), condition-channel list (REST with stream
    /// fallback), balance snapshot, default condition subscription.
    pub async fn run(
        mut self,
        ws_url: String,
        mut commands: mpsc::Receiver<CoordinatorCommand>,
    ) -> Result<(), CoordinatorError> {
        self.emit_log("system", "initializing trading session", None);

        // 1) REST session
        if let Err(e) = self.broker.ensure_session().await {
            self.emit_log("error", format!("initialization failed: {e}"), None);
            return Err(CoordinatorError::Init(format!("broker login: {e}")));
        }
        let token = self
            .broker
            .access_token()
            .await
            .ok_or_else(|| CoordinatorError::Init("no session token after login".to_string()))?;

        // 2) stream transport
        let (client, handle, mut events) = StreamClient::new(StreamConfig::new(ws_url, token));
        let mut stream_task = tokio::spawn(client.run());
        self.stream = handle.commands.clone();
        let mut status = handle.status.clone();

        if wait_for_status(&mut status, self.settings.connect_timeout, |s| {
            s.is_connected()
        })
        .await
        .is_none()
        {
            self.emit_log("error", "stream connection timed out", None);
            stream_task.abort();
            return Err(CoordinatorError::Init("stream connection timed out".to_string()));
        }

        // 3) stream authentication
        let authed = wait_for_status(&mut status, self.settings.auth_timeout, |s| {
            s.is_authenticated() || s.phase == crate::ports::events::ConnectionPhase::Stopped
        })
        .await;
        if !authed.map(|s| s.is_authenticated()).unwrap_or(false) {
            self.emit_log("error", "stream authentication failed", None);
            stream_task.abort();
            return Err(CoordinatorError::Init("stream authentication failed".to_string()));
        }

        // 4) condition-channel list: REST first, stream fallback
        match self.broker.get_condition_list().await {
            Ok(channels) => {
                self.emit(UiEvent::ConditionListUpdate { channels });
            }
            Err(e) => {
                warn!(%e, "REST condition list unavailable, requesting over stream");
                let _ = self.stream.send(StreamCommand::RequestConditionList).await;
            }
        }

        // 5) balance snapshot (also warms the symbol-name cache)
        self.resync_balance().await;

        // 6) default condition subscription
        let seq = self.settings.condition_seq.clone();
        let _ = self.stream.send(StreamCommand::Subscribe { seq: seq.clone() }).await;
        self.emit_log("system", format!("subscribed to condition channel {seq}"), None);
        self.emit_log("system", "initialization complete", None);

        // ----- main event loop -----
        let mut poll = tokio::time::interval(self.settings.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut refresh = tokio::time::interval(self.settings.refresh_interval);
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => self.on_stream_event(event).await,
                        None => {
                            warn!("stream event channel closed");
                            break;
                        }
                    }
                }
                command = commands.recv() => {
                    match command {
                        None | Some(CoordinatorCommand::Shutdown) => break,
                        Some(command) => self.on_command(command).await,
                    }
                }
                _ = poll.tick() => {
                    self.check_positions(Local::now().naive_local()).await;
                }
                _ = refresh.tick() => {
                    self.refresh_pending(Local::now().naive_local()).await;
                }
            }
        }

        // shutdown: stop trading, drop the stream, join its task
        if self.is_trading {
            self.stop_trading();
        }
        let _ = self.stream.send(StreamCommand::Disconnect).await;
        if tokio::time::timeout(Duration::from_secs(5), &mut stream_task)
            .await
            .is_err()
        {
            warn!("stream task did not terminate in time, aborting");
            stream_task.abort();
        }
        self.emit_log("system", "shutdown complete", None);
        Ok(())
    }

    pub async fn on_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::LoginResult { success, message } => {
                if success {
                    self.emit_log("system", "stream session authenticated", None);
                } else {
                    self.emit_log("error", format!("stream login failed: {message}"), None);
                }
            }
            StreamEvent::ConditionList { channels } => {
                self.emit(UiEvent::ConditionListUpdate { channels });
            }
            StreamEvent::ConditionHit { symbol } => {
                self.on_condition_hit(&symbol, Local::now().naive_local())
                    .await;
            }
            StreamEvent::Execution { fields } => self.on_execution(&fields),
            StreamEvent::Unclassified { raw } => {
                debug!(payload = %raw, "unclassified stream payload ignored");
            }
        }
    }

    pub async fn on_command(&mut self, command: CoordinatorCommand) {
        match command {
            CoordinatorCommand::StartTrading => {
                self.start_trading(Local::now().naive_local()).await;
            }
            CoordinatorCommand::StopTrading => self.stop_trading(),
            CoordinatorCommand::ChangeCondition { seq } => self.change_condition(&seq).await,
            CoordinatorCommand::RejectSymbol { symbol } => self.reject_symbol(&symbol),
            CoordinatorCommand::ClearRejected => self.clear_rejected(),
            CoordinatorCommand::ChangeStrategy { name } => self.change_strategy(&name),
            CoordinatorCommand::ResyncBalance => self.resync_balance().await,
            CoordinatorCommand::Shutdown => unreachable!("handled by the event loop"),
        }
    }

    // ----- signal intake ----------------------------------------------

    /// A symbol newly matches the subscribed condition. The signal is
    /// recorded and surfaced regardless of trading state; a buy only
    /// happens when every gate passes.
    pub async fn on_condition_hit(&mut self, symbol: &str, now: NaiveDateTime) {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() {
            return;
        }
        if self.state.is_rejected(&symbol) {
            debug!(symbol, "signal ignored: symbol rejected by operator");
            return;
        }
        if !self.state.can_reenter(&symbol, now.date()) {
            debug!(symbol, "signal ignored: same-day reentry block");
            return;
        }

        let Some(snapshot) = self.fetch_snapshot(&symbol).await else {
            return;
        };

        self.emit(UiEvent::SignalDetected(signal_row(&snapshot, now.time())));
        self.state.record_pending(&snapshot, now);

        if !self.is_trading || !self.settings.window.contains(now.time()) {
            return;
        }
        if self.state.position_count() >= self.settings.max_positions {
            debug!(symbol, "signal observed only: position limit reached");
            return;
        }
        if self.state.has_position(&symbol) {
            return;
        }

        self.auto_buy(&snapshot).await;
    }

    /// Market-buy one share when the signal passes the price and cash
    /// gates. A position is created only on acceptance, priced at the
    /// snapshot (approximate until the fill confirms).
    async fn auto_buy(&mut self, snapshot: &PriceSnapshot) {
        let price = snapshot.price;
        if price > self.settings.buy_amount {
            debug!(
                symbol = snapshot.symbol,
                price, "auto-buy skipped: price above per-share budget"
            );
            return;
        }
        let cash = self.state.cash();
        if cash <= 0 {
            debug!(symbol = snapshot.symbol, "auto-buy skipped: no cash");
            return;
        }
        let qty: i64 = 1;
        let cost = price * qty;
        if cash < cost {
            debug!(
                symbol = snapshot.symbol,
                cash, cost, "auto-buy skipped: insufficient cash"
            );
            return;
        }

        let outcome = self
            .broker
            .submit_market_order(OrderSide::Buy, &snapshot.symbol, qty)
            .await;

        if !outcome.accepted {
            self.emit_log(
                "buy_order",
                format!(
                    "{} ({}) market buy rejected: {}",
                    snapshot.name, snapshot.symbol, outcome.message
                ),
                Some(&snapshot.symbol),
            );
            return;
        }

        self.emit_log(
            "buy_order",
            format!(
                "{} ({}) market buy accepted, qty {qty} at ~{price}",
                snapshot.name, snapshot.symbol
            ),
            Some(&snapshot.symbol),
        );

        match Position::new(&snapshot.symbol, &snapshot.name, qty, price) {
            Ok(position) => {
                self.state.open_position(position);
            }
            Err(e) => {
                warn!(symbol = snapshot.symbol, %e, "position not recorded");
                return;
            }
        }
        self.state.debit_cash(cost);
        self.emit_account();
        debug!(
            symbol = snapshot.symbol,
            approx_entry = price,
            "awaiting execution notification for confirmed entry price"
        );
    }

    // ----- execution reconciliation ------------------------------------

    /// Reconcile an execution notification against the optimistic state.
    /// Buy fills overwrite the approximate entry (or create the position
    /// when the fill out-ran the submission bookkeeping). Sell fills only
    /// log: settlement already happened at submission time.
    pub fn on_execution(&mut self, fields: &Map<String, Value>) {
        let Some(report) = ExecutionReport::from_raw(fields) else {
            let preview: String = Value::Object(fields.clone()).to_string().chars().take(200).collect();
            warn!(preview, "execution notification missing required fields, discarded");
            return;
        };

        let name = self
            .state
            .cached_name(&report.symbol)
            .unwrap_or(&report.symbol)
            .to_string();

        match report.side {
            OrderSide::Buy => {
                if let Some(position) = self.state.position_mut(&report.symbol) {
                    let old_entry = position.entry_price;
                    if position.confirm_fill(report.price, report.quantity).is_ok() {
                        self.emit_log(
                            "execution",
                            format!(
                                "{name} buy filled: {} x{} (entry {old_entry} -> {})",
                                report.price, report.quantity, report.price
                            ),
                            Some(&report.symbol),
                        );
                    }
                } else {
                    // fill delivered before (or without) our optimistic entry
                    match Position::new(&report.symbol, &name, report.quantity, report.price) {
                        Ok(mut position) => {
                            position.confirmed = true;
                            self.state.open_position(position);
                            self.emit_log(
                                "execution",
                                format!(
                                    "{name} buy filled with no tracked position: {} x{}",
                                    report.price, report.quantity
                                ),
                                Some(&report.symbol),
                            );
                        }
                        Err(e) => warn!(symbol = report.symbol, %e, "fill not recorded"),
                    }
                }
            }
            OrderSide::Sell => {
                let amount = report.price * report.quantity;
                self.emit_log(
                    "execution",
                    format!(
                        "{name} sell filled: {} x{} (total {amount})",
                        report.price, report.quantity
                    ),
                    Some(&report.symbol),
                );
                self.reconcile_sell(&report);
            }
        }
    }

    /// Sell-side reconciliation hook. Cash and position removal were
    /// applied optimistically when the sell order was accepted; today the
    /// confirmed amount is only observed. Adjusting cash by the difference
    /// between approximate and confirmed proceeds would go here.
    fn reconcile_sell(&mut self, report: &ExecutionReport) {
        debug!(
            symbol = report.symbol,
            confirmed_price = report.price,
            confirmed_qty = report.quantity,
            "sell execution observed; optimistic settlement kept"
        );
    }

    // ----- TP/SL polling -----------------------------------------------

    /// Evaluate every open position against the active sell strategy.
    /// Thresholds are inclusive on both sides.
    pub async fn check_positions(&mut self, now: NaiveDateTime) {
        if !self.is_trading || self.state.position_count() == 0 {
            return;
        }
        if !self.settings.window.contains(now.time()) {
            return;
        }

        debug!(
            count = self.state.position_count(),
            "evaluating TP/SL on open positions"
        );

        for symbol in self.state.position_symbols() {
            let Some(snapshot) = self.fetch_snapshot(&symbol).await else {
                continue;
            };
            self.emit(UiEvent::SignalRealtimeUpdate(signal_row(
                &snapshot,
                now.time(),
            )));

            let Some(position) = self.state.position(&symbol) else {
                continue;
            };
            let entry = position.entry_price;
            let qty = position.quantity;
            if entry <= 0 || qty <= 0 {
                continue;
            }

            let profit_rate = position.profit_rate(snapshot.price);
            debug!(
                symbol,
                entry,
                current = snapshot.price,
                profit_rate = format!("{profit_rate:.2}"),
                "TP/SL check"
            );

            if profit_rate >= self.strategy.take_profit_pct {
                self.emit_log(
                    "sell_order",
                    format!(
                        "{symbol} reached take-profit ({profit_rate:.2}% >= {:.2}%), selling all",
                        self.strategy.take_profit_pct
                    ),
                    Some(&symbol),
                );
                self.auto_sell(&symbol, qty, snapshot.price, now.date()).await;
            } else if profit_rate <= self.strategy.stop_loss_pct {
                self.emit_log(
                    "sell_order",
                    format!(
                        "{symbol} reached stop-loss ({profit_rate:.2}% <= {:.2}%), selling all",
                        self.strategy.stop_loss_pct
                    ),
                    Some(&symbol),
                );
                self.auto_sell(&symbol, qty, snapshot.price, now.date()).await;
            }
        }
    }

    /// Market-sell the full quantity. On acceptance the position is
    /// removed and cash credited optimistically at the approximate price;
    /// the symbol is blocked from re-entry for the rest of the day.
    async fn auto_sell(&mut self, symbol: &str, qty: i64, approx_price: i64, today: NaiveDate) {
        if symbol.is_empty() || qty <= 0 {
            return;
        }

        let outcome = self
            .broker
            .submit_market_order(OrderSide::Sell, symbol, qty)
            .await;

        if !outcome.accepted {
            self.emit_log(
                "sell_order",
                format!("{symbol} market sell rejected: {}", outcome.message),
                Some(symbol),
            );
            return;
        }

        self.emit_log(
            "sell_order",
            format!("{symbol} market sell accepted, qty {qty} at ~{approx_price}"),
            Some(symbol),
        );
        self.state.close_position(symbol);
        self.state.credit_cash(approx_price * qty);
        self.emit_account();
        self.state.block_reentry(symbol, today);
        self.emit_log(
            "system",
            format!("{symbol} sold today; same-day re-entry blocked"),
            Some(symbol),
        );
    }

    // ----- pending-signal refresh --------------------------------------

    /// Purge signals past the retention window, then refresh the quote
    /// fields of the survivors. Purged signals emit no further updates.
    pub async fn refresh_pending(&mut self, now: NaiveDateTime) {
        if self.state.pending_count() == 0 {
            return;
        }

        for symbol in self
            .state
            .purge_stale_pending(now, self.settings.pending_retention)
        {
            debug!(symbol, "pending signal expired");
        }

        for symbol in self.state.pending_symbols() {
            let Some(snapshot) = self.fetch_snapshot(&symbol).await else {
                continue;
            };
            self.emit(UiEvent::SignalRealtimeUpdate(signal_row(
                &snapshot,
                now.time(),
            )));
            self.state.refresh_pending(&snapshot);
        }
    }

    // ----- user commands -----------------------------------------------

    /// Enable auto trading: resync the balance, then sweep pending
    /// signals that became eligible while trading was disabled.
    pub async fn start_trading(&mut self, now: NaiveDateTime) {
        if self.is_trading {
            debug!("start ignored: already trading");
            return;
        }
        if self.broker.access_token().await.is_none() {
            self.emit_log("error", "cannot start trading: not logged in", None);
            return;
        }

        self.resync_balance().await;
        self.is_trading = true;
        self.emit_log(
            "system",
            format!(
                "auto trading started: condition={}, qty per signal=1, max positions={}, TP={}%, SL={}%",
                self.settings.condition_seq,
                self.settings.max_positions,
                self.strategy.take_profit_pct,
                self.strategy.stop_loss_pct
            ),
            None,
        );

        for signal in self.state.pending_signals() {
            let symbol = signal.symbol.clone();
            if self.state.is_rejected(&symbol) || self.state.has_position(&symbol) {
                continue;
            }
            if !self.state.can_reenter(&symbol, now.date()) {
                continue;
            }
            if self.state.position_count() >= self.settings.max_positions {
                break;
            }
            let snapshot = PriceSnapshot {
                symbol: signal.symbol,
                name: signal.name,
                price: signal.price,
                change_rate: signal.change_rate,
                volume: signal.volume,
            };
            self.auto_buy(&snapshot).await;
        }
    }

    pub fn stop_trading(&mut self) {
        self.is_trading = false;
        self.emit_log("system", "auto trading stopped", None);
    }

    /// Switch condition channels over the stream transport. Asynchronous,
    /// no acknowledgement awaited.
    pub async fn change_condition(&mut self, seq: &str) {
        let seq = seq.trim().to_string();
        if seq.is_empty() {
            return;
        }
        let old = std::mem::replace(&mut self.settings.condition_seq, seq.clone());
        if !old.is_empty() {
            let _ = self.stream.send(StreamCommand::Unsubscribe { seq: old }).await;
        }
        let _ = self
            .stream
            .send(StreamCommand::Subscribe { seq: seq.clone() })
            .await;
        self.emit_log("system", format!("condition channel changed to {seq}"), None);
    }

    /// Toggle a symbol's membership in the rejected set. Local state only;
    /// in-flight orders are not cancelled.
    pub fn reject_symbol(&mut self, symbol: &str) {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() {
            return;
        }
        if self.state.toggle_rejected(&symbol) {
            self.emit_log(
                "system",
                format!("{symbol} excluded from auto-buy"),
                Some(&symbol),
            );
        } else {
            self.emit_log(
                "system",
                format!("{symbol} re-included in auto-buy"),
                Some(&symbol),
            );
        }
    }

    pub fn clear_rejected(&mut self) {
        let count = self.state.clear_rejected();
        self.emit_log("system", format!("cleared {count} rejected symbols"), None);
    }

    /// Switch the active named sell strategy. Unknown names are a logged
    /// no-op.
    pub fn change_strategy(&mut self, name: &str) {
        match self.settings.strategies.get(name) {
            Some(strategy) => {
                self.strategy = strategy.clone();
                self.settings.active_strategy = name.to_string();
                self.emit_log(
                    "system",
                    format!(
                        "sell strategy '{name}': TP {}%, SL {}%",
                        self.strategy.take_profit_pct, self.strategy.stop_loss_pct
                    ),
                    None,
                );
            }
            None => {
                warn!(name, "unknown sell strategy");
                self.emit_log("error", format!("unknown sell strategy '{name}'"), None);
            }
        }
    }

    /// Resynchronize cash from the authoritative balance query and warm
    /// the symbol-name cache from the holdings rows.
    pub async fn resync_balance(&mut self) {
        match self.broker.get_balance().await {
            Ok(balance) => {
                for row in &balance.holdings {
                    self.state.cache_name(&row.symbol, &row.name);
                }
                self.state.set_cash(balance.cash);
                self.emit_log(
                    "system",
                    format!("orderable cash refreshed: {}", balance.cash),
                    None,
                );
            }
            Err(e) => {
                warn!(%e, "balance query failed, keeping last known cash");
                self.emit_log("error", format!("balance query failed: {e}"), None);
            }
        }
        self.emit_account();
    }

    // ----- internals ---------------------------------------------------

    /// Fetch and normalize a price snapshot, resolving the display name
    /// through the cache. `None` when the quote is unavailable or
    /// non-positive; callers drop the operation.
    async fn fetch_snapshot(&mut self, symbol: &str) -> Option<PriceSnapshot> {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() {
            return None;
        }
        match self.broker.get_price(&symbol).await {
            Ok(quote) if quote.price > 0 => {
                let name = self
                    .state
                    .cached_name(&symbol)
                    .map(str::to_string)
                    .or_else(|| quote.name.clone().filter(|n| !n.trim().is_empty()))
                    .unwrap_or_else(|| symbol.clone());
                self.state.cache_name(&symbol, &name);
                Some(PriceSnapshot {
                    symbol,
                    name,
                    price: quote.price,
                    change_rate: quote.change_rate,
                    volume: quote.volume,
                })
            }
            Ok(_) => {
                debug!(symbol, "snapshot dropped: non-positive price");
                None
            }
            Err(e) => {
                debug!(symbol, %e, "snapshot unavailable");
                None
            }
        }
    }

    fn emit(&self, event: UiEvent) {
        let _ = self.ui.send(event);
    }

    fn emit_log(&self, action: &str, details: impl Into<String>, symbol: Option<&str>) {
        let details = details.into();
        info!(action, "{details}");
        self.emit(UiEvent::LogEntry {
            time: Local::now().format("%H:%M:%S").to_string(),
            action: action.to_string(),
            details,
            symbol: symbol.map(str::to_string),
        });
    }

    fn emit_account(&self) {
        self.emit(UiEvent::AccountUpdate {
            cash: self.state.cash(),
            position_count: self.state.position_count(),
        });
    }
}

fn signal_row(snapshot: &PriceSnapshot, time: NaiveTime) -> SignalRow {
    SignalRow {
        time: time.format("%H:%M:%S").to_string(),
        symbol: snapshot.symbol.clone(),
        name: snapshot.name.clone(),
        price: snapshot.price,
        change_rate: snapshot.change_rate,
        volume: snapshot.volume,
    }
}

/// Wait until the stream status satisfies `pred`, bounded by `timeout`.
async fn wait_for_status(
    status: &mut watch::Receiver<StreamStatus>,
    timeout: Duration,
    pred: impl Fn(&StreamStatus) -> bool,
) -> Option<StreamStatus> {
    tokio::time::timeout(timeout, async {
        loop {
            let snapshot = status.borrow().clone();
            if pred(&snapshot) {
                return snapshot;
            }
            if status.changed().await.is_err() {
                return status.borrow().clone();
            }
        }
    })
    .await
    .ok()
    .filter(|s| pred(s))
}
