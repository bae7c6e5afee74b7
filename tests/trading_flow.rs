//! Trading flow integration tests.
//!
//! Drives the coordinator's handlers directly with a recording mock broker
//! and fixed clocks, verifying the trading invariants end to end:
//! signal intake -> auto-buy -> execution reconciliation -> TP/SL exit.
//! All tests are deterministic; no network, no timers.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use sentry_trader::application::{
    CoordinatorSettings, SellStrategy, TradingCoordinator,
};
use sentry_trader::domain::OrderSide;
use sentry_trader::ports::events::{StreamCommand, UiEvent};
use sentry_trader::ports::mocks::MockBroker;

// ============================================================================
// Test Fixtures
// ============================================================================

struct Harness {
    coordinator: TradingCoordinator<MockBroker>,
    broker: Arc<MockBroker>,
    ui: mpsc::UnboundedReceiver<UiEvent>,
    #[allow(dead_code)]
    stream: mpsc::Receiver<StreamCommand>,
}

fn harness_with(broker: MockBroker, settings: CoordinatorSettings) -> Harness {
    let broker = Arc::new(broker);
    let (ui_tx, ui_rx) = mpsc::unbounded_channel();
    let (stream_tx, stream_rx) = mpsc::channel(32);
    let coordinator = TradingCoordinator::new(Arc::clone(&broker), settings, ui_tx, stream_tx);
    Harness {
        coordinator,
        broker,
        ui: ui_rx,
        stream: stream_rx,
    }
}

/// Settings with a tight 1.5%/-1.5% strategy and room for expensive shares.
fn tight_settings() -> CoordinatorSettings {
    let mut settings = CoordinatorSettings::default();
    settings.buy_amount = 20_000;
    settings.strategies.insert(
        "tight".to_string(),
        SellStrategy {
            stop_loss_pct: -1.5,
            take_profit_pct: 1.5,
        },
    );
    settings.active_strategy = "tight".to_string();
    settings
}

/// Fixed in-window timestamp on the test trading day.
fn at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 3, 14)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

/// Same wall-clock time on the following day.
fn next_day(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 3, 15)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

/// Raw execution-notification fields as delivered over the stream.
fn exec_fields(symbol: &str, price: &str, qty: &str, side: &str) -> Map<String, Value> {
    json!({
        "type": "00",
        "odno": "90001",
        "stk_cd": symbol,
        "exec_price": price,
        "exec_qty": qty,
        "buy_sell_tp": side,
    })
    .as_object()
    .unwrap()
    .clone()
}

fn drain_ui(harness: &mut Harness) -> Vec<UiEvent> {
    let mut events = Vec::new();
    while let Ok(event) = harness.ui.try_recv() {
        events.push(event);
    }
    events
}

fn buy_count(harness: &Harness) -> usize {
    harness
        .broker
        .submitted_orders()
        .iter()
        .filter(|(side, _, _)| *side == OrderSide::Buy)
        .count()
}

fn sell_count(harness: &Harness) -> usize {
    harness
        .broker
        .submitted_orders()
        .iter()
        .filter(|(side, _, _)| *side == OrderSide::Sell)
        .count()
}

// ============================================================================
// Signal intake and auto-buy
// ============================================================================

#[tokio::test]
async fn buy_while_holding_is_a_noop() {
    let broker = MockBroker::new().with_quote("005930", 4_000).with_cash(100_000);
    let mut h = harness_with(broker, CoordinatorSettings::default());
    h.coordinator.start_trading(at(10, 0)).await;

    h.coordinator.on_condition_hit("005930", at(10, 0)).await;
    h.coordinator.on_condition_hit("005930", at(10, 1)).await;

    assert_eq!(h.coordinator.state().position_count(), 1);
    assert_eq!(buy_count(&h), 1);
}

#[tokio::test]
async fn signal_recorded_but_not_acted_on_while_trading_disabled() {
    let broker = MockBroker::new().with_quote("005930", 4_000).with_cash(100_000);
    let mut h = harness_with(broker, CoordinatorSettings::default());

    h.coordinator.on_condition_hit("005930", at(10, 0)).await;

    assert!(h.coordinator.state().pending("005930").is_some());
    assert_eq!(buy_count(&h), 0);
    // the signal still reaches the presentation layer
    let events = drain_ui(&mut h);
    assert!(events
        .iter()
        .any(|e| matches!(e, UiEvent::SignalDetected(row) if row.symbol == "005930")));
}

#[tokio::test]
async fn rejected_symbol_never_buys() {
    let broker = MockBroker::new().with_quote("005930", 4_000).with_cash(100_000);
    let mut h = harness_with(broker, CoordinatorSettings::default());
    h.coordinator.start_trading(at(10, 0)).await;

    h.coordinator.reject_symbol("005930");
    h.coordinator.on_condition_hit("005930", at(10, 0)).await;

    assert_eq!(buy_count(&h), 0);
    assert!(h.coordinator.state().pending("005930").is_none());
    // the quote is never even fetched for a rejected symbol
    assert!(h.broker.price_requests().is_empty());

    // toggling back re-enables the buy path
    h.coordinator.reject_symbol("005930");
    h.coordinator.on_condition_hit("005930", at(10, 1)).await;
    assert_eq!(buy_count(&h), 1);
}

#[tokio::test]
async fn price_above_budget_skips_buy() {
    // budget is 5,000 won per share by default
    let broker = MockBroker::new().with_quote("005930", 6_000).with_cash(100_000);
    let mut h = harness_with(broker, CoordinatorSettings::default());
    h.coordinator.start_trading(at(10, 0)).await;

    h.coordinator.on_condition_hit("005930", at(10, 0)).await;

    assert_eq!(buy_count(&h), 0);
    // the signal is still tracked
    assert!(h.coordinator.state().pending("005930").is_some());
}

#[tokio::test]
async fn position_limit_caps_concurrent_buys() {
    let mut settings = CoordinatorSettings::default();
    settings.max_positions = 2;
    let broker = MockBroker::new()
        .with_quote("000001", 4_000)
        .with_quote("000002", 4_000)
        .with_quote("000003", 4_000)
        .with_cash(100_000);
    let mut h = harness_with(broker, settings);
    h.coordinator.start_trading(at(10, 0)).await;

    h.coordinator.on_condition_hit("000001", at(10, 0)).await;
    h.coordinator.on_condition_hit("000002", at(10, 1)).await;
    h.coordinator.on_condition_hit("000003", at(10, 2)).await;

    assert_eq!(h.coordinator.state().position_count(), 2);
    assert_eq!(buy_count(&h), 2);
}

#[tokio::test]
async fn rejected_broker_order_creates_no_position() {
    let broker = MockBroker::new()
        .with_quote("005930", 4_000)
        .with_cash(100_000)
        .with_order_rejection("005930", "order rejected by exchange");
    let mut h = harness_with(broker, CoordinatorSettings::default());
    h.coordinator.start_trading(at(10, 0)).await;

    h.coordinator.on_condition_hit("005930", at(10, 0)).await;

    assert_eq!(h.coordinator.state().position_count(), 0);
    assert_eq!(h.coordinator.state().cash(), 100_000);
    // the broker's message surfaces as a log entry
    let events = drain_ui(&mut h);
    assert!(events.iter().any(|e| matches!(
        e,
        UiEvent::LogEntry { details, .. } if details.contains("order rejected by exchange")
    )));
}

// ============================================================================
// Cash invariants
// ============================================================================

#[tokio::test]
async fn cash_is_debited_and_credited_optimistically_and_never_negative() {
    let broker = MockBroker::new().with_quote("005930", 4_000).with_cash(4_000);
    let mut h = harness_with(broker, tight_settings());
    h.coordinator.start_trading(at(10, 0)).await;

    h.coordinator.on_condition_hit("005930", at(10, 0)).await;
    assert_eq!(h.coordinator.state().cash(), 0);

    // a second symbol cannot be bought with zero cash
    h.broker.set_quote("000660", 4_000);
    h.coordinator.on_condition_hit("000660", at(10, 1)).await;
    assert_eq!(buy_count(&h), 1);
    assert_eq!(h.coordinator.state().cash(), 0);

    // take-profit exit credits the proceeds back
    h.broker.set_quote("005930", 4_100);
    h.coordinator.check_positions(at(10, 5)).await;
    assert_eq!(sell_count(&h), 1);
    assert_eq!(h.coordinator.state().cash(), 4_100);
}

// ============================================================================
// Execution reconciliation
// ============================================================================

#[tokio::test]
async fn execution_overwrites_approximate_entry_price() {
    let broker = MockBroker::new().with_quote("005930", 10_000).with_cash(100_000);
    let mut h = harness_with(broker, tight_settings());
    h.coordinator.start_trading(at(10, 0)).await;
    h.coordinator.on_condition_hit("005930", at(10, 0)).await;

    let position = h.coordinator.state().position("005930").unwrap();
    assert_eq!(position.entry_price, 10_000);
    assert!(!position.confirmed);
    let cash_before = h.coordinator.state().cash();

    h.coordinator.on_execution(&exec_fields("005930", "10,050", "1", "1"));

    let position = h.coordinator.state().position("005930").unwrap();
    assert_eq!(position.entry_price, 10_050);
    assert_eq!(position.quantity, 1);
    assert!(position.confirmed);
    // buy-side reconciliation never touches cash
    assert_eq!(h.coordinator.state().cash(), cash_before);
}

#[tokio::test]
async fn out_of_order_execution_creates_position() {
    let broker = MockBroker::new().with_cash(100_000);
    let mut h = harness_with(broker, CoordinatorSettings::default());

    h.coordinator.on_execution(&exec_fields("005930", "4500", "2", "1"));

    let position = h.coordinator.state().position("005930").unwrap();
    assert_eq!(position.entry_price, 4_500);
    assert_eq!(position.quantity, 2);
    assert!(position.confirmed);
}

#[tokio::test]
async fn malformed_execution_mutates_nothing() {
    let broker = MockBroker::new().with_quote("005930", 4_000).with_cash(100_000);
    let mut h = harness_with(broker, CoordinatorSettings::default());
    h.coordinator.start_trading(at(10, 0)).await;
    h.coordinator.on_condition_hit("005930", at(10, 0)).await;
    let cash_before = h.coordinator.state().cash();

    // zero fill quantity
    h.coordinator.on_execution(&exec_fields("005930", "4100", "0", "1"));
    // missing price
    let mut missing_price = exec_fields("005930", "4100", "1", "1");
    missing_price.remove("exec_price");
    h.coordinator.on_execution(&missing_price);
    // unknown side marker
    h.coordinator.on_execution(&exec_fields("005930", "4100", "1", "9"));

    let position = h.coordinator.state().position("005930").unwrap();
    assert_eq!(position.entry_price, 4_000);
    assert!(!position.confirmed);
    assert_eq!(h.coordinator.state().cash(), cash_before);
}

#[tokio::test]
async fn sell_execution_only_logs_settlement_stays_optimistic() {
    let broker = MockBroker::new().with_quote("005930", 10_000).with_cash(100_000);
    let mut h = harness_with(broker, tight_settings());
    h.coordinator.start_trading(at(10, 0)).await;
    h.coordinator.on_condition_hit("005930", at(10, 0)).await;

    // TP exit settles optimistically at the polled price
    h.broker.set_quote("005930", 10_200);
    h.coordinator.check_positions(at(10, 5)).await;
    let cash_after_sell = h.coordinator.state().cash();
    assert_eq!(cash_after_sell, 100_000 - 10_000 + 10_200);

    // the confirmed sell fill reports a different price; cash is unchanged
    h.coordinator.on_execution(&exec_fields("005930", "10,180", "1", "2"));
    assert_eq!(h.coordinator.state().cash(), cash_after_sell);
    assert_eq!(h.coordinator.state().position_count(), 0);
}

// ============================================================================
// TP/SL thresholds (boundaries inclusive)
// ============================================================================

async fn tp_sl_case(current_price: i64, expect_sell: bool) {
    let broker = MockBroker::new().with_quote("005930", 10_000).with_cash(100_000);
    let mut h = harness_with(broker, tight_settings());
    h.coordinator.start_trading(at(10, 0)).await;
    h.coordinator.on_condition_hit("005930", at(10, 0)).await;
    assert_eq!(h.coordinator.state().position_count(), 1);

    h.broker.set_quote("005930", current_price);
    h.coordinator.check_positions(at(10, 5)).await;

    if expect_sell {
        assert_eq!(sell_count(&h), 1, "price {current_price} should trigger a sell");
        assert_eq!(h.coordinator.state().position_count(), 0);
    } else {
        assert_eq!(sell_count(&h), 0, "price {current_price} should not trigger");
        assert_eq!(h.coordinator.state().position_count(), 1);
    }
}

#[tokio::test]
async fn take_profit_above_threshold_sells() {
    tp_sl_case(10_151, true).await; // +1.51%
}

#[tokio::test]
async fn take_profit_boundary_is_inclusive() {
    tp_sl_case(10_150, true).await; // exactly +1.50%
}

#[tokio::test]
async fn take_profit_below_threshold_holds() {
    tp_sl_case(10_149, false).await; // +1.49%
}

#[tokio::test]
async fn stop_loss_boundary_is_inclusive() {
    tp_sl_case(9_850, true).await; // exactly -1.50%
}

#[tokio::test]
async fn stop_loss_above_threshold_holds() {
    tp_sl_case(9_851, false).await; // -1.49%
}

#[tokio::test]
async fn tp_uses_confirmed_entry_after_reconciliation() {
    let broker = MockBroker::new().with_quote("005930", 10_000).with_cash(100_000);
    let mut h = harness_with(broker, tight_settings());
    h.coordinator.start_trading(at(10, 0)).await;
    h.coordinator.on_condition_hit("005930", at(10, 0)).await;

    // fill confirms a lower entry than the snapshot price
    h.coordinator.on_execution(&exec_fields("005930", "9900", "1", "1"));

    // +1.49% vs the approximate entry, but +1.52% vs the confirmed one
    h.broker.set_quote("005930", 10_051);
    h.coordinator.check_positions(at(10, 5)).await;
    assert_eq!(sell_count(&h), 1);
}

// ============================================================================
// Reentry block
// ============================================================================

#[tokio::test]
async fn symbol_sold_today_cannot_rebuy_until_tomorrow() {
    let broker = MockBroker::new().with_quote("005930", 10_000).with_cash(100_000);
    let mut h = harness_with(broker, tight_settings());
    h.coordinator.start_trading(at(10, 0)).await;
    h.coordinator.on_condition_hit("005930", at(10, 0)).await;

    // stop-loss exit sets the same-day block
    h.broker.set_quote("005930", 9_800);
    h.coordinator.check_positions(at(10, 5)).await;
    assert_eq!(h.coordinator.state().position_count(), 0);

    // the same signal later today is ignored before any quote fetch
    let requests_before = h.broker.price_requests().len();
    h.coordinator.on_condition_hit("005930", at(11, 0)).await;
    assert_eq!(buy_count(&h), 1);
    assert_eq!(h.broker.price_requests().len(), requests_before);

    // the block clears when the calendar date changes
    h.broker.set_quote("005930", 10_000);
    h.coordinator.on_condition_hit("005930", next_day(10, 0)).await;
    assert_eq!(buy_count(&h), 2);
}

// ============================================================================
// Pending-signal retention
// ============================================================================

#[tokio::test]
async fn stale_pending_signals_purge_without_further_updates() {
    let broker = MockBroker::new()
        .with_quote("005930", 4_000)
        .with_quote("000660", 4_000)
        .with_cash(0);
    let mut h = harness_with(broker, CoordinatorSettings::default());

    h.coordinator.on_condition_hit("005930", at(9, 0)).await;
    h.coordinator.on_condition_hit("000660", at(9, 45)).await;
    drain_ui(&mut h);

    // 61 minutes after the first signal: it is past the 1h retention
    h.coordinator.refresh_pending(at(10, 1)).await;

    assert!(h.coordinator.state().pending("005930").is_none());
    assert!(h.coordinator.state().pending("000660").is_some());

    let events = drain_ui(&mut h);
    assert!(!events.iter().any(|e| matches!(
        e,
        UiEvent::SignalRealtimeUpdate(row) if row.symbol == "005930"
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        UiEvent::SignalRealtimeUpdate(row) if row.symbol == "000660"
    )));
}

#[tokio::test]
async fn refresh_updates_quote_fields_of_live_signals() {
    let broker = MockBroker::new().with_quote("005930", 4_000).with_cash(0);
    let mut h = harness_with(broker, CoordinatorSettings::default());

    h.coordinator.on_condition_hit("005930", at(10, 0)).await;
    assert_eq!(h.coordinator.state().pending("005930").unwrap().price, 4_000);

    h.broker.set_quote("005930", 4_250);
    h.coordinator.refresh_pending(at(10, 5)).await;

    assert_eq!(h.coordinator.state().pending("005930").unwrap().price, 4_250);
}

// ============================================================================
// Snapshot degradation
// ============================================================================

#[tokio::test]
async fn unavailable_snapshot_drops_the_signal() {
    let broker = MockBroker::new().with_cash(100_000);
    let mut h = harness_with(broker, CoordinatorSettings::default());
    h.coordinator.start_trading(at(10, 0)).await;

    // no quote configured: the fetch fails and the signal is dropped
    h.coordinator.on_condition_hit("005930", at(10, 0)).await;

    assert!(h.coordinator.state().pending("005930").is_none());
    assert_eq!(buy_count(&h), 0);
}
