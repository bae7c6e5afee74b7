//! Trading state owned by the coordinator.
//!
//! All mutable trading data lives in this one struct so that every
//! check-then-act sequence (position count vs. limit, cash vs. order cost,
//! reentry block vs. today) executes against a single owner. The
//! coordinator's event loop is the only mutator.

use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};

use super::position::Position;
use super::signal::{PendingSignal, PriceSnapshot};

#[derive(Debug, Default)]
pub struct TradingState {
    cash: i64,
    positions: HashMap<String, Position>,
    rejected: HashSet<String>,
    pending: HashMap<String, PendingSignal>,
    reentry_block: HashMap<String, NaiveDate>,
    names: HashMap<String, String>,
}

impl TradingState {
    pub fn new() -> Self {
        Self::default()
    }

    // ----- cash -------------------------------------------------------

    pub fn cash(&self) -> i64 {
        self.cash
    }

    /// Set the authoritative balance. Floored at zero.
    pub fn set_cash(&mut self, amount: i64) {
        self.cash = amount.max(0);
    }

    /// Optimistic debit on buy acceptance. Floored at zero.
    pub fn debit_cash(&mut self, amount: i64) {
        self.cash = (self.cash - amount).max(0);
    }

    /// Optimistic credit on sell acceptance.
    pub fn credit_cash(&mut self, amount: i64) {
        self.cash = (self.cash + amount).max(0);
    }

    // ----- positions --------------------------------------------------

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn position_mut(&mut self, symbol: &str) -> Option<&mut Position> {
        self.positions.get_mut(symbol)
    }

    pub fn position_symbols(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    /// Insert a position unless one already exists for the symbol.
    /// At most one position per symbol at any time.
    pub fn open_position(&mut self, position: Position) -> bool {
        if self.positions.contains_key(&position.symbol) {
            return false;
        }
        self.positions.insert(position.symbol.clone(), position);
        true
    }

    pub fn close_position(&mut self, symbol: &str) -> Option<Position> {
        self.positions.remove(symbol)
    }

    // ----- rejected symbols -------------------------------------------

    pub fn is_rejected(&self, symbol: &str) -> bool {
        self.rejected.contains(symbol)
    }

    /// Toggle membership; returns true when the symbol is now rejected.
    pub fn toggle_rejected(&mut self, symbol: &str) -> bool {
        if self.rejected.remove(symbol) {
            false
        } else {
            self.rejected.insert(symbol.to_string());
            true
        }
    }

    pub fn clear_rejected(&mut self) -> usize {
        let count = self.rejected.len();
        self.rejected.clear();
        count
    }

    // ----- reentry block ----------------------------------------------

    /// Record that `symbol` was sold on `date`; it may not be re-bought
    /// that same day.
    pub fn block_reentry(&mut self, symbol: &str, date: NaiveDate) {
        self.reentry_block.insert(symbol.to_string(), date);
    }

    /// A symbol sold today may not re-enter today. The block clears
    /// implicitly once the date changes.
    pub fn can_reenter(&self, symbol: &str, today: NaiveDate) -> bool {
        match self.reentry_block.get(symbol) {
            Some(blocked) => *blocked != today,
            None => true,
        }
    }

    // ----- pending signals --------------------------------------------

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self, symbol: &str) -> Option<&PendingSignal> {
        self.pending.get(symbol)
    }

    pub fn pending_symbols(&self) -> Vec<String> {
        self.pending.keys().cloned().collect()
    }

    pub fn pending_signals(&self) -> Vec<PendingSignal> {
        self.pending.values().cloned().collect()
    }

    /// Record or re-record a pending signal; a fresh condition hit resets
    /// the retention clock.
    pub fn record_pending(&mut self, snapshot: &PriceSnapshot, now: NaiveDateTime) {
        self.pending.insert(
            snapshot.symbol.clone(),
            PendingSignal::from_snapshot(snapshot, now),
        );
    }

    /// Refresh the quote fields of a tracked signal without touching its
    /// retention clock.
    pub fn refresh_pending(&mut self, snapshot: &PriceSnapshot) {
        if let Some(signal) = self.pending.get_mut(&snapshot.symbol) {
            signal.refresh(snapshot);
        }
    }

    /// Drop signals older than `retention` and return their symbols.
    pub fn purge_stale_pending(&mut self, now: NaiveDateTime, retention: TimeDelta) -> Vec<String> {
        let stale: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, s)| s.is_stale(now, retention))
            .map(|(symbol, _)| symbol.clone())
            .collect();
        for symbol in &stale {
            self.pending.remove(symbol);
        }
        stale
    }

    // ----- symbol name cache ------------------------------------------

    pub fn cache_name(&mut self, symbol: &str, name: &str) {
        let name = name.trim();
        if !symbol.is_empty() && !name.is_empty() && name != symbol {
            self.names.insert(symbol.to_string(), name.to_string());
        }
    }

    pub fn cached_name(&self, symbol: &str) -> Option<&str> {
        self.names.get(symbol).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(symbol: &str, price: i64) -> PriceSnapshot {
        PriceSnapshot {
            symbol: symbol.to_string(),
            name: format!("{symbol} Corp"),
            price,
            change_rate: 0.5,
            volume: 10_000,
        }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 14)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_cash_never_negative() {
        let mut state = TradingState::new();
        state.set_cash(1_000);
        state.debit_cash(700);
        state.debit_cash(700);
        assert_eq!(state.cash(), 0);
        state.credit_cash(500);
        assert_eq!(state.cash(), 500);
        state.set_cash(-10);
        assert_eq!(state.cash(), 0);
    }

    #[test]
    fn test_single_position_per_symbol() {
        let mut state = TradingState::new();
        let first = Position::new("005930", "Samsung", 1, 75_000).unwrap();
        let second = Position::new("005930", "Samsung", 1, 76_000).unwrap();
        assert!(state.open_position(first));
        assert!(!state.open_position(second));
        assert_eq!(state.position_count(), 1);
        assert_eq!(state.position("005930").unwrap().entry_price, 75_000);
    }

    #[test]
    fn test_reentry_block_clears_on_date_change() {
        let mut state = TradingState::new();
        let today = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let tomorrow = NaiveDate::from_ymd_opt(2025, 3, 15).unwrap();
        assert!(state.can_reenter("005930", today));
        state.block_reentry("005930", today);
        assert!(!state.can_reenter("005930", today));
        assert!(state.can_reenter("005930", tomorrow));
    }

    #[test]
    fn test_toggle_and_clear_rejected() {
        let mut state = TradingState::new();
        assert!(state.toggle_rejected("005930"));
        assert!(state.is_rejected("005930"));
        assert!(!state.toggle_rejected("005930"));
        assert!(!state.is_rejected("005930"));
        state.toggle_rejected("005930");
        state.toggle_rejected("000660");
        assert_eq!(state.clear_rejected(), 2);
        assert!(!state.is_rejected("005930"));
    }

    #[test]
    fn test_pending_purge_keyed_to_first_seen() {
        let mut state = TradingState::new();
        state.record_pending(&snapshot("005930", 75_000), at(9, 0));
        state.record_pending(&snapshot("000660", 182_000), at(9, 45));

        // refresh does not extend retention
        state.refresh_pending(&snapshot("005930", 75_900));

        let purged = state.purge_stale_pending(at(10, 10), TimeDelta::hours(1));
        assert_eq!(purged, vec!["005930".to_string()]);
        assert!(state.pending("005930").is_none());
        assert!(state.pending("000660").is_some());
    }

    #[test]
    fn test_new_hit_resets_retention() {
        let mut state = TradingState::new();
        state.record_pending(&snapshot("005930", 75_000), at(9, 0));
        state.record_pending(&snapshot("005930", 75_500), at(9, 50));
        let purged = state.purge_stale_pending(at(10, 10), TimeDelta::hours(1));
        assert!(purged.is_empty());
    }

    #[test]
    fn test_name_cache_ignores_degenerate_names() {
        let mut state = TradingState::new();
        state.cache_name("005930", "005930");
        assert!(state.cached_name("005930").is_none());
        state.cache_name("005930", " Samsung Electronics ");
        assert_eq!(state.cached_name("005930"), Some("Samsung Electronics"));
    }
}
