use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

/// Normalized market snapshot for one symbol, merged from the broker's
/// price and best-quote sub-queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub symbol: String,
    pub name: String,
    pub price: i64,
    pub change_rate: f64,
    pub volume: i64,
}

/// A symbol the condition feed flagged, held until acted upon or expired.
///
/// Retention is keyed to `first_seen`: the periodic refresh cycle updates
/// the quote fields but does not extend a signal's life. A fresh condition
/// hit for the same symbol re-records it, resetting `first_seen`.
#[derive(Debug, Clone)]
pub struct PendingSignal {
    pub symbol: String,
    pub name: String,
    pub price: i64,
    pub change_rate: f64,
    pub volume: i64,
    pub first_seen: NaiveDateTime,
}

impl PendingSignal {
    pub fn from_snapshot(snapshot: &PriceSnapshot, now: NaiveDateTime) -> Self {
        Self {
            symbol: snapshot.symbol.clone(),
            name: snapshot.name.clone(),
            price: snapshot.price,
            change_rate: snapshot.change_rate,
            volume: snapshot.volume,
            first_seen: now,
        }
    }

    /// Update quote fields from a fresh snapshot, keeping `first_seen`.
    pub fn refresh(&mut self, snapshot: &PriceSnapshot) {
        self.name = snapshot.name.clone();
        self.price = snapshot.price;
        self.change_rate = snapshot.change_rate;
        self.volume = snapshot.volume;
    }

    pub fn is_stale(&self, now: NaiveDateTime, retention: TimeDelta) -> bool {
        now.signed_duration_since(self.first_seen) > retention
    }
}
