//! Console presentation adapter.
//!
//! Minimal stand-in for a GUI: renders coordinator events to stdout and
//! drains the event channel until the coordinator drops it.

use tokio::sync::mpsc;

use crate::ports::events::{SignalRow, UiEvent};

pub fn render_event(event: &UiEvent) {
    match event {
        UiEvent::AccountUpdate {
            cash,
            position_count,
        } => {
            println!("[account] cash {cash} won, {position_count} open position(s)");
        }
        UiEvent::LogEntry {
            time,
            action,
            details,
            symbol,
        } => match symbol {
            Some(symbol) => println!("[{time}][{action}][{symbol}] {details}"),
            None => println!("[{time}][{action}] {details}"),
        },
        UiEvent::ConditionListUpdate { channels } => {
            println!("[conditions] {} channel(s) available:", channels.len());
            for channel in channels {
                println!("  [{}] {}", channel.seq, channel.name);
            }
        }
        UiEvent::SignalDetected(row) => {
            println!("[signal+] {}", format_row(row));
        }
        UiEvent::SignalRealtimeUpdate(row) => {
            println!("[signal~] {}", format_row(row));
        }
    }
}

fn format_row(row: &SignalRow) -> String {
    format!(
        "{} {} ({}) {} won {:+.2}% vol {}",
        row.time, row.name, row.symbol, row.price, row.change_rate, row.volume
    )
}

/// Drain coordinator events until the channel closes.
pub async fn run_presenter(mut events: mpsc::UnboundedReceiver<UiEvent>) {
    while let Some(event) = events.recv().await {
        render_event(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_row() {
        let row = SignalRow {
            time: "10:15:00".to_string(),
            symbol: "005930".to_string(),
            name: "Samsung Electronics".to_string(),
            price: 75_000,
            change_rate: 1.25,
            volume: 1_000_000,
        };
        let line = format_row(&row);
        assert!(line.contains("Samsung Electronics"));
        assert!(line.contains("75000"));
        assert!(line.contains("+1.25%"));
    }
}
