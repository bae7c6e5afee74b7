//! Hand-rolled recording mocks for driving the coordinator in tests
//! without a network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::domain::OrderSide;

use super::broker::{
    BalanceSnapshot, BrokerError, BrokerPort, ConditionChannel, OrderOutcome, Quote,
};

/// Mock broker that records calls and serves controlled responses.
#[derive(Debug, Default)]
pub struct MockBroker {
    quotes: Arc<Mutex<HashMap<String, Quote>>>,
    balance: Arc<Mutex<BalanceSnapshot>>,
    channels: Arc<Mutex<Vec<ConditionChannel>>>,
    order_rejections: Arc<Mutex<HashMap<String, String>>>,
    orders: Arc<Mutex<Vec<(OrderSide, String, i64)>>>,
    price_calls: Arc<Mutex<Vec<String>>>,
    fail_login: Arc<Mutex<bool>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to serve a quote at a fixed price.
    pub fn with_quote(self, symbol: &str, price: i64) -> Self {
        self.set_quote(symbol, price);
        self
    }

    /// Builder method to set the orderable cash.
    pub fn with_cash(self, cash: i64) -> Self {
        self.balance.lock().unwrap().cash = cash;
        self
    }

    /// Builder method to reject orders for one symbol with a broker message.
    pub fn with_order_rejection(self, symbol: &str, message: &str) -> Self {
        self.order_rejections
            .lock()
            .unwrap()
            .insert(symbol.to_string(), message.to_string());
        self
    }

    /// Builder method to fail the login handshake.
    pub fn with_login_failure(self) -> Self {
        *self.fail_login.lock().unwrap() = true;
        self
    }

    /// Builder method to serve a condition-channel list.
    pub fn with_channels(self, channels: Vec<ConditionChannel>) -> Self {
        *self.channels.lock().unwrap() = channels;
        self
    }

    /// Update (or add) a served quote mid-test.
    pub fn set_quote(&self, symbol: &str, price: i64) {
        self.quotes.lock().unwrap().insert(
            symbol.to_string(),
            Quote {
                symbol: symbol.to_string(),
                name: Some(format!("{symbol} Corp")),
                price,
                change_rate: 0.0,
                volume: 100_000,
                best_bid: Some(price - 50),
                best_ask: Some(price + 50),
            },
        );
    }

    /// Stop serving a quote (simulates an unavailable snapshot).
    pub fn drop_quote(&self, symbol: &str) {
        self.quotes.lock().unwrap().remove(symbol);
    }

    /// All submitted orders as (side, symbol, quantity).
    pub fn submitted_orders(&self) -> Vec<(OrderSide, String, i64)> {
        self.orders.lock().unwrap().clone()
    }

    /// All symbols price snapshots were requested for.
    pub fn price_requests(&self) -> Vec<String> {
        self.price_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrokerPort for MockBroker {
    async fn login(&self) -> Result<(), BrokerError> {
        if *self.fail_login.lock().unwrap() {
            return Err(BrokerError::Auth("invalid credentials".to_string()));
        }
        Ok(())
    }

    async fn ensure_session(&self) -> Result<(), BrokerError> {
        self.login().await
    }

    async fn access_token(&self) -> Option<String> {
        if *self.fail_login.lock().unwrap() {
            None
        } else {
            Some("mock-token".to_string())
        }
    }

    async fn get_price(&self, symbol: &str) -> Result<Quote, BrokerError> {
        self.price_calls.lock().unwrap().push(symbol.to_string());
        self.quotes
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| BrokerError::Network(format!("no quote configured for {symbol}")))
    }

    async fn get_balance(&self) -> Result<BalanceSnapshot, BrokerError> {
        Ok(self.balance.lock().unwrap().clone())
    }

    async fn submit_market_order(&self, side: OrderSide, symbol: &str, qty: i64) -> OrderOutcome {
        self.orders
            .lock()
            .unwrap()
            .push((side, symbol.to_string(), qty));
        if let Some(message) = self.order_rejections.lock().unwrap().get(symbol) {
            return OrderOutcome {
                accepted: false,
                code: "-1".to_string(),
                message: message.clone(),
            };
        }
        OrderOutcome {
            accepted: true,
            code: "0".to_string(),
            message: "OK".to_string(),
        }
    }

    async fn get_condition_list(&self) -> Result<Vec<ConditionChannel>, BrokerError> {
        Ok(self.channels.lock().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_broker_quotes() {
        let broker = MockBroker::new().with_quote("005930", 75_000);
        let quote = broker.get_price("005930").await.unwrap();
        assert_eq!(quote.price, 75_000);
        assert!(broker.get_price("000660").await.is_err());
        assert_eq!(broker.price_requests(), vec!["005930", "000660"]);
    }

    #[tokio::test]
    async fn test_mock_broker_orders() {
        let broker = MockBroker::new().with_order_rejection("005930", "insufficient margin");
        let rejected = broker
            .submit_market_order(OrderSide::Buy, "005930", 1)
            .await;
        assert!(!rejected.accepted);
        assert_eq!(rejected.message, "insufficient margin");

        let accepted = broker
            .submit_market_order(OrderSide::Sell, "000660", 2)
            .await;
        assert!(accepted.accepted);
        assert_eq!(
            broker.submitted_orders(),
            vec![
                (OrderSide::Buy, "005930".to_string(), 1),
                (OrderSide::Sell, "000660".to_string(), 2),
            ]
        );
    }
}
