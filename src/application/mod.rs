pub mod coordinator;

pub use coordinator::{
    CoordinatorError, CoordinatorSettings, SellStrategy, TradingCoordinator, TradingWindow,
};
