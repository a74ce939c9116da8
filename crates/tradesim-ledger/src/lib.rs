pub mod error;
pub mod jobs;
pub mod pnl;
pub mod portfolio;
pub mod prices;
pub mod results;
pub mod store;
pub mod trading;

mod codec;

pub use error::LedgerError;
pub use pnl::{calculate_metrics, daily_metrics, value_position, ProfitMetrics};
pub use portfolio::apply_actions;
pub use prices::PriceBar;
pub use store::LedgerStore;
pub use trading::{DayFinalization, NewTradingDay, PriorDay, StartingPoint};
