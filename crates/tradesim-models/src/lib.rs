pub mod agent_message;
pub mod config;
pub mod job;
pub mod ledger;
pub mod results;
pub mod schema;

pub use agent_message::{AgentContext, AgentOutcome, MarketSnapshot, ReasoningStep, TradeAction};
pub use config::{
    AgentConfig, AgentKind, DatabaseConfig, MarketDataConfig, ModelConfig, SimConfig,
    TradingConfig, WorkerConfig,
};
pub use job::{Job, JobProgress, JobStatus, JobStatusView, ModelDay, Task, TaskStatus};
pub use ledger::{Action, ActionType, Holding, Position, TradingDay};
pub use results::{DayDetail, ModelSeries, ResultsView, SeriesPoint};
