pub mod daemon;
pub mod error;
pub mod executor;
pub mod manager;
pub mod market;
pub mod worker;

pub use daemon::WorkerDaemon;
pub use error::{ExecutorError, MarketDataError, SchedulerError};
pub use executor::{TaskExecutor, TaskReport};
pub use manager::{JobCreation, JobManager, JobRequest};
pub use market::{FetchOutcome, JsonlPriceFetcher, LocalMarketData, MarketDataProvider, PriceFetcher};
pub use worker::SimulationWorker;
