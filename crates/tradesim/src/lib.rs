//! tradesim - model-day trading simulation scheduler
//!
//! Runs AI trading agents over historical dates. Each job expands into one task per
//! (model, date); tasks execute sequentially against a persistent ledger so every model
//! carries its portfolio from one trading day to the next, across jobs and restarts.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use tradesim::models::config::SimConfig;
//! use tradesim::scheduler::{JobManager, JobRequest, SimulationWorker};
//! use tradesim::ledger::LedgerStore;
//! ```

pub use tradesim_agents as agents;
pub use tradesim_ledger as ledger;
pub use tradesim_models as models;
pub use tradesim_scheduler as scheduler;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tradesim_agents::{ClaudeAgent, StubAgent, StubStrategy, TradingAgent};
use tradesim_ledger::LedgerStore;
use tradesim_models::config::{AgentKind, SimConfig};
use tradesim_scheduler::{
    JobManager, JsonlPriceFetcher, LocalMarketData, SimulationWorker, TaskExecutor, WorkerDaemon,
};

/// Everything a front end needs to submit, run and inspect jobs.
pub struct Runtime {
    pub config: SimConfig,
    pub store: Arc<LedgerStore>,
    pub manager: Arc<JobManager>,
    pub worker: Arc<SimulationWorker>,
}

impl Runtime {
    /// A daemon polling for pending jobs at the configured interval.
    pub fn daemon(&self) -> WorkerDaemon {
        WorkerDaemon::new(
            self.manager.clone(),
            self.worker.clone(),
            Duration::from_secs(self.config.worker.poll_interval_seconds),
        )
    }
}

/// Read and parse a TOML configuration file.
pub fn load_config(path: &str) -> Result<SimConfig, anyhow::Error> {
    let config_str =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config: {path}"))?;
    let config: SimConfig = toml::from_str(&config_str).with_context(|| "Failed to parse config")?;
    if config.enabled_signatures().is_empty() {
        anyhow::bail!("Config {path} has no enabled models");
    }
    Ok(config)
}

/// Build the agent selected by `[agent] kind`.
pub fn build_agent(config: &SimConfig) -> Arc<dyn TradingAgent> {
    match config.agent.kind {
        AgentKind::Claude => {
            let timeout = Duration::from_secs(config.agent.timeout_seconds);
            let agent = config
                .models
                .iter()
                .filter(|m| m.enabled)
                .fold(ClaudeAgent::new(config.agent.model.clone(), timeout), |agent, m| {
                    match &m.basemodel {
                        Some(basemodel) => agent.with_override(&m.signature, basemodel),
                        None => agent,
                    }
                });
            Arc::new(agent)
        }
        AgentKind::Stub => Arc::new(StubAgent::new(StubStrategy::default())),
    }
}

/// Open the database and wire the job manager, market data and worker.
pub fn build_runtime(config: SimConfig, config_path: &str) -> Result<Runtime, anyhow::Error> {
    if let Some(parent) = Path::new(&config.database.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let store = Arc::new(
        LedgerStore::open(&config.database.path)
            .with_context(|| format!("Failed to open database: {}", config.database.path))?,
    );

    let mut market = LocalMarketData::new(
        store.clone(),
        config.trading.symbols.clone(),
        config.market_data.memory_max_capacity,
        Duration::from_secs(config.market_data.memory_ttl_seconds),
    );
    if let Some(source) = &config.market_data.source_path {
        market = market.with_fetcher(
            Arc::new(JsonlPriceFetcher::new(source)),
            config.market_data.max_fetch_requests,
        );
    }
    let market = Arc::new(market);

    let manager = Arc::new(JobManager::new(
        store.clone(),
        config_path,
        config.trading.max_simulation_days,
    ));
    let executor = TaskExecutor::new(
        store.clone(),
        market.clone(),
        build_agent(&config),
        config.trading.initial_cash,
    );
    let worker = Arc::new(SimulationWorker::new(manager.clone(), market, executor));

    Ok(Runtime {
        config,
        store,
        manager,
        worker,
    })
}
