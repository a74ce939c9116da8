use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Top-level configuration for tradesim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub market_data: MarketDataConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    pub models: Vec<ModelConfig>,
}

impl SimConfig {
    /// Signatures of all enabled models, in configuration order.
    pub fn enabled_signatures(&self) -> Vec<String> {
        self.models
            .iter()
            .filter(|m| m.enabled)
            .map(|m| m.signature.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to the SQLite database holding jobs, the ledger and price data.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/tradesim.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradingConfig {
    /// Cash a model starts with on its first trading day.
    #[serde(default = "default_initial_cash")]
    pub initial_cash: Decimal,
    /// Tradable universe. A date has complete data only when every symbol is priced.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    /// Longest date range a single job may cover.
    #[serde(default = "default_max_simulation_days")]
    pub max_simulation_days: u32,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            initial_cash: default_initial_cash(),
            symbols: default_symbols(),
            max_simulation_days: default_max_simulation_days(),
        }
    }
}

/// Which agent implementation runs model-days.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    #[default]
    Claude,
    Stub,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default)]
    pub kind: AgentKind,
    /// Default model for the Claude CLI agent. A model entry's `basemodel` overrides it.
    #[serde(default = "default_agent_model")]
    pub model: String,
    /// Upper bound on one agent invocation, in seconds.
    #[serde(default = "default_agent_timeout")]
    pub timeout_seconds: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            kind: AgentKind::default(),
            model: default_agent_model(),
            timeout_seconds: default_agent_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketDataConfig {
    /// JSONL file of daily bars used to fill missing price data. None disables fetching.
    #[serde(default)]
    pub source_path: Option<String>,
    /// Maximum fetch requests per job; requests beyond this are reported as rate limited.
    #[serde(default = "default_max_fetch_requests")]
    pub max_fetch_requests: u32,
    /// Maximum number of per-date price maps held in memory.
    #[serde(default = "default_memory_capacity")]
    pub memory_max_capacity: u64,
    /// How long a per-date price map stays in memory, in seconds.
    #[serde(default = "default_memory_ttl")]
    pub memory_ttl_seconds: u64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            source_path: None,
            max_fetch_requests: default_max_fetch_requests(),
            memory_max_capacity: default_memory_capacity(),
            memory_ttl_seconds: default_memory_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    /// Interval between checks for pending jobs when running as a daemon.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
        }
    }
}

/// One trading model (an agent configuration with its own ledger history).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub name: String,
    /// Unique key for this model's ledger rows.
    pub signature: String,
    /// Override for `AgentConfig::model`.
    #[serde(default)]
    pub basemodel: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_initial_cash() -> Decimal {
    Decimal::from(10_000)
}
fn default_symbols() -> Vec<String> {
    ["AAPL", "MSFT", "NVDA", "AMZN", "GOOGL"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_max_simulation_days() -> u32 {
    30
}
fn default_agent_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}
fn default_agent_timeout() -> u64 {
    120
}
fn default_max_fetch_requests() -> u32 {
    25
}
fn default_memory_capacity() -> u64 {
    1_000
}
fn default_memory_ttl() -> u64 {
    300
}
fn default_poll_interval() -> u64 {
    5
}
fn default_true() -> bool {
    true
}
