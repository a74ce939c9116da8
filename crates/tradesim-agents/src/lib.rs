pub mod agent;
pub mod claude_cli;
pub mod error;
pub mod parser;
pub mod prompts;
pub mod stub;

pub mod test_support;

pub use agent::{ClaudeAgent, TradingAgent};
pub use error::AgentError;
pub use stub::{StubAgent, StubStrategy};
