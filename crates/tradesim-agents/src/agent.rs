use async_trait::async_trait;
use tradesim_ledger::apply_actions;
use tradesim_models::agent_message::{
    AgentContext, AgentOutcome, MarketSnapshot, ReasoningStep,
};
use tradesim_models::ledger::Position;

use crate::claude_cli::{invoke_claude, ClaudeCliConfig};
use crate::error::AgentError;
use crate::parser::{parse_decision, priced_actions};
use crate::prompts::{session_prompt, trading_system_prompt};

/// Decides one model-day of trades. Mockable for testing.
///
/// Everything an implementation needs arrives as parameters; there is no ambient
/// per-session state.
#[async_trait]
pub trait TradingAgent: Send + Sync {
    fn name(&self) -> &str;

    async fn run(
        &self,
        context: &AgentContext,
        position: &Position,
        snapshot: &MarketSnapshot,
    ) -> Result<AgentOutcome, AgentError>;
}

/// A trading agent that asks the Claude CLI for a decision.
pub struct ClaudeAgent {
    pub cli_config: ClaudeCliConfig,
    /// Per-model overrides of `cli_config.model`, keyed by model signature.
    pub model_overrides: Vec<(String, String)>,
}

impl ClaudeAgent {
    pub fn new(model: String, timeout: std::time::Duration) -> Self {
        Self {
            cli_config: ClaudeCliConfig {
                model,
                timeout,
                ..ClaudeCliConfig::default()
            },
            model_overrides: Vec::new(),
        }
    }

    pub fn with_override(mut self, signature: &str, basemodel: &str) -> Self {
        self.model_overrides
            .push((signature.to_string(), basemodel.to_string()));
        self
    }

    fn cli_config_for(&self, signature: &str) -> ClaudeCliConfig {
        let mut config = self.cli_config.clone();
        if let Some((_, model)) = self.model_overrides.iter().find(|(s, _)| s == signature) {
            config.model = model.clone();
        }
        config
    }
}

#[async_trait]
impl TradingAgent for ClaudeAgent {
    fn name(&self) -> &str {
        "claude"
    }

    async fn run(
        &self,
        context: &AgentContext,
        position: &Position,
        snapshot: &MarketSnapshot,
    ) -> Result<AgentOutcome, AgentError> {
        let system_prompt = trading_system_prompt();
        let user_prompt = session_prompt(context, position, snapshot)?;
        let config = self.cli_config_for(&context.model);

        tracing::debug!(
            job_id = %context.job_id,
            model = %context.model,
            date = %context.date,
            basemodel = %config.model,
            "Requesting trading decision"
        );
        let reply = invoke_claude(&system_prompt, &user_prompt, &config).await?;
        let decision = parse_decision(&reply.text)?;
        let actions = priced_actions(&decision, snapshot)?;
        let ending_position = apply_actions(position, &actions, snapshot)
            .map_err(|e| AgentError::Rejected(e.to_string()))?;

        let mut reasoning = vec![ReasoningStep {
            role: "user".to_string(),
            content: user_prompt,
        }];
        if let Some(text) = &decision.reasoning {
            reasoning.push(ReasoningStep {
                role: "assistant".to_string(),
                content: text.clone(),
            });
        }
        reasoning.push(ReasoningStep {
            role: "response".to_string(),
            content: reply.text,
        });
        if let Some(session_id) = reply.session_id {
            reasoning.push(ReasoningStep {
                role: "session".to_string(),
                content: format!(
                    "session {session_id}, {} turn(s), ${:.4}",
                    reply.num_turns.unwrap_or_default(),
                    reply.cost_usd.unwrap_or_default()
                ),
            });
        }

        Ok(AgentOutcome {
            actions,
            ending_position,
            reasoning,
            summary: decision.summary,
        })
    }
}
