//! Scripted agent for exercising the scheduler without the Claude CLI.
//!
//! Unlike `StubAgent`, which follows a fixed strategy, `ScriptedAgent` is told up
//! front what to do for each (model, date) and records every context it was run with.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use tradesim_ledger::apply_actions;
use tradesim_models::agent_message::{
    AgentContext, AgentOutcome, MarketSnapshot, ReasoningStep, TradeAction,
};
use tradesim_models::ledger::Position;

use crate::agent::TradingAgent;
use crate::error::AgentError;

/// What the scripted agent does for one model-day.
#[derive(Debug, Clone)]
pub enum Script {
    /// Execute these actions and report the replayed ending position.
    Trade(Vec<TradeAction>),
    /// Fail with an agent CLI error.
    Fail(String),
    /// Report these actions with a made-up ending position.
    Misreport(Vec<TradeAction>, Position),
}

#[derive(Default)]
pub struct ScriptedAgent {
    scripts: HashMap<(String, NaiveDate), Script>,
    calls: Mutex<Vec<(AgentContext, Position)>>,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, model: &str, date: NaiveDate, script: Script) -> Self {
        self.scripts.insert((model.to_string(), date), script);
        self
    }

    /// Contexts and starting positions seen so far, in call order.
    pub fn calls(&self) -> Vec<(AgentContext, Position)> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl TradingAgent for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run(
        &self,
        context: &AgentContext,
        position: &Position,
        snapshot: &MarketSnapshot,
    ) -> Result<AgentOutcome, AgentError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((context.clone(), position.clone()));

        let script = self
            .scripts
            .get(&(context.model.clone(), context.date))
            .cloned()
            .unwrap_or_else(|| Script::Trade(vec![TradeAction::no_trade()]));

        let (actions, ending_position) = match script {
            Script::Fail(message) => return Err(AgentError::Cli(message)),
            Script::Trade(actions) => {
                let ending = apply_actions(position, &actions, snapshot)
                    .map_err(|e| AgentError::Rejected(e.to_string()))?;
                (actions, ending)
            }
            Script::Misreport(actions, ending) => (actions, ending),
        };

        Ok(AgentOutcome {
            actions,
            ending_position,
            reasoning: vec![ReasoningStep {
                role: "assistant".to_string(),
                content: format!("scripted {}/{}", context.model, context.date),
            }],
            summary: Some("scripted".to_string()),
        })
    }
}
