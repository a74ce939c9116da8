use async_trait::async_trait;
use rust_decimal::Decimal;
use tradesim_ledger::apply_actions;
use tradesim_models::agent_message::{
    AgentContext, AgentOutcome, MarketSnapshot, ReasoningStep, TradeAction,
};
use tradesim_models::ledger::Position;

use crate::agent::TradingAgent;
use crate::error::AgentError;

/// Deterministic behaviour for offline runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum StubStrategy {
    /// Never trade.
    Hold,
    /// With nothing held, split cash evenly across every priced symbol in whole shares.
    /// Otherwise hold.
    #[default]
    EqualWeight,
    /// Fail every run with the given message.
    Fail(String),
}

/// Offline agent selected by `agent.kind = "stub"`.
#[derive(Debug, Clone, Default)]
pub struct StubAgent {
    strategy: StubStrategy,
}

impl StubAgent {
    pub fn new(strategy: StubStrategy) -> Self {
        Self { strategy }
    }

    fn decide(&self, position: &Position, snapshot: &MarketSnapshot) -> Vec<TradeAction> {
        match &self.strategy {
            StubStrategy::EqualWeight if position.holdings.is_empty() && !snapshot.prices.is_empty() => {
                let budget = position.cash / Decimal::from(snapshot.prices.len());
                snapshot
                    .prices
                    .iter()
                    .filter(|(_, price)| **price > Decimal::ZERO)
                    .filter_map(|(symbol, price)| {
                        let quantity = (budget / *price).floor();
                        (quantity > Decimal::ZERO)
                            .then(|| TradeAction::buy(symbol, quantity, *price))
                    })
                    .collect()
            }
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl TradingAgent for StubAgent {
    fn name(&self) -> &str {
        "stub"
    }

    async fn run(
        &self,
        context: &AgentContext,
        position: &Position,
        snapshot: &MarketSnapshot,
    ) -> Result<AgentOutcome, AgentError> {
        if let StubStrategy::Fail(message) = &self.strategy {
            return Err(AgentError::Cli(message.clone()));
        }

        let mut actions = self.decide(position, snapshot);
        if actions.is_empty() {
            actions.push(TradeAction::no_trade());
        }
        let ending_position = apply_actions(position, &actions, snapshot)
            .map_err(|e| AgentError::Rejected(e.to_string()))?;
        let trades = actions.iter().filter(|a| a.action_type.is_trade()).count();
        let summary = format!("{} on {}: {trades} trade(s)", context.model, context.date);

        Ok(AgentOutcome {
            actions,
            ending_position,
            reasoning: vec![ReasoningStep {
                role: "assistant".to_string(),
                content: format!("stub strategy {:?}", self.strategy),
            }],
            summary: Some(summary),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn context() -> AgentContext {
        AgentContext {
            job_id: "job-1".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            model: "alpha".to_string(),
            trading_day_id: 1,
        }
    }

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot {
            date: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            prices: [
                ("AAPL".to_string(), dec!(100)),
                ("MSFT".to_string(), dec!(300)),
            ]
            .into_iter()
            .collect(),
        }
    }

    #[tokio::test]
    async fn equal_weight_buys_once() {
        let agent = StubAgent::default();
        let start = Position::cash_only(dec!(1000));
        let outcome = agent.run(&context(), &start, &snapshot()).await.unwrap();

        assert_eq!(outcome.actions.len(), 2);
        assert_eq!(outcome.ending_position.quantity("AAPL"), dec!(5));
        assert_eq!(outcome.ending_position.quantity("MSFT"), dec!(1));
        assert_eq!(outcome.ending_position.cash, dec!(200));

        let next = agent
            .run(&context(), &outcome.ending_position, &snapshot())
            .await
            .unwrap();
        assert_eq!(next.actions, vec![TradeAction::no_trade()]);
        assert_eq!(next.ending_position, outcome.ending_position);
    }

    #[tokio::test]
    async fn hold_never_trades() {
        let agent = StubAgent::new(StubStrategy::Hold);
        let start = Position::cash_only(dec!(1000));
        let outcome = agent.run(&context(), &start, &snapshot()).await.unwrap();
        assert_eq!(outcome.actions, vec![TradeAction::no_trade()]);
        assert_eq!(outcome.ending_position, start);
    }

    #[tokio::test]
    async fn fail_strategy_errors() {
        let agent = StubAgent::new(StubStrategy::Fail("boom".to_string()));
        let err = agent
            .run(&context(), &Position::cash_only(dec!(1)), &snapshot())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cli(ref m) if m == "boom"));
    }
}
