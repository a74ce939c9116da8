use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ledger::{ActionType, Position};

/// Immutable identity of one agent invocation.
///
/// Passed explicitly into every agent call so that tool use and logging can be
/// attributed without any ambient state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentContext {
    pub job_id: String,
    pub date: NaiveDate,
    /// Model signature (the ledger's model key).
    pub model: String,
    /// Ledger row the agent's results will be written to.
    pub trading_day_id: i64,
}

/// Opening prices available to the agent for one date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketSnapshot {
    pub date: NaiveDate,
    pub prices: BTreeMap<String, Decimal>,
}

impl MarketSnapshot {
    pub fn price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.get(symbol).copied()
    }
}

/// A trade decision returned by an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeAction {
    pub action_type: ActionType,
    /// `None` only for `NoTrade`.
    pub symbol: Option<String>,
    pub quantity: Decimal,
    /// Execution price; must match the day's opening price for the symbol.
    pub price: Decimal,
}

impl TradeAction {
    pub fn buy(symbol: &str, quantity: Decimal, price: Decimal) -> Self {
        Self {
            action_type: ActionType::Buy,
            symbol: Some(symbol.to_string()),
            quantity,
            price,
        }
    }

    pub fn sell(symbol: &str, quantity: Decimal, price: Decimal) -> Self {
        Self {
            action_type: ActionType::Sell,
            symbol: Some(symbol.to_string()),
            quantity,
            price,
        }
    }

    pub fn no_trade() -> Self {
        Self {
            action_type: ActionType::NoTrade,
            symbol: None,
            quantity: Decimal::ZERO,
            price: Decimal::ZERO,
        }
    }
}

/// One entry in an agent's reasoning trace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReasoningStep {
    pub role: String,
    pub content: String,
}

/// Everything an agent produces for one model-day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentOutcome {
    pub actions: Vec<TradeAction>,
    /// Position after all actions; checked against a replay of `actions`.
    pub ending_position: Position,
    pub reasoning: Vec<ReasoningStep>,
    pub summary: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn trade_action_json_shape() {
        let action = TradeAction::buy("AAPL", dec!(10), dec!(150.25));
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action_type"], "buy");
        assert_eq!(json["symbol"], "AAPL");
        assert_eq!(json["price"], "150.25");

        let parsed: TradeAction = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, action);
    }

    #[test]
    fn no_trade_has_no_symbol() {
        let action = TradeAction::no_trade();
        assert!(action.symbol.is_none());
        assert!(action.quantity.is_zero());
    }

    #[test]
    fn snapshot_price_lookup() {
        let snapshot = MarketSnapshot {
            date: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            prices: BTreeMap::from([("AAPL".to_string(), dec!(110))]),
        };
        assert_eq!(snapshot.price("AAPL"), Some(dec!(110)));
        assert_eq!(snapshot.price("MSFT"), None);
    }
}
