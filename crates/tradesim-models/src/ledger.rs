use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Buy,
    Sell,
    NoTrade,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Buy => "buy",
            ActionType::Sell => "sell",
            ActionType::NoTrade => "no_trade",
        }
    }

    /// Buys and sells move cash and shares; `NoTrade` is a recorded decision only.
    pub fn is_trade(&self) -> bool {
        !matches!(self, ActionType::NoTrade)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(ActionType::Buy),
            "sell" => Ok(ActionType::Sell),
            "no_trade" => Ok(ActionType::NoTrade),
            other => Err(format!("unknown action type: {other}")),
        }
    }
}

/// Authoritative portfolio record for one model on one date.
///
/// Keyed by `(model, date)`. `job_id` records which job produced the row but is
/// never used to look up continuity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradingDay {
    pub id: i64,
    pub job_id: String,
    pub model: String,
    pub date: NaiveDate,
    pub starting_cash: Decimal,
    pub starting_portfolio_value: Decimal,
    pub daily_profit: Decimal,
    pub daily_return_pct: Decimal,
    pub ending_cash: Decimal,
    pub ending_portfolio_value: Decimal,
    pub reasoning_summary: Option<String>,
    /// Serialized reasoning trace (JSON array of steps).
    pub reasoning_full: Option<String>,
    pub total_actions: u32,
    pub days_since_last_trading: i64,
    pub duration_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
    /// `None` until the executor finalizes the row.
    pub completed_at: Option<DateTime<Utc>>,
}

impl TradingDay {
    pub fn is_finalized(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Ending position for one symbol on one trading day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Holding {
    pub trading_day_id: i64,
    pub symbol: String,
    pub quantity: Decimal,
}

/// Append-only trade ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub id: i64,
    pub trading_day_id: i64,
    pub action_type: ActionType,
    pub symbol: Option<String>,
    pub quantity: Decimal,
    pub price: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Cash plus share holdings at a point in time.
///
/// Holdings with zero quantity are never kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub cash: Decimal,
    pub holdings: BTreeMap<String, Decimal>,
}

impl Position {
    pub fn cash_only(cash: Decimal) -> Self {
        Self {
            cash,
            holdings: BTreeMap::new(),
        }
    }

    pub fn quantity(&self, symbol: &str) -> Decimal {
        self.holdings.get(symbol).copied().unwrap_or(Decimal::ZERO)
    }

    /// Symbols held with a non-zero quantity.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.holdings.keys().map(String::as_str)
    }

    /// Set a holding, dropping the entry when the quantity reaches zero.
    pub fn set_quantity(&mut self, symbol: &str, quantity: Decimal) {
        if quantity.is_zero() {
            self.holdings.remove(symbol);
        } else {
            self.holdings.insert(symbol.to_string(), quantity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn action_type_serialization() {
        assert_eq!(serde_json::to_string(&ActionType::Buy).unwrap(), "\"buy\"");
        assert_eq!(
            serde_json::to_string(&ActionType::NoTrade).unwrap(),
            "\"no_trade\""
        );
        assert_eq!("sell".parse::<ActionType>().unwrap(), ActionType::Sell);
        assert!(!ActionType::NoTrade.is_trade());
    }

    #[test]
    fn position_drops_zero_holdings() {
        let mut position = Position::cash_only(dec!(1000));
        position.set_quantity("AAPL", dec!(5));
        assert_eq!(position.quantity("AAPL"), dec!(5));

        position.set_quantity("AAPL", Decimal::ZERO);
        assert!(position.holdings.is_empty());
        assert_eq!(position.quantity("AAPL"), Decimal::ZERO);
    }

    #[test]
    fn decimals_serialize_as_strings() {
        let mut position = Position::cash_only(dec!(9000.50));
        position.set_quantity("AAPL", dec!(10));
        let json = serde_json::to_value(&position).unwrap();
        assert_eq!(json["cash"], serde_json::json!("9000.50"));
        assert_eq!(json["holdings"]["AAPL"], serde_json::json!("10"));
    }
}
