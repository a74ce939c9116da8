use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tradesim_models::agent_message::MarketSnapshot;
use tradesim_models::ledger::Position;

use crate::error::LedgerError;
use crate::trading::StartingPoint;

const RETURN_PCT_DP: u32 = 4;

/// Start-of-day metrics for one model-day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitMetrics {
    /// Prior holdings valued at today's prices, before any of today's trades.
    pub starting_value: Decimal,
    pub profit: Decimal,
    pub return_pct: Decimal,
    pub days_since_last_trading: i64,
}

/// Compare today's valuation of the prior position against the prior day's ending value.
///
/// `previous_ending_value` of `None` is the first trading day: profit and return are zero.
pub fn calculate_metrics(
    previous_ending_value: Option<Decimal>,
    current_valuation: Decimal,
    days_since_last_trading: i64,
) -> ProfitMetrics {
    let Some(previous) = previous_ending_value else {
        return ProfitMetrics {
            starting_value: current_valuation,
            profit: Decimal::ZERO,
            return_pct: Decimal::ZERO,
            days_since_last_trading: 0,
        };
    };

    let profit = current_valuation - previous;
    let return_pct = if previous.is_zero() {
        Decimal::ZERO
    } else {
        (profit / previous * Decimal::ONE_HUNDRED).round_dp(RETURN_PCT_DP)
    };
    ProfitMetrics {
        starting_value: current_valuation,
        profit,
        return_pct,
        days_since_last_trading,
    }
}

/// Cash plus every holding at the snapshot's prices.
pub fn value_position(position: &Position, snapshot: &MarketSnapshot) -> Result<Decimal, LedgerError> {
    let mut total = position.cash;
    for (symbol, quantity) in &position.holdings {
        let price = snapshot
            .price(symbol)
            .ok_or_else(|| LedgerError::MissingPrice {
                symbol: symbol.clone(),
                date: snapshot.date,
            })?;
        total = quantity
            .checked_mul(price)
            .and_then(|value| total.checked_add(value))
            .ok_or_else(|| {
                LedgerError::InvalidAction(format!(
                    "{quantity} {symbol} at {price} is out of range"
                ))
            })?;
    }
    Ok(total)
}

/// Metrics for the start of `snapshot.date` given the resolved starting point.
pub fn daily_metrics(
    start: &StartingPoint,
    snapshot: &MarketSnapshot,
    initial_cash: Decimal,
) -> Result<ProfitMetrics, LedgerError> {
    match &start.previous {
        None => Ok(calculate_metrics(None, initial_cash, 0)),
        Some(prior) => {
            let valuation = value_position(&start.position, snapshot)?;
            let gap = (snapshot.date - prior.trading_day.date).num_days();
            Ok(calculate_metrics(
                Some(prior.trading_day.ending_portfolio_value),
                valuation,
                gap,
            ))
        }
    }
}
