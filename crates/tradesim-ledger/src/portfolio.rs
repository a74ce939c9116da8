use rust_decimal::Decimal;
use tradesim_models::agent_message::{MarketSnapshot, TradeAction};
use tradesim_models::ledger::{ActionType, Position};

use crate::error::LedgerError;

/// Replay `actions` against `start` at the snapshot's opening prices.
///
/// Every trade must carry a positive whole-share quantity and the day's opening price
/// for its symbol. Buys need enough cash and sells need enough shares. `NoTrade` has no
/// effect. Amounts that overflow `Decimal` are rejected rather than wrapped or panicking.
pub fn apply_actions(
    start: &Position,
    actions: &[TradeAction],
    snapshot: &MarketSnapshot,
) -> Result<Position, LedgerError> {
    let mut position = start.clone();

    for (i, action) in actions.iter().enumerate() {
        if action.action_type == ActionType::NoTrade {
            continue;
        }
        let symbol = action.symbol.as_deref().ok_or_else(|| {
            LedgerError::InvalidAction(format!("action {i}: {} without a symbol", action.action_type))
        })?;
        if action.quantity <= Decimal::ZERO {
            return Err(LedgerError::InvalidAction(format!(
                "action {i}: quantity must be positive, got {}",
                action.quantity
            )));
        }
        if !action.quantity.fract().is_zero() {
            return Err(LedgerError::InvalidAction(format!(
                "action {i}: quantity must be whole shares, got {}",
                action.quantity
            )));
        }
        let open = snapshot
            .price(symbol)
            .ok_or_else(|| LedgerError::MissingPrice {
                symbol: symbol.to_string(),
                date: snapshot.date,
            })?;
        if action.price != open {
            return Err(LedgerError::InvalidAction(format!(
                "action {i}: {symbol} priced at {} but opened at {open}",
                action.price
            )));
        }

        let overflow = || {
            LedgerError::InvalidAction(format!(
                "action {i}: {} {symbol} at {open} is out of range",
                action.quantity
            ))
        };
        let cost = action.quantity.checked_mul(open).ok_or_else(overflow)?;
        let held = position.quantity(symbol);
        match action.action_type {
            ActionType::Buy => {
                if cost > position.cash {
                    return Err(LedgerError::InvalidAction(format!(
                        "action {i}: buying {} {symbol} costs {cost}, only {} cash",
                        action.quantity, position.cash
                    )));
                }
                position.cash = position.cash.checked_sub(cost).ok_or_else(overflow)?;
                let quantity = held.checked_add(action.quantity).ok_or_else(overflow)?;
                position.set_quantity(symbol, quantity);
            }
            ActionType::Sell => {
                if action.quantity > held {
                    return Err(LedgerError::InvalidAction(format!(
                        "action {i}: selling {} {symbol}, only {held} held",
                        action.quantity
                    )));
                }
                position.cash = position.cash.checked_add(cost).ok_or_else(overflow)?;
                position.set_quantity(symbol, held - action.quantity);
            }
            ActionType::NoTrade => {}
        }
    }

    Ok(position)
}
