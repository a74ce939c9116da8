use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rusqlite::{params, OptionalExtension, Row};
use tradesim_models::agent_message::TradeAction;
use tradesim_models::ledger::{Action, Holding, Position, TradingDay};

use crate::codec::{get_decimal, get_parsed};
use crate::error::LedgerError;
use crate::store::LedgerStore;

const TRADING_DAY_COLUMNS: &str = "id, job_id, model, date, starting_cash, \
     starting_portfolio_value, daily_profit, daily_return_pct, ending_cash, \
     ending_portfolio_value, reasoning_summary, reasoning_full, total_actions, \
     days_since_last_trading, duration_seconds, created_at, completed_at";

fn trading_day_from_row(row: &Row<'_>) -> rusqlite::Result<TradingDay> {
    Ok(TradingDay {
        id: row.get(0)?,
        job_id: row.get(1)?,
        model: row.get(2)?,
        date: row.get(3)?,
        starting_cash: get_decimal(row, 4)?,
        starting_portfolio_value: get_decimal(row, 5)?,
        daily_profit: get_decimal(row, 6)?,
        daily_return_pct: get_decimal(row, 7)?,
        ending_cash: get_decimal(row, 8)?,
        ending_portfolio_value: get_decimal(row, 9)?,
        reasoning_summary: row.get(10)?,
        reasoning_full: row.get(11)?,
        total_actions: row.get(12)?,
        days_since_last_trading: row.get(13)?,
        duration_seconds: row.get(14)?,
        created_at: row.get(15)?,
        completed_at: row.get(16)?,
    })
}

/// The most recent finalized trading day before some date, with its ending holdings.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorDay {
    pub trading_day: TradingDay,
    pub position: Position,
}

/// Where a model stands at the start of a date.
#[derive(Debug, Clone, PartialEq)]
pub struct StartingPoint {
    pub position: Position,
    /// `None` on the model's first trading day.
    pub previous: Option<PriorDay>,
}

/// Baseline values for a new trading day. Ending fields start equal to starting ones.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTradingDay {
    pub job_id: String,
    pub model: String,
    pub date: NaiveDate,
    pub starting_cash: Decimal,
    pub starting_portfolio_value: Decimal,
    pub daily_profit: Decimal,
    pub daily_return_pct: Decimal,
    pub days_since_last_trading: i64,
}

/// Results written when a trading day is finalized.
#[derive(Debug, Clone, PartialEq)]
pub struct DayFinalization {
    pub actions: Vec<TradeAction>,
    pub ending_position: Position,
    pub ending_portfolio_value: Decimal,
    pub reasoning_summary: Option<String>,
    pub reasoning_full: Option<String>,
    pub duration_seconds: f64,
}

impl LedgerStore {
    /// Resolve the starting position for `model` on `date`.
    ///
    /// Uses the most recent finalized trading day strictly before `date`, whichever
    /// job produced it. Gaps (weekends, holidays, earlier jobs) need no special
    /// handling. With no prior day the model starts with `initial_cash` and nothing held.
    pub fn resolve_starting_position(
        &self,
        model: &str,
        date: NaiveDate,
        initial_cash: Decimal,
    ) -> Result<StartingPoint, LedgerError> {
        match self.latest_trading_day_before(model, date)? {
            Some(prior) => Ok(StartingPoint {
                position: prior.position.clone(),
                previous: Some(prior),
            }),
            None => Ok(StartingPoint {
                position: Position::cash_only(initial_cash),
                previous: None,
            }),
        }
    }

    pub fn latest_trading_day_before(
        &self,
        model: &str,
        date: NaiveDate,
    ) -> Result<Option<PriorDay>, LedgerError> {
        let trading_day = {
            let conn = self.conn()?;
            conn.query_row(
                &format!(
                    "SELECT {TRADING_DAY_COLUMNS} FROM trading_days \
                     WHERE model = ?1 AND date < ?2 AND completed_at IS NOT NULL \
                     ORDER BY date DESC LIMIT 1"
                ),
                params![model, date],
                trading_day_from_row,
            )
            .optional()?
        };

        let Some(trading_day) = trading_day else {
            return Ok(None);
        };
        let position = self.ending_position(&trading_day)?;
        Ok(Some(PriorDay {
            trading_day,
            position,
        }))
    }

    pub fn get_trading_day(
        &self,
        model: &str,
        date: NaiveDate,
    ) -> Result<Option<TradingDay>, LedgerError> {
        let conn = self.conn()?;
        let day = conn
            .query_row(
                &format!(
                    "SELECT {TRADING_DAY_COLUMNS} FROM trading_days WHERE model = ?1 AND date = ?2"
                ),
                params![model, date],
                trading_day_from_row,
            )
            .optional()?;
        Ok(day)
    }

    pub fn get_trading_day_by_id(&self, id: i64) -> Result<Option<TradingDay>, LedgerError> {
        let conn = self.conn()?;
        let day = conn
            .query_row(
                &format!("SELECT {TRADING_DAY_COLUMNS} FROM trading_days WHERE id = ?1"),
                params![id],
                trading_day_from_row,
            )
            .optional()?;
        Ok(day)
    }

    /// Finalized trading days in `[start, end]`, ordered by model then date.
    pub fn trading_days_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        model: Option<&str>,
    ) -> Result<Vec<TradingDay>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TRADING_DAY_COLUMNS} FROM trading_days \
             WHERE date >= ?1 AND date <= ?2 AND completed_at IS NOT NULL \
             AND (?3 IS NULL OR model = ?3) \
             ORDER BY model ASC, date ASC"
        ))?;
        let days = stmt
            .query_map(params![start, end, model], trading_day_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(days)
    }

    /// Insert the baseline row for a trading day and return its id.
    ///
    /// A leftover unfinalized row for the same (model, date) is removed first. A
    /// finalized one is a conflict: the day has already been traded.
    pub fn insert_baseline(&self, day: &NewTradingDay) -> Result<i64, LedgerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let existing: Option<(i64, bool)> = tx
            .query_row(
                "SELECT id, completed_at IS NOT NULL FROM trading_days WHERE model = ?1 AND date = ?2",
                params![day.model, day.date],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((id, finalized)) = existing {
            if finalized {
                return Err(LedgerError::Conflict(format!(
                    "Ledger already has a completed trading day for {}/{}",
                    day.model, day.date
                )));
            }
            tracing::warn!(model = %day.model, date = %day.date, id, "Removing unfinalized trading day");
            delete_trading_day(&tx, id)?;
        }

        tx.execute(
            "INSERT INTO trading_days (job_id, model, date, starting_cash, \
             starting_portfolio_value, daily_profit, daily_return_pct, ending_cash, \
             ending_portfolio_value, total_actions, days_since_last_trading, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?4, ?5, 0, ?8, ?9)",
            params![
                day.job_id,
                day.model,
                day.date,
                day.starting_cash.to_string(),
                day.starting_portfolio_value.to_string(),
                day.daily_profit.to_string(),
                day.daily_return_pct.to_string(),
                day.days_since_last_trading,
                Utc::now(),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    /// Write actions, ending holdings and ending values for a baseline row, in one
    /// transaction.
    pub fn finalize_trading_day(
        &self,
        trading_day_id: i64,
        result: &DayFinalization,
    ) -> Result<(), LedgerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now();

        let finalized: Option<bool> = tx
            .query_row(
                "SELECT completed_at IS NOT NULL FROM trading_days WHERE id = ?1",
                params![trading_day_id],
                |row| row.get(0),
            )
            .optional()?;
        match finalized {
            None => {
                return Err(LedgerError::NotFound(format!(
                    "trading day {trading_day_id}"
                )))
            }
            Some(true) => {
                return Err(LedgerError::Conflict(format!(
                    "trading day {trading_day_id} is already finalized"
                )))
            }
            Some(false) => {}
        }

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO actions (trading_day_id, action_type, symbol, quantity, price, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for action in &result.actions {
                stmt.execute(params![
                    trading_day_id,
                    action.action_type.as_str(),
                    action.symbol,
                    action.quantity.to_string(),
                    action.price.to_string(),
                    now,
                ])?;
            }
        }
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO holdings (trading_day_id, symbol, quantity) VALUES (?1, ?2, ?3)",
            )?;
            for (symbol, quantity) in &result.ending_position.holdings {
                stmt.execute(params![trading_day_id, symbol, quantity.to_string()])?;
            }
        }

        let total_actions = result
            .actions
            .iter()
            .filter(|a| a.action_type.is_trade())
            .count() as u32;
        tx.execute(
            "UPDATE trading_days SET ending_cash = ?1, ending_portfolio_value = ?2, \
             reasoning_summary = ?3, reasoning_full = ?4, total_actions = ?5, \
             duration_seconds = ?6, completed_at = ?7 WHERE id = ?8",
            params![
                result.ending_position.cash.to_string(),
                result.ending_portfolio_value.to_string(),
                result.reasoning_summary,
                result.reasoning_full,
                total_actions,
                result.duration_seconds,
                now,
                trading_day_id,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Remove a trading day with its holdings and actions.
    pub fn discard_trading_day(&self, trading_day_id: i64) -> Result<(), LedgerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        delete_trading_day(&tx, trading_day_id)?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_holdings(&self, trading_day_id: i64) -> Result<Vec<Holding>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT trading_day_id, symbol, quantity FROM holdings \
             WHERE trading_day_id = ?1 ORDER BY symbol ASC",
        )?;
        let holdings = stmt
            .query_map(params![trading_day_id], |row| {
                Ok(Holding {
                    trading_day_id: row.get(0)?,
                    symbol: row.get(1)?,
                    quantity: get_decimal(row, 2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(holdings)
    }

    pub fn get_actions(&self, trading_day_id: i64) -> Result<Vec<Action>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, trading_day_id, action_type, symbol, quantity, price, created_at \
             FROM actions WHERE trading_day_id = ?1 ORDER BY id ASC",
        )?;
        let actions = stmt
            .query_map(params![trading_day_id], |row| {
                Ok(Action {
                    id: row.get(0)?,
                    trading_day_id: row.get(1)?,
                    action_type: get_parsed(row, 2)?,
                    symbol: row.get(3)?,
                    quantity: get_decimal(row, 4)?,
                    price: get_decimal(row, 5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(actions)
    }

    /// Ending cash plus ending holdings of a trading day.
    pub fn ending_position(&self, trading_day: &TradingDay) -> Result<Position, LedgerError> {
        let mut position = Position::cash_only(trading_day.ending_cash);
        for holding in self.get_holdings(trading_day.id)? {
            position.set_quantity(&holding.symbol, holding.quantity);
        }
        Ok(position)
    }
}

fn delete_trading_day(tx: &rusqlite::Transaction<'_>, id: i64) -> Result<(), LedgerError> {
    tx.execute("DELETE FROM actions WHERE trading_day_id = ?1", params![id])?;
    tx.execute("DELETE FROM holdings WHERE trading_day_id = ?1", params![id])?;
    tx.execute("DELETE FROM trading_days WHERE id = ?1", params![id])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tradesim_models::ledger::ActionType;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    fn baseline(job_id: &str, model: &str, d: NaiveDate, cash: Decimal) -> NewTradingDay {
        NewTradingDay {
            job_id: job_id.to_string(),
            model: model.to_string(),
            date: d,
            starting_cash: cash,
            starting_portfolio_value: cash,
            daily_profit: Decimal::ZERO,
            daily_return_pct: Decimal::ZERO,
            days_since_last_trading: 0,
        }
    }

    fn finalize_with(store: &LedgerStore, id: i64, cash: Decimal, holdings: &[(&str, Decimal)]) {
        let mut position = Position::cash_only(cash);
        for (symbol, qty) in holdings {
            position.set_quantity(symbol, *qty);
        }
        store
            .finalize_trading_day(
                id,
                &DayFinalization {
                    actions: vec![TradeAction::buy("AAPL", dec!(10), dec!(100))],
                    ending_position: position,
                    ending_portfolio_value: dec!(10000),
                    reasoning_summary: Some("bought".to_string()),
                    reasoning_full: Some("[]".to_string()),
                    duration_seconds: 1.5,
                },
            )
            .unwrap();
    }

    #[test]
    fn baseline_mirrors_starting_values() {
        let store = LedgerStore::open_in_memory().unwrap();
        let id = store
            .insert_baseline(&baseline("job-1", "alpha", date(3), dec!(10000)))
            .unwrap();

        let day = store.get_trading_day_by_id(id).unwrap().unwrap();
        assert_eq!(day.ending_cash, dec!(10000));
        assert_eq!(day.ending_portfolio_value, dec!(10000));
        assert_eq!(day.total_actions, 0);
        assert!(!day.is_finalized());
    }

    #[test]
    fn finalize_writes_actions_and_holdings() {
        let store = LedgerStore::open_in_memory().unwrap();
        let id = store
            .insert_baseline(&baseline("job-1", "alpha", date(3), dec!(10000)))
            .unwrap();
        finalize_with(&store, id, dec!(9000), &[("AAPL", dec!(10))]);

        let day = store.get_trading_day("alpha", date(3)).unwrap().unwrap();
        assert!(day.is_finalized());
        assert_eq!(day.ending_cash, dec!(9000));
        assert_eq!(day.total_actions, 1);
        assert_eq!(day.duration_seconds, Some(1.5));

        let actions = store.get_actions(id).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type, ActionType::Buy);
        assert_eq!(actions[0].price, dec!(100));

        let position = store.ending_position(&day).unwrap();
        assert_eq!(position.quantity("AAPL"), dec!(10));
    }

    #[test]
    fn continuity_ignores_unfinalized_and_later_days() {
        let store = LedgerStore::open_in_memory().unwrap();
        let first = store
            .insert_baseline(&baseline("job-1", "alpha", date(3), dec!(10000)))
            .unwrap();
        finalize_with(&store, first, dec!(9000), &[("AAPL", dec!(10))]);
        // Unfinalized baseline on a later date must not be picked up.
        store
            .insert_baseline(&baseline("job-2", "alpha", date(6), dec!(9000)))
            .unwrap();

        let start = store
            .resolve_starting_position("alpha", date(7), dec!(10000))
            .unwrap();
        let prior = start.previous.unwrap();
        assert_eq!(prior.trading_day.date, date(3));
        assert_eq!(start.position.cash, dec!(9000));
        assert_eq!(start.position.quantity("AAPL"), dec!(10));

        let first_day = store
            .resolve_starting_position("alpha", date(3), dec!(10000))
            .unwrap();
        assert!(first_day.previous.is_none());
        assert_eq!(first_day.position, Position::cash_only(dec!(10000)));
    }

    #[test]
    fn continuity_is_per_model() {
        let store = LedgerStore::open_in_memory().unwrap();
        let id = store
            .insert_baseline(&baseline("job-1", "alpha", date(3), dec!(10000)))
            .unwrap();
        finalize_with(&store, id, dec!(9000), &[("AAPL", dec!(10))]);

        let beta = store
            .resolve_starting_position("beta", date(6), dec!(5000))
            .unwrap();
        assert!(beta.previous.is_none());
        assert_eq!(beta.position.cash, dec!(5000));
    }

    #[test]
    fn baseline_replaces_unfinalized_row_but_not_finalized() {
        let store = LedgerStore::open_in_memory().unwrap();
        let stale = store
            .insert_baseline(&baseline("job-1", "alpha", date(3), dec!(10000)))
            .unwrap();
        let fresh = store
            .insert_baseline(&baseline("job-2", "alpha", date(3), dec!(10000)))
            .unwrap();
        assert_ne!(stale, fresh);
        assert!(store.get_trading_day_by_id(stale).unwrap().is_none());

        finalize_with(&store, fresh, dec!(9000), &[]);
        let err = store
            .insert_baseline(&baseline("job-3", "alpha", date(3), dec!(10000)))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
    }

    #[test]
    fn discard_removes_children() {
        let store = LedgerStore::open_in_memory().unwrap();
        let id = store
            .insert_baseline(&baseline("job-1", "alpha", date(3), dec!(10000)))
            .unwrap();
        finalize_with(&store, id, dec!(9000), &[("AAPL", dec!(10))]);

        store.discard_trading_day(id).unwrap();
        assert!(store.get_trading_day_by_id(id).unwrap().is_none());
        assert!(store.get_actions(id).unwrap().is_empty());
        assert!(store.get_holdings(id).unwrap().is_empty());
    }

    #[test]
    fn finalize_twice_is_rejected() {
        let store = LedgerStore::open_in_memory().unwrap();
        let id = store
            .insert_baseline(&baseline("job-1", "alpha", date(3), dec!(10000)))
            .unwrap();
        finalize_with(&store, id, dec!(9000), &[]);

        let err = store
            .finalize_trading_day(
                id,
                &DayFinalization {
                    actions: vec![],
                    ending_position: Position::cash_only(dec!(1)),
                    ending_portfolio_value: dec!(1),
                    reasoning_summary: None,
                    reasoning_full: None,
                    duration_seconds: 0.0,
                },
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
        assert!(matches!(
            store.finalize_trading_day(999, &DayFinalization {
                actions: vec![],
                ending_position: Position::default(),
                ending_portfolio_value: Decimal::ZERO,
                reasoning_summary: None,
                reasoning_full: None,
                duration_seconds: 0.0,
            }),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn range_query_filters_by_model() {
        let store = LedgerStore::open_in_memory().unwrap();
        for (model, d) in [("alpha", 3), ("alpha", 6), ("beta", 3)] {
            let id = store
                .insert_baseline(&baseline("job-1", model, date(d), dec!(10000)))
                .unwrap();
            finalize_with(&store, id, dec!(10000), &[]);
        }
        store
            .insert_baseline(&baseline("job-1", "beta", date(6), dec!(10000)))
            .unwrap();

        let all = store.trading_days_in_range(date(1), date(31), None).unwrap();
        assert_eq!(all.len(), 3);
        let alpha = store
            .trading_days_in_range(date(1), date(31), Some("alpha"))
            .unwrap();
        assert_eq!(
            alpha.iter().map(|d| d.date).collect::<Vec<_>>(),
            vec![date(3), date(6)]
        );
    }
}
