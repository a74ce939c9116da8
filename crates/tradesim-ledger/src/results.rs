use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tradesim_models::ledger::{Position, TradingDay};
use tradesim_models::results::{DayDetail, ModelSeries, ResultsView, SeriesPoint};

use crate::error::LedgerError;
use crate::store::LedgerStore;

impl LedgerStore {
    /// Query finalized ledger rows.
    ///
    /// With no `end` (or `end == start`) the result is per-model detail for one date.
    /// Otherwise each model gets a value series trimmed to the dates it actually has.
    pub fn query_results(
        &self,
        start: NaiveDate,
        end: Option<NaiveDate>,
        model: Option<&str>,
    ) -> Result<ResultsView, LedgerError> {
        let end = end.unwrap_or(start);
        if start > end {
            return Err(LedgerError::Validation(format!(
                "start date {start} is after end date {end}"
            )));
        }

        let days = self.trading_days_in_range(start, end, model)?;
        if start == end {
            let models = days
                .into_iter()
                .map(|day| self.day_detail(day))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(ResultsView::Day {
                date: start,
                models,
            });
        }

        let mut by_model: BTreeMap<String, Vec<TradingDay>> = BTreeMap::new();
        for day in days {
            by_model.entry(day.model.clone()).or_default().push(day);
        }
        let models = by_model
            .into_iter()
            .filter_map(|(model, days)| model_series(model, &days))
            .collect();
        Ok(ResultsView::Range {
            start_date: start,
            end_date: end,
            models,
        })
    }

    fn day_detail(&self, day: TradingDay) -> Result<DayDetail, LedgerError> {
        let starting_position = match self.latest_trading_day_before(&day.model, day.date)? {
            Some(prior) => prior.position,
            None => Position::cash_only(day.starting_cash),
        };
        let ending_position = self.ending_position(&day)?;
        let actions = self.get_actions(day.id)?;
        let reasoning_full = day.reasoning_full.as_deref().map(|raw| {
            serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
        });

        Ok(DayDetail {
            model: day.model,
            date: day.date,
            job_id: day.job_id,
            starting_position,
            starting_portfolio_value: day.starting_portfolio_value,
            ending_position,
            ending_portfolio_value: day.ending_portfolio_value,
            daily_profit: day.daily_profit,
            daily_return_pct: day.daily_return_pct,
            days_since_last_trading: day.days_since_last_trading,
            actions,
            reasoning_summary: day.reasoning_summary,
            reasoning_full,
        })
    }
}

/// `days` must be non-empty and sorted by date.
fn model_series(model: String, days: &[TradingDay]) -> Option<ModelSeries> {
    let first = days.first()?;
    let last = days.last()?;
    let starting_value = first.starting_portfolio_value;
    let ending_value = last.ending_portfolio_value;
    let calendar_days = (last.date - first.date).num_days() + 1;

    Some(ModelSeries {
        model,
        start_date: first.date,
        end_date: last.date,
        points: days
            .iter()
            .map(|d| SeriesPoint {
                date: d.date,
                portfolio_value: d.ending_portfolio_value,
            })
            .collect(),
        starting_value,
        ending_value,
        period_return_pct: period_return_pct(starting_value, ending_value),
        annualized_return_pct: annualized_return_pct(starting_value, ending_value, calendar_days),
    })
}

pub fn period_return_pct(starting: Decimal, ending: Decimal) -> Decimal {
    if starting.is_zero() {
        return Decimal::ZERO;
    }
    ((ending - starting) / starting * Decimal::ONE_HUNDRED).round_dp(4)
}

/// `((ending / starting) ^ (365 / calendar_days) - 1) * 100`.
pub fn annualized_return_pct(starting: Decimal, ending: Decimal, calendar_days: i64) -> Option<f64> {
    if starting.is_zero() || calendar_days <= 0 {
        return None;
    }
    let ratio = (ending / starting).to_f64()?;
    let annualized = (ratio.powf(365.0 / calendar_days as f64) - 1.0) * 100.0;
    annualized.is_finite().then_some(annualized)
}
