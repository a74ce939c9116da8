use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ledger::{Action, Position};

/// Full detail of one model's trading day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DayDetail {
    pub model: String,
    pub date: NaiveDate,
    pub job_id: String,
    pub starting_position: Position,
    pub starting_portfolio_value: Decimal,
    pub ending_position: Position,
    pub ending_portfolio_value: Decimal,
    pub daily_profit: Decimal,
    pub daily_return_pct: Decimal,
    pub days_since_last_trading: i64,
    pub actions: Vec<Action>,
    pub reasoning_summary: Option<String>,
    pub reasoning_full: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub portfolio_value: Decimal,
}

/// Portfolio value series for one model over a date range.
///
/// `start_date`/`end_date` are the first and last dates with data, which may be
/// narrower than the requested range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSeries {
    pub model: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub points: Vec<SeriesPoint>,
    pub starting_value: Decimal,
    pub ending_value: Decimal,
    pub period_return_pct: Decimal,
    pub annualized_return_pct: Option<f64>,
}

/// Results query response. Single-date requests get per-model detail, ranges get series.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultsView {
    Day { date: NaiveDate, models: Vec<DayDetail> },
    Range {
        start_date: NaiveDate,
        end_date: NaiveDate,
        models: Vec<ModelSeries>,
    },
}

impl ResultsView {
    pub fn model_count(&self) -> usize {
        match self {
            ResultsView::Day { models, .. } => models.len(),
            ResultsView::Range { models, .. } => models.len(),
        }
    }
}
