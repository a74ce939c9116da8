use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::codec::get_decimal;
use crate::error::LedgerError;
use crate::store::LedgerStore;

/// One daily OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(default)]
    pub volume: i64,
}

impl LedgerStore {
    /// Insert or replace bars. Returns the number written.
    pub fn upsert_prices(&self, bars: &[PriceBar]) -> Result<usize, LedgerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO price_data (symbol, date, open, high, low, close, volume) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                 ON CONFLICT(symbol, date) DO UPDATE SET \
                 open = excluded.open, high = excluded.high, low = excluded.low, \
                 close = excluded.close, volume = excluded.volume",
            )?;
            for bar in bars {
                stmt.execute(params![
                    bar.symbol,
                    bar.date,
                    bar.open.to_string(),
                    bar.high.to_string(),
                    bar.low.to_string(),
                    bar.close.to_string(),
                    bar.volume,
                ])?;
            }
        }
        tx.commit()?;
        Ok(bars.len())
    }

    /// Dates (among `dates`) on which every symbol in `symbols` has a bar.
    pub fn dates_with_complete_prices(
        &self,
        dates: &[NaiveDate],
        symbols: &[String],
    ) -> Result<BTreeSet<NaiveDate>, LedgerError> {
        let (Some(first), Some(last)) = (dates.iter().min(), dates.iter().max()) else {
            return Ok(BTreeSet::new());
        };
        let wanted: BTreeSet<&str> = symbols.iter().map(String::as_str).collect();

        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT date, symbol FROM price_data WHERE date >= ?1 AND date <= ?2",
        )?;
        let mut seen: BTreeMap<NaiveDate, BTreeSet<String>> = BTreeMap::new();
        let rows = stmt.query_map(params![first, last], |row| {
            Ok((row.get::<_, NaiveDate>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (date, symbol) = row?;
            if wanted.contains(symbol.as_str()) {
                seen.entry(date).or_default().insert(symbol);
            }
        }

        Ok(dates
            .iter()
            .copied()
            .filter(|d| seen.get(d).is_some_and(|s| s.len() == wanted.len()))
            .collect())
    }

    /// Opening prices on `date` for whichever of `symbols` have a bar.
    pub fn open_prices_on(
        &self,
        date: NaiveDate,
        symbols: &[String],
    ) -> Result<BTreeMap<String, Decimal>, LedgerError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare_cached("SELECT symbol, open FROM price_data WHERE date = ?1")?;
        let prices = stmt
            .query_map(params![date], |row| {
                Ok((row.get::<_, String>(0)?, get_decimal(row, 1)?))
            })?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(prices
            .into_iter()
            .filter(|(symbol, _)| symbols.iter().any(|s| s == symbol))
            .collect())
    }

    pub fn price_count(&self) -> Result<i64, LedgerError> {
        let conn = self.conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM price_data", [], |row| row.get(0))?;
        Ok(count)
    }
}
