use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use moka::future::Cache;
use rust_decimal::Decimal;
use tradesim_ledger::{LedgerStore, PriceBar};
use tradesim_models::agent_message::MarketSnapshot;

use crate::error::MarketDataError;

/// Result of a best-effort fetch of missing price data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOutcome {
    /// Symbols for which at least one bar was stored.
    pub downloaded: Vec<String>,
    /// Symbols whose fetch failed, with the reason.
    pub failed: Vec<(String, String)>,
    /// Symbols never requested because the request budget ran out.
    pub rate_limited: Vec<String>,
}

impl FetchOutcome {
    pub fn is_rate_limited(&self) -> bool {
        !self.rate_limited.is_empty()
    }
}

/// Source of daily prices for the simulation.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Tradable universe, in priority order.
    fn symbols(&self) -> &[String];

    /// Dates among `dates` with a price for every symbol.
    async fn available_dates(
        &self,
        dates: &[NaiveDate],
    ) -> Result<BTreeSet<NaiveDate>, MarketDataError>;

    /// Try to fill in prices for `dates`. Rate limiting is reported, not raised.
    async fn fetch_missing(
        &self,
        symbols: &[String],
        dates: &[NaiveDate],
    ) -> Result<FetchOutcome, MarketDataError>;

    /// Opening prices for `date`.
    async fn prices_on(&self, date: NaiveDate) -> Result<MarketSnapshot, MarketDataError>;
}

/// Fetches daily bars for one symbol from an external source.
#[async_trait]
pub trait PriceFetcher: Send + Sync {
    async fn fetch(&self, symbol: &str, dates: &[NaiveDate]) -> Result<Vec<PriceBar>, MarketDataError>;
}

/// Reads bars from a JSONL file, one `PriceBar` object per line.
pub struct JsonlPriceFetcher {
    path: PathBuf,
}

impl JsonlPriceFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PriceFetcher for JsonlPriceFetcher {
    async fn fetch(&self, symbol: &str, dates: &[NaiveDate]) -> Result<Vec<PriceBar>, MarketDataError> {
        let wanted: BTreeSet<NaiveDate> = dates.iter().copied().collect();
        let content = tokio::fs::read_to_string(&self.path).await?;
        Ok(parse_jsonl(&content)?
            .into_iter()
            .filter(|bar| bar.symbol == symbol && wanted.contains(&bar.date))
            .collect())
    }
}

/// Parse JSONL price bars. Blank lines are ignored.
pub fn parse_jsonl(content: &str) -> Result<Vec<PriceBar>, MarketDataError> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).map_err(MarketDataError::from))
        .collect()
}

/// Price data from the local `price_data` table.
///
/// Read-through: per-date price maps are kept in a moka hot cache once a date is
/// complete. Incomplete dates are never cached, so a later fetch can fill them.
pub struct LocalMarketData {
    store: Arc<LedgerStore>,
    symbols: Vec<String>,
    fetcher: Option<Arc<dyn PriceFetcher>>,
    max_fetch_requests: u32,
    hot: Cache<NaiveDate, Arc<BTreeMap<String, Decimal>>>,
}

impl LocalMarketData {
    pub fn new(
        store: Arc<LedgerStore>,
        symbols: Vec<String>,
        max_capacity: u64,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            symbols,
            fetcher: None,
            max_fetch_requests: u32::MAX,
            hot: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn PriceFetcher>, max_fetch_requests: u32) -> Self {
        self.fetcher = Some(fetcher);
        self.max_fetch_requests = max_fetch_requests;
        self
    }

    pub fn cached_dates(&self) -> u64 {
        self.hot.entry_count()
    }
}

#[async_trait]
impl MarketDataProvider for LocalMarketData {
    fn symbols(&self) -> &[String] {
        &self.symbols
    }

    async fn available_dates(
        &self,
        dates: &[NaiveDate],
    ) -> Result<BTreeSet<NaiveDate>, MarketDataError> {
        Ok(self.store.dates_with_complete_prices(dates, &self.symbols)?)
    }

    async fn fetch_missing(
        &self,
        symbols: &[String],
        dates: &[NaiveDate],
    ) -> Result<FetchOutcome, MarketDataError> {
        let mut outcome = FetchOutcome::default();
        let Some(fetcher) = &self.fetcher else {
            outcome.failed = symbols
                .iter()
                .map(|s| (s.clone(), "no price source configured".to_string()))
                .collect();
            return Ok(outcome);
        };

        let mut dates = dates.to_vec();
        dates.sort();
        dates.dedup();

        for (i, symbol) in symbols.iter().enumerate() {
            if i as u64 >= u64::from(self.max_fetch_requests) {
                outcome.rate_limited.push(symbol.clone());
                continue;
            }
            match fetcher.fetch(symbol, &dates).await {
                Ok(bars) if bars.is_empty() => {
                    outcome
                        .failed
                        .push((symbol.clone(), "no bars for requested dates".to_string()));
                }
                Ok(bars) => {
                    let written = self.store.upsert_prices(&bars)?;
                    tracing::info!(symbol = %symbol, bars = written, "Stored fetched price data");
                    outcome.downloaded.push(symbol.clone());
                }
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "Price fetch failed");
                    outcome.failed.push((symbol.clone(), e.to_string()));
                }
            }
        }

        if !outcome.rate_limited.is_empty() {
            tracing::warn!(
                not_downloaded = outcome.rate_limited.len(),
                "Price fetch rate limited"
            );
        }
        for date in &dates {
            self.hot.invalidate(date).await;
        }
        Ok(outcome)
    }

    async fn prices_on(&self, date: NaiveDate) -> Result<MarketSnapshot, MarketDataError> {
        if let Some(prices) = self.hot.get(&date).await {
            return Ok(MarketSnapshot {
                date,
                prices: prices.as_ref().clone(),
            });
        }

        let prices = self.store.open_prices_on(date, &self.symbols)?;
        if self.symbols.iter().all(|s| prices.contains_key(s)) {
            self.hot.insert(date, Arc::new(prices.clone())).await;
        }
        Ok(MarketSnapshot { date, prices })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn bar(symbol: &str, date: NaiveDate, open: Decimal) -> PriceBar {
        PriceBar {
            symbol: symbol.to_string(),
            date,
            open,
            high: open,
            low: open,
            close: open,
            volume: 1_000,
        }
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, day).unwrap()
    }

    fn symbols() -> Vec<String> {
        vec!["AAPL".to_string(), "MSFT".to_string()]
    }

    /// Serves a fixed set of bars and counts requests.
    pub(crate) struct MockFetcher {
        pub(crate) bars: Vec<PriceBar>,
        pub(crate) calls: AtomicUsize,
    }

    impl MockFetcher {
        pub(crate) fn serving(bars: Vec<PriceBar>) -> Self {
            Self {
                bars,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PriceFetcher for MockFetcher {
        async fn fetch(
            &self,
            symbol: &str,
            dates: &[NaiveDate],
        ) -> Result<Vec<PriceBar>, MarketDataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if symbol == "FAIL" {
                return Err(MarketDataError::Fetch("upstream 500".to_string()));
            }
            Ok(self
                .bars
                .iter()
                .filter(|b| b.symbol == symbol && dates.contains(&b.date))
                .cloned()
                .collect())
        }
    }

    fn provider(store: Arc<LedgerStore>) -> LocalMarketData {
        LocalMarketData::new(store, symbols(), 100, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn available_dates_need_every_symbol() {
        let store = Arc::new(LedgerStore::open_in_memory().unwrap());
        store
            .upsert_prices(&[
                bar("AAPL", d(2), dec!(100)),
                bar("MSFT", d(2), dec!(400)),
                bar("AAPL", d(3), dec!(101)),
            ])
            .unwrap();
        let market = provider(store);
        let available = market.available_dates(&[d(2), d(3)]).await.unwrap();
        assert_eq!(available.into_iter().collect::<Vec<_>>(), vec![d(2)]);
    }

    #[tokio::test]
    async fn fetch_fills_missing_dates() {
        let store = Arc::new(LedgerStore::open_in_memory().unwrap());
        let fetcher = Arc::new(MockFetcher {
            bars: vec![bar("AAPL", d(3), dec!(101)), bar("MSFT", d(3), dec!(401))],
            calls: AtomicUsize::new(0),
        });
        let market = provider(store).with_fetcher(fetcher.clone(), 10);

        let outcome = market.fetch_missing(&symbols(), &[d(3)]).await.unwrap();
        assert_eq!(outcome.downloaded, symbols());
        assert!(!outcome.is_rate_limited());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);

        let snapshot = market.prices_on(d(3)).await.unwrap();
        assert_eq!(snapshot.price("MSFT"), Some(dec!(401)));
        assert_eq!(market.cached_dates(), 1);
    }

    #[tokio::test]
    async fn request_budget_reports_rate_limit() {
        let store = Arc::new(LedgerStore::open_in_memory().unwrap());
        let fetcher = Arc::new(MockFetcher {
            bars: vec![bar("AAPL", d(3), dec!(101)), bar("MSFT", d(3), dec!(401))],
            calls: AtomicUsize::new(0),
        });
        let market = provider(store).with_fetcher(fetcher.clone(), 1);

        let outcome = market.fetch_missing(&symbols(), &[d(3)]).await.unwrap();
        assert_eq!(outcome.downloaded, vec!["AAPL".to_string()]);
        assert_eq!(outcome.rate_limited, vec!["MSFT".to_string()]);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(market.available_dates(&[d(3)]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_failures_are_reported_per_symbol() {
        let store = Arc::new(LedgerStore::open_in_memory().unwrap());
        let fetcher = Arc::new(MockFetcher {
            bars: vec![],
            calls: AtomicUsize::new(0),
        });
        let market = provider(store).with_fetcher(fetcher, 10);
        let outcome = market
            .fetch_missing(&["FAIL".to_string(), "AAPL".to_string()], &[d(3)])
            .await
            .unwrap();
        assert_eq!(outcome.failed.len(), 2);
        assert!(outcome.failed[0].1.contains("upstream 500"));
    }

    #[tokio::test]
    async fn without_fetcher_everything_fails() {
        let store = Arc::new(LedgerStore::open_in_memory().unwrap());
        let market = provider(store);
        let outcome = market.fetch_missing(&symbols(), &[d(3)]).await.unwrap();
        assert!(outcome.downloaded.is_empty());
        assert_eq!(outcome.failed.len(), 2);
    }

    #[tokio::test]
    async fn incomplete_dates_are_not_cached() {
        let store = Arc::new(LedgerStore::open_in_memory().unwrap());
        store.upsert_prices(&[bar("AAPL", d(2), dec!(100))]).unwrap();
        let market = provider(store.clone());

        let partial = market.prices_on(d(2)).await.unwrap();
        assert_eq!(partial.prices.len(), 1);
        assert_eq!(market.cached_dates(), 0);

        store.upsert_prices(&[bar("MSFT", d(2), dec!(400))]).unwrap();
        let full = market.prices_on(d(2)).await.unwrap();
        assert_eq!(full.prices.len(), 2);
    }

    #[tokio::test]
    async fn jsonl_fetcher_filters_symbol_and_dates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.jsonl");
        let lines = [
            r#"{"symbol":"AAPL","date":"2025-01-02","open":"100","high":"101","low":"99","close":"100.5","volume":10}"#,
            "",
            r#"{"symbol":"AAPL","date":"2025-01-03","open":"102","high":"103","low":"101","close":"102.5","volume":10}"#,
            r#"{"symbol":"MSFT","date":"2025-01-03","open":"400","high":"401","low":"399","close":"400.5","volume":10}"#,
        ];
        std::fs::write(&path, lines.join("\n")).unwrap();

        let fetcher = JsonlPriceFetcher::new(&path);
        let bars = fetcher.fetch("AAPL", &[d(3)]).await.unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].open, dec!(102));
    }
}
