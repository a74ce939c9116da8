use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};
use tradesim_agents::TradingAgent;
use tradesim_ledger::{
    apply_actions, daily_metrics, value_position, DayFinalization, LedgerError, LedgerStore,
    NewTradingDay, ProfitMetrics, StartingPoint,
};
use tradesim_models::agent_message::{AgentContext, MarketSnapshot};

use crate::error::ExecutorError;
use crate::market::MarketDataProvider;

/// Summary of one executed model-day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskReport {
    pub trading_day_id: i64,
    pub starting_portfolio_value: Decimal,
    pub ending_portfolio_value: Decimal,
    pub daily_profit: Decimal,
    pub total_actions: u32,
    pub duration_seconds: f64,
}

/// Runs one model-day: starting position, P&L, agent call, ledger finalize.
///
/// The executor is the only writer of ledger rows. A failure after the baseline row is
/// written removes that row so later continuity lookups never see it.
pub struct TaskExecutor {
    store: Arc<LedgerStore>,
    market: Arc<dyn MarketDataProvider>,
    agent: Arc<dyn TradingAgent>,
    initial_cash: Decimal,
}

impl TaskExecutor {
    pub fn new(
        store: Arc<LedgerStore>,
        market: Arc<dyn MarketDataProvider>,
        agent: Arc<dyn TradingAgent>,
        initial_cash: Decimal,
    ) -> Self {
        Self {
            store,
            market,
            agent,
            initial_cash,
        }
    }

    pub async fn execute(
        &self,
        job_id: &str,
        date: NaiveDate,
        model: &str,
    ) -> Result<TaskReport, ExecutorError> {
        let started = Instant::now();

        let start = self
            .store
            .resolve_starting_position(model, date, self.initial_cash)?;
        let snapshot = self.market.prices_on(date).await?;
        let metrics = daily_metrics(&start, &snapshot, self.initial_cash)?;

        let baseline = NewTradingDay {
            job_id: job_id.to_string(),
            model: model.to_string(),
            date,
            starting_cash: start.position.cash,
            starting_portfolio_value: metrics.starting_value,
            daily_profit: metrics.profit,
            daily_return_pct: metrics.return_pct,
            days_since_last_trading: metrics.days_since_last_trading,
        };
        let trading_day_id = match self.store.insert_baseline(&baseline) {
            Ok(id) => id,
            Err(LedgerError::Conflict(_)) => {
                return Err(ExecutorError::AlreadyTraded {
                    model: model.to_string(),
                    date,
                })
            }
            Err(e) => return Err(e.into()),
        };

        let context = AgentContext {
            job_id: job_id.to_string(),
            date,
            model: model.to_string(),
            trading_day_id,
        };
        match self.trade(&context, &start, &snapshot, &metrics, started).await {
            Ok(report) => {
                info!(
                    job_id,
                    model,
                    date = %date,
                    trading_day_id,
                    actions = report.total_actions,
                    ending_value = %report.ending_portfolio_value,
                    "Model-day finalized"
                );
                Ok(report)
            }
            Err(e) => {
                if let Err(discard) = self.store.discard_trading_day(trading_day_id) {
                    warn!(trading_day_id, error = %discard, "Failed to discard trading day");
                }
                Err(e)
            }
        }
    }

    /// Steps after the baseline row exists: agent call, replay check, finalize.
    async fn trade(
        &self,
        context: &AgentContext,
        start: &StartingPoint,
        snapshot: &MarketSnapshot,
        metrics: &ProfitMetrics,
        started: Instant,
    ) -> Result<TaskReport, ExecutorError> {
        let outcome = self.agent.run(context, &start.position, snapshot).await?;

        let ending = apply_actions(&start.position, &outcome.actions, snapshot)?;
        if ending != outcome.ending_position {
            return Err(ExecutorError::HoldingsMismatch(format!(
                "replayed cash {} holdings {:?}, agent reported cash {} holdings {:?}",
                ending.cash,
                ending.holdings,
                outcome.ending_position.cash,
                outcome.ending_position.holdings
            )));
        }
        let ending_value = value_position(&ending, snapshot)?;
        let total_actions = outcome
            .actions
            .iter()
            .filter(|a| a.action_type.is_trade())
            .count() as u32;
        let duration_seconds = started.elapsed().as_secs_f64();
        let reasoning_full = serde_json::to_string(&outcome.reasoning).map_err(LedgerError::from)?;

        self.store.finalize_trading_day(
            context.trading_day_id,
            &DayFinalization {
                actions: outcome.actions,
                ending_position: ending,
                ending_portfolio_value: ending_value,
                reasoning_summary: outcome.summary,
                reasoning_full: Some(reasoning_full),
                duration_seconds,
            },
        )?;

        Ok(TaskReport {
            trading_day_id: context.trading_day_id,
            starting_portfolio_value: metrics.starting_value,
            ending_portfolio_value: ending_value,
            daily_profit: metrics.profit,
            total_actions,
            duration_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::tests::bar;
    use crate::market::LocalMarketData;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tradesim_agents::test_support::{Script, ScriptedAgent};
    use tradesim_models::agent_message::TradeAction;
    use tradesim_models::ledger::Position;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, day).unwrap()
    }

    fn setup(agent: ScriptedAgent) -> (Arc<LedgerStore>, TaskExecutor, Arc<ScriptedAgent>) {
        let store = Arc::new(LedgerStore::open_in_memory().unwrap());
        store
            .upsert_prices(&[
                bar("AAPL", d(3), dec!(100)),
                bar("AAPL", d(6), dec!(110)),
                bar("AAPL", d(7), dec!(110)),
            ])
            .unwrap();
        let market = Arc::new(LocalMarketData::new(
            store.clone(),
            vec!["AAPL".to_string()],
            100,
            Duration::from_secs(60),
        ));
        let agent = Arc::new(agent);
        let executor = TaskExecutor::new(store.clone(), market, agent.clone(), dec!(10000));
        (store, executor, agent)
    }

    #[tokio::test]
    async fn weekend_gap_and_continuity() {
        let agent = ScriptedAgent::new().on(
            "alpha",
            d(3),
            Script::Trade(vec![TradeAction::buy("AAPL", dec!(10), dec!(100))]),
        );
        let (store, executor, agent) = setup(agent);

        let friday = executor.execute("job-1", d(3), "alpha").await.unwrap();
        assert_eq!(friday.starting_portfolio_value, dec!(10000));
        assert_eq!(friday.daily_profit, Decimal::ZERO);
        assert_eq!(friday.ending_portfolio_value, dec!(10000));
        assert_eq!(friday.total_actions, 1);

        let monday = executor.execute("job-2", d(6), "alpha").await.unwrap();
        assert_eq!(monday.starting_portfolio_value, dec!(10100));
        assert_eq!(monday.daily_profit, dec!(100));
        let row = store.get_trading_day("alpha", d(6)).unwrap().unwrap();
        assert_eq!(row.daily_return_pct, dec!(1.0));
        assert_eq!(row.days_since_last_trading, 3);
        assert_eq!(row.job_id, "job-2");

        let calls = agent.calls();
        assert_eq!(calls.len(), 2);
        let (context, position) = &calls[1];
        assert_eq!(context.trading_day_id, monday.trading_day_id);
        assert_eq!(position.cash, dec!(9000));
        assert_eq!(position.quantity("AAPL"), dec!(10));
    }

    #[tokio::test]
    async fn agent_failure_leaves_no_ledger_row() {
        let agent = ScriptedAgent::new().on("alpha", d(3), Script::Fail("cli crashed".to_string()));
        let (store, executor, _) = setup(agent);

        let err = executor.execute("job-1", d(3), "alpha").await.unwrap_err();
        assert!(matches!(err, ExecutorError::Agent(_)));
        assert!(store.get_trading_day("alpha", d(3)).unwrap().is_none());
        assert!(store
            .resolve_starting_position("alpha", d(6), dec!(10000))
            .unwrap()
            .previous
            .is_none());
    }

    #[tokio::test]
    async fn misreported_holdings_fail_the_task() {
        let mut claimed = Position::cash_only(dec!(9000));
        claimed.set_quantity("AAPL", dec!(11));
        let agent = ScriptedAgent::new().on(
            "alpha",
            d(3),
            Script::Misreport(vec![TradeAction::buy("AAPL", dec!(10), dec!(100))], claimed),
        );
        let (store, executor, _) = setup(agent);

        let err = executor.execute("job-1", d(3), "alpha").await.unwrap_err();
        assert!(matches!(err, ExecutorError::HoldingsMismatch(_)));
        assert!(store.get_trading_day("alpha", d(3)).unwrap().is_none());
    }

    #[tokio::test]
    async fn off_market_price_is_rejected() {
        let agent = ScriptedAgent::new().on(
            "alpha",
            d(3),
            Script::Misreport(
                vec![TradeAction::buy("AAPL", dec!(10), dec!(90))],
                Position::cash_only(dec!(9100)),
            ),
        );
        let (store, executor, _) = setup(agent);
        let err = executor.execute("job-1", d(3), "alpha").await.unwrap_err();
        assert!(matches!(err, ExecutorError::Ledger(LedgerError::InvalidAction(_))));
        assert!(store.get_trading_day("alpha", d(3)).unwrap().is_none());
    }

    #[tokio::test]
    async fn finalized_day_is_not_traded_twice() {
        let (_, executor, _) = setup(ScriptedAgent::new());
        executor.execute("job-1", d(3), "alpha").await.unwrap();
        let err = executor.execute("job-2", d(3), "alpha").await.unwrap_err();
        assert!(matches!(err, ExecutorError::AlreadyTraded { .. }));
        assert!(err
            .to_string()
            .starts_with("Ledger already has a completed trading day"));
    }

    #[tokio::test]
    async fn flat_prices_with_trades_report_zero_profit() {
        let agent = ScriptedAgent::new()
            .on(
                "alpha",
                d(6),
                Script::Trade(vec![TradeAction::buy("AAPL", dec!(50), dec!(110))]),
            )
            .on(
                "alpha",
                d(7),
                Script::Trade(vec![
                    TradeAction::sell("AAPL", dec!(20), dec!(110)),
                    TradeAction::buy("AAPL", dec!(5), dec!(110)),
                ]),
            );
        let (store, executor, _) = setup(agent);
        executor.execute("job-1", d(6), "alpha").await.unwrap();
        let report = executor.execute("job-1", d(7), "alpha").await.unwrap();
        assert_eq!(report.daily_profit, Decimal::ZERO);
        assert_eq!(report.total_actions, 2);
        let actions = store.get_actions(report.trading_day_id).unwrap();
        assert_eq!(actions.len(), 2);
    }
}
