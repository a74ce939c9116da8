//! Worker daemon lifecycle against a file-backed ledger: restart recovery, pickup of
//! pending jobs and cancellation.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal_macros::dec;
use tradesim_agents::test_support::ScriptedAgent;
use tradesim_ledger::{LedgerStore, PriceBar};
use tradesim_models::job::{JobStatus, TaskStatus};
use tradesim_scheduler::manager::INTERRUPTED_REASON;
use tradesim_scheduler::{
    JobCreation, JobManager, JobRequest, LocalMarketData, SimulationWorker, TaskExecutor,
    WorkerDaemon,
};

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, day).unwrap()
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
}

fn open_store(dir: &tempfile::TempDir) -> Arc<LedgerStore> {
    let path = dir.path().join("ledger.db");
    Arc::new(LedgerStore::open(path.to_str().unwrap()).unwrap())
}

fn daemon(store: Arc<LedgerStore>) -> (Arc<WorkerDaemon>, Arc<JobManager>) {
    let market = Arc::new(LocalMarketData::new(
        store.clone(),
        vec!["AAPL".to_string()],
        100,
        Duration::from_secs(60),
    ));
    let manager = Arc::new(JobManager::new(store.clone(), "config/tradesim.toml", 30));
    let executor = TaskExecutor::new(
        store,
        market.clone(),
        Arc::new(ScriptedAgent::new()),
        dec!(10000),
    );
    let worker = Arc::new(SimulationWorker::new(manager.clone(), market, executor));
    let daemon = WorkerDaemon::new(manager.clone(), worker, Duration::from_millis(20));
    (Arc::new(daemon), manager)
}

fn submit(manager: &JobManager, start: u32, end: u32) -> String {
    let request = JobRequest::range(d(start), d(end), vec!["alpha".to_string()]);
    match manager.create_job(&request, today()).unwrap() {
        JobCreation::Created { job_id, .. } => job_id,
        other => panic!("expected Created, got {other:?}"),
    }
}

async fn wait_for_terminal(manager: &JobManager, job_id: &str) -> JobStatus {
    for _ in 0..200 {
        let status = manager.get_job(job_id).unwrap().status;
        if status.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} did not finish");
}

#[tokio::test]
async fn daemon_recovers_then_processes_pending_jobs() {
    let dir = tempfile::tempdir().unwrap();

    // A previous process died while job 1 was mid-run.
    let interrupted = {
        let store = open_store(&dir);
        let (_, manager) = daemon(store.clone());
        let job_id = submit(&manager, 2, 3);
        store
            .update_job_status(&job_id, JobStatus::DownloadingData, None)
            .unwrap();
        store
            .update_job_status(&job_id, JobStatus::Running, None)
            .unwrap();
        store
            .update_task_status(&job_id, d(2), "alpha", TaskStatus::Running, None)
            .unwrap();
        job_id
    };

    let store = open_store(&dir);
    store
        .upsert_prices(&[PriceBar {
            symbol: "AAPL".to_string(),
            date: d(6),
            open: dec!(100),
            high: dec!(100),
            low: dec!(100),
            close: dec!(100),
            volume: 10,
        }])
        .unwrap();
    let (daemon, manager) = daemon(store.clone());
    let cancel = daemon.cancel_token();
    let handle = tokio::spawn({
        let daemon = daemon.clone();
        async move { daemon.run().await }
    });

    // Recovery runs before polling, so a new job can be submitted once it is done.
    let mut pending = None;
    for _ in 0..200 {
        if manager.get_job(&interrupted).unwrap().status.is_terminal() {
            pending = Some(submit(&manager, 6, 6));
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let pending = pending.expect("interrupted job was not recovered");

    assert_eq!(wait_for_terminal(&manager, &pending).await, JobStatus::Completed);
    cancel.cancel();
    let processed = handle.await.unwrap().unwrap();
    assert_eq!(processed, 1);

    let recovered = manager.get_job(&interrupted).unwrap();
    assert_eq!(recovered.status, JobStatus::Failed);
    assert_eq!(recovered.error.as_deref(), Some(INTERRUPTED_REASON));
    for task in manager.get_job_tasks(&interrupted).unwrap() {
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some(INTERRUPTED_REASON));
    }
    assert!(store.get_trading_day("alpha", d(6)).unwrap().is_some());
}

#[tokio::test]
async fn job_submitted_before_start_survives_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let queued = {
        let store = open_store(&dir);
        let (_, manager) = daemon(store);
        submit(&manager, 6, 6)
    };

    let store = open_store(&dir);
    store
        .upsert_prices(&[PriceBar {
            symbol: "AAPL".to_string(),
            date: d(6),
            open: dec!(100),
            high: dec!(100),
            low: dec!(100),
            close: dec!(100),
            volume: 10,
        }])
        .unwrap();
    let (daemon, manager) = daemon(store.clone());
    let cancel = daemon.cancel_token();
    let handle = tokio::spawn({
        let daemon = daemon.clone();
        async move { daemon.run().await }
    });

    assert_eq!(wait_for_terminal(&manager, &queued).await, JobStatus::Completed);
    cancel.cancel();
    assert_eq!(handle.await.unwrap().unwrap(), 1);

    let job = manager.get_job(&queued).unwrap();
    assert!(job.error.is_none());
    assert!(store.get_trading_day("alpha", d(6)).unwrap().is_some());
}

#[tokio::test]
async fn cancelled_daemon_exits_without_work() {
    let dir = tempfile::tempdir().unwrap();
    let (daemon, _) = daemon(open_store(&dir));
    daemon.cancel_token().cancel();
    let processed = tokio::time::timeout(Duration::from_secs(1), daemon.run())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(processed, 0);
}

#[tokio::test]
async fn idle_daemon_stops_on_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let (daemon, _) = daemon(open_store(&dir));
    let cancel = daemon.cancel_token();
    let handle = tokio::spawn({
        let daemon = daemon.clone();
        async move { daemon.run().await }
    });
    tokio::time::sleep(Duration::from_millis(60)).await;
    cancel.cancel();
    let processed = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(processed, 0);
}
