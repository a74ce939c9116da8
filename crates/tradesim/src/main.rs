use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use tradesim::scheduler::market::parse_jsonl;
use tradesim::scheduler::{JobCreation, JobRequest};

#[derive(Parser, Debug)]
#[command(
    name = "tradesim",
    about = "Model-day trading simulation scheduler - runs AI trading agents over historical dates"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config/tradesim.toml")]
    config: String,

    /// Pretty-print the output JSON
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a simulation job for a date range
    Submit {
        #[arg(long)]
        start: NaiveDate,
        /// Defaults to the start date
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Model signatures to run. Defaults to every enabled model in the config
        #[arg(long = "model")]
        models: Vec<String>,
        /// Run the job in this process and print its final status
        #[arg(long)]
        wait: bool,
        /// Schedule model-days that already have a completed trading day
        #[arg(long)]
        keep_completed: bool,
    },
    /// Show a job's status and task progress
    Status { job_id: String },
    /// List recent jobs, newest first
    Jobs {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Query ledger results for a date or date range
    Results {
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: Option<NaiveDate>,
        #[arg(long)]
        model: Option<String>,
    },
    /// Load daily bars from a JSONL file into the price table
    ImportPrices { file: String },
    /// Run pending jobs until interrupted
    Serve,
}

fn print_json(value: &impl serde::Serialize, pretty: bool) -> Result<()> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{output}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing (respects RUST_LOG env var)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = tradesim::load_config(&cli.config)?;
    let runtime = tradesim::build_runtime(config, &cli.config).context("Failed to build runtime")?;

    match cli.command {
        Command::Submit {
            start,
            end,
            models,
            wait,
            keep_completed,
        } => {
            let models = if models.is_empty() {
                runtime.config.enabled_signatures()
            } else {
                models
            };
            let mut request = JobRequest::range(start, end.unwrap_or(start), models);
            if keep_completed {
                request = request.keep_completed();
            }

            let today = Utc::now().date_naive();
            let (job_id, warnings) = match runtime
                .manager
                .create_job(&request, today)
                .map_err(|e| anyhow::anyhow!("Job creation failed: {e}"))?
            {
                JobCreation::Created { job_id, warnings } => (job_id, warnings),
                JobCreation::AllCompleted { warnings } => {
                    return print_json(
                        &json!({
                            "job_id": null,
                            "status": "completed",
                            "message": "All requested model-days are already completed",
                            "warnings": warnings,
                        }),
                        cli.pretty,
                    );
                }
            };

            if !wait {
                return print_json(
                    &json!({ "job_id": job_id, "status": "pending", "warnings": warnings }),
                    cli.pretty,
                );
            }
            runtime
                .worker
                .spawn(job_id.clone())
                .await
                .context("Worker task panicked")?
                .map_err(|e| anyhow::anyhow!("Job {job_id} failed: {e}"))?;
            print_json(&runtime.manager.job_status(&job_id)?, cli.pretty)?;
        }
        Command::Status { job_id } => {
            let view = runtime
                .manager
                .job_status(&job_id)
                .map_err(|e| anyhow::anyhow!("Status lookup failed: {e}"))?;
            print_json(&view, cli.pretty)?;
        }
        Command::Jobs { limit } => {
            print_json(&runtime.manager.list_jobs(limit)?, cli.pretty)?;
        }
        Command::Results { start, end, model } => {
            let view = runtime
                .store
                .query_results(start, end, model.as_deref())
                .map_err(|e| anyhow::anyhow!("Results query failed: {e}"))?;
            print_json(&view, cli.pretty)?;
        }
        Command::ImportPrices { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read price file: {file}"))?;
            let bars = parse_jsonl(&content).with_context(|| format!("Invalid price file: {file}"))?;
            let imported = runtime.store.upsert_prices(&bars)?;
            tracing::info!(file = %file, imported, "Imported price bars");
            print_json(&json!({ "imported": imported }), cli.pretty)?;
        }
        Command::Serve => {
            let daemon = runtime.daemon();
            let cancel = daemon.cancel_token();

            // Handle shutdown signals
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Received shutdown signal");
                cancel.cancel();
            });

            daemon
                .run()
                .await
                .map_err(|e| anyhow::anyhow!("Daemon error: {e}"))?;
        }
    }

    Ok(())
}
