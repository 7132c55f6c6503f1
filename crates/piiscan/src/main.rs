//! PII Scan service binary.
//!
//! Scans a directory tree for documents, detects PII entities and reports
//! results through a JSON control API.
//!
//! Usage:
//!     piiscan serve
//!     piiscan recover --job-id 3

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use piiscan::config::Config;
use piiscan::http;
use piiscan::service::AnalysisService;
use piiscan_analyzer::RegexAnalyzer;
use piiscan_db::PiiDb;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "piiscan", about = "PII analysis service")]
struct Args {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the analysis service and its control API (default).
    Serve,
    /// Reset files stranded in `processing` by an interrupted run, so the
    /// next run reclaims them.
    Recover {
        /// Job to recover; defaults to the most recent job.
        #[arg(long)]
        job_id: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "piiscan=info,piiscan_db=info,piiscan_scheduler=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(args.config).await,
        Command::Recover { job_id } => recover(args.config, job_id).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    tracing::info!("Starting PII Scan service");
    tracing::info!("  Data path: {}", config.data_path.display());
    tracing::info!("  Store: {}", config.db_path.display());
    tracing::info!("  Bind: {}", config.bind);

    let bind = config.bind.clone();
    let service = AnalysisService::new(config, Arc::new(RegexAnalyzer::new()));
    let app = http::router(service);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    axum::serve(listener, app)
        .await
        .context("Control API server failed")?;
    Ok(())
}

async fn recover(config: Config, job_id: Option<i64>) -> Result<()> {
    let db = PiiDb::open(&config.db_path)
        .await
        .context("Failed to open result store")?;

    let job_id = match job_id {
        Some(id) => id,
        None => db
            .latest_job()
            .await?
            .map(|job| job.job_id)
            .context("No jobs in the result store")?,
    };

    let reset = db.reset_stalled_files(job_id).await?;
    tracing::info!(job_id, reset, "stalled files reset to pending");
    println!("job {}: {} stalled file(s) reset to pending", job_id, reset);
    Ok(())
}
