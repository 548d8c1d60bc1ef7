use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{error, info};

use listdigest::adapters::llm::ChatCompletionsClient;
use listdigest::adapters::sqlite::{create_pool, queries, DbPool};
use listdigest::config::AppConfig;
use listdigest::services::summarize::{Orchestrator, SummaryGateway};
use listdigest::services::{ingest_path, IngestReport};
use listdigest::threading::ThreadReconstructor;
use listdigest::types::SummaryKind;
use listdigest::{init_tracing, Result};

/// Mailing-list threading and summarization pipeline.
#[derive(Parser)]
#[command(name = "listdigest", version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to the discovered one, then built-in defaults).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest mbox (.mbox), Atom (.atom/.xml) or digest (.eml) archives.
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Summarize threads without a current summary.
    Summarize {
        #[arg(default_value_t = 50)]
        limit: u32,
    },

    /// Generate a daily or weekly digest starting at a date (YYYY-MM-DD).
    Digest { period: Period, start: NaiveDate },

    /// Store statistics.
    Stats,

    /// Full-text search over subjects and bodies.
    Search {
        #[arg(required = true)]
        query: Vec<String>,

        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Period {
    Daily,
    Weekly,
}

impl From<Period> for SummaryKind {
    fn from(period: Period) -> Self {
        match period {
            Period::Daily => SummaryKind::Daily,
            Period::Weekly => SummaryKind::Weekly,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn orchestrator(pool: DbPool, config: &AppConfig) -> Result<(Arc<SummaryGateway>, Orchestrator)> {
    let backend = Arc::new(ChatCompletionsClient::new(&config.llm)?);
    let gateway = Arc::new(SummaryGateway::new(pool.clone(), backend, config));
    let orchestrator = Orchestrator::new(pool, gateway.clone(), config.summarize.clone());
    Ok((gateway, orchestrator))
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::discover()?,
    };
    config.validate()?;
    let pool = create_pool(&config.database.path)?;

    match cli.command {
        Command::Ingest { files } => {
            let reconstructor = ThreadReconstructor::new(pool);
            let mut total = IngestReport::default();
            for file in &files {
                let report = ingest_path(&reconstructor, file, None)?;
                total.parsed += report.parsed;
                total.inserted += report.inserted;
                total.duplicates += report.duplicates;
                total.malformed += report.malformed;
                total.threads_created += report.threads_created;
                total.merges += report.merges;
            }
            print_json(&total)
        }
        Command::Summarize { limit } => {
            let (gateway, orchestrator) = orchestrator(pool, &config)?;
            let report = orchestrator.summarize_pending(limit).await?;
            let metrics = gateway.shutdown();
            info!(
                calls = metrics.calls,
                cache_hits = metrics.cache_hits,
                cost_usd = metrics.estimated_cost_usd,
                "Gateway closed"
            );
            print_json(&report)
        }
        Command::Digest { period, start } => {
            let (gateway, orchestrator) = orchestrator(pool, &config)?;
            let digest = orchestrator.generate_digest(period.into(), start, false).await?;
            gateway.shutdown();
            print_json(&digest)
        }
        Command::Stats => print_json(&queries::stats(&pool)?),
        Command::Search { query, limit } => print_json(&queries::search(&pool, &query.join(" "), limit)?),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
