//! Strata Ingest - SA/TH warehouse loader

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use strata_common::logging::{init_logging, LogConfig, LogLevel};
use strata_ingest::config::IngestConfig;
use strata_ingest::db;
use strata_ingest::pipeline::{table_status, Pipeline, PipelineKind, Sources};
use strata_ingest::run::RunContext;
use strata_ingest::store::{PgWarehouse, Warehouse};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "strata-ingest")]
#[command(
    author,
    version,
    about = "Load staging and historical warehouse tables"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply database migrations
    Migrate,

    /// Run a pipeline
    Run {
        #[arg(value_enum)]
        pipeline: PipelineKind,

        /// Execution id recorded on every written row
        #[arg(long, env = "STRATA_RUN_ID")]
        run_id: Option<String>,
    },

    /// Show row counts per table
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env().context("Invalid logging configuration")?;
    if std::env::var_os("LOG_FILE_PREFIX").is_none() {
        log_config.log_file_prefix = "strata-ingest".to_string();
    }
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    let _guard = init_logging(&log_config)?;

    let config = IngestConfig::from_env().context("Failed to load configuration")?;
    let pool = db::create_pool(&config.db)
        .await
        .context("Failed to connect to database")?;
    db::health_check(&pool).await?;

    match cli.command {
        Command::Migrate => {
            db::run_migrations(&pool).await?;
            info!("Migrations applied");
        }
        Command::Run { pipeline, run_id } => {
            let warehouse: Arc<dyn Warehouse> = Arc::new(PgWarehouse::new(pool, &config.schema)?);
            let sources = Sources::from_config(&config.sources, &config.http)?;
            let runner = Pipeline::new(warehouse, sources);

            let ctx = RunContext::start(run_id);
            info!(run_id = %ctx.run_id, pipeline = pipeline.as_str(), "Starting run");

            let summary = runner.run(pipeline, &ctx).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);

            if !summary.is_success() {
                for failure in &summary.failures {
                    error!(pipeline = %failure.pipeline, error = %failure.error, "Pipeline failed");
                }
                bail!(
                    "{} pipeline(s) failed, {} skipped",
                    summary.failures.len(),
                    summary.skipped.len()
                );
            }
            info!(run_id = %ctx.run_id, "Run complete");
        }
        Command::Status => {
            let warehouse = PgWarehouse::new(pool, &config.schema)?;
            let status = table_status(&warehouse).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
