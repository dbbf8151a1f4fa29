use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use surfline_bronze::config::{Config, DEFAULT_CONFIG_PATH};
use surfline_bronze::ingest::build_client;
use surfline_bronze::logging::{LogLevel, default_log_file, init_logging};
use surfline_bronze::pipeline::{EtlOptions, plan_bronze, run_bronze, run_etl};
use surfline_bronze::repair::repair_window;
use surfline_bronze::verify::{print_summary, verify_landing};

#[derive(Parser)]
#[command(name = "surfline_bronze")]
#[command(about = "Extract Surfline forecast entities into bronze Parquet tables")]
#[command(version)]
struct Cli {
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH, help = "Path to the TOML config file")]
    config: PathBuf,

    #[arg(long, global = true, default_value = "info", help = "Logging level (debug, info, warn, error)")]
    log_level: LogLevel,

    #[arg(long, global = true, help = "Also write logs to this file")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bronze extraction for one or every configured entity.
    Extract {
        #[arg(long, help = "Only extract this entity")]
        entity: Option<String>,

        #[arg(long, help = "Extract a single span starting at this date (YYYY-MM-DD)")]
        start_date: Option<String>,
    },

    /// Re-fetch one failed window and merge it into the entity's table.
    Repair {
        entity: String,
        start_date: String,
    },

    /// Re-hash every landed raw payload against its sidecar.
    VerifyRaw,

    /// Bronze extraction, then dbt run and dbt test.
    Etl {
        #[arg(long)]
        skip_bronze: bool,

        #[arg(long)]
        skip_dbt: bool,

        #[arg(long)]
        skip_tests: bool,

        #[arg(long)]
        entity: Option<String>,

        #[arg(long)]
        start_date: Option<String>,
    },
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // The ETL always keeps a log file, like a scheduled job would.
    let log_file = match (&cli.log_file, &cli.command) {
        (Some(path), _) => Some(path.clone()),
        (None, Command::Etl { .. }) => Some(default_log_file(Local::now())),
        (None, _) => None,
    };
    let _log_handle = match init_logging(cli.log_level, log_file.as_deref()) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to open log file: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the command succeeded.
fn run(cli: &Cli) -> Result<bool> {
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    info!(project = %config.project.name, config = %cli.config.display(), "config loaded");

    match &cli.command {
        Command::Extract { entity, start_date } => {
            let job = plan_bronze(&config, entity.as_deref(), start_date.as_deref())?;
            let client = build_client(config.api.timeout()).context("building HTTP client")?;
            let summary = run_bronze(&config, &client, &job);
            for report in &summary.reports {
                match &report.stats {
                    Some(stats) => info!(entity = %report.entity, "{stats}"),
                    None => warn!(entity = %report.entity, "nothing extracted"),
                }
            }
            Ok(summary.is_success())
        }

        Command::Repair { entity, start_date } => {
            let client = build_client(config.api.timeout()).context("building HTTP client")?;
            let outcome = repair_window(&config, &client, entity, start_date)?;
            info!(
                path = %outcome.path.display(),
                fetched = outcome.fetched_rows,
                total = outcome.total_rows,
                created = outcome.created,
                "repair finished"
            );
            Ok(true)
        }

        Command::VerifyRaw => {
            let report = verify_landing(&config.project.raw_dir)?;
            print_summary(&report);
            Ok(report.is_clean())
        }

        Command::Etl {
            skip_bronze,
            skip_dbt,
            skip_tests,
            entity,
            start_date,
        } => {
            let options = EtlOptions {
                skip_bronze: *skip_bronze,
                skip_dbt: *skip_dbt,
                skip_tests: *skip_tests,
                entity: entity.clone(),
                start_date: start_date.clone(),
            };
            let summary = run_etl(&config, &options)?;
            if summary.tests_passed == Some(false) {
                warn!("ETL finished with failing dbt tests");
            } else {
                info!("ETL finished");
            }
            Ok(true)
        }
    }
}
