mod archive;
mod config;
mod error;
mod fetcher;
mod models;
mod normalizer;
mod pipeline;
mod utils;
mod warehouse;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::AppConfig;
use crate::fetcher::observation_window;
use crate::pipeline::Pipeline;
use crate::warehouse::{DuckDbWarehouse, TableRef};

#[derive(Parser)]
#[command(name = "fred-etl", about = "Daily FRED SP500 extract → archive → warehouse", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the trailing window, archive it and append it to the warehouse
    Run {
        /// Run as if today were this date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Fail on the first error instead of applying the configured retry
        #[arg(long)]
        no_retry: bool,
    },

    /// Print the observation window a run would request, without any I/O
    Window {
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Show warehouse table statistics
    Stats,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "fred_etl=info,warn",
        1 => "fred_etl=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Run { date, no_retry } => {
            config.validate_for_run()?;
            let _t = utils::Timer::start("Daily load");

            let now = utils::run_timestamp(date);
            let retries = if no_retry { 0 } else { config.runner.retries };
            let delay = Duration::from_secs(config.runner.retry_delay_secs);

            let result = pipeline::run_with_retry(
                || Pipeline::from_config(config.clone()),
                now,
                retries,
                delay,
            )
            .await?;

            info!("Run for {} finished: {}", now.date(), result);
            println!("{}", result);
        }

        Command::Window { date } => {
            config.validate_window()?;
            let src = &config.source;
            let now = utils::run_timestamp(date);
            let window = observation_window(&src.series_id, now, src.window_days, src.limit);
            println!("{}", window);
        }

        Command::Stats => {
            let table = TableRef::from_config(&config.warehouse)?;
            let wh = DuckDbWarehouse::open(&config.warehouse.db_path)
                .context("Failed to open warehouse")?;

            if !wh.table_exists(&table)? {
                println!("{} does not exist yet — run `fred-etl run` first.", table);
                return Ok(());
            }

            let rows = wh.row_count(&table)?;
            let (min, max) = wh.date_range(&table)?;
            println!("─────────────────────────────────");
            println!("  {}", table);
            println!("─────────────────────────────────");
            println!("  Rows     : {}", utils::fmt_number(rows));
            println!("  From     : {}", min.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("  To       : {}", max.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("─────────────────────────────────");
        }
    }

    Ok(())
}
