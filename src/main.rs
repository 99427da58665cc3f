use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;
use ulid::Ulid;

use staybook::clock::{Clock, FixedClock, SystemClock};
use staybook::config::EngineConfig;
use staybook::engine::Engine;
use staybook::model::Event;
use staybook::notify::NotifyHub;
use staybook::wal::Wal;

/// Operator tool for a staybook write-ahead log.
#[derive(Debug, Parser)]
#[command(name = "staybook", version, about)]
struct Cli {
    /// WAL file to operate on.
    #[arg(long, global = true, env = "STAYBOOK_WAL_PATH")]
    wal: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the events stored in the log.
    Inspect {
        /// Print each event as a JSON line.
        #[arg(long)]
        json: bool,
    },
    /// List units with their policies.
    Units,
    /// Check whether a stay could be booked on a unit.
    Check {
        #[arg(long)]
        unit: Ulid,
        #[arg(long)]
        check_in: NaiveDate,
        #[arg(long)]
        check_out: NaiveDate,
        /// Evaluate as of this date instead of today.
        #[arg(long)]
        today: Option<NaiveDate>,
    },
    /// Rewrite the log as one snapshot per unit.
    Compact,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = EngineConfig::from_env()?;
    if let Some(wal) = cli.wal {
        config.wal_path = wal;
    }
    staybook::observability::init_tracing(&config.log_filter)?;

    match cli.command {
        Command::Inspect { json } => inspect(&config, json),
        Command::Units => {
            let engine = open_engine(config, Arc::new(SystemClock))?;
            for unit in engine.list_units().await? {
                println!("{}", serde_json::to_string(&unit)?);
            }
            Ok(())
        }
        Command::Check {
            unit,
            check_in,
            check_out,
            today,
        } => {
            let clock: Arc<dyn Clock> = match today {
                Some(date) => Arc::new(FixedClock::at_date(date)),
                None => Arc::new(SystemClock),
            };
            let engine = open_engine(config, clock)?;
            match engine
                .check_window(unit, Some(check_in), Some(check_out), None)
                .await
            {
                Ok(span) => println!("available: {span}"),
                Err(e) => println!("unavailable: {e}"),
            }
            Ok(())
        }
        Command::Compact => {
            let path = config.wal_path.clone();
            let before = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            let engine = open_engine(config, Arc::new(SystemClock))?;
            engine.compact_wal().await?;
            let after = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            info!(path = %path.display(), before, after, "compaction finished");
            println!("compacted {}: {before} -> {after} bytes", path.display());
            Ok(())
        }
    }
}

fn open_engine(config: EngineConfig, clock: Arc<dyn Clock>) -> std::io::Result<Engine> {
    info!(path = %config.wal_path.display(), "opening WAL");
    Engine::new(config, clock, Arc::new(NotifyHub::new()))
}

fn inspect(config: &EngineConfig, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let scan = Wal::scan(&config.wal_path)?;
    for (seq, event) in scan.events.iter().enumerate() {
        if json {
            println!("{}", serde_json::to_string(event)?);
        } else {
            println!("{seq:>6}  {:<28} unit={}", event.kind(), event.unit_id());
        }
    }
    let units = scan
        .events
        .iter()
        .filter(|e| matches!(e, Event::UnitCreated { .. } | Event::UnitRestored { .. }))
        .count();
    eprintln!(
        "{} events, {} unit records, {} valid bytes{}",
        scan.events.len(),
        units,
        scan.valid_len,
        if scan.discarded_tail { ", invalid tail" } else { "" }
    );
    Ok(())
}
