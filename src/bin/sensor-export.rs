//! Inspect and export stored sensor readings.
//!
//! Usage:
//!   cargo run --bin sensor-export -- partitions
//!   cargo run --bin sensor-export -- show 2024-05-01
//!   cargo run --bin sensor-export -- export --date 2024-05-01 --name may-first.csv
//!   cargo run --bin sensor-export -- stats

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sensor_monitor::buffer::ReadingBuffer;
use sensor_monitor::config::{self, Config};
use sensor_monitor::error::Result;
use sensor_monitor::reading::Reading;
use sensor_monitor::store::DurableStore;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sensor-export")]
#[command(about = "Inspect and export stored sensor readings")]
struct Cli {
    /// Configuration file (JSON)
    #[arg(long, env = "SENSOR_MONITOR_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory, overriding the configuration
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the dates that have a partition
    Partitions,
    /// Print the readings of one day
    Show {
        /// Partition date (YYYY-MM-DD)
        date: NaiveDate,
    },
    /// Write readings to an export file in the storage directory
    Export {
        /// Only this day; all partitions when omitted
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Export file name; timestamped when omitted
        #[arg(long)]
        name: Option<String>,
    },
    /// Print min/max/average per field
    Stats {
        /// Only this day; all partitions when omitted
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

fn load_readings(store: &DurableStore, date: Option<NaiveDate>) -> Result<Vec<Reading>> {
    match date {
        Some(date) => store.try_load_partition(date),
        None => store.try_load_all(),
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    config::load_dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let mut config = Config::load(&config_path)?.with_env();
    if let Some(dir) = cli.storage_dir {
        config.storage.path = dir;
    }
    let store = DurableStore::open(&config.storage.path)?;

    match cli.command {
        Commands::Partitions => {
            let dates = store.try_list_partitions()?;
            if dates.is_empty() {
                println!("No partitions in {:?}", store.storage_path());
            }
            for date in dates {
                println!("{}", date);
            }
        }
        Commands::Show { date } => {
            let readings = store.try_load_partition(date)?;
            if readings.is_empty() {
                println!("No readings for {}", date);
            }
            for reading in readings {
                println!("{}", reading);
            }
        }
        Commands::Export { date, name } => {
            let readings = load_readings(&store, date)?;
            let path = store.export_to(&readings, name.as_deref())?;
            println!("Exported {} readings to {:?}", readings.len(), path);
        }
        Commands::Stats { date } => {
            let readings = load_readings(&store, date)?;
            let buffer = ReadingBuffer::with_capacity(readings.len());
            for reading in readings {
                buffer.add(reading);
            }
            match buffer.statistics() {
                Some(stats) => println!("{}", serde_json::to_string_pretty(&stats)?),
                None => println!("No readings"),
            }
        }
    }

    Ok(())
}
