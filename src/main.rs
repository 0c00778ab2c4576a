use clap::{Parser, ValueEnum};
use log::{error, info, warn};
use sensor_monitor::acquisition::Acquisition;
use sensor_monitor::bridge::{MockBridge, SensorBridge};
use sensor_monitor::buffer::ReadingBuffer;
use sensor_monitor::config::{self, Config};
use sensor_monitor::instance_lock::InstanceLock;
use sensor_monitor::session::SensorSession;
use sensor_monitor::store::DurableStore;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "sensor-monitor")]
#[command(about = "Acquire readings from a biochemical sensor tag and store them")]
struct Args {
    /// Configuration file (JSON)
    #[arg(long, env = "SENSOR_MONITOR_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for daily partitions and exports
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// Seconds between readings
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Sensor bridge to drive the session with
    #[arg(long, value_enum, default_value_t = BridgeChoice::Mock)]
    bridge: BridgeChoice,

    /// Seed for the mock bridge
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum BridgeChoice {
    /// Synthetic readings, reported as a mock bridge
    Mock,
    /// No bridge; the session falls back to synthetic readings
    #[value(name = "none")]
    Disabled,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() -> ExitCode {
    // Before the runtime exists, so no other thread reads the environment.
    config::load_dotenv();
    init_logger();
    let args = Args::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> sensor_monitor::error::Result<Config> {
    let path = args.config.clone().unwrap_or_else(config::default_config_path);
    let mut config = Config::load(&path)?.with_env();

    if let Some(dir) = &args.storage_dir {
        config.storage.path = dir.clone();
    }
    if let Some(secs) = args.interval_secs {
        config.acquisition.interval_secs = secs;
    }
    config.validate()?;
    Ok(config)
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting sensor monitor");

    let config = load_config(&args)?;
    info!("Configuration loaded:");
    info!("  Storage: {:?}", config.storage.path);
    info!("  Interval: {}s", config.acquisition.interval_secs);
    info!("  Buffer capacity: {}", config.storage.buffer_capacity);
    info!("  Link timeout: {} ms", config.sensor.link_timeout_ms);

    let _lock = InstanceLock::acquire(&config.storage.path)?;

    let store = Arc::new(DurableStore::open(&config.storage.path)?);
    let buffer = Arc::new(ReadingBuffer::with_capacity(config.storage.buffer_capacity));

    let bridge: Option<Box<dyn SensorBridge>> = match args.bridge {
        BridgeChoice::Mock => {
            let mock = match args.seed {
                Some(seed) => MockBridge::with_seed(seed),
                None => MockBridge::new(),
            };
            Some(Box::new(mock))
        }
        BridgeChoice::Disabled => None,
    };
    let session = Arc::new(SensorSession::new(bridge, config.session_config()));

    // Initial connect happens off the async threads; the bridge may block.
    let connected = {
        let session = session.clone();
        tokio::task::spawn_blocking(move || session.connect()).await?
    };
    if !connected {
        warn!("Sensor not connected, readings will be synthetic until it is");
    }
    info!("Firmware: {}", session.firmware_status());

    let acquisition = Arc::new(Acquisition::new(session.clone(), buffer.clone(), store));
    let shutdown = CancellationToken::new();
    let interval = Duration::from_secs(config.acquisition.interval_secs);
    let handle = acquisition.run(interval, shutdown.clone());

    info!("Sensor monitor is running");
    info!("  - Press Ctrl+C to exit");

    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    shutdown.cancel();
    if let Err(e) = handle.await {
        error!("Acquisition task ended abnormally: {}", e);
    }

    let session_for_shutdown = session.clone();
    tokio::task::spawn_blocking(move || session_for_shutdown.disconnect()).await?;

    if let Some(stats) = buffer.statistics() {
        info!(
            "Session summary: {} readings, temperature avg {:.1}°C, pH avg {:.2}, glucose avg {:.0} mg/dL",
            stats.count, stats.temperature.avg, stats.ph.avg, stats.glucose.avg
        );
    }
    info!("Sensor monitor stopped");
    Ok(())
}
