//! # Energy Meter
//!
//! Samples mains voltage and phase currents through two delta-sigma
//! converters and keeps today's consumption statistics.
//!
//! The acquisition loop runs on its own thread; the tokio runtime renders
//! the display rotation and waits for Ctrl+C.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use energy_meter::acquisition::{Sampler, StopSignal, Supervisor};
use energy_meter::adc::{open_bus, Adc, BusKind};
use energy_meter::config::Config;
use energy_meter::display::DisplayRotation;
use energy_meter::publish::{LogPublisher, MessageDispatcher};
use energy_meter::stats::EnergyStatistics;

/// Configuration file used when `--config` is not given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// How often the active display is redrawn
const RENDER_PERIOD: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "energy-meter", version)]
#[command(about = "Samples mains voltage and phase currents and keeps today's energy statistics")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Increase log verbosity (-v warn, -vv info, -vvv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Use simulated converters instead of the I2C bus
    #[arg(short, long)]
    simulate: bool,
}

impl Args {
    /// Bus to open, `--simulate` overriding the configuration
    fn bus_kind(&self, configured: BusKind) -> BusKind {
        if self.simulate {
            BusKind::Simulated
        } else {
            configured
        }
    }
}

/// Default log level for the number of `-v` flags
fn log_level(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        _ => Level::DEBUG,
    }
}

/// Main entry point for the energy meter
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Parse arguments and set up logging
///    - Load and validate the configuration
///    - Build the statistics engine
///    - Open the I2C bus, or the simulated converters with `--simulate`
///
/// 2. **Main Loop**
///    - Acquisition thread samples every `sample_every` seconds
///    - Restart the acquisition thread if it dies
///    - Render the active display once per second
///    - Handle Ctrl+C for graceful shutdown
///
/// 3. **Graceful Shutdown**
///    - Raise the stop signal
///    - Join the acquisition thread
///
/// # Errors
///
/// Returns error if:
/// - Arguments or configuration are invalid
/// - The converter cannot be initialized
/// - The acquisition thread cannot be started
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let (writer, _log_guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level(args.verbose).into()))
        .init();

    info!("Energy Meter v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;

    let identities = config.build_channels()?.iter().map(|c| c.channel().clone()).collect();
    let stats = Arc::new(EnergyStatistics::new(identities, config.sample_every())?);
    let dispatcher = Arc::new(MessageDispatcher::new(
        config.publish.messages.clone(),
        Box::new(LogPublisher),
    ));
    let mut rotation = DisplayRotation::new(config.displays.clone());

    let bus_kind = args.bus_kind(config.adc.bus);
    let addresses = config.adc_addresses()?;
    let stop = StopSignal::new();

    // Every (re)start gets a fresh converter and fresh channel models
    let spawn_sampler = {
        let config = config.clone();
        let stats = Arc::clone(&stats);
        let stop = stop.clone();
        move || -> energy_meter::error::Result<thread::JoinHandle<()>> {
            let channels = config.build_channels()?;
            let bus = open_bus(bus_kind, &config.adc.device);
            let adc = Adc::new(bus, addresses, config.adc.conversion_mode)?;
            info!(
                "Converter ready ({} channels, {:?} mode)",
                channels.len(),
                config.adc.conversion_mode
            );

            let mut sampler = Sampler::new(adc, channels, Arc::clone(&stats), Arc::clone(&dispatcher));
            let stop = stop.clone();
            let handle = thread::Builder::new()
                .name("acquisition".to_string())
                .spawn(move || sampler.run(&stop))?;
            Ok(handle)
        }
    };
    let mut acquisition = Supervisor::start(spawn_sampler)?;

    info!("Press Ctrl+C to exit");
    let mut render_interval = interval(RENDER_PERIOD);

    loop {
        tokio::select! {
            _ = render_interval.tick() => {
                if let Err(e) = acquisition.check(&stop) {
                    error!("Failed to restart acquisition: {}", e);
                }

                if let Some(active) = rotation.current(Instant::now()) {
                    match active.render(&stats) {
                        Ok(frame) => debug!("Display {:?}\n{}", active.title, frame),
                        Err(e) => warn!("Failed to render display {:?}: {}", active.title, e),
                    }
                }
            }

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    stop.set();
    tokio::task::spawn_blocking(move || acquisition.join())
        .await?
        .map_err(|_| anyhow!("acquisition thread panicked"))?;

    info!("Energy Meter stopped");
    Ok(())
}
