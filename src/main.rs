//! IM401 service CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use im401_bridge::{
    image, init_logging, Command, FirmwareBundle, ServiceConfig, SimulatedTransport, SmartMic,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "im401-service")]
#[command(about = "IM401 smart-mic firmware loader and trigger service", long_about = None)]
#[command(version = im401_bridge::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a firmware container and print a summary
    Inspect {
        /// Container file
        file: PathBuf,
    },

    /// Dump the diagnostic registers of the simulated coprocessor
    Dump,

    /// Load firmware, arm detection and log trigger events
    Run {
        /// Firmware container; defaults to the configured firmware locations
        #[arg(short, long)]
        firmware: Option<PathBuf>,

        /// Arm one-shot detection (re-armed after every trigger) instead of listening
        #[arg(long)]
        one_shot: bool,

        /// Fire a simulated trigger at this interval
        #[arg(long)]
        trigger_every_ms: Option<u64>,
    },
}

fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    let config = match path {
        Some(path) => ServiceConfig::from_file(path)?,
        None => ServiceConfig::default(),
    };
    let config = config.apply_env()?;
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_logging(&config.log_filter);

    match cli.command {
        Commands::Inspect { file } => inspect(&file)?,
        Commands::Dump => dump(&config).await?,
        Commands::Run {
            firmware,
            one_shot,
            trigger_every_ms,
        } => run(&config, firmware, one_shot, trigger_every_ms).await?,
    }

    Ok(())
}

fn inspect(file: &Path) -> Result<()> {
    let bytes =
        std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let container = image::parse(&bytes)?;

    let summary = json!({
        "file": file.display().to_string(),
        "sync": format!("{:#010x}", container.sync),
        "version": container.version,
        "segments": container.segments(),
        "training_index": container.training_index(),
        "payload_bytes": container.payload_len(),
    });

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn dump(config: &ServiceConfig) -> Result<()> {
    let mic = SmartMic::attach(SimulatedTransport::new(), config.device.clone())?;

    let values = mic.dump_registers().await?;
    println!("{}", serde_json::to_string_pretty(&values)?);

    mic.detach().await;
    Ok(())
}

async fn run(
    config: &ServiceConfig,
    firmware: Option<PathBuf>,
    one_shot: bool,
    trigger_every_ms: Option<u64>,
) -> Result<()> {
    let bundle = match firmware {
        Some(path) => FirmwareBundle::new(
            std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?,
        ),
        None => config.firmware.read_bundle()?,
    };

    let sim = SimulatedTransport::new();
    let mic = SmartMic::attach(sim.clone(), config.device.clone())?;

    let loaded = mic.apply(Command::LoadFirmware(&bundle)).await?;
    if let Some(report) = loaded.load {
        info!("Firmware loaded: {} writes, {} bytes", report.writes, report.bytes);
    }

    let arm = if one_shot {
        Command::StartOneShot
    } else {
        Command::StartListening
    };
    mic.apply(arm).await?;
    info!("Armed in mode {}", mic.mode().await);

    let trigger = trigger_every_ms.map(|ms| {
        let line = mic.interrupt_line();
        let sim = sim.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(ms.max(1)));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sim.raise_trigger();
                if !line.raise() {
                    warn!("Simulated trigger while interrupt masked");
                }
            }
        })
    });

    println!("Waiting for triggers (Ctrl+C to stop)...");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
            event = mic.recv_event() => {
                let Some(event) = event else { break };
                println!("Trigger detected at {}", event.timestamp);

                if one_shot {
                    mic.apply(Command::StartOneShot).await?;
                }
            }
        }
    }

    if let Some(trigger) = trigger {
        trigger.abort();
    }

    let stats = mic.stats().await;
    println!("\n=== Statistics ===");
    println!("Mode: {}", stats.mode);
    println!("Interrupts: {}", stats.interrupts);
    println!("Detections: {}", stats.detections);
    println!("Spurious: {}", stats.spurious);

    mic.detach().await;

    Ok(())
}
