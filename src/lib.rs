//! IM401 Bridge - Host-side driver core for the IM401 smart-mic coprocessor
//!
//! This library provides:
//! - Firmware container parsing and trigger-model placement
//! - Firmware loading over a register-addressed bus
//! - DSP mode control (load, one-shot, listening, factory test, reset)
//! - Debounced trigger detection driven by the coprocessor's interrupt line
//! - Diagnostic register dumps
//!
//! The bus itself is an external collaborator behind [`BusTransport`];
//! [`SimulatedTransport`] stands in for the hardware.

pub mod config;
pub mod controller;
pub mod device;
pub mod image;
pub mod loader;
pub mod matcher;
pub mod regdump;
pub mod regs;
pub mod storage;
pub mod transport;
pub mod watcher;

pub use config::{ConfigError, DeviceConfig, ServiceConfig};
pub use controller::{Command, CommandKind, ControllerError, Mode, ModeController, Readback, Transition};
pub use device::{DetectionEvent, DeviceError, DeviceStats, SmartMic};
pub use image::{
    BinarySegmentInfo, FirmwareContainer, ImageError, TrainingDataHeader, TrainingDataInfo,
};
pub use loader::{FirmwareBundle, LoadError, LoadPlan, LoadReport, PrivateData};
pub use matcher::UnknownTrainingId;
pub use regdump::{DumpError, RegisterValue};
pub use regs::{FwStatus, IrqStatus};
pub use storage::FirmwareLocations;
pub use transport::{BusCall, BusError, BusRecord, BusTransport, SimulatedTransport};
pub use watcher::{DetectionOutcome, InterruptLine};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging; `RUST_LOG` overrides `default_filter`
pub fn init_logging(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let _config = ServiceConfig::default();
        let _device = DeviceConfig::default();
        let _locations = FirmwareLocations::default();
        assert_eq!(Mode::default(), Mode::Normal);
    }
}
