//! Firmware file storage
//!
//! Reads the firmware container, private data and grammar blobs from disk into
//! a [`FirmwareBundle`]. The core never resolves paths; this is the
//! application-side collaborator that does.

use crate::loader::{FirmwareBundle, PrivateData};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DEFAULT_FIRMWARE_DIR: &str = "/etc/firmware/";
pub const CUSTOM_FIRMWARE_DIR: &str = "/etc/firmware/";
pub const FIRMWARE_FILE: &str = "SMicBin.dat";
pub const PRIVATE_DATA_FILES: [&str; 2] = ["0x0fff0000.dat", "0x0ffe0000.dat"];
pub const GRAMMAR_FILE: &str = "grammar.dat";

/// Where firmware files live on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareLocations {
    pub firmware_dir: PathBuf,
    /// Searched before `firmware_dir`
    pub custom_firmware_dir: PathBuf,
    pub firmware_file: String,
    /// Named after their DSP address, e.g. `0x0fff0000.dat`
    pub private_data_files: Vec<String>,
    pub grammar_file: String,
}

impl Default for FirmwareLocations {
    fn default() -> Self {
        Self {
            firmware_dir: PathBuf::from(DEFAULT_FIRMWARE_DIR),
            custom_firmware_dir: PathBuf::from(CUSTOM_FIRMWARE_DIR),
            firmware_file: FIRMWARE_FILE.to_string(),
            private_data_files: PRIVATE_DATA_FILES.iter().map(|s| s.to_string()).collect(),
            grammar_file: GRAMMAR_FILE.to_string(),
        }
    }
}

impl FirmwareLocations {
    /// First existing path for `name`: custom dir, then default dir
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        [&self.custom_firmware_dir, &self.firmware_dir]
            .into_iter()
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
    }

    /// Read every file of a load. The container is required, the rest optional.
    pub fn read_bundle(&self) -> Result<FirmwareBundle> {
        let path = self
            .resolve(&self.firmware_file)
            .with_context(|| format!("firmware file {} not found", self.firmware_file))?;
        let container = read_file(&path)?;
        info!("Firmware {} ({} bytes)", path.display(), container.len());

        let mut bundle = FirmwareBundle::new(container);

        for name in &self.private_data_files {
            let address = private_data_address(name)
                .with_context(|| format!("private data file {} is not named after an address", name))?;
            match self.resolve(name) {
                Some(path) => {
                    let bytes = read_file(&path)?;
                    debug!("Private data {} -> {:#010x}", path.display(), address);
                    bundle.private_data.push(PrivateData { address, bytes });
                }
                None => warn!("Private data {} not found, skipping", name),
            }
        }

        match self.resolve(&self.grammar_file) {
            Some(path) => bundle.training.push(read_file(&path)?),
            None => warn!("Grammar {} not found, loading without trigger models", self.grammar_file),
        }

        Ok(bundle)
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

/// DSP address encoded in a private data file name (`0x0fff0000.dat`)
pub fn private_data_address(name: &str) -> Option<u32> {
    let stem = Path::new(name).file_stem()?.to_str()?;
    let hex = stem.strip_prefix("0x").or_else(|| stem.strip_prefix("0X"))?;
    u32::from_str_radix(hex, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn locations(default: &Path, custom: &Path) -> FirmwareLocations {
        FirmwareLocations {
            firmware_dir: default.to_path_buf(),
            custom_firmware_dir: custom.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_private_data_address() {
        assert_eq!(private_data_address("0x0fff0000.dat"), Some(0x0fff_0000));
        assert_eq!(private_data_address("0X0FFE0000.dat"), Some(0x0ffe_0000));
        assert_eq!(private_data_address("grammar.dat"), None);
    }

    #[test]
    fn test_custom_dir_wins() {
        let default = tempfile::tempdir().unwrap();
        let custom = tempfile::tempdir().unwrap();
        fs::write(default.path().join(FIRMWARE_FILE), b"default").unwrap();
        fs::write(custom.path().join(FIRMWARE_FILE), b"custom").unwrap();

        let bundle = locations(default.path(), custom.path()).read_bundle().unwrap();
        assert_eq!(bundle.container, b"custom");
    }

    #[test]
    fn test_optional_files() {
        let default = tempfile::tempdir().unwrap();
        let custom = tempfile::tempdir().unwrap();
        fs::write(default.path().join(FIRMWARE_FILE), b"fw").unwrap();
        fs::write(default.path().join("0x0ffe0000.dat"), [1u8, 2]).unwrap();
        fs::write(custom.path().join(GRAMMAR_FILE), [3u8]).unwrap();

        let bundle = locations(default.path(), custom.path()).read_bundle().unwrap();
        assert_eq!(
            bundle.private_data,
            vec![PrivateData {
                address: 0x0ffe_0000,
                bytes: vec![1, 2]
            }]
        );
        assert_eq!(bundle.training, vec![vec![3u8]]);
    }

    #[test]
    fn test_missing_firmware_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(locations(dir.path(), dir.path()).read_bundle().is_err());
    }
}
