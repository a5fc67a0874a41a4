//! Persisted tool configuration.
//!
//! Stored as TOML, by default in `~/.busytag.toml`.

use anyhow::{Context, Result};
use busytag::DEFAULT_BAUD_RATE;
use log::debug;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

const FILE_NAME: &str = ".busytag.toml";

/// Returns the default config file path in the user's home directory.
pub fn default_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(FILE_NAME)
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug)]
#[serde(default)]
pub struct Config {
    /// Serial port path of the device
    pub device: Option<String>,
    pub baud_rate: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: None,
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl Config {
    /// Loads the config file, falling back to defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("Config file {} not found, using defaults", path.display());

                Ok(Self::default())
            }
            Err(err) => {
                Err(err).with_context(|| format!("Failed to read config file {}", path.display()))
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_missing_file() -> Result<()> {
        let dir = TempDir::new()?;
        let config = Config::load(&dir.path().join(FILE_NAME))?;

        assert_eq!(config, Config::default(), "config should have defaults");
        assert_eq!(config.baud_rate, 115_200, "baud rate should be default");

        Ok(())
    }

    #[test]
    fn load_partial_file() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join(FILE_NAME);

        fs::write(&path, "device = \"/dev/ttyACM0\"\n")?;

        let config = Config::load(&path)?;

        assert_eq!(
            config.device.as_deref(),
            Some("/dev/ttyACM0"),
            "device should be loaded"
        );
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE, "baud rate should be default");

        Ok(())
    }

    #[test]
    fn save_and_load() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join(FILE_NAME);
        let config = Config {
            device: Some("/dev/ttyACM1".into()),
            baud_rate: 9600,
        };

        config.save(&path)?;

        assert_eq!(Config::load(&path)?, config, "config should round-trip");

        Ok(())
    }

    #[test]
    fn load_invalid_file() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join(FILE_NAME);

        fs::write(&path, "baud_rate = \"fast\"\n")?;

        assert!(Config::load(&path).is_err(), "invalid config should fail to load");

        Ok(())
    }
}
