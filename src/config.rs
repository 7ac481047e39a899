//! TOML configuration of the bridge.
//!
//! Lives in `<config dir>/anycubic-bridge/config.toml` unless a path is given
//! on the command line. A commented default is written on first start.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::cloud::MqttCredentials;
use crate::coordinator::lifecycle_policy::ConnectMode;
use crate::mqtt::commands::DryingPreset;
use crate::mqtt::config::{DEFAULT_SCAN_INTERVAL, MQTT_SCAN_INTERVAL};
use crate::printer::{PrinterId, PrinterIdentity};

const CONFIG_DIR: &str = "anycubic-bridge";
const CONFIG_FILE: &str = "config.toml";

pub const MAX_DRYING_PRESETS: usize = 4;

const DEFAULT_CONFIG: &str = r#"# anycubic-bridge configuration

# Log at debug level.
debug = false

# When to hold the MQTT session open:
# "printing_only", "printing_and_drying", "device_online" or "always"
connect_mode = "printing_only"

# Seconds between status checks (minimum 5).
scan_interval_secs = 60

# Printers to bridge, by cloud printer id.
printer_ids = []

[credentials]
username = ""
password = ""
# client_id = "anycubic-bridge"

# Display names for the printers above.
# [[printers]]
# id = 12345
# name = "Kobra 3"

# Up to four drying programs for the filament box.
# [[drying_presets]]
# duration_min = 240
# temperature = 55
"#;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("at most 4 drying presets are supported, found {0}")]
    TooManyPresets(usize),

    #[error("scan interval of {0}s is below the minimum of 5s")]
    ScanIntervalTooShort(u64),

    #[error("no printer ids configured")]
    NoPrinters,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct CredentialsConfig {
    pub username: String,
    pub password: String,
    pub client_id: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub debug: bool,
    pub connect_mode: ConnectMode,
    pub scan_interval_secs: u64,
    pub printer_ids: Vec<PrinterId>,
    pub credentials: CredentialsConfig,
    pub printers: Vec<PrinterIdentity>,
    pub drying_presets: Vec<DryingPreset>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            debug: false,
            connect_mode: ConnectMode::default(),
            scan_interval_secs: DEFAULT_SCAN_INTERVAL.as_secs(),
            printer_ids: Vec::new(),
            credentials: CredentialsConfig::default(),
            printers: Vec::new(),
            drying_presets: Vec::new(),
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.drying_presets.len() > MAX_DRYING_PRESETS {
            return Err(ConfigError::TooManyPresets(self.drying_presets.len()));
        }
        if self.scan_interval() < MQTT_SCAN_INTERVAL {
            return Err(ConfigError::ScanIntervalTooShort(self.scan_interval_secs));
        }
        if self.printer_ids.is_empty() {
            return Err(ConfigError::NoPrinters);
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn drying_preset(&self, index: usize) -> Option<DryingPreset> {
        self.drying_presets.get(index).copied()
    }

    pub fn mqtt_credentials(&self) -> MqttCredentials {
        let client_id = self
            .credentials
            .client_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("anycubic-bridge-{}", self.credentials.username));
        MqttCredentials {
            client_id,
            username: self.credentials.username.clone(),
            password: self.credentials.password.clone(),
        }
    }

    /// Named printers of the account. Selected ids without an entry get a generic name.
    pub fn printer_identities(&self) -> Vec<PrinterIdentity> {
        let mut identities = self.printers.clone();
        for id in &self.printer_ids {
            if !identities.iter().any(|printer| printer.id == *id) {
                identities.push(PrinterIdentity {
                    id: *id,
                    name: format!("Printer {}", id),
                });
            }
        }
        identities
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let mut path = dirs::config_dir().ok_or_else(|| eyre!("No config directory on this platform"))?;
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    Ok(path)
}

/// Write the commented default config if `path` does not exist yet.
/// Returns true when a file was created.
pub async fn ensure_default_config(path: &Path) -> Result<bool> {
    if tokio::fs::try_exists(path)
        .await
        .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
    {
        debug!("Config file present at {}", path.display());
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
    }
    tokio::fs::write(path, DEFAULT_CONFIG)
        .await
        .map_err(|e| eyre!("Failed to write default config file: {}", e))?;

    info!("Default config written to {}", path.display());
    Ok(true)
}

pub async fn load(path: &Path) -> Result<BridgeConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
    let config: BridgeConfig =
        toml::from_str(&content).map_err(|e| eyre!("Failed to parse config file: {}", e))?;
    config
        .validate()
        .map_err(|e| eyre!("Invalid config in {}: {}", path.display(), e))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
connect_mode = "always"
scan_interval_secs = 30
printer_ids = [42]

[credentials]
username = "maker"
password = "secret"

[[printers]]
id = 42
name = "Kobra 3"

[[drying_presets]]
duration_min = 240
temperature = 55
"#;

    #[tokio::test]
    async fn default_config_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        assert!(ensure_default_config(&path).await.unwrap());
        assert!(!ensure_default_config(&path).await.unwrap());

        let parsed: BridgeConfig =
            toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, BridgeConfig::default());
    }

    #[tokio::test]
    async fn default_config_needs_printers_before_use() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        ensure_default_config(&path).await.unwrap();

        let err = load(&path).await.unwrap_err();
        assert!(err.to_string().contains("no printer ids"), "{err}");
    }

    #[tokio::test]
    async fn loads_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, VALID).unwrap();

        let config = load(&path).await.unwrap();
        assert_eq!(config.connect_mode, ConnectMode::Always);
        assert_eq!(config.scan_interval(), Duration::from_secs(30));
        assert_eq!(config.printer_ids, vec![PrinterId(42)]);
        assert_eq!(
            config.drying_preset(0),
            Some(DryingPreset {
                duration_min: 240,
                temperature: 55
            })
        );
        assert_eq!(config.drying_preset(1), None);
        assert!(!config.debug);
    }

    #[test]
    fn validation_limits() {
        let mut config: BridgeConfig = toml::from_str(VALID).unwrap();
        assert_eq!(config.validate(), Ok(()));

        config.scan_interval_secs = 2;
        assert_eq!(config.validate(), Err(ConfigError::ScanIntervalTooShort(2)));
        config.scan_interval_secs = 60;

        config.drying_presets = vec![
            DryingPreset {
                duration_min: 60,
                temperature: 45
            };
            5
        ];
        assert_eq!(config.validate(), Err(ConfigError::TooManyPresets(5)));
        config.drying_presets.clear();

        config.printer_ids.clear();
        assert_eq!(config.validate(), Err(ConfigError::NoPrinters));
    }

    #[test]
    fn credentials_and_identities() {
        let mut config: BridgeConfig = toml::from_str(VALID).unwrap();
        config.printer_ids.push(PrinterId(7));

        let credentials = config.mqtt_credentials();
        assert_eq!(credentials.client_id, "anycubic-bridge-maker");
        assert_eq!(credentials.password, "secret");

        let names: Vec<String> = config
            .printer_identities()
            .into_iter()
            .map(|printer| printer.name)
            .collect();
        assert_eq!(names, vec!["Kobra 3".to_string(), "Printer 7".to_string()]);
    }
}
