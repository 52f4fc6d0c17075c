use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result};

pub const DEFAULT_BLACKLIST_SETTING: &str = "machine.driver.blacklist";
const DEFAULT_INSTALL_DIR: &str = "/usr/local/bin";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub control_plane: ControlPlaneConfig,
    /// Directory the driver executables are installed into.
    pub install_dir: PathBuf,
    /// Parent of the per-download scratch directories.
    pub work_dir: PathBuf,
    /// Setting key holding the semicolon-delimited driver blacklist.
    pub blacklist_setting: String,
    pub poll_interval_secs: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_backoff_cap_secs: u64,
    pub plugin_timeout_secs: u64,
    pub schema_wait_timeout_secs: u64,
    /// Drivers shipped with the provisioning tool; never downloaded.
    pub builtin_drivers: Vec<String>,
    /// Extra per-driver fields to strip from published schemas.
    pub field_overrides: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    pub url: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            control_plane: ControlPlaneConfig::default(),
            install_dir: PathBuf::from(DEFAULT_INSTALL_DIR),
            work_dir: std::env::temp_dir(),
            blacklist_setting: DEFAULT_BLACKLIST_SETTING.to_string(),
            poll_interval_secs: 5,
            max_reconnect_attempts: 1000,
            reconnect_backoff_cap_secs: 64,
            plugin_timeout_secs: 30,
            schema_wait_timeout_secs: 120,
            builtin_drivers: Vec::new(),
            field_overrides: BTreeMap::new(),
        }
    }
}

impl AgentConfig {
    /// Loads the file at `path` if it exists, then applies environment
    /// overrides.
    pub fn load(path: &Path) -> Result<Self> {
        tracing::trace!(path = %path.display(), "Loading agent config");

        let mut config = if path.exists() {
            let content = fs::read_to_string(path)?;
            Self::from_toml(&content).map_err(|e| {
                DriverError::Config(format!("failed to parse {}: {}", path.display(), e))
            })?
        } else {
            tracing::trace!("Config file does not exist, using defaults");
            Self::default()
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn apply_env(&mut self) {
        if let Some(url) = crate::clienv::control_plane_url() {
            self.control_plane.url = url;
        }
        if let Some(key) = crate::clienv::access_key() {
            self.control_plane.access_key = Some(key);
        }
        if let Some(key) = crate::clienv::secret_key() {
            self.control_plane.secret_key = Some(key);
        }
        if let Some(dir) = crate::clienv::install_dir() {
            self.install_dir = dir;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(DriverError::Config("poll_interval_secs must be positive".into()));
        }
        if self.blacklist_setting.trim().is_empty() {
            return Err(DriverError::Config("blacklist_setting must not be empty".into()));
        }
        for name in &self.builtin_drivers {
            crate::model::validate_driver_name(name)?;
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn reconnect_backoff_cap(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_cap_secs)
    }

    pub fn plugin_timeout(&self) -> Duration {
        Duration::from_secs(self.plugin_timeout_secs)
    }

    pub fn schema_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.schema_wait_timeout_secs)
    }
}
