//! Configuration file (`chansync.toml`).
//!
//! Every field has a default, so an empty file or no file at all is valid
//! apart from the node's public key, which `run` and friends require.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SyncError};
use crate::manager::ManagerSettings;
use crate::types::PublicKey;

pub const CONFIG_FILE_NAME: &str = "chansync.toml";
pub const DATABASE_FILE_NAME: &str = "channels.lst";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub manager: ManagerConfig,
    pub transfers: TransferConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's identity (hex)
    pub public_key: Option<PublicKey>,

    /// Holds the channel database and, by default, transfer directories
    pub state_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            public_key: None,
            state_dir: default_state_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Seconds between update checks (and queue drains)
    pub update_interval_secs: u64,

    /// Seconds between cruft collections
    pub cruft_interval_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let settings = ManagerSettings::default();
        Self {
            update_interval_secs: settings.update_interval.as_secs(),
            cruft_interval_secs: settings.cruft_interval.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Where archives are resolved from (default: <state_dir>/pool)
    pub pool_dir: Option<PathBuf>,

    /// Where archives are downloaded to (default: <state_dir>/channels)
    pub downloads_dir: Option<PathBuf>,
}

fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("chansync"))
        .unwrap_or_else(|| PathBuf::from(".chansync"))
}

/// Expand tilde (~) in paths to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if path_str == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
    } else if let Some(rest) = path_str.strip_prefix("~/") {
        match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        }
    } else {
        path.to_path_buf()
    }
}

impl Config {
    pub fn parse(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::parse(&text)
    }

    /// Load `path` if given, else `<default state dir>/chansync.toml` if it
    /// exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(&expand_tilde(path));
        }

        let default_path = default_state_dir().join(CONFIG_FILE_NAME);
        if default_path.exists() {
            Self::load(&default_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.manager.update_interval_secs == 0 {
            return Err(SyncError::Config("manager.update_interval_secs must be > 0".to_string()));
        }
        if self.manager.cruft_interval_secs == 0 {
            return Err(SyncError::Config("manager.cruft_interval_secs must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn personal_key(&self) -> Result<PublicKey> {
        self.node
            .public_key
            .clone()
            .ok_or_else(|| SyncError::Config("node.public_key is not set".to_string()))
    }

    pub fn state_dir(&self) -> PathBuf {
        expand_tilde(&self.node.state_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        self.state_dir().join(DATABASE_FILE_NAME)
    }

    pub fn pool_dir(&self) -> PathBuf {
        match &self.transfers.pool_dir {
            Some(dir) => expand_tilde(dir),
            None => self.state_dir().join("pool"),
        }
    }

    pub fn downloads_dir(&self) -> PathBuf {
        match &self.transfers.downloads_dir {
            Some(dir) => expand_tilde(dir),
            None => self.state_dir().join("channels"),
        }
    }

    pub fn settings(&self) -> ManagerSettings {
        ManagerSettings {
            update_interval: Duration::from_secs(self.manager.update_interval_secs),
            cruft_interval: Duration::from_secs(self.manager.cruft_interval_secs),
        }
    }
}
