use std::{
    fs, io,
    path::{Path, PathBuf},
};

use dirs::data_dir;
use keyseed_recon::ReconSettings;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Settings loaded from the `--config` TOML file.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Settings {
    /// Key store location.
    pub storage: Option<StorageConfig>,
    /// Reconciliation peer settings.
    pub recon: Option<ReconSettings>,
    /// Where profiling output goes.
    pub profiling: Option<ProfilingConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct StorageConfig {
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ProfilingConfig {
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read settings file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot parse settings file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("no platform data directory available; set `{0}` in the settings file")]
    NoDataDir(&'static str),
}

/// Load settings; no path means built-in defaults.
pub fn load(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let Some(path) = path else {
        return Ok(Settings::default());
    };
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse settings text; blank text yields defaults.
pub fn parse(contents: &str) -> Result<Settings, toml::de::Error> {
    if contents.trim().is_empty() {
        return Ok(Settings::default());
    }
    toml::from_str(contents)
}

impl Settings {
    pub fn storage_root(&self) -> Result<PathBuf, ConfigError> {
        match self.storage.as_ref().and_then(|s| s.root.clone()) {
            Some(root) => Ok(root),
            None => Ok(default_data_dir("storage.root")?.join("keys")),
        }
    }

    pub fn recon_settings(&self) -> ReconSettings {
        self.recon.clone().unwrap_or_default()
    }

    pub fn recon_path(&self) -> Result<PathBuf, ConfigError> {
        match self.recon.as_ref().and_then(|r| r.path.clone()) {
            Some(path) => Ok(path),
            None => Ok(default_data_dir("recon.path")?.join("recon")),
        }
    }

    pub fn profile_dir(&self) -> PathBuf {
        self.profiling
            .as_ref()
            .and_then(|p| p.dir.clone())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Platform data directory for keyseed, e.g. `~/.local/share/keyseed`.
fn default_data_dir(setting: &'static str) -> Result<PathBuf, ConfigError> {
    let base = data_dir().ok_or(ConfigError::NoDataDir(setting))?;
    Ok(base.join("keyseed"))
}
