//! Reconciliation peer. Loading only needs to construct the peer and flush
//! its stats; the reconciliation exchange itself lives elsewhere.

use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use keyseed_core::storage::{DailyCounts, KeyStore, KeyStoreError};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, instrument};

pub const STATS_FILE: &str = "stats.json";

/// `[recon]` section of the settings file.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ReconSettings {
    /// Recon data directory; the settings layer supplies a default when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Gossip partners as `host:port`.
    #[serde(default)]
    pub partners: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ReconError {
    #[error("cannot prepare recon directory {path}: {reason}")]
    Init { path: String, reason: String },
    #[error("invalid recon partner {0:?}, expected host:port")]
    InvalidPartner(String),
    #[error("cannot read store stats: {0}")]
    Stats(#[from] KeyStoreError),
    #[error("cannot write stats to {path}: {reason}")]
    Write { path: String, reason: String },
}

/// Snapshot written by [`StatsPeer::write_stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStats {
    pub generated_at: DateTime<Utc>,
    pub total: u64,
    pub daily: BTreeMap<NaiveDate, DailyCounts>,
}

/// The slice of a reconciliation peer the loader uses.
#[async_trait]
pub trait StatsPeer: Send + Sync {
    /// Short name used for logging.
    fn name(&self) -> &'static str;

    /// Recompute stats from the store and persist them.
    async fn write_stats(&self) -> Result<PeerStats, ReconError>;
}

/// SKS-compatible peer keeping its state under a recon directory.
pub struct SksPeer<S: KeyStore> {
    store: Arc<S>,
    path: PathBuf,
    partners: Vec<String>,
}

impl<S: KeyStore> SksPeer<S> {
    pub fn new(store: Arc<S>, path: &Path, settings: &ReconSettings) -> Result<Self, ReconError> {
        for partner in &settings.partners {
            let valid = partner
                .rsplit_once(':')
                .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
            if !valid {
                return Err(ReconError::InvalidPartner(partner.clone()));
            }
        }
        fs::create_dir_all(path).map_err(|err| ReconError::Init {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        info!(path = %path.display(), partners = ?settings.partners, "recon peer ready");
        Ok(Self {
            store,
            path: path.to_path_buf(),
            partners: settings.partners.clone(),
        })
    }

    pub fn stats_path(&self) -> PathBuf {
        self.path.join(STATS_FILE)
    }

    pub fn partners(&self) -> &[String] {
        &self.partners
    }
}

#[async_trait]
impl<S: KeyStore> StatsPeer for SksPeer<S> {
    fn name(&self) -> &'static str {
        "sks"
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    async fn write_stats(&self) -> Result<PeerStats, ReconError> {
        let store_stats = self.store.stats().await?;
        let stats = PeerStats {
            generated_at: Utc::now(),
            total: store_stats.total,
            daily: store_stats.daily,
        };

        let target = self.stats_path();
        let write_err = |reason: String| ReconError::Write {
            path: target.display().to_string(),
            reason,
        };
        let json = serde_json::to_vec_pretty(&stats).map_err(|e| write_err(e.to_string()))?;
        let mut tmp = NamedTempFile::new_in(&self.path).map_err(|e| write_err(e.to_string()))?;
        tmp.write_all(&json).map_err(|e| write_err(e.to_string()))?;
        tmp.persist(&target)
            .map_err(|e| write_err(e.error.to_string()))?;

        info!(total = stats.total, "wrote recon stats");
        Ok(stats)
    }
}
