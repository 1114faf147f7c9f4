use std::sync::Arc;

use keyseed_core::storage::{KeyStore, KeyStoreError};
use keyseed_recon::{PeerStats, ReconError, StatsPeer};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    cli::{usage, Cli},
    config::{self, ConfigError},
    load::{Loader, PatternReport},
    profiling::{self, ProfilingOptions},
    recon, storage,
};

/// Fatal errors; everything else is logged and loading carries on.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no key files given")]
    MissingPatterns,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cannot connect to key store: {0}")]
    Dial(#[from] KeyStoreError),
    #[error("cannot start recon peer: {0}")]
    Peer(#[from] ReconError),
}

/// What a completed run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub patterns: Vec<PatternReport>,
    /// `None` when the final stats flush failed.
    pub stats: Option<PeerStats>,
}

impl RunReport {
    pub fn files(&self) -> usize {
        self.patterns.iter().map(|p| p.files.len()).sum()
    }

    pub fn keys_stored(&self) -> usize {
        self.patterns
            .iter()
            .flat_map(|p| &p.files)
            .filter(|f| f.is_stored())
            .map(|f| f.decoded)
            .sum()
    }
}

/// Configure, connect, load every pattern in order, then flush stats once.
pub async fn run(cli: Cli) -> Result<RunReport, LoadError> {
    if cli.patterns.is_empty() {
        eprintln!("{}", usage());
        error!("no key files given");
        return Err(LoadError::MissingPatterns);
    }

    let settings = config::load(cli.config.as_deref())?;
    let store = Arc::new(storage::dial(&settings)?);
    let peer = recon::peer_from_settings(store.clone(), &settings)?;

    let options = ProfilingOptions {
        cpu: cli.cpuprof,
        memory: cli.memprof,
        dir: settings.profile_dir(),
    };
    if let Err(err) = profiling::spawn_listener(options) {
        warn!("profiling toggle unavailable: {err}");
    }

    let report = run_pipeline(&Loader::new(store), &peer, &cli.patterns).await;
    info!(
        patterns = report.patterns.len(),
        files = report.files(),
        keys = report.keys_stored(),
        "load finished"
    );
    Ok(report)
}

pub async fn run_pipeline<S: KeyStore, P: StatsPeer>(
    loader: &Loader<S>,
    peer: &P,
    patterns: &[String],
) -> RunReport {
    let mut reports = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        reports.push(loader.load_pattern(pattern).await);
    }

    let stats = match peer.write_stats().await {
        Ok(stats) => Some(stats),
        Err(err) => {
            error!(peer = peer.name(), "failed to write stats: {err}");
            None
        }
    };
    RunReport {
        patterns: reports,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        path::Path,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use keyseed_core::testing::v4_key;

    use super::*;
    use crate::load::{tests::FlakyStore, FileOutcome};

    #[derive(Default)]
    struct CountingPeer {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl StatsPeer for CountingPeer {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn write_stats(&self) -> Result<PeerStats, ReconError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ReconError::Write {
                    path: "stats.json".to_string(),
                    reason: "read-only".to_string(),
                });
            }
            Ok(PeerStats {
                generated_at: chrono::Utc::now(),
                total: 0,
                daily: Default::default(),
            })
        }
    }

    fn cli(config: Option<&Path>, patterns: &[String]) -> Cli {
        Cli {
            config: config.map(Path::to_path_buf),
            cpuprof: false,
            memprof: false,
            patterns: patterns.to_vec(),
        }
    }

    fn write_config(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("keyseed.toml");
        let contents = format!(
            "[storage]\nroot = {:?}\n[recon]\npath = {:?}\n[profiling]\ndir = {:?}\n",
            dir.join("keys").display().to_string(),
            dir.join("recon").display().to_string(),
            dir.display().to_string(),
        );
        fs::write(&path, contents).expect("write config");
        path
    }

    #[tokio::test]
    async fn zero_patterns_fail_before_connecting() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = write_config(dir.path());

        let err = run(cli(Some(&config), &[])).await.expect_err("usage error");
        assert!(matches!(err, LoadError::MissingPatterns));
        assert!(!dir.path().join("keys").exists());
        assert!(!dir.path().join("recon").exists());
    }

    #[tokio::test]
    async fn unreadable_config_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = run(cli(
            Some(&dir.path().join("absent.toml")),
            &["*.pgp".to_string()],
        ))
        .await
        .expect_err("config error");
        assert!(matches!(err, LoadError::Config(ConfigError::Read { .. })));
    }

    #[tokio::test]
    async fn loads_patterns_and_flushes_stats() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = write_config(dir.path());
        let dumps = dir.path().join("dumps");
        fs::create_dir(&dumps).expect("mkdir");
        let mut bytes = v4_key(1, "a@example.org");
        bytes.extend(v4_key(2, "b@example.org"));
        bytes.extend(v4_key(3, "c@example.org"));
        fs::write(dumps.join("three.pgp"), bytes).expect("write dump");

        let patterns = [
            format!("{}/*.pgp", dumps.display()),
            format!("{}/*.gz", dumps.display()),
        ];
        let report = run(cli(Some(&config), &patterns)).await.expect("run");

        assert_eq!(report.patterns.len(), 2);
        assert_eq!(report.patterns[0].files.len(), 1);
        assert_eq!(report.patterns[0].files[0].decoded, 3);
        assert!(report.patterns[1].files.is_empty());
        assert_eq!(report.keys_stored(), 3);
        assert_eq!(report.stats.as_ref().map(|s| s.total), Some(3));

        let written: PeerStats = serde_json::from_slice(
            &fs::read(dir.path().join("recon").join(keyseed_recon::STATS_FILE))
                .expect("read stats"),
        )
        .expect("parse stats");
        assert_eq!(written.total, 3);
    }

    #[tokio::test]
    async fn empty_pattern_match_moves_on_to_the_next() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("k.pgp"), v4_key(9, "k@example.org")).expect("write");
        let store = Arc::new(FlakyStore::default());
        let peer = CountingPeer::default();

        let patterns = [
            format!("{}/none-*.pgp", dir.path().display()),
            format!("{}/k.pgp", dir.path().display()),
        ];
        let report = run_pipeline(&Loader::new(store.clone()), &peer, &patterns).await;

        assert!(report.patterns[0].files.is_empty());
        assert_eq!(report.patterns[1].files.len(), 1);
        assert_eq!(store.inner.len(), 1);
    }

    #[tokio::test]
    async fn insert_failure_on_one_pattern_does_not_block_the_next() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a.pgp");
        let b = dir.path().join("b.pgp");
        fs::write(&a, v4_key(1, "poison@example.org")).expect("write a");
        fs::write(&b, v4_key(2, "fine@example.org")).expect("write b");
        let store = Arc::new(FlakyStore {
            poison: Some("poison@example.org".to_string()),
            ..FlakyStore::default()
        });
        let peer = CountingPeer::default();

        let patterns = [a.display().to_string(), b.display().to_string()];
        let report = run_pipeline(&Loader::new(store.clone()), &peer, &patterns).await;

        assert!(matches!(
            report.patterns[0].files[0].outcome,
            FileOutcome::InsertFailed(_)
        ));
        assert!(report.patterns[1].files[0].is_stored());
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
        assert_eq!(peer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stats_flush_runs_once_after_all_patterns() {
        let store = Arc::new(FlakyStore::default());
        let peer = CountingPeer::default();
        let patterns = ["keys[".to_string(), "/nonexistent/*.pgp".to_string()];

        let report = run_pipeline(&Loader::new(store), &peer, &patterns).await;
        assert_eq!(peer.calls.load(Ordering::SeqCst), 1);
        assert!(report.patterns[0].error.is_some());
        assert!(report.stats.is_some());
    }

    #[tokio::test]
    async fn failed_stats_flush_is_not_fatal() {
        let store = Arc::new(FlakyStore::default());
        let peer = CountingPeer {
            fail: true,
            ..CountingPeer::default()
        };
        let report = run_pipeline(&Loader::new(store), &peer, &[]).await;
        assert_eq!(report.stats, None);
        assert_eq!(peer.calls.load(Ordering::SeqCst), 1);
    }
}
