use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use keyseed_core::{
    keys::{open_key_file, DecodeOutcome, KeyRecord},
    storage::{InsertSummary, KeyStore},
};
use tracing::{error, info};

use crate::resolve;

/// How one file ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Inserted(InsertSummary),
    InsertFailed(String),
    OpenFailed(String),
}

/// Per-file result of a load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadResult {
    pub path: PathBuf,
    /// Records decoded and submitted.
    pub decoded: usize,
    /// Records that failed to decode.
    pub failed: usize,
    pub outcome: FileOutcome,
    /// Wall time of the insert call alone.
    pub elapsed: Duration,
}

impl LoadResult {
    pub fn is_stored(&self) -> bool {
        matches!(self.outcome, FileOutcome::Inserted(_))
    }
}

/// Everything that happened for one command-line pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternReport {
    pub pattern: String,
    /// Set when the pattern itself was malformed.
    pub error: Option<String>,
    pub files: Vec<LoadResult>,
}

/// Drives decode, collect and insert for each file, one file at a time.
pub struct Loader<S: KeyStore> {
    store: Arc<S>,
}

impl<S: KeyStore> Loader<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn load_pattern(&self, pattern: &str) -> PatternReport {
        let paths = match resolve::resolve(pattern) {
            Ok(paths) => paths,
            Err(err) => {
                error!("failed to match {pattern:?}: {err}");
                return PatternReport {
                    pattern: pattern.to_string(),
                    error: Some(err.to_string()),
                    files: Vec::new(),
                };
            }
        };
        if paths.is_empty() {
            info!("no files match {pattern:?}");
        }

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            files.push(self.load_file(&path).await);
        }
        PatternReport {
            pattern: pattern.to_string(),
            error: None,
            files,
        }
    }

    pub async fn load_file(&self, path: &Path) -> LoadResult {
        let reader = match open_key_file(path) {
            Ok(reader) => reader,
            Err(err) => {
                error!("failed to open {:?} for reading: {err}", path.display());
                return LoadResult {
                    path: path.to_path_buf(),
                    decoded: 0,
                    failed: 0,
                    outcome: FileOutcome::OpenFailed(err.to_string()),
                    elapsed: Duration::ZERO,
                };
            }
        };
        let (keys, failed) = collect(reader);
        let decoded = keys.len();

        let started = Instant::now();
        let result = self.store.insert(keys).await;
        let elapsed = started.elapsed();

        let outcome = match result {
            Ok(summary) => {
                info!(
                    stored = summary.total(),
                    inserted = summary.inserted,
                    updated = summary.updated,
                    unchanged = summary.unchanged,
                    failed,
                    "loaded {decoded} keys from {:?} in {elapsed:?}",
                    path.display()
                );
                FileOutcome::Inserted(summary)
            }
            Err(err) => {
                error!("failed to insert keys from {:?}: {err}", path.display());
                FileOutcome::InsertFailed(err.to_string())
            }
        };
        LoadResult {
            path: path.to_path_buf(),
            decoded,
            failed,
            outcome,
            elapsed,
        }
    }
}

/// Drain a decode stream, keeping good records and logging each failure.
pub fn collect(outcomes: impl IntoIterator<Item = DecodeOutcome>) -> (Vec<KeyRecord>, usize) {
    let mut keys = Vec::new();
    let mut failed = 0;
    for outcome in outcomes {
        match outcome {
            Ok(key) => keys.push(key),
            Err(err) => {
                failed += 1;
                error!("error reading key: {err}");
            }
        }
    }
    (keys, failed)
}
