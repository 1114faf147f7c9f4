use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use keyseed_core::{
    keys::KeyRecord,
    storage::{InsertSummary, KeyStore, KeyStoreError, StoreStats},
};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

/// File-backed key store: one JSON blob per fingerprint, sharded by the
/// fingerprint's first byte (`<root>/AB/AB12...json`).
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredKey {
    fingerprint: String,
    key_id: String,
    version: u8,
    algorithm: u8,
    created_at: DateTime<Utc>,
    inserted_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    user_ids: Vec<String>,
    digest: String,
    packets: String,
}

/// Just the bookkeeping fields, for stats scans.
#[derive(Debug, Deserialize)]
struct StoredTimes {
    inserted_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl FileKeyStore {
    /// Open the store at `root`, creating it if needed and probing that it is writable.
    pub fn dial(root: impl Into<PathBuf>) -> Result<Self, KeyStoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| connection_err(&root, err))?;
        NamedTempFile::new_in(&root).map_err(|err| connection_err(&root, err))?;
        debug!(?root, "key store ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, fingerprint: &str) -> PathBuf {
        let shard = fingerprint.get(..2).unwrap_or("00");
        self.root.join(shard).join(format!("{fingerprint}.json"))
    }

    fn put(&self, key: &KeyRecord, now: DateTime<Utc>) -> Result<Outcome, String> {
        let fingerprint = key.fingerprint();
        let path = self.path_for(&fingerprint);
        let digest = key.digest();
        let existing = read_blob::<StoredKey>(&path).map_err(|err| err.to_string())?;

        let (inserted_at, updated_at, outcome) = match existing {
            Some(stored) if stored.digest == digest => return Ok(Outcome::Unchanged),
            Some(stored) => (stored.inserted_at, Some(now), Outcome::Updated),
            None => (now, None, Outcome::Inserted),
        };

        let blob = StoredKey {
            key_id: key.key_id(),
            version: key.version(),
            algorithm: key.algorithm(),
            created_at: key.created_at(),
            inserted_at,
            updated_at,
            user_ids: key.user_ids().to_vec(),
            digest,
            packets: STANDARD.encode(key.to_bytes()),
            fingerprint,
        };
        write_blob(&path, &blob)?;
        Ok(outcome)
    }
}

enum Outcome {
    Inserted,
    Updated,
    Unchanged,
}

#[async_trait]
impl KeyStore for FileKeyStore {
    #[instrument(skip_all, fields(count = keys.len()))]
    async fn insert(&self, keys: Vec<KeyRecord>) -> Result<InsertSummary, KeyStoreError> {
        let now = Utc::now();
        let mut summary = InsertSummary::default();
        for key in &keys {
            match self.put(key, now) {
                Ok(Outcome::Inserted) => summary.inserted += 1,
                Ok(Outcome::Updated) => summary.updated += 1,
                Ok(Outcome::Unchanged) => summary.unchanged += 1,
                Err(reason) => {
                    return Err(KeyStoreError::Write {
                        fingerprint: key.fingerprint(),
                        reason,
                    })
                }
            }
        }
        debug!(?summary, "batch stored");
        Ok(summary)
    }

    #[instrument(skip_all)]
    async fn stats(&self) -> Result<StoreStats, KeyStoreError> {
        let mut stats = StoreStats::default();
        for shard in fs::read_dir(&self.root).map_err(storage_err)? {
            let shard = shard.map_err(storage_err)?;
            if !shard.file_type().map_err(storage_err)?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(shard.path()).map_err(storage_err)? {
                let path = entry.map_err(storage_err)?.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                    continue;
                }
                if let Some(times) = read_blob::<StoredTimes>(&path)? {
                    stats.record(times.inserted_at, times.updated_at);
                }
            }
        }
        Ok(stats)
    }
}

fn write_blob(path: &Path, blob: &StoredKey) -> Result<(), String> {
    let parent = path
        .parent()
        .ok_or_else(|| "invalid storage path".to_string())?;
    fs::create_dir_all(parent).map_err(|err| err.to_string())?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|err| err.to_string())?;
    let json = serde_json::to_vec(blob).map_err(|err| err.to_string())?;
    tmp.write_all(&json).map_err(|err| err.to_string())?;
    tmp.flush().map_err(|err| err.to_string())?;
    tmp.persist(path).map_err(|err| err.error.to_string())?;
    Ok(())
}

fn read_blob<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, KeyStoreError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(storage_err(err)),
    };

    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(storage_err)?;
    serde_json::from_slice(&buf).map(Some).map_err(storage_err)
}

fn connection_err(root: &Path, err: std::io::Error) -> KeyStoreError {
    KeyStoreError::Connection {
        target: root.display().to_string(),
        reason: err.to_string(),
    }
}

fn storage_err<E: ToString>(err: E) -> KeyStoreError {
    KeyStoreError::Storage {
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use keyseed_core::testing::{public_key_packet, user_id_packet, v4_record};

    use super::*;

    impl FileKeyStore {
        fn load(&self, fingerprint: &str) -> Result<Option<KeyRecord>, KeyStoreError> {
            let Some(stored) = read_blob::<StoredKey>(&self.path_for(fingerprint))? else {
                return Ok(None);
            };
            let bytes = STANDARD.decode(&stored.packets).map_err(storage_err)?;
            keyseed_core::keys::read_keys(&bytes[..])
                .next()
                .transpose()
                .map_err(storage_err)
        }
    }

    #[tokio::test]
    async fn insert_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileKeyStore::dial(dir.path()).expect("dial");
        let key = v4_record(1, "alice@example.org");

        let summary = store.insert(vec![key.clone()]).await.expect("insert");
        assert_eq!(summary.inserted, 1);

        let loaded = store
            .load(&key.fingerprint())
            .expect("load")
            .expect("key present");
        assert_eq!(loaded, key);

        let fingerprint = key.fingerprint();
        let on_disk = store.path_for(&fingerprint);
        assert!(on_disk.starts_with(dir.path().join(&fingerprint[..2])));
    }

    #[tokio::test]
    async fn reinsert_detects_changes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileKeyStore::dial(dir.path()).expect("dial");
        store
            .insert(vec![v4_record(1, "a@example.org")])
            .await
            .expect("insert");

        let grown = KeyRecord::from_packets(vec![
            public_key_packet(1),
            user_id_packet("a@example.org"),
            user_id_packet("a@home.example.org"),
        ])
        .expect("record");
        let summary = store
            .insert(vec![grown.clone(), v4_record(2, "b@example.org")])
            .await
            .expect("insert again");
        assert_eq!(
            summary,
            InsertSummary {
                inserted: 1,
                updated: 1,
                unchanged: 0
            }
        );

        let again = store.insert(vec![grown]).await.expect("third insert");
        assert_eq!(again.unchanged, 1);
    }

    #[tokio::test]
    async fn stats_scan_every_shard() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileKeyStore::dial(dir.path()).expect("dial");
        let keys = (1..=5)
            .map(|seed| v4_record(seed, "someone@example.org"))
            .collect();
        store.insert(keys).await.expect("insert");

        let stats = store.stats().await.expect("stats");
        assert_eq!(stats.total, 5);
        let inserted: u64 = stats.daily.values().map(|day| day.inserted).sum();
        assert_eq!(inserted, 5);
    }

    #[test]
    fn dial_fails_when_root_is_a_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("not-a-dir");
        fs::write(&file, b"x").expect("write");

        let err = FileKeyStore::dial(&file).expect_err("dial should fail");
        assert!(matches!(err, KeyStoreError::Connection { .. }));
    }

    #[tokio::test]
    async fn write_failure_names_the_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileKeyStore::dial(dir.path()).expect("dial");
        let key = v4_record(3, "c@example.org");
        let fingerprint = key.fingerprint();
        // A plain file where the shard directory should be blocks the write.
        fs::write(dir.path().join(&fingerprint[..2]), b"blocker").expect("write blocker");

        let err = store.insert(vec![key]).await.expect_err("insert should fail");
        match err {
            KeyStoreError::Write { fingerprint: failed, .. } => assert_eq!(failed, fingerprint),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
