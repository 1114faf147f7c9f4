use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{InsertSummary, KeyStore, KeyStoreError, StoreStats};
use crate::keys::KeyRecord;

#[derive(Debug, Clone)]
struct Entry {
    digest: String,
    inserted_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

/// In-memory key store for tests and dry runs. Keeps digests only, not key material.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyStore {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn insert(&self, keys: Vec<KeyRecord>) -> Result<InsertSummary, KeyStoreError> {
        let mut map = self.inner.lock().map_err(|err| KeyStoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;

        let now = Utc::now();
        let mut summary = InsertSummary::default();
        for key in keys {
            let digest = key.digest();
            match map.get_mut(&key.fingerprint()) {
                Some(entry) if entry.digest == digest => summary.unchanged += 1,
                Some(entry) => {
                    entry.digest = digest;
                    entry.updated_at = Some(now);
                    summary.updated += 1;
                }
                None => {
                    map.insert(
                        key.fingerprint(),
                        Entry {
                            digest,
                            inserted_at: now,
                            updated_at: None,
                        },
                    );
                    summary.inserted += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn stats(&self) -> Result<StoreStats, KeyStoreError> {
        let map = self.inner.lock().map_err(|err| KeyStoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;

        let mut stats = StoreStats::default();
        for entry in map.values() {
            stats.record(entry.inserted_at, entry.updated_at);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyRecord;
    use crate::testing::{public_key_packet, user_id_packet, v4_record};

    #[tokio::test]
    async fn classifies_new_changed_and_repeated_keys() {
        let store = InMemoryKeyStore::new();
        let first = store
            .insert(vec![v4_record(1, "a@example.org"), v4_record(2, "b@example.org")])
            .await
            .expect("insert");
        assert_eq!(first.inserted, 2);

        let grown = KeyRecord::from_packets(vec![
            public_key_packet(1),
            user_id_packet("a@example.org"),
            user_id_packet("a@work.example.org"),
        ])
        .expect("record");
        let second = store
            .insert(vec![grown, v4_record(2, "b@example.org")])
            .await
            .expect("insert again");
        assert_eq!(
            second,
            InsertSummary {
                inserted: 0,
                updated: 1,
                unchanged: 1
            }
        );
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn stats_count_every_key() {
        let store = InMemoryKeyStore::new();
        store
            .insert(vec![v4_record(1, "a@example.org"), v4_record(2, "b@example.org")])
            .await
            .expect("insert");

        let stats = store.stats().await.expect("stats");
        assert_eq!(stats.total, 2);
        let today = stats.daily.values().next().expect("one day");
        assert_eq!(today.inserted, 2);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let store = InMemoryKeyStore::new();
        let summary = store.insert(Vec::new()).await.expect("insert");
        assert_eq!(summary.total(), 0);
        assert!(store.is_empty());
    }
}
