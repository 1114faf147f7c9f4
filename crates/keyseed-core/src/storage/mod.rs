use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keys::KeyRecord;

mod memory;

pub use memory::InMemoryKeyStore;

/// Errors produced by key store implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyStoreError {
    /// The backend could not be reached or prepared.
    #[error("cannot connect to key store at {target}: {reason}")]
    Connection { target: String, reason: String },
    /// A single key could not be written; keys after it in the batch were not attempted.
    #[error("failed to store key {fingerprint}: {reason}")]
    Write { fingerprint: String, reason: String },
    /// Underlying storage failure.
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

/// What an insert did with each key of the batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertSummary {
    /// Fingerprints not seen before.
    pub inserted: usize,
    /// Known fingerprints whose material changed.
    pub updated: usize,
    /// Known fingerprints with identical material.
    pub unchanged: usize,
}

impl InsertSummary {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.unchanged
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCounts {
    pub inserted: u64,
    pub updated: u64,
}

/// Aggregate view of a store, consumed by the reconciliation stats flush.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total: u64,
    pub daily: BTreeMap<NaiveDate, DailyCounts>,
}

impl StoreStats {
    /// Count one stored key, first written at `inserted_at` and last changed at `updated_at`.
    pub fn record(&mut self, inserted_at: DateTime<Utc>, updated_at: Option<DateTime<Utc>>) {
        self.total += 1;
        self.daily
            .entry(inserted_at.date_naive())
            .or_default()
            .inserted += 1;
        if let Some(updated_at) = updated_at {
            self.daily
                .entry(updated_at.date_naive())
                .or_default()
                .updated += 1;
        }
    }
}

/// Contract for the keyserver storage backend.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Persist a batch of keys in one call. Partial progress on failure is backend-defined.
    async fn insert(&self, keys: Vec<KeyRecord>) -> Result<InsertSummary, KeyStoreError>;

    /// Summarize the stored keys.
    async fn stats(&self) -> Result<StoreStats, KeyStoreError>;
}
