//! Snapshot persistence.
//!
//! The engine only reads and writes opaque byte blobs addressed by
//! [`SnapshotKey`]; [`FsStore`] and [`SqliteStore`] are the two local
//! backends, chosen by `[store] backend` in the config.

mod fs;
mod schema;
mod sqlite;

pub use fs::FsStore;
pub use schema::{get_schema_version, run_migrations, SCHEMA_VERSION};
pub use sqlite::SqliteStore;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::Result;
use crate::types::Period;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Within-period or cross-period snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    Wpi,
    Cpi,
}

impl SnapshotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotKind::Wpi => "wpi",
            SnapshotKind::Cpi => "cpi",
        }
    }
}

impl fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub project_id: i64,
    /// `YYYYMMDD` (UTC) of the period start; the later period for cross-period snapshots.
    pub date: String,
    pub query_id: i64,
    pub k: i64,
    pub kind: SnapshotKind,
    pub mailer: bool,
}

impl SnapshotKey {
    pub fn new(project_id: i64, period: Period, query_id: i64, k: i64, kind: SnapshotKind) -> Self {
        Self {
            project_id,
            date: period.date_key(),
            query_id,
            k,
            kind,
            mailer: false,
        }
    }

    pub fn with_mailer(mut self, mailer: bool) -> Self {
        self.mailer = mailer;
        self
    }

    /// `<query>-k<k>[-mailer].<kind>.json`
    pub fn file_name(&self) -> String {
        format!(
            "{}-k{}{}.{}.json",
            self.query_id,
            self.k,
            if self.mailer { "-mailer" } else { "" },
            self.kind
        )
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.project_id, self.date, self.file_name())
    }
}

/// Get/put primitives over snapshot blobs.
pub trait SnapshotStore: Send + Sync {
    /// `Ok(None)` when nothing is stored under `key`.
    fn get(&self, key: &SnapshotKey) -> Result<Option<Vec<u8>>>;

    /// Stores `bytes`, replacing any previous snapshot under `key`.
    fn put(&self, key: &SnapshotKey, bytes: &[u8]) -> Result<()>;
}

pub fn put_json<T: Serialize + ?Sized>(
    store: &dyn SnapshotStore,
    key: &SnapshotKey,
    value: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    store.put(key, &bytes)?;
    tracing::debug!(key = %key, bytes = bytes.len(), "snapshot stored");
    Ok(())
}

pub fn get_json<T: DeserializeOwned>(
    store: &dyn SnapshotStore,
    key: &SnapshotKey,
) -> Result<Option<T>> {
    match store.get(key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Opens the configured backend, creating it if needed.
pub fn open(config: &StoreConfig) -> Result<Box<dyn SnapshotStore>> {
    let path = config.resolved_path();
    tracing::info!(backend = ?config.backend, path = %path.display(), "opening snapshot store");
    match config.backend {
        StoreBackend::Fs => Ok(Box::new(FsStore::new(path))),
        StoreBackend::Sqlite => Ok(Box::new(SqliteStore::open(&path)?)),
    }
}
