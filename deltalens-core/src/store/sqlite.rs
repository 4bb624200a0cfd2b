use super::schema::run_migrations;
use super::{SnapshotKey, SnapshotStore};
use crate::error::{Error, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Snapshot blobs in one SQLite table, checksummed with SHA-256.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

impl SqliteStore {
    /// Open or create a store at the given path and migrate it.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SnapshotStore for SqliteStore {
    fn get(&self, key: &SnapshotKey) -> Result<Option<Vec<u8>>> {
        let conn = self.connection();
        let row: Option<(Vec<u8>, Option<String>)> = conn
            .query_row(
                "SELECT body, sha256 FROM snapshots
                 WHERE project_id = ?1 AND date = ?2 AND query_id = ?3 AND k = ?4
                   AND kind = ?5 AND mailer = ?6",
                params![
                    key.project_id,
                    key.date,
                    key.query_id,
                    key.k,
                    key.kind.as_str(),
                    key.mailer
                ],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        let Some((body, stored)) = row else {
            return Ok(None);
        };
        if let Some(stored) = stored {
            let actual = checksum(&body);
            if stored != actual {
                tracing::error!(
                    key = %key,
                    stored = %stored,
                    actual = %actual,
                    "snapshot checksum mismatch"
                );
                return Err(Error::SnapshotCorrupt(key.to_string()));
            }
        }
        Ok(Some(body))
    }

    fn put(&self, key: &SnapshotKey, bytes: &[u8]) -> Result<()> {
        let conn = self.connection();
        conn.execute(
            "INSERT OR REPLACE INTO snapshots
                (project_id, date, query_id, k, kind, mailer, body, sha256, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                key.project_id,
                key.date,
                key.query_id,
                key.k,
                key.kind.as_str(),
                key.mailer,
                bytes,
                checksum(bytes),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SnapshotKind;
    use crate::types::Period;

    fn key(kind: SnapshotKind) -> SnapshotKey {
        SnapshotKey::new(3, Period::new(0, 86_399), 9, 10, kind)
    }

    #[test]
    fn test_put_then_get() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get(&key(SnapshotKind::Wpi)).unwrap().is_none());

        store.put(&key(SnapshotKind::Wpi), b"first").unwrap();
        store.put(&key(SnapshotKind::Wpi), b"second").unwrap();
        store.put(&key(SnapshotKind::Cpi), b"cross").unwrap();

        assert_eq!(store.get(&key(SnapshotKind::Wpi)).unwrap().unwrap(), b"second".to_vec());
        assert_eq!(store.get(&key(SnapshotKind::Cpi)).unwrap().unwrap(), b"cross".to_vec());
        assert!(store
            .get(&key(SnapshotKind::Wpi).with_mailer(true))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(&key(SnapshotKind::Wpi), b"original").unwrap();
        store
            .connection()
            .execute("UPDATE snapshots SET body = x'00'", [])
            .unwrap();
        assert!(matches!(
            store.get(&key(SnapshotKind::Wpi)),
            Err(Error::SnapshotCorrupt(_))
        ));
    }
}
