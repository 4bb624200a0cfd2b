use super::{SnapshotKey, SnapshotStore};
use crate::error::Result;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// One JSON file per snapshot under `<root>/<project>/<date>/`.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, key: &SnapshotKey) -> PathBuf {
        self.root
            .join(key.project_id.to_string())
            .join(&key.date)
            .join(key.file_name())
    }
}

impl SnapshotStore for FsStore {
    fn get(&self, key: &SnapshotKey) -> Result<Option<Vec<u8>>> {
        match std::fs::read(self.path_of(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &SnapshotKey, bytes: &[u8]) -> Result<()> {
        let path = self.path_of(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Readers never see a half-written snapshot.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SnapshotKind;
    use crate::types::Period;
    use tempfile::TempDir;

    #[test]
    fn test_put_then_get() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        let key = SnapshotKey::new(1, Period::new(0, 86_399), 5, 10, SnapshotKind::Wpi);

        assert!(store.get(&key).unwrap().is_none());
        store.put(&key, b"{\"a\":1}").unwrap();
        store.put(&key, b"{\"a\":2}").unwrap();
        assert_eq!(store.get(&key).unwrap().unwrap(), b"{\"a\":2}".to_vec());
        assert!(dir.path().join("1/19700101/5-k10.wpi.json").exists());
    }
}
