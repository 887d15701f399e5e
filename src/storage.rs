use std::path::{Path, PathBuf};

/// String key -> opaque blob persistence.
pub trait SnapshotStore: Send + Sync {
    /// Returns `Ok(None)` when nothing was stored under `key`.
    fn get(&self, key: &str) -> std::io::Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: &[u8]) -> std::io::Result<()>;
    fn delete(&self, key: &str) -> std::io::Result<()>;
}

/// Stores every key as a file inside one directory.
#[derive(Clone)]
pub struct FileStore {
    pub base_dir: PathBuf,
}

impl FileStore {
    pub fn new(storage_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(storage_dir)?;
        Ok(FileStore {
            base_dir: storage_dir.to_path_buf(),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }
}

impl SnapshotStore for FileStore {
    fn get(&self, key: &str) -> std::io::Result<Option<Vec<u8>>> {
        match std::fs::read(self.path_for(key)) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> std::io::Result<()> {
        let path = self.path_for(key);
        let temp_path = self
            .base_dir
            .join(format!("{}-{key}.tmp", rusty_ulid::generate_ulid_string()));

        if let Err(err) = std::fs::write(&temp_path, value) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(err);
        }

        std::fs::rename(&temp_path, &path)
    }

    fn delete(&self, key: &str) -> std::io::Result<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}
