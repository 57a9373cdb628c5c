use std::{
    collections::HashMap,
    fs,
    io,
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::errors::StoreError;

/// Named string entries that survive a restart.
pub trait KvStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, name: &str, value: &str) -> Result<(), StoreError>;
}

/// One file per entry under a directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn entry(&self, name: &str) -> Result<PathBuf, StoreError> {
        let valid = !name.is_empty()
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(name))
    }
}

impl KvStore for FileStore {
    fn get(&self, name: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.entry(name)?) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, name: &str, value: &str) -> Result<(), StoreError> {
        let path = self.entry(name)?;
        // write-then-rename so a crash never leaves a truncated entry
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl KvStore for MemoryStore {
    fn get(&self, name: &str) -> Result<Option<String>, StoreError> {
        let guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard.get(name).cloned())
    }

    fn set(&self, name: &str, value: &str) -> Result<(), StoreError> {
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(name.to_string(), value.to_string());
        Ok(())
    }
}
