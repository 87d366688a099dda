//! Project persistence
//!
//! Projects are stored as JSON blobs keyed by project id. The [`BlobStore`] trait
//! keeps the backend swappable; an in-memory store backs tests and a directory store
//! backs the command line tool.

use crate::core::schema::{Project, ProjectId};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Maximum encoded project size (10 MB)
pub const MAX_PROJECT_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Project too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
    #[error("Invalid storage key '{0}'")]
    InvalidKey(String),
    #[error("Serialization failed: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Key/value byte storage
pub trait BlobStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn set(&mut self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str) -> Result<bool, StorageError>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryBlobStore {
    blobs: HashMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.blobs.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.blobs.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool, StorageError> {
        Ok(self.blobs.remove(key).is_some())
    }
}

/// One `<key>.json` file per blob inside a directory
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    /// Open (and create if needed) the directory at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let safe = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !safe {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(format!("{}.json", key)))
    }
}

impl BlobStore for FileBlobStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match std::fs::read(self.path_for(key)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool, StorageError> {
        match std::fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Serializes and deserializes projects
pub struct ProjectCodec;

impl ProjectCodec {
    pub fn encode(project: &Project) -> Result<Vec<u8>, StorageError> {
        let bytes = serde_json::to_vec_pretty(project)?;
        if bytes.len() > MAX_PROJECT_SIZE {
            return Err(StorageError::TooLarge {
                size: bytes.len(),
                max: MAX_PROJECT_SIZE,
            });
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Project, StorageError> {
        if bytes.len() > MAX_PROJECT_SIZE {
            return Err(StorageError::TooLarge {
                size: bytes.len(),
                max: MAX_PROJECT_SIZE,
            });
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Loads and saves projects by id on top of a [`BlobStore`]
#[derive(Debug)]
pub struct ProjectRepository<S> {
    store: S,
}

impl<S: BlobStore> ProjectRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn load(&self, id: ProjectId) -> Result<Option<Project>, StorageError> {
        self.store
            .get(&id.to_string())?
            .map(|bytes| ProjectCodec::decode(&bytes))
            .transpose()
    }

    pub fn save(&mut self, project: &Project) -> Result<(), StorageError> {
        let bytes = ProjectCodec::encode(project)?;
        tracing::debug!("Saving project {} ({} bytes)", project.id, bytes.len());
        self.store.set(&project.id.to_string(), bytes)
    }

    pub fn delete(&mut self, id: ProjectId) -> Result<bool, StorageError> {
        self.store.remove(&id.to_string())
    }

    pub fn into_inner(self) -> S {
        self.store
    }
}
