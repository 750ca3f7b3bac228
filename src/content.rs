//! Content-addressed storage of document bytes.
//!
//! Encryption at rest is the backend's concern; the ledger only hashes,
//! stores and retrieves opaque bytes.
use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::StorageError;

pub trait ContentStore: Send + Sync {
    /// Stores `bytes` for `document_id`, replacing any previous content.
    /// Returns the backend location.
    fn put(&self, document_id: &str, bytes: &[u8]) -> Result<String, StorageError>;

    fn get(&self, document_id: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Only used to undo a `put` whose ledger commit failed.
    fn remove(&self, document_id: &str) -> Result<(), StorageError>;
}

/// Keeps content in its own sled tree next to the ledger.
pub struct SledContentStore {
    tree: sled::Tree,
}

impl SledContentStore {
    pub fn open(db: &sled::Db) -> Result<Self, StorageError> {
        Ok(Self {
            tree: db.open_tree("content")?,
        })
    }
}

impl ContentStore for SledContentStore {
    fn put(&self, document_id: &str, bytes: &[u8]) -> Result<String, StorageError> {
        self.tree.insert(document_id.as_bytes(), bytes)?;
        Ok(format!("sled://content/{document_id}"))
    }

    fn get(&self, document_id: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.tree.get(document_id.as_bytes())?.map(|v| v.to_vec()))
    }

    fn remove(&self, document_id: &str) -> Result<(), StorageError> {
        self.tree.remove(document_id.as_bytes())?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryContentStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContentStore for MemoryContentStore {
    fn put(&self, document_id: &str, bytes: &[u8]) -> Result<String, StorageError> {
        self.blobs
            .write()
            .insert(document_id.to_string(), bytes.to_vec());
        Ok(format!("memory://{document_id}"))
    }

    fn get(&self, document_id: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.blobs.read().get(document_id).cloned())
    }

    fn remove(&self, document_id: &str) -> Result<(), StorageError> {
        self.blobs.write().remove(document_id);
        Ok(())
    }
}
