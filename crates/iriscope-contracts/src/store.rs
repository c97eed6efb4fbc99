use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage quota exceeded")]
    QuotaExceeded,
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// String-keyed store of JSON-serializable values.
///
/// Writes are read-modify-write against the shared payload so rapid
/// sequential mutations from separate handles do not lose updates.
pub trait StoreBackend {
    fn get(&mut self, key: &str) -> Option<Value>;
    fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError>;
    fn delete(&mut self, key: &str) -> Result<(), StoreError>;
}

/// Single-file JSON store. Reads refresh from disk, writes merge only the
/// keys this handle touched, so two handles on the same path interleave
/// without clobbering each other.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    payload: Option<Map<String, Value>>,
    dirty_keys: Vec<String>,
    deleted_keys: Vec<String>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            payload: None,
            dirty_keys: Vec::new(),
            deleted_keys: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_loaded(&mut self) -> &mut Map<String, Value> {
        self.payload
            .insert(read_json_object(&self.path).unwrap_or_default())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        if self.dirty_keys.is_empty() && self.deleted_keys.is_empty() {
            return Ok(());
        }

        let mut on_disk = read_json_object(&self.path).unwrap_or_default();
        if let Some(payload) = &self.payload {
            for key in &self.dirty_keys {
                if let Some(value) = payload.get(key) {
                    on_disk.insert(key.clone(), value.clone());
                }
            }
        }
        for key in &self.deleted_keys {
            on_disk.remove(key);
        }
        write_json_object(&self.path, &on_disk)?;
        self.payload = Some(on_disk);
        self.dirty_keys.clear();
        self.deleted_keys.clear();
        Ok(())
    }
}

impl StoreBackend for JsonFileStore {
    fn get(&mut self, key: &str) -> Option<Value> {
        self.ensure_loaded().get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        let payload = self.ensure_loaded();
        if payload.get(key) == Some(&value) {
            return Ok(());
        }
        payload.insert(key.to_string(), value);
        if !self.dirty_keys.iter().any(|item| item == key) {
            self.dirty_keys.push(key.to_string());
        }
        self.deleted_keys.retain(|item| item != key);
        self.flush()
    }

    fn delete(&mut self, key: &str) -> Result<(), StoreError> {
        let payload = self.ensure_loaded();
        if payload.remove(key).is_none() {
            return Ok(());
        }
        if !self.deleted_keys.iter().any(|item| item == key) {
            self.deleted_keys.push(key.to_string());
        }
        self.dirty_keys.retain(|item| item != key);
        self.flush()
    }
}

/// In-memory store with an optional serialized-size ceiling. The capacity
/// makes quota exhaustion reproducible in tests and dry runs; a rejected
/// write leaves the stored payload untouched.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    payload: Map<String, Value>,
    capacity_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity_bytes(capacity_bytes: usize) -> Self {
        Self {
            payload: Map::new(),
            capacity_bytes: Some(capacity_bytes),
        }
    }
}

impl StoreBackend for MemoryStore {
    fn get(&mut self, key: &str) -> Option<Value> {
        self.payload.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        if let Some(capacity) = self.capacity_bytes {
            let mut candidate = self.payload.clone();
            candidate.insert(key.to_string(), value.clone());
            let encoded = serde_json::to_string(&Value::Object(candidate))
                .map_err(|err| StoreError::Backend(err.to_string()))?;
            if encoded.len() > capacity {
                return Err(StoreError::QuotaExceeded);
            }
        }
        self.payload.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), StoreError> {
        self.payload.remove(key);
        Ok(())
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(map_io_error)?;
    }
    let encoded = serde_json::to_string_pretty(&Value::Object(payload.clone()))
        .map_err(|err| StoreError::Backend(err.to_string()))?;
    std::fs::write(path, encoded).map_err(map_io_error)
}

fn map_io_error(err: std::io::Error) -> StoreError {
    // ENOSPC: the device has no room for the serialized collection.
    if err.raw_os_error() == Some(28) {
        StoreError::QuotaExceeded
    } else {
        StoreError::Backend(err.to_string())
    }
}
