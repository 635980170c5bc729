use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;

use super::{Driver, EndpointError};

/// In-memory driver for tests and scratch builds.
#[derive(Default)]
pub struct MemoryDriver {
    blobs: Mutex<HashMap<String, Bytes>>,
}

impl Driver for MemoryDriver {
    fn get(&self, path: &str) -> Result<Bytes, EndpointError> {
        self.blobs
            .lock()
            .expect("memory driver poisoned")
            .get(path)
            .cloned()
            .ok_or_else(|| EndpointError::NotFound(path.to_string()))
    }

    fn put(&self, path: &str, data: &[u8]) -> Result<(), EndpointError> {
        self.blobs
            .lock()
            .expect("memory driver poisoned")
            .insert(path.to_string(), Bytes::copy_from_slice(data));
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.blobs
            .lock()
            .expect("memory driver poisoned")
            .contains_key(path)
    }
}
