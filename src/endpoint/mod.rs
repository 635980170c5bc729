pub mod fs;
pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File error: {0}")]
    File(#[from] std::io::Error),

    #[error("Unsupported path: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Other(String),
}

/// Byte-blob KV storage backend keyed by path. Implementations must be safe
/// for concurrent use; `put` is assumed atomic per path.
pub trait Driver: Send + Sync {
    fn get(&self, path: &str) -> Result<Bytes, EndpointError>;

    fn put(&self, path: &str, data: &[u8]) -> Result<(), EndpointError>;

    fn exists(&self, path: &str) -> bool {
        self.get(path).is_ok()
    }
}

/// A driver rooted at a path prefix. Sub-endpoints re-root under
/// `root/name/`; the chunk and metadata writers never see absolute paths.
#[derive(Clone)]
pub struct Endpoint {
    driver: Arc<dyn Driver>,
    root: String,
}

impl Endpoint {
    pub fn new(driver: Arc<dyn Driver>, root: impl Into<String>) -> Self {
        let mut root = root.into();
        if !root.is_empty() && !root.ends_with('/') {
            root.push('/');
        }
        Endpoint { driver, root }
    }

    /// A filesystem-backed endpoint rooted at `root`.
    pub fn fs(root: impl Into<String>) -> Self {
        Endpoint::new(Arc::new(fs::FsDriver), root)
    }

    /// A process-local in-memory endpoint.
    pub fn memory() -> Self {
        Endpoint::new(Arc::new(memory::MemoryDriver::default()), "")
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn full_path(&self, path: &str) -> String {
        format!("{}{}", self.root, path)
    }

    pub fn sub_endpoint(&self, name: &str) -> Endpoint {
        Endpoint::new(Arc::clone(&self.driver), self.full_path(name))
    }

    pub fn get(&self, path: &str) -> Result<Bytes, EndpointError> {
        self.driver.get(&self.full_path(path))
    }

    pub fn put(&self, path: &str, data: &[u8]) -> Result<(), EndpointError> {
        self.driver.put(&self.full_path(path), data)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.driver.exists(&self.full_path(path))
    }

    pub fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, EndpointError> {
        let bytes = self.get(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

const RETRY_LIMIT: u32 = 8;

/// Put with bounded retry: exponential backoff with a deterministic
/// per-attempt jitter, fatal after the retry limit.
pub fn ensure_put(endpoint: &Endpoint, path: &str, data: &[u8]) -> Result<(), EndpointError> {
    let mut tries = 0;
    loop {
        match endpoint.put(path, data) {
            Ok(()) => return Ok(()),
            Err(e) => {
                tries += 1;
                if tries >= RETRY_LIMIT {
                    return Err(e);
                }
                warn!(path, tries, "put failed, retrying: {e}");
                std::thread::sleep(backoff(tries, path));
            }
        }
    }
}

/// Get with the same retry policy. Not-found and unsupported paths are
/// terminal, not transient.
pub fn ensure_get(endpoint: &Endpoint, path: &str) -> Result<Bytes, EndpointError> {
    let mut tries = 0;
    loop {
        match endpoint.get(path) {
            Ok(bytes) => return Ok(bytes),
            Err(e @ (EndpointError::NotFound(_) | EndpointError::Unsupported(_))) => {
                return Err(e)
            }
            Err(e) => {
                tries += 1;
                if tries >= RETRY_LIMIT {
                    return Err(e);
                }
                warn!(path, tries, "get failed, retrying: {e}");
                std::thread::sleep(backoff(tries, path));
            }
        }
    }
}

fn backoff(tries: u32, path: &str) -> Duration {
    use std::hash::{DefaultHasher, Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    (path, tries).hash(&mut hasher);
    let jitter = hasher.finish() % 100;
    Duration::from_millis((1u64 << tries.min(6)) * 100 + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_round_trip() {
        let ep = Endpoint::memory();
        ep.put("a/b", b"hello").unwrap();
        assert_eq!(ep.get("a/b").unwrap().as_ref(), b"hello");
        assert!(ep.exists("a/b"));
        assert!(!ep.exists("a/c"));
        assert!(matches!(ep.get("a/c"), Err(EndpointError::NotFound(_))));
    }

    #[test]
    fn sub_endpoint_re_roots() {
        let ep = Endpoint::memory();
        let sub = ep.sub_endpoint("h");
        sub.put("42", b"x").unwrap();
        assert!(ep.exists("h/42"));
        assert_eq!(sub.full_path("42"), "h/42");
    }

    #[test]
    fn json_round_trip() {
        let ep = Endpoint::memory();
        ep.put("doc", br#"{"a": 3}"#).unwrap();
        let v: serde_json::Value = ep.get_json("doc").unwrap();
        assert_eq!(v["a"], 3);
    }

    #[test]
    fn fs_round_trip() {
        let dir = std::env::temp_dir().join(format!("cairn-ep-{}", std::process::id()));
        let ep = Endpoint::fs(dir.to_string_lossy().to_string());
        ep.put("nested/blob", b"bytes").unwrap();
        assert_eq!(ep.get("nested/blob").unwrap().as_ref(), b"bytes");
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
