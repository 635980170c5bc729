use std::io::ErrorKind;
use std::path::Path;

use bytes::Bytes;

use super::{Driver, EndpointError};

/// Local-filesystem driver. Parent directories are created on put; remote
/// schemes belong to other drivers.
#[derive(Clone)]
pub struct FsDriver;

fn check_scheme(path: &str) -> Result<(), EndpointError> {
    if path.contains("://") {
        return Err(EndpointError::Unsupported(format!(
            "this driver supports only local paths: {path}"
        )));
    }
    Ok(())
}

impl Driver for FsDriver {
    fn get(&self, path: &str) -> Result<Bytes, EndpointError> {
        check_scheme(path)?;
        match std::fs::read(path) {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(EndpointError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, path: &str, data: &[u8]) -> Result<(), EndpointError> {
        check_scheme(path)?;
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, data)?;
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }
}
