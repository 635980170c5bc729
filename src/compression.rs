use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::IndexError;

/// Gzip a byte stream.
pub fn compress(bytes: &[u8]) -> Result<Vec<u8>, IndexError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Un-gzip a byte stream, validating the expected decompressed size when
/// the caller knows it.
pub fn decompress(bytes: &[u8], expected: Option<usize>) -> Result<Vec<u8>, IndexError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::with_capacity(expected.unwrap_or(bytes.len() * 2));
    decoder
        .read_to_end(&mut out)
        .map_err(|e| IndexError::corrupt(format!("decompression failed: {e}")))?;

    if let Some(expected) = expected {
        if out.len() != expected {
            return Err(IndexError::corrupt(format!(
                "decompressed to {} bytes, expected {expected}",
                out.len()
            )));
        }
    }

    Ok(out)
}
