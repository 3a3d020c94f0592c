//! CPU-bound scanning primitives: file hashing, chunk splitting, and
//! credential classification. Everything here is synchronous and pure;
//! async callers offload through `tokio::task::spawn_blocking`.

use models::Pattern;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

mod chunks;
mod classify;

pub use chunks::split_file_into_chunks;
pub use classify::{scan_for_credentials, CompiledPatterns, ScanOutcome};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read '{path}'")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// SHA-256 of the raw file bytes, as 64 lowercase hex characters.
/// Computed once at collection time and never recomputed downstream.
pub fn calculate_file_hash(path: impl AsRef<Path>) -> Result<String, Error> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path).map_err(|err| Error::io(path, err))?;

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buffer).map_err(|err| Error::io(path, err))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn read_lossy(path: &Path) -> Result<String, Error> {
    let bytes = std::fs::read(path).map_err(|err| Error::io(path, err))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Build ordered `(regex, class)` pairs for loaded pattern rows, used by
/// both chunk scanning and tests. Invalid rows are logged and skipped.
pub fn compile_patterns(patterns: &[Pattern]) -> CompiledPatterns {
    CompiledPatterns::compile(patterns)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn hash_is_lowercase_hex_of_sha256() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();

        let hash = calculate_file_hash(file.path()).unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn hash_of_missing_file_is_an_error() {
        let err = calculate_file_hash("/nonexistent/scrap").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/scrap"));
    }
}
