use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelIntegrityError {
    #[error("model file not found: {path}")]
    MissingModel { path: PathBuf },

    #[error("model path is not a regular file: {path}")]
    NotAFile { path: PathBuf },

    #[error("failed to open model file: {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read model file: {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed expected digest '{0}' (want 64 hex characters)")]
    MalformedDigest(String),

    #[error("model checksum mismatch ({path})\n  expected: {expected}\n  got:      {got}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        got: String,
    },
}

/// Outcome of a successful model check.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCheck {
    pub path: PathBuf,
    pub sha256: String,
    /// Whether the digest was compared against an expected value.
    pub pinned: bool,
}

/// Compute SHA-256 hex digest of a file.
pub fn sha256_file_hex(path: &Path) -> Result<String, ModelIntegrityError> {
    let mut file = fs::File::open(path).map_err(|source| ModelIntegrityError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = file
            .read(&mut buf)
            .map_err(|source| ModelIntegrityError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Check that the landmark model exists and, if `expected_sha256` is given,
/// that its digest matches (case-insensitive).
pub fn verify_model(
    path: &Path,
    expected_sha256: Option<&str>,
) -> Result<ModelCheck, ModelIntegrityError> {
    if !path.exists() {
        return Err(ModelIntegrityError::MissingModel {
            path: path.to_path_buf(),
        });
    }
    if !path.is_file() {
        return Err(ModelIntegrityError::NotAFile {
            path: path.to_path_buf(),
        });
    }

    let expected = expected_sha256
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty());
    if let Some(expected) = &expected {
        if expected.len() != 64 || !expected.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ModelIntegrityError::MalformedDigest(expected.clone()));
        }
    }

    let digest = sha256_file_hex(path)?;
    if let Some(expected) = &expected {
        if &digest != expected {
            return Err(ModelIntegrityError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected: expected.clone(),
                got: digest,
            });
        }
    }

    Ok(ModelCheck {
        path: path.to_path_buf(),
        sha256: digest,
        pinned: expected.is_some(),
    })
}
