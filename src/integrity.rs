// src/integrity.rs

use crate::models::{CanonicalFile, Checksum, HashAlgorithm};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};
use tracing::warn;

const HASH_BLOCK_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which discrepancies between a local file and the catalog are accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToleranceConfig {
    /// Keep files whose size differs from the catalog.
    pub size: bool,
    /// Keep files whose digest differs from the catalog.
    pub checksum: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    Size { expected: u64, actual: u64 },
    Checksum { expected: String, actual: String },
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::Size { expected, actual } => {
                write!(f, "size mismatch: expected {expected} bytes, found {actual}")
            }
            Mismatch::Checksum { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, found {actual}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    /// The file is acceptable as it is; no transfer needed.
    Match,
    Mismatch(Mismatch),
    Missing,
}

/// Compares local files against catalog metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityVerifier {
    tolerance: ToleranceConfig,
}

impl IntegrityVerifier {
    pub fn new(tolerance: ToleranceConfig) -> Self {
        Self { tolerance }
    }

    pub fn tolerance(&self) -> ToleranceConfig {
        self.tolerance
    }

    /// Checks `path` against `file`. Entries without a checksum are accepted
    /// once the size check passes.
    pub async fn verify(
        &self,
        path: &Path,
        file: &CanonicalFile,
    ) -> Result<VerifyResult, IntegrityError> {
        self.verify_against(path, file.size_bytes, file.checksum.as_ref())
            .await
    }

    pub async fn verify_against(
        &self,
        path: &Path,
        size_bytes: u64,
        checksum: Option<&Checksum>,
    ) -> Result<VerifyResult, IntegrityError> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(VerifyResult::Missing),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(VerifyResult::Missing),
            Err(e) => return Err(e.into()),
        };

        if metadata.len() != size_bytes {
            let mismatch = Mismatch::Size {
                expected: size_bytes,
                actual: metadata.len(),
            };
            if !self.tolerance.size {
                return Ok(VerifyResult::Mismatch(mismatch));
            }
            warn!(path = %path.display(), "keeping file despite {mismatch}");
        }

        let Some(expected) = checksum else {
            return Ok(VerifyResult::Match);
        };

        let actual = digest_file(path, expected.algorithm).await?;
        if actual == expected.hex {
            return Ok(VerifyResult::Match);
        }
        let mismatch = Mismatch::Checksum {
            expected: expected.hex.clone(),
            actual,
        };
        if self.tolerance.checksum {
            warn!(path = %path.display(), "keeping file despite {mismatch}");
            return Ok(VerifyResult::Match);
        }
        Ok(VerifyResult::Mismatch(mismatch))
    }
}

/// Compute the hex digest of a file, reading it in bounded blocks.
pub async fn digest_file(path: &Path, algorithm: HashAlgorithm) -> Result<String, IntegrityError> {
    match algorithm {
        HashAlgorithm::Md5 => stream_digest::<Md5>(path).await,
        HashAlgorithm::Sha1 => stream_digest::<Sha1>(path).await,
        HashAlgorithm::Sha256 => stream_digest::<Sha256>(path).await,
    }
}

async fn stream_digest<D: Digest>(path: &Path) -> Result<String, IntegrityError> {
    let file = File::open(path).await?;
    let mut reader = BufReader::new(file);
    let mut hasher = D::new();
    let mut buffer = vec![0u8; HASH_BLOCK_SIZE];
    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
