// src/utils/checksum.rs

//! Content fingerprinting for change detection.

use std::str::FromStr;

use sha2::{Digest, Sha256, Sha512};

use crate::error::AppError;

/// Supported fingerprint algorithms.
///
/// Parsed once at startup; an unknown name is a configuration error, not a
/// runtime one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl FromStr for ChecksumAlgorithm {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sha512" | "sha-512" => Ok(Self::Sha512),
            other => Err(AppError::config(format!(
                "Unsupported checksum algorithm: {other}"
            ))),
        }
    }
}

/// Compute the lowercase hex fingerprint of arbitrary byte content.
pub fn fingerprint(algorithm: ChecksumAlgorithm, bytes: &[u8]) -> String {
    match algorithm {
        ChecksumAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(bytes);
            hex::encode(hasher.finalize())
        }
        ChecksumAlgorithm::Sha512 => {
            let mut hasher = Sha512::new();
            hasher.update(bytes);
            hex::encode(hasher.finalize())
        }
    }
}
