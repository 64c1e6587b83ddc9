use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

use super::download::FetchError;

pub type AssetResult<T> = Result<T, AssetError>;

/// Failures surfaced by [`crate::AssetManager`] and the cache components.
///
/// Nothing here is swallowed internally: transient fetch failures are retried
/// inside the configured budget and everything else reaches the caller.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("asset '{name}' is not declared in the project configuration")]
    NotFound { name: String },

    #[error("invalid configuration for asset '{name}' ({version}) from {origin}: {reason}")]
    InvalidConfiguration {
        name: String,
        version: String,
        origin: String,
        reason: String,
    },

    #[error("cannot authenticate asset '{name}' ({version}) from {origin}: {reason}")]
    Authentication {
        name: String,
        version: String,
        origin: String,
        reason: String,
    },

    #[error(
        "failed to download asset '{name}' ({version}) from {origin} after {attempts} attempt(s): {last_error}"
    )]
    Download {
        name: String,
        version: String,
        origin: String,
        attempts: u32,
        #[source]
        last_error: FetchError,
    },

    #[error(
        "checksum mismatch for asset '{name}' ({version}) from {origin}: expected {expected}, got sha256:{actual}"
    )]
    ChecksumMismatch {
        name: String,
        version: String,
        origin: String,
        expected: String,
        actual: String,
    },

    #[error("failed to unpack asset '{name}' ({version}) from {origin}: {reason}")]
    Unpack {
        name: String,
        version: String,
        origin: String,
        reason: String,
    },

    #[error(
        "timed out after {timeout:?} waiting for the lock on asset '{name}' ({version}) from {origin}"
    )]
    LockTimeout {
        name: String,
        version: String,
        origin: String,
        timeout: Duration,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("asset metadata {}: {source}", path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl AssetError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Number of fetch attempts made, for download failures.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            AssetError::Download { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}
