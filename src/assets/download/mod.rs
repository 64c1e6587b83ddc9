mod hf;
mod http;
mod local;

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
};

use thiserror::Error;
use tracing::{info, warn};

use super::{
    auth::Credential,
    config::{AssetConfig, SourceKind},
    progress::ProgressSink,
    AssetError, AssetResult,
};

pub use hf::{HuggingFaceDownloader, ENV_HF_ENDPOINT};
pub use http::HttpDownloader;
pub use local::LocalDownloader;

/// Failure of a single fetch attempt.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
    #[error("HTTP {status} from {url} (not retried)")]
    Denied { status: u16, url: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("source {} does not exist", .0.display())]
    Missing(PathBuf),
    #[error("{0}")]
    Unsupported(String),
}

impl FetchError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status { .. } | FetchError::Transport(_) => true,
            FetchError::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            FetchError::Denied { .. } | FetchError::Missing(_) | FetchError::Unsupported(_) => {
                false
            }
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } | FetchError::Denied { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => FetchError::Status {
                status: status.as_u16(),
                url: error
                    .url()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            },
            None => FetchError::Transport(error.to_string()),
        }
    }
}

/// Everything a downloader needs for one attempt.
pub struct FetchRequest<'a> {
    pub config: &'a AssetConfig,
    /// Empty directory the artifact must be written into.
    pub destination: &'a Path,
    pub credential: Option<&'a Credential>,
}

/// Fetches one source kind into a local directory.
///
/// Implementations return the path of what they wrote, which must live
/// inside `request.destination`.
pub trait Downloader: Send + Sync {
    fn fetch(
        &self,
        request: &FetchRequest<'_>,
        progress: &mut dyn ProgressSink,
    ) -> Result<PathBuf, FetchError>;
}

/// The downloader used for each source kind.
#[derive(Clone)]
pub struct Downloaders {
    http: Arc<dyn Downloader>,
    hf: Arc<dyn Downloader>,
    local: Arc<dyn Downloader>,
}

impl Downloaders {
    pub fn standard() -> Self {
        Self {
            http: Arc::new(HttpDownloader::default()),
            hf: Arc::new(HuggingFaceDownloader::from_env()),
            local: Arc::new(LocalDownloader),
        }
    }

    pub fn set(&mut self, kind: SourceKind, downloader: Arc<dyn Downloader>) {
        match kind {
            SourceKind::Http => self.http = downloader,
            SourceKind::HuggingFace => self.hf = downloader,
            SourceKind::Local => self.local = downloader,
        }
    }

    pub fn for_kind(&self, kind: SourceKind) -> &dyn Downloader {
        match kind {
            SourceKind::Http => self.http.as_ref(),
            SourceKind::HuggingFace => self.hf.as_ref(),
            SourceKind::Local => self.local.as_ref(),
        }
    }
}

impl Default for Downloaders {
    fn default() -> Self {
        Self::standard()
    }
}

/// Runs `downloader` up to `retries + 1` times, sleeping
/// `retry_delay_seconds` between retryable failures. Each attempt starts
/// from an empty `destination`.
pub fn fetch_with_retry(
    downloader: &dyn Downloader,
    config: &AssetConfig,
    destination: &Path,
    credential: Option<&Credential>,
    progress: &mut dyn ProgressSink,
) -> AssetResult<PathBuf> {
    let total_attempts = config.retries.saturating_add(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        reset_dir(destination)?;

        let request = FetchRequest {
            config,
            destination,
            credential,
        };
        let error = match downloader.fetch(&request, progress) {
            Ok(path) => {
                if attempt > 1 {
                    info!(
                        asset = %config.name,
                        version = %config.version,
                        "fetched on attempt {attempt}/{total_attempts}"
                    );
                }
                return Ok(path);
            }
            Err(error) => error,
        };

        let retryable = error.is_retryable();
        warn!(
            asset = %config.name,
            version = %config.version,
            "attempt {attempt}/{total_attempts} from {} failed: {error}",
            config.source
        );
        if !retryable || attempt >= total_attempts {
            return Err(AssetError::Download {
                name: config.name.clone(),
                version: config.version.clone(),
                origin: config.source.to_string(),
                attempts: attempt,
                last_error: error,
            });
        }
        thread::sleep(config.retry_delay());
    }
}

fn reset_dir(dir: &Path) -> AssetResult<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)
            .map_err(|err| AssetError::io(format!("clear {}", dir.display()), err))?;
    }
    fs::create_dir_all(dir).map_err(|err| AssetError::io(format!("create {}", dir.display()), err))
}
