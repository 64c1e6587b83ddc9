use std::{
    fs,
    path::{Component, Path, PathBuf},
    time::Duration,
};

use tracing::debug;

use super::{
    http::{build_client, stream_to_file},
    Downloader, FetchError, FetchRequest,
};
use crate::assets::{
    auth::Credential,
    config::{AssetSource, DEFAULT_HF_REVISION},
    progress::{ProgressSink, SilentProgress},
};

pub const ENV_HF_ENDPOINT: &str = "HF_ENDPOINT";
const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// Fetches single files from a Hugging Face style model hub through its
/// `/<repo>/resolve/<revision>/<file>` URLs.
#[derive(Debug, Clone)]
pub struct HuggingFaceDownloader {
    endpoint: String,
    connect_timeout: Duration,
}

impl HuggingFaceDownloader {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Uses `HF_ENDPOINT` when set.
    pub fn from_env() -> Self {
        let endpoint = std::env::var(ENV_HF_ENDPOINT)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        Self::new(endpoint)
    }

    pub fn resolve_url(&self, repo_id: &str, filename: &str, revision: &str) -> String {
        format!("{}/{repo_id}/resolve/{revision}/{filename}", self.endpoint)
    }
}

impl Downloader for HuggingFaceDownloader {
    fn fetch(
        &self,
        request: &FetchRequest<'_>,
        progress: &mut dyn ProgressSink,
    ) -> Result<PathBuf, FetchError> {
        let AssetSource::HuggingFace {
            repo_id,
            filename,
            revision,
        } = &request.config.source
        else {
            return Err(FetchError::Unsupported(format!(
                "hf downloader cannot fetch {}",
                request.config.source
            )));
        };

        let relative = Path::new(filename);
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            return Err(FetchError::Unsupported(format!(
                "hf filename {filename:?} must be a relative path inside the repository"
            )));
        }

        let revision = revision.as_deref().unwrap_or(DEFAULT_HF_REVISION);
        let url = self.resolve_url(repo_id, filename, revision);
        let client = build_client(self.connect_timeout)?;
        let mut builder = client.get(&url);
        if let Some(Credential::HuggingFace { token }) = request.credential {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send()?;
        let status = response.status();
        if !status.is_success() {
            let status = status.as_u16();
            // Gated, private or missing files will not appear on retry.
            return Err(if matches!(status, 401 | 403 | 404) {
                FetchError::Denied { status, url }
            } else {
                FetchError::Status { status, url }
            });
        }

        let target = request.destination.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| FetchError::io(format!("create {}", parent.display()), err))?;
        }

        let total = response.content_length();
        let mut silent = SilentProgress;
        let sink: &mut dyn ProgressSink = if request.config.progress_report {
            progress
        } else {
            &mut silent
        };
        let written = stream_to_file(
            response,
            total,
            &target,
            request.config.progress_interval_bytes(),
            sink,
        )?;
        debug!("downloaded {written} bytes from {url}");
        Ok(target)
    }
}
