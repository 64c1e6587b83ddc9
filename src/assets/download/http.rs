use std::{
    fs::File,
    io::{Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use reqwest::blocking::Client;
use tracing::debug;

use super::{Downloader, FetchError, FetchRequest};
use crate::assets::{
    auth::Credential,
    config::AssetSource,
    progress::{ProgressSink, ReportCadence},
};

const CHUNK_SIZE: usize = 32 * 1024;
const FALLBACK_FILENAME: &str = "download";

/// Plain HTTP(S) GET, streamed to disk.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    connect_timeout: Duration,
}

impl HttpDownloader {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl Downloader for HttpDownloader {
    fn fetch(
        &self,
        request: &FetchRequest<'_>,
        progress: &mut dyn ProgressSink,
    ) -> Result<PathBuf, FetchError> {
        let AssetSource::Http { url } = &request.config.source else {
            return Err(FetchError::Unsupported(format!(
                "http downloader cannot fetch {}",
                request.config.source
            )));
        };

        // Built per fetch so the blocking client never outlives the worker
        // thread it runs on.
        let client = build_client(self.connect_timeout)?;
        let mut builder = client.get(url);
        if let Some(Credential::Http {
            header_name,
            header_value,
        }) = request.credential
        {
            builder = builder.header(header_name.as_str(), header_value.as_str());
        }

        let response = builder.send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.clone(),
            });
        }

        let filename = filename_from_uri(url).unwrap_or_else(|| FALLBACK_FILENAME.to_string());
        let target = request.destination.join(filename);
        let total = response.content_length();
        let written = stream_to_file(
            response,
            total,
            &target,
            request.config.progress_interval_bytes(),
            progress,
        )?;
        debug!("downloaded {written} bytes from {url} to {}", target.display());
        Ok(target)
    }
}

pub(super) fn build_client(connect_timeout: Duration) -> Result<Client, FetchError> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .user_agent(concat!("openmas-assets/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|err| FetchError::Transport(format!("create http client: {err}")))
}

/// Copies `body` into `target`, reporting to `progress` every
/// `interval_bytes`. Read failures are transport errors (retryable).
pub(super) fn stream_to_file<R: Read>(
    mut body: R,
    total: Option<u64>,
    target: &Path,
    interval_bytes: u64,
    progress: &mut dyn ProgressSink,
) -> Result<u64, FetchError> {
    let mut file = File::create(target)
        .map_err(|err| FetchError::io(format!("create {}", target.display()), err))?;
    let mut cadence = ReportCadence::new(interval_bytes);
    let mut downloaded = 0u64;
    let mut buffer = vec![0u8; CHUNK_SIZE];

    progress.begin(total);
    loop {
        let read = body
            .read(&mut buffer)
            .map_err(|err| FetchError::Transport(format!("read response body: {err}")))?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read])
            .map_err(|err| FetchError::io(format!("write {}", target.display()), err))?;
        downloaded += read as u64;
        if cadence.due(downloaded) {
            progress.update(downloaded);
        }
    }
    file.flush()
        .map_err(|err| FetchError::io(format!("flush {}", target.display()), err))?;
    progress.finish(downloaded);

    if let Some(expected) = total {
        if downloaded != expected {
            return Err(FetchError::Transport(format!(
                "response ended after {downloaded} of {expected} bytes"
            )));
        }
    }
    Ok(downloaded)
}

fn filename_from_uri(uri: &str) -> Option<String> {
    let clean = uri.split(['?', '#']).next()?;
    let last_segment = clean.rsplit('/').next()?.trim();
    if last_segment.is_empty() || last_segment == "." || last_segment == ".." {
        None
    } else {
        Some(last_segment.to_string())
    }
}
