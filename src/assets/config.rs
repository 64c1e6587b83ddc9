use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use super::{checksum, AssetError, AssetResult};

pub const DEFAULT_VERSION: &str = "latest";
pub const DEFAULT_ASSET_TYPE: &str = "model";
pub const DEFAULT_HF_TOKEN_ENV: &str = "HUGGING_FACE_HUB_TOKEN";
pub const DEFAULT_HF_REVISION: &str = "main";
const DEFAULT_HTTP_SCHEME: &str = "Bearer";
const DEFAULT_HTTP_HEADER: &str = "Authorization";

/// Declarative description of one asset, as written in the project file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetConfig {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_asset_type")]
    pub asset_type: String,
    pub source: AssetSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default)]
    pub unpack: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unpack_format: Option<UnpackFormat>,
    #[serde(default)]
    pub unpack_destination_is_file: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<AuthConfig>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: f64,
    #[serde(default = "default_true")]
    pub progress_report: bool,
    #[serde(default = "default_progress_interval")]
    pub progress_report_interval_mb: f64,
}

impl AssetConfig {
    /// A config with every optional field at its default.
    pub fn new(name: impl Into<String>, source: AssetSource) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            asset_type: default_asset_type(),
            source,
            checksum: None,
            unpack: false,
            unpack_format: None,
            unpack_destination_is_file: false,
            authentication: None,
            retries: 0,
            retry_delay_seconds: default_retry_delay(),
            progress_report: true,
            progress_report_interval_mb: default_progress_interval(),
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_seconds.max(0.0))
    }

    pub fn progress_interval_bytes(&self) -> u64 {
        (self.progress_report_interval_mb * 1024.0 * 1024.0).max(1.0) as u64
    }

    /// Rejects records the rest of the subsystem cannot act on.
    pub fn validate(&self) -> AssetResult<()> {
        for (field, value) in [
            ("name", &self.name),
            ("version", &self.version),
            ("asset_type", &self.asset_type),
        ] {
            check_path_segment(field, value).map_err(|reason| self.invalid(reason))?;
        }

        if let Some(expected) = &self.checksum {
            checksum::parse_expected(expected).map_err(|reason| self.invalid(reason))?;
        }

        if self.unpack && self.unpack_format.is_none() {
            return Err(self.invalid("unpack is enabled but unpack_format is missing"));
        }
        if self.unpack_destination_is_file && !self.unpack {
            return Err(self.invalid("unpack_destination_is_file requires unpack"));
        }

        if !self.retry_delay_seconds.is_finite() || self.retry_delay_seconds < 0.0 {
            return Err(self.invalid("retry_delay_seconds must be a non-negative number"));
        }
        if !self.progress_report_interval_mb.is_finite() || self.progress_report_interval_mb <= 0.0
        {
            return Err(self.invalid("progress_report_interval_mb must be positive"));
        }

        match &self.source {
            AssetSource::Http { url } => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(self.invalid(format!("unsupported url {url:?}")));
                }
                if let Some(auth) = &self.authentication {
                    if auth.http.is_none() {
                        return Err(self.invalid(
                            "authentication for an http source needs an `http` section",
                        ));
                    }
                }
            }
            AssetSource::HuggingFace {
                repo_id, filename, ..
            } => {
                if repo_id.is_empty() || filename.is_empty() {
                    return Err(self.invalid("hf sources need both repo_id and filename"));
                }
            }
            AssetSource::Local { path } => {
                if path.as_os_str().is_empty() {
                    return Err(self.invalid("local sources need a path"));
                }
            }
        }

        Ok(())
    }

    /// Resolves a relative local source path against `base`.
    pub fn with_base_dir(mut self, base: &Path) -> Self {
        if let AssetSource::Local { path } = &mut self.source {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }

    pub(crate) fn invalid(&self, reason: impl Into<String>) -> AssetError {
        AssetError::InvalidConfiguration {
            name: self.name.clone(),
            version: self.version.clone(),
            origin: self.source.to_string(),
            reason: reason.into(),
        }
    }
}

fn check_path_segment(field: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    if value.starts_with('.') {
        return Err(format!("{field} {value:?} must not start with '.'"));
    }
    if value.contains(['/', '\\', ':']) || value.chars().any(char::is_control) {
        return Err(format!("{field} {value:?} is not usable as a path segment"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssetSource {
    Http {
        url: String,
    },
    #[serde(rename = "hf", alias = "huggingface")]
    HuggingFace {
        repo_id: String,
        filename: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revision: Option<String>,
    },
    Local {
        path: PathBuf,
    },
}

impl AssetSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            AssetSource::Http { .. } => SourceKind::Http,
            AssetSource::HuggingFace { .. } => SourceKind::HuggingFace,
            AssetSource::Local { .. } => SourceKind::Local,
        }
    }
}

impl fmt::Display for AssetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetSource::Http { url } => write!(f, "http({url})"),
            AssetSource::HuggingFace {
                repo_id,
                filename,
                revision,
            } => write!(
                f,
                "hf({repo_id}/{filename}@{})",
                revision.as_deref().unwrap_or(DEFAULT_HF_REVISION)
            ),
            AssetSource::Local { path } => write!(f, "local({})", path.display()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Http,
    #[serde(rename = "hf")]
    HuggingFace,
    Local,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceKind::Http => "http",
            SourceKind::HuggingFace => "hf",
            SourceKind::Local => "local",
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UnpackFormat {
    #[serde(rename = "zip")]
    Zip,
    #[serde(rename = "tar")]
    Tar,
    #[serde(rename = "tar.gz")]
    TarGz,
    #[serde(rename = "tar.bz2")]
    TarBz2,
}

impl UnpackFormat {
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            UnpackFormat::Zip => "zip",
            UnpackFormat::Tar => "tar",
            UnpackFormat::TarGz => "tar.gz",
            UnpackFormat::TarBz2 => "tar.bz2",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthConfig {
    #[serde(default)]
    pub strategy: AuthStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hf: Option<HfAuthConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpAuthConfig>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthStrategy {
    #[default]
    EnvToken,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HfAuthConfig {
    #[serde(default = "default_hf_token_env")]
    pub token_env_var: String,
}

impl Default for HfAuthConfig {
    fn default() -> Self {
        Self {
            token_env_var: default_hf_token_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpAuthConfig {
    pub token_env_var: String,
    #[serde(default = "default_http_scheme")]
    pub scheme: String,
    #[serde(default = "default_http_header")]
    pub header_name: String,
}

impl HttpAuthConfig {
    pub fn new(token_env_var: impl Into<String>) -> Self {
        Self {
            token_env_var: token_env_var.into(),
            scheme: default_http_scheme(),
            header_name: default_http_header(),
        }
    }
}

fn default_version() -> String {
    DEFAULT_VERSION.into()
}

fn default_asset_type() -> String {
    DEFAULT_ASSET_TYPE.into()
}

fn default_retry_delay() -> f64 {
    5.0
}

fn default_true() -> bool {
    true
}

fn default_progress_interval() -> f64 {
    5.0
}

fn default_hf_token_env() -> String {
    DEFAULT_HF_TOKEN_ENV.into()
}

fn default_http_scheme() -> String {
    DEFAULT_HTTP_SCHEME.into()
}

fn default_http_header() -> String {
    DEFAULT_HTTP_HEADER.into()
}
