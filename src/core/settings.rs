use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::assets::{config::AssetConfig, AssetResult};

pub const DEFAULT_PROJECT_FILE: &str = "openmas_project.toml";
const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 300;

/// Project file contents relevant to asset management.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
    pub assets: Vec<AssetConfig>,
    pub settings: ProjectSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSettings {
    pub assets: AssetSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetSettings {
    pub cache_dir: Option<PathBuf>,
    pub lock_timeout_seconds: u64,
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            cache_dir: None,
            lock_timeout_seconds: DEFAULT_LOCK_TIMEOUT_SECS,
        }
    }
}

impl AssetSettings {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Toml,
    Json,
}

impl ProjectConfig {
    /// Reads a TOML or JSON (by extension) project file. Relative paths are
    /// taken relative to the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed reading project file {path:?}"))?;
        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Toml,
        };
        let base = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self::parse(&raw, format, base).with_context(|| format!("invalid project file {path:?}"))
    }

    fn parse(raw: &str, format: Format, base: &Path) -> Result<Self> {
        let parsed: ProjectConfig = match format {
            Format::Toml => toml::from_str(raw).context("project toml could not be parsed")?,
            Format::Json => serde_json::from_str(raw).context("project json could not be parsed")?,
        };
        let config = parsed.with_base_dir(base);
        config.validate()?;
        Ok(config)
    }

    fn with_base_dir(mut self, base: &Path) -> Self {
        if let Some(dir) = &self.settings.assets.cache_dir {
            if dir.is_relative() {
                self.settings.assets.cache_dir = Some(base.join(dir));
            }
        }
        self.assets = self
            .assets
            .into_iter()
            .map(|asset| asset.with_base_dir(base))
            .collect();
        self
    }

    pub fn validate(&self) -> AssetResult<()> {
        let mut seen = HashSet::new();
        for asset in &self.assets {
            asset.validate()?;
            if !seen.insert(asset.name.as_str()) {
                return Err(asset.invalid("declared more than once"));
            }
        }
        Ok(())
    }
}
