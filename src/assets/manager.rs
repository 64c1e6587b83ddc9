use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tracing::{debug, info};

use super::{
    auth::{self, Credential},
    cache::{resolve_cache_root, Acquisition, CacheStore, StagedArtifact, Staging, INFO_FILE},
    checksum,
    config::{AssetConfig, SourceKind},
    download::{fetch_with_retry, Downloader, Downloaders},
    lock::{AssetLock, LockManager},
    progress::progress_for,
    unpack::{self, UnpackError},
    AssetError, AssetResult,
};
use crate::core::settings::ProjectConfig;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(300);
const DOWNLOAD_DIR: &str = "download";
const UNPACK_DIR: &str = "contents";
const RENAMED_ARTIFACT_DIR: &str = "artifact";

/// Cache state of one declared asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetStatus {
    Missing,
    /// Present; checksum not looked at.
    Cached(PathBuf),
    Valid(PathBuf),
    Invalid(PathBuf),
}

/// Entry point for resolving declared assets to local paths.
///
/// Cheap to clone; clones share configuration and downloaders.
#[derive(Clone)]
pub struct AssetManager {
    inner: Arc<Inner>,
}

struct Inner {
    assets: BTreeMap<String, AssetConfig>,
    store: CacheStore,
    locks: LockManager,
    downloaders: Downloaders,
    lock_timeout: Duration,
}

pub struct AssetManagerBuilder {
    assets: Vec<AssetConfig>,
    cache_root: Option<PathBuf>,
    settings_cache_dir: Option<PathBuf>,
    lock_timeout: Duration,
    downloaders: Downloaders,
}

impl AssetManagerBuilder {
    /// Explicit cache root; wins over the environment and settings.
    pub fn cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = Some(root.into());
        self
    }

    /// Cache directory from project settings, used when neither an explicit
    /// root nor `OPENMAS_ASSETS_DIR` is given.
    pub fn settings_cache_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.settings_cache_dir = dir;
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn downloader(mut self, kind: SourceKind, downloader: Arc<dyn Downloader>) -> Self {
        self.downloaders.set(kind, downloader);
        self
    }

    pub fn build(self) -> AssetResult<AssetManager> {
        let mut assets = BTreeMap::new();
        for config in self.assets {
            config.validate()?;
            if assets.contains_key(&config.name) {
                return Err(config.invalid("declared more than once"));
            }
            assets.insert(config.name.clone(), config);
        }

        let root = resolve_cache_root(
            self.cache_root.as_deref(),
            self.settings_cache_dir.as_deref(),
        )?;
        let store = CacheStore::new(root);
        let locks = LockManager::new(store.locks_dir());
        debug!(
            "asset cache at {} with {} declared asset(s)",
            store.root().display(),
            assets.len()
        );

        Ok(AssetManager {
            inner: Arc::new(Inner {
                assets,
                store,
                locks,
                downloaders: self.downloaders,
                lock_timeout: self.lock_timeout,
            }),
        })
    }
}

impl AssetManager {
    pub fn builder(assets: impl IntoIterator<Item = AssetConfig>) -> AssetManagerBuilder {
        AssetManagerBuilder {
            assets: assets.into_iter().collect(),
            cache_root: None,
            settings_cache_dir: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            downloaders: Downloaders::standard(),
        }
    }

    pub fn from_project(
        project: &ProjectConfig,
        cache_dir_override: Option<&Path>,
    ) -> AssetResult<Self> {
        let mut builder = Self::builder(project.assets.iter().cloned())
            .settings_cache_dir(project.settings.assets.cache_dir.clone())
            .lock_timeout(project.settings.assets.lock_timeout());
        if let Some(dir) = cache_dir_override {
            builder = builder.cache_root(dir);
        }
        builder.build()
    }

    pub fn cache_root(&self) -> &Path {
        self.inner.store.root()
    }

    pub fn store(&self) -> &CacheStore {
        &self.inner.store
    }

    pub fn assets(&self) -> impl Iterator<Item = &AssetConfig> {
        self.inner.assets.values()
    }

    pub fn asset(&self, name: &str) -> AssetResult<&AssetConfig> {
        self.inner
            .assets
            .get(name)
            .ok_or_else(|| AssetError::NotFound {
                name: name.to_string(),
            })
    }

    /// Resolves `name` to a verified local path, downloading it first if the
    /// cache has no valid copy (or `force_download` is set).
    ///
    /// The work runs on the blocking pool; dropping the returned future lets
    /// an in-flight download finish or discard its staging directory but
    /// never publishes a partial entry.
    pub async fn get_asset_path(&self, name: &str, force_download: bool) -> AssetResult<PathBuf> {
        let manager = self.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || manager.get_asset_path_blocking(&name, force_download))
            .await
            .map_err(|err| {
                AssetError::io(
                    "asset acquisition task",
                    io::Error::new(io::ErrorKind::Other, err),
                )
            })?
    }

    pub fn get_asset_path_blocking(&self, name: &str, force_download: bool) -> AssetResult<PathBuf> {
        let config = self.asset(name)?;
        let store = &self.inner.store;
        let entry = store.resolve_path(&config.asset_type, &config.name, &config.version);
        let expected = config.checksum.as_deref();

        if !force_download {
            if let Some(path) = store.valid_artifact(&entry, expected) {
                debug!(asset = name, version = %config.version, "cache hit {}", path.display());
                return Ok(path);
            }
        }

        let _lock = self.lock(&config.name, &config.version)?;

        if !force_download {
            if let Some(path) = store.valid_artifact(&entry, expected) {
                debug!(
                    asset = name,
                    version = %config.version,
                    "cache filled while waiting for lock"
                );
                return Ok(path);
            }
        }

        let credential = match &config.authentication {
            Some(auth_config) => auth::resolve(auth_config, config.source.kind()).map_err(
                |err| AssetError::Authentication {
                    name: config.name.clone(),
                    version: config.version.clone(),
                    origin: config.source.to_string(),
                    reason: err.to_string(),
                },
            )?,
            None => None,
        };

        let downloader = self.inner.downloaders.for_kind(config.source.kind());
        info!(
            asset = name,
            version = %config.version,
            "acquiring from {}",
            config.source
        );
        store.stage_and_publish(&config.asset_type, &config.name, &config.version, |staging| {
            produce(config, downloader, credential.as_ref(), staging)
        })
    }

    pub fn status(&self, name: &str, verify_checksum: bool) -> AssetResult<AssetStatus> {
        let config = self.asset(name)?;
        let store = &self.inner.store;
        let entry = store.resolve_path(&config.asset_type, &config.name, &config.version);
        let Some(cached) = store.cached_artifact(&entry) else {
            return Ok(AssetStatus::Missing);
        };
        if !verify_checksum {
            return Ok(AssetStatus::Cached(cached));
        }
        Ok(match store.valid_artifact(&entry, config.checksum.as_deref()) {
            Some(path) => AssetStatus::Valid(path),
            None => AssetStatus::Invalid(cached),
        })
    }

    /// Removes the cached copy of `name`. Returns whether one existed.
    pub fn clear_asset(&self, name: &str) -> AssetResult<bool> {
        let config = self.asset(name)?;
        let _lock = self.lock(&config.name, &config.version)?;
        self.inner
            .store
            .remove_entry(&config.asset_type, &config.name, &config.version)
    }

    /// Removes every entry and leftover staging found on disk, declared or
    /// not, each under its own key lock. Returns how many entries were
    /// removed.
    pub fn clear_all(&self) -> AssetResult<usize> {
        let store = &self.inner.store;
        let mut removed = 0;
        for key in store.keys_on_disk()? {
            let _lock = self.lock(&key.name, &key.version)?;
            if store.remove_entry(&key.asset_type, &key.name, &key.version)? {
                removed += 1;
            }
        }
        info!("cleared {removed} cached asset(s) under {}", store.root().display());
        Ok(removed)
    }

    /// Takes the key lock, naming the declared source on timeout.
    fn lock(&self, name: &str, version: &str) -> AssetResult<AssetLock> {
        self.inner
            .locks
            .acquire(name, version, self.inner.lock_timeout)
            .map_err(|err| match err {
                AssetError::LockTimeout {
                    name,
                    version,
                    origin,
                    timeout,
                } => {
                    let origin = self
                        .inner
                        .assets
                        .get(&name)
                        .filter(|config| config.version == version)
                        .map_or(origin, |config| config.source.to_string());
                    AssetError::LockTimeout {
                        name,
                        version,
                        origin,
                        timeout,
                    }
                }
                other => other,
            })
    }
}

/// Fills `staging` for one asset: fetch with retries, verify, unpack.
fn produce(
    config: &AssetConfig,
    downloader: &dyn Downloader,
    credential: Option<&Credential>,
    staging: &Staging,
) -> AssetResult<StagedArtifact> {
    let download_dir = staging.scratch_dir().join(DOWNLOAD_DIR);
    let mut progress = progress_for(config);
    let fetched = fetch_with_retry(
        downloader,
        config,
        &download_dir,
        credential,
        progress.as_mut(),
    )?;
    if !fetched.starts_with(&download_dir) || !fetched.exists() {
        return Err(AssetError::io(
            "collect download",
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "downloader for {} reported {} outside its destination",
                    config.source,
                    fetched.display()
                ),
            ),
        ));
    }

    let digest = if fetched.is_file() {
        let actual = checksum::digest(&fetched)
            .map_err(|err| AssetError::io(format!("digest {}", fetched.display()), err))?;
        Some(actual)
    } else {
        None
    };

    if let Some(expected) = &config.checksum {
        let Some(actual) = &digest else {
            return Err(config.invalid("a checksum is declared but the source is a directory"));
        };
        let expected_hex = checksum::parse_expected(expected).map_err(|reason| config.invalid(reason))?;
        if *actual != expected_hex {
            return Err(AssetError::ChecksumMismatch {
                name: config.name.clone(),
                version: config.version.clone(),
                origin: config.source.to_string(),
                expected: expected.clone(),
                actual: actual.clone(),
            });
        }
        debug!(asset = %config.name, "checksum verified");
    }

    let acquisition = Acquisition {
        source: config.source.to_string(),
        checksum: config.checksum.clone(),
        digest,
        unpacked: config.unpack,
    };

    if config.unpack {
        let format = config
            .unpack_format
            .ok_or_else(|| config.invalid("unpack is enabled but unpack_format is missing"))?;
        let extracted = staging.entry_dir().join(UNPACK_DIR);
        let files =
            unpack::unpack(&fetched, format, &extracted).map_err(|err| unpack_failed(config, err))?;
        debug!(
            asset = %config.name,
            "unpacked {} file(s) from {}",
            files.len(),
            format.extension()
        );
        let artifact = if config.unpack_destination_is_file {
            unpack::single_file(&files)
                .map_err(|err| unpack_failed(config, err))?
                .to_path_buf()
        } else {
            extracted
        };
        return Ok(StagedArtifact {
            artifact,
            acquisition,
        });
    }

    let file_name = fetched
        .file_name()
        .ok_or_else(|| config.invalid("fetched artifact has no file name"))?;
    // Kept apart from the sidecar when it shares its name.
    let artifact = if file_name == INFO_FILE {
        let dir = staging.entry_dir().join(RENAMED_ARTIFACT_DIR);
        fs::create_dir_all(&dir)
            .map_err(|err| AssetError::io(format!("create {}", dir.display()), err))?;
        dir.join(file_name)
    } else {
        staging.entry_dir().join(file_name)
    };
    fs::rename(&fetched, &artifact).map_err(|err| {
        AssetError::io(format!("stage {}", artifact.display()), err)
    })?;
    Ok(StagedArtifact {
        artifact,
        acquisition,
    })
}

fn unpack_failed(config: &AssetConfig, err: UnpackError) -> AssetError {
    AssetError::Unpack {
        name: config.name.clone(),
        version: config.version.clone(),
        origin: config.source.to_string(),
        reason: err.to_string(),
    }
}
