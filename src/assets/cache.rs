//! On-disk cache tree: `<root>/<asset_type>/<name>/<version>/` holding the
//! artifact and its `.asset_info.json` sidecar.
//!
//! Entries only ever appear through [`CacheStore::stage_and_publish`], which
//! builds the whole entry in a scratch directory under
//! `<root>/.staging/<asset_type>/<name>/<version>/` and renames it into place,
//! so readers see either the previous entry, nothing, or the finished new one.
//! Mutating calls expect the caller to hold the key's lock.

use std::{
    collections::BTreeSet,
    fs, io,
    path::{Component, Path, PathBuf},
};

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::{checksum, lock::LOCKS_DIR, AssetError, AssetResult};

pub const ENV_ASSETS_DIR: &str = "OPENMAS_ASSETS_DIR";
pub const INFO_FILE: &str = ".asset_info.json";
const STAGING_DIR: &str = ".staging";
const ENTRY_DIR: &str = "entry";
const SCRATCH_DIR: &str = "scratch";
const PREVIOUS_DIR: &str = "previous";

/// Contents of the metadata sidecar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetInfo {
    pub name: String,
    pub version: String,
    pub asset_type: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// SHA-256 of the fetched file (the archive, for unpacked assets).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// [`checksum::content_digest`] of the published artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_digest: Option<String>,
    pub size_bytes: u64,
    #[serde(default)]
    pub unpacked: bool,
    /// Artifact location relative to the entry directory.
    pub artifact: PathBuf,
    #[serde(with = "time::serde::rfc3339")]
    pub acquired_at: OffsetDateTime,
}

/// What a producer learned while filling a staging directory.
#[derive(Debug, Clone, Default)]
pub struct Acquisition {
    pub source: String,
    pub checksum: Option<String>,
    pub digest: Option<String>,
    pub unpacked: bool,
}

#[derive(Debug)]
pub struct StagedArtifact {
    /// Absolute path inside [`Staging::entry_dir`].
    pub artifact: PathBuf,
    pub acquisition: Acquisition,
}

/// Scratch space handed to a producer.
///
/// Everything under `entry_dir` is published; `scratch_dir` is thrown away.
#[derive(Debug)]
pub struct Staging {
    entry_dir: PathBuf,
    scratch_dir: PathBuf,
}

impl Staging {
    pub fn entry_dir(&self) -> &Path {
        &self.entry_dir
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }
}

/// `(asset_type, name, version)` of something found on disk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EntryKey {
    pub asset_type: String,
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join(LOCKS_DIR)
    }

    /// Canonical entry directory for a cache key. Does not touch the disk.
    pub fn resolve_path(&self, asset_type: &str, name: &str, version: &str) -> PathBuf {
        self.root.join(asset_type).join(name).join(version)
    }

    pub fn read_info(&self, entry: &Path) -> AssetResult<Option<AssetInfo>> {
        let path = entry.join(INFO_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(AssetError::io(format!("read {}", path.display()), err));
            }
        };
        let info = serde_json::from_slice(&bytes)
            .map_err(|source| AssetError::Metadata { path, source })?;
        Ok(Some(info))
    }

    /// Artifact path of a published entry, without any checksum check.
    pub fn cached_artifact(&self, entry: &Path) -> Option<PathBuf> {
        let info = self.readable_info(entry)?;
        let artifact = artifact_path(entry, &info)?;
        artifact.exists().then_some(artifact)
    }

    /// Artifact path if the entry is valid against `expected`.
    ///
    /// Plain files are re-digested against `expected`. Unpacked entries no
    /// longer hold the archive: their recorded archive digest must match
    /// `expected` and a fresh digest of the extracted content must match the
    /// one recorded at publish time.
    pub fn valid_artifact(&self, entry: &Path, expected: Option<&str>) -> Option<PathBuf> {
        let info = self.readable_info(entry)?;
        let artifact = artifact_path(entry, &info)?;
        if !artifact.exists() {
            return None;
        }
        let Some(expected) = expected else {
            return Some(artifact);
        };
        let expected_hex = checksum::parse_expected(expected).ok()?;

        let verified = if info.unpacked {
            info.digest.as_deref() == Some(expected_hex.as_str())
                && info.content_digest.is_some()
                && fresh_digest(&artifact, checksum::content_digest) == info.content_digest
        } else {
            fresh_digest(&artifact, checksum::digest).as_deref() == Some(expected_hex.as_str())
        };

        if verified {
            Some(artifact)
        } else {
            debug!("cached {} no longer matches {expected}", artifact.display());
            None
        }
    }

    pub fn is_valid(&self, entry: &Path, expected: Option<&str>) -> bool {
        self.valid_artifact(entry, expected).is_some()
    }

    /// Runs `producer` against a fresh staging directory and, only if it
    /// succeeds, atomically replaces the canonical entry with the result.
    /// Returns the published artifact path.
    ///
    /// Staging left behind for the same key by an interrupted run is removed
    /// first.
    pub fn stage_and_publish<F>(
        &self,
        asset_type: &str,
        name: &str,
        version: &str,
        producer: F,
    ) -> AssetResult<PathBuf>
    where
        F: FnOnce(&Staging) -> AssetResult<StagedArtifact>,
    {
        self.sweep_staging(asset_type, name, version)?;
        let temp = self.staging_temp(asset_type, name, version, "stage-")?;

        let staging = Staging {
            entry_dir: temp.path().join(ENTRY_DIR),
            scratch_dir: temp.path().join(SCRATCH_DIR),
        };
        for dir in [&staging.entry_dir, &staging.scratch_dir] {
            fs::create_dir_all(dir)
                .map_err(|err| AssetError::io(format!("create {}", dir.display()), err))?;
        }

        let staged = producer(&staging)?;

        let relative = staged
            .artifact
            .strip_prefix(&staging.entry_dir)
            .ok()
            .filter(|relative| {
                !relative.as_os_str().is_empty() && *relative != Path::new(INFO_FILE)
            })
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                AssetError::io(
                    "publish",
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!(
                            "staged artifact {} must be inside the staging entry and not its {INFO_FILE}",
                            staged.artifact.display()
                        ),
                    ),
                )
            })?;

        let content_digest = match (&staged.acquisition.digest, staged.acquisition.unpacked) {
            (Some(digest), false) => digest.clone(),
            _ => checksum::content_digest(&staged.artifact).map_err(|err| {
                AssetError::io(format!("digest {}", staged.artifact.display()), err)
            })?,
        };

        let info = AssetInfo {
            name: name.to_string(),
            version: version.to_string(),
            asset_type: asset_type.to_string(),
            source: staged.acquisition.source,
            checksum: staged.acquisition.checksum,
            digest: staged.acquisition.digest,
            content_digest: Some(content_digest),
            size_bytes: total_size(&staged.artifact),
            unpacked: staged.acquisition.unpacked,
            artifact: relative.clone(),
            acquired_at: OffsetDateTime::now_utc(),
        };
        let info_path = staging.entry_dir.join(INFO_FILE);
        let serialized = serde_json::to_vec_pretty(&info).map_err(|source| {
            AssetError::Metadata {
                path: info_path.clone(),
                source,
            }
        })?;
        fs::write(&info_path, serialized)
            .map_err(|err| AssetError::io(format!("write {}", info_path.display()), err))?;

        let entry = self.resolve_path(asset_type, name, version);
        if let Some(parent) = entry.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| AssetError::io(format!("create {}", parent.display()), err))?;
        }
        if entry.exists() {
            // Moved under the temp dir so it is deleted along with it.
            fs::rename(&entry, temp.path().join(PREVIOUS_DIR)).map_err(|err| {
                AssetError::io(format!("retire previous entry {}", entry.display()), err)
            })?;
        }
        fs::rename(&staging.entry_dir, &entry)
            .map_err(|err| AssetError::io(format!("publish {}", entry.display()), err))?;

        info!(
            asset = name,
            version,
            size_bytes = info.size_bytes,
            "published {}",
            entry.display()
        );
        Ok(entry.join(relative))
    }

    /// Removes one entry along with any staging left for its key. Returns
    /// whether a published entry was there.
    pub fn remove_entry(&self, asset_type: &str, name: &str, version: &str) -> AssetResult<bool> {
        self.sweep_staging(asset_type, name, version)?;
        let entry = self.resolve_path(asset_type, name, version);
        if !entry.exists() {
            return Ok(false);
        }
        let temp = self.staging_temp(asset_type, name, version, "remove-")?;
        fs::rename(&entry, temp.path().join(PREVIOUS_DIR))
            .map_err(|err| AssetError::io(format!("remove {}", entry.display()), err))?;
        temp.close()
            .map_err(|err| AssetError::io(format!("delete retired {}", entry.display()), err))?;
        info!(asset = name, version, "removed {}", entry.display());
        Ok(true)
    }

    /// Every key with a published entry or leftover staging, sorted.
    pub fn keys_on_disk(&self) -> AssetResult<Vec<EntryKey>> {
        let mut keys = BTreeSet::new();
        collect_keys(&self.root, &mut keys)?;
        collect_keys(&self.root.join(STAGING_DIR), &mut keys)?;
        Ok(keys.into_iter().collect())
    }

    /// Deletes whatever sits in the key's staging directory. Only sound while
    /// the key's lock is held, since a live producer would lose its files.
    pub fn sweep_staging(&self, asset_type: &str, name: &str, version: &str) -> AssetResult<usize> {
        let dir = self.staging_dir(asset_type, name, version);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(AssetError::io(format!("read {}", dir.display()), err)),
        };
        let mut removed = 0;
        for entry in entries {
            let path = entry
                .map_err(|err| AssetError::io(format!("read {}", dir.display()), err))?
                .path();
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            result.map_err(|err| AssetError::io(format!("remove {}", path.display()), err))?;
            removed += 1;
        }
        if removed > 0 {
            warn!(
                asset = name,
                version,
                "removed {removed} staging dir(s) left by an interrupted run"
            );
        }
        Ok(removed)
    }

    fn staging_dir(&self, asset_type: &str, name: &str, version: &str) -> PathBuf {
        self.root
            .join(STAGING_DIR)
            .join(asset_type)
            .join(name)
            .join(version)
    }

    fn staging_temp(
        &self,
        asset_type: &str,
        name: &str,
        version: &str,
        prefix: &str,
    ) -> AssetResult<tempfile::TempDir> {
        let dir = self.staging_dir(asset_type, name, version);
        fs::create_dir_all(&dir)
            .map_err(|err| AssetError::io(format!("create staging dir {}", dir.display()), err))?;
        tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(&dir)
            .map_err(|err| AssetError::io("create staging directory", err))
    }

    fn readable_info(&self, entry: &Path) -> Option<AssetInfo> {
        match self.read_info(entry) {
            Ok(info) => info,
            Err(err) => {
                warn!("ignoring unreadable cache entry {}: {err}", entry.display());
                None
            }
        }
    }
}

fn artifact_path(entry: &Path, info: &AssetInfo) -> Option<PathBuf> {
    let contained = info
        .artifact
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    (contained && !info.artifact.as_os_str().is_empty()).then(|| entry.join(&info.artifact))
}

fn fresh_digest(path: &Path, digest: fn(&Path) -> io::Result<String>) -> Option<String> {
    match digest(path) {
        Ok(actual) => Some(actual),
        Err(err) => {
            warn!("could not digest {}: {err}", path.display());
            None
        }
    }
}

fn collect_keys(base: &Path, keys: &mut BTreeSet<EntryKey>) -> AssetResult<()> {
    for asset_type in subdirs(base)? {
        let type_dir = base.join(&asset_type);
        for name in subdirs(&type_dir)? {
            for version in subdirs(&type_dir.join(&name))? {
                keys.insert(EntryKey {
                    asset_type: asset_type.clone(),
                    name: name.clone(),
                    version,
                });
            }
        }
    }
    Ok(())
}

/// Names of the non-hidden directories inside `dir`.
fn subdirs(dir: &Path) -> AssetResult<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(AssetError::io(format!("read {}", dir.display()), err)),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| AssetError::io(format!("read {}", dir.display()), err))?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if !name.starts_with('.') {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

fn total_size(path: &Path) -> u64 {
    if path.is_file() {
        return fs::metadata(path).map(|meta| meta.len()).unwrap_or(0);
    }
    let mut size = 0;
    if let Ok(entries) = fs::read_dir(path) {
        for entry in entries.flatten() {
            size += total_size(&entry.path());
        }
    }
    size
}

/// Cache root, by precedence: explicit override, `OPENMAS_ASSETS_DIR`,
/// project settings, then `~/.openmas/assets`.
pub fn resolve_cache_root(
    override_dir: Option<&Path>,
    settings_dir: Option<&Path>,
) -> AssetResult<PathBuf> {
    let from_env = std::env::var_os(ENV_ASSETS_DIR)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from);
    let home = BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf());
    pick_cache_root(override_dir, from_env, settings_dir, home)
}

fn pick_cache_root(
    override_dir: Option<&Path>,
    from_env: Option<PathBuf>,
    settings_dir: Option<&Path>,
    home: Option<PathBuf>,
) -> AssetResult<PathBuf> {
    if let Some(dir) = override_dir {
        return Ok(dir.to_path_buf());
    }
    if let Some(dir) = from_env {
        return Ok(dir);
    }
    if let Some(dir) = settings_dir {
        return Ok(dir.to_path_buf());
    }
    home.map(|home| home.join(".openmas").join("assets"))
        .ok_or_else(|| {
            AssetError::io(
                "resolve default asset cache directory",
                io::Error::new(io::ErrorKind::NotFound, "no home directory"),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn producer_writing(
        contents: &'static [u8],
    ) -> impl FnOnce(&Staging) -> AssetResult<StagedArtifact> {
        move |staging| {
            let artifact = staging.entry_dir().join("weights.bin");
            fs::write(&artifact, contents).unwrap();
            Ok(StagedArtifact {
                artifact,
                acquisition: Acquisition {
                    source: "local(/tmp/weights.bin)".into(),
                    digest: Some(checksum::digest(&staging.entry_dir().join("weights.bin")).unwrap()),
                    ..Acquisition::default()
                },
            })
        }
    }

    fn sha(contents: &[u8]) -> String {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, contents).unwrap();
        format!("sha256:{}", checksum::digest(&path).unwrap())
    }

    #[test]
    fn resolve_path_follows_type_name_version() {
        let store = CacheStore::new("/cache");
        assert_eq!(
            store.resolve_path("model", "weights", "1.0"),
            PathBuf::from("/cache/model/weights/1.0")
        );
        assert_eq!(store.locks_dir(), PathBuf::from("/cache/.locks"));
    }

    #[test]
    fn publish_writes_artifact_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());

        let path = store
            .stage_and_publish("model", "weights", "1.0", producer_writing(b"abc"))
            .unwrap();
        let entry = store.resolve_path("model", "weights", "1.0");
        assert_eq!(path, entry.join("weights.bin"));
        assert_eq!(fs::read(&path).unwrap(), b"abc");

        let info = store.read_info(&entry).unwrap().unwrap();
        assert_eq!(info.name, "weights");
        assert_eq!(info.size_bytes, 3);
        assert_eq!(info.artifact, PathBuf::from("weights.bin"));
        assert!(store.is_valid(&entry, None));
        assert!(store.is_valid(&entry, Some(&sha(b"abc"))));

        let leftovers: Vec<_> = fs::read_dir(store.staging_dir("model", "weights", "1.0"))
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn failing_producer_leaves_previous_entry_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        store
            .stage_and_publish("model", "weights", "1.0", producer_writing(b"old"))
            .unwrap();

        let err = store
            .stage_and_publish("model", "weights", "1.0", |staging| {
                fs::write(staging.entry_dir().join("weights.bin"), b"half").unwrap();
                Err(AssetError::io(
                    "simulated",
                    io::Error::new(io::ErrorKind::Other, "boom"),
                ))
            })
            .unwrap_err();
        assert!(err.to_string().contains("simulated"));

        let entry = store.resolve_path("model", "weights", "1.0");
        assert_eq!(fs::read(entry.join("weights.bin")).unwrap(), b"old");
        assert!(store.is_valid(&entry, Some(&sha(b"old"))));
        assert_eq!(
            fs::read_dir(store.staging_dir("model", "weights", "1.0"))
                .unwrap()
                .count(),
            0
        );
    }

    #[test]
    fn failing_producer_on_cold_key_publishes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let _ = store.stage_and_publish("model", "weights", "1.0", |_| {
            Err(AssetError::NotFound {
                name: "weights".into(),
            })
        });
        assert!(!store.resolve_path("model", "weights", "1.0").exists());
    }

    #[test]
    fn republish_replaces_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        store
            .stage_and_publish("model", "weights", "1.0", producer_writing(b"old"))
            .unwrap();
        let path = store
            .stage_and_publish("model", "weights", "1.0", producer_writing(b"new"))
            .unwrap();
        assert_eq!(fs::read(path).unwrap(), b"new");
    }

    #[test]
    fn corrupted_artifact_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let path = store
            .stage_and_publish("model", "weights", "1.0", producer_writing(b"abc"))
            .unwrap();
        let entry = store.resolve_path("model", "weights", "1.0");

        fs::write(&path, b"abd").unwrap();
        assert!(!store.is_valid(&entry, Some(&sha(b"abc"))));
        // Existence-only without a declared checksum.
        assert!(store.is_valid(&entry, None));

        fs::remove_file(&path).unwrap();
        assert!(!store.is_valid(&entry, None));
    }

    #[test]
    fn missing_entry_is_invalid_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let entry = store.resolve_path("model", "absent", "latest");
        assert!(!store.is_valid(&entry, None));
        assert!(store.read_info(&entry).unwrap().is_none());
    }

    #[test]
    fn sidecar_pointing_outside_entry_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        store
            .stage_and_publish("model", "weights", "1.0", producer_writing(b"abc"))
            .unwrap();
        let entry = store.resolve_path("model", "weights", "1.0");
        let mut info = store.read_info(&entry).unwrap().unwrap();
        info.artifact = PathBuf::from("../../../../etc/passwd");
        fs::write(entry.join(INFO_FILE), serde_json::to_vec(&info).unwrap()).unwrap();
        assert!(!store.is_valid(&entry, None));
    }

    #[test]
    fn remove_entry_retires_entry_and_staging() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        fs::create_dir_all(store.locks_dir()).unwrap();
        store
            .stage_and_publish("model", "weights", "1.0", producer_writing(b"abc"))
            .unwrap();
        let orphan = store.staging_dir("model", "weights", "1.0").join("stage-orphan");
        fs::create_dir_all(&orphan).unwrap();

        assert!(store.remove_entry("model", "weights", "1.0").unwrap());
        assert!(!store.remove_entry("model", "weights", "1.0").unwrap());
        assert!(!store.resolve_path("model", "weights", "1.0").exists());
        assert!(!orphan.exists());
        assert_eq!(
            fs::read_dir(store.staging_dir("model", "weights", "1.0"))
                .unwrap()
                .count(),
            0
        );
        assert!(store.locks_dir().exists());
    }

    #[test]
    fn interrupted_staging_is_swept_on_next_publish() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let orphan = store
            .staging_dir("model", "weights", "1.0")
            .join("stage-killed/scratch/download");
        fs::create_dir_all(&orphan).unwrap();
        fs::write(orphan.join("w.bin"), vec![0u8; 1024 * 1024]).unwrap();
        let unrelated = store.staging_dir("model", "other", "1.0").join("stage-live");
        fs::create_dir_all(&unrelated).unwrap();

        store
            .stage_and_publish("model", "weights", "1.0", producer_writing(b"abc"))
            .unwrap();

        assert!(!dir
            .path()
            .join(".staging/model/weights/1.0/stage-killed")
            .exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn keys_on_disk_cover_entries_and_staging() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        fs::create_dir_all(store.locks_dir()).unwrap();
        store
            .stage_and_publish("template", "prompt", "2", producer_writing(b"xyz"))
            .unwrap();
        fs::create_dir_all(store.staging_dir("model", "ghost", "1.0").join("stage-x")).unwrap();

        let keys = store.keys_on_disk().unwrap();
        let key = |asset_type: &str, name: &str, version: &str| EntryKey {
            asset_type: asset_type.into(),
            name: name.into(),
            version: version.into(),
        };
        assert_eq!(
            keys,
            vec![key("model", "ghost", "1.0"), key("template", "prompt", "2")]
        );
    }

    #[test]
    fn artifact_may_not_replace_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let err = store
            .stage_and_publish("model", "cfg", "1", |staging| {
                let artifact = staging.entry_dir().join(INFO_FILE);
                fs::write(&artifact, b"payload").unwrap();
                Ok(StagedArtifact {
                    artifact,
                    acquisition: Acquisition::default(),
                })
            })
            .unwrap_err();
        assert!(err.to_string().contains(INFO_FILE), "{err}");
        assert!(!store.resolve_path("model", "cfg", "1").exists());
    }

    #[test]
    fn unpacked_entry_is_revalidated_against_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let archive = sha(b"archive bytes");
        let path = store
            .stage_and_publish("model", "vad", "1", |staging| {
                let contents = staging.entry_dir().join("contents");
                fs::create_dir_all(contents.join("nested")).unwrap();
                fs::write(contents.join("model.onnx"), b"onnx").unwrap();
                fs::write(contents.join("nested/vocab.txt"), b"vocab").unwrap();
                Ok(StagedArtifact {
                    artifact: contents,
                    acquisition: Acquisition {
                        digest: Some(archive["sha256:".len()..].to_string()),
                        unpacked: true,
                        ..Acquisition::default()
                    },
                })
            })
            .unwrap();
        let entry = store.resolve_path("model", "vad", "1");
        assert!(store.is_valid(&entry, Some(&archive)));
        assert!(!store.is_valid(&entry, Some(&sha(b"another archive"))));

        fs::write(path.join("nested/vocab.txt"), b"tampered").unwrap();
        assert!(!store.is_valid(&entry, Some(&archive)));
    }

    #[test]
    fn cache_root_precedence() {
        let home = Some(PathBuf::from("/home/u"));
        let env = Some(PathBuf::from("/env"));
        let settings = Path::new("/settings");

        assert_eq!(
            pick_cache_root(Some(Path::new("/override")), env.clone(), Some(settings), home.clone())
                .unwrap(),
            PathBuf::from("/override")
        );
        assert_eq!(
            pick_cache_root(None, env, Some(settings), home.clone()).unwrap(),
            PathBuf::from("/env")
        );
        assert_eq!(
            pick_cache_root(None, None, Some(settings), home.clone()).unwrap(),
            PathBuf::from("/settings")
        );
        assert_eq!(
            pick_cache_root(None, None, None, home).unwrap(),
            PathBuf::from("/home/u/.openmas/assets")
        );
        assert!(pick_cache_root(None, None, None, None).is_err());
    }
}
