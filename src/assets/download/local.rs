use std::{
    fs, io,
    path::{Path, PathBuf},
};

use super::{Downloader, FetchError, FetchRequest};
use crate::assets::{config::AssetSource, progress::ProgressSink};

/// Copies a file or directory from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDownloader;

impl Downloader for LocalDownloader {
    fn fetch(
        &self,
        request: &FetchRequest<'_>,
        progress: &mut dyn ProgressSink,
    ) -> Result<PathBuf, FetchError> {
        let AssetSource::Local { path } = &request.config.source else {
            return Err(FetchError::Unsupported(format!(
                "local downloader cannot fetch {}",
                request.config.source
            )));
        };

        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(FetchError::Missing(path.clone()));
            }
            Err(err) => return Err(FetchError::io(format!("stat {}", path.display()), err)),
        };
        let name = path.file_name().ok_or_else(|| {
            FetchError::Unsupported(format!("local path {} has no file name", path.display()))
        })?;
        let target = request.destination.join(name);

        if metadata.is_dir() {
            copy_dir(path, &target)?;
        } else {
            progress.begin(Some(metadata.len()));
            let copied = fs::copy(path, &target).map_err(|err| {
                FetchError::io(
                    format!("copy {} to {}", path.display(), target.display()),
                    err,
                )
            })?;
            progress.finish(copied);
        }
        Ok(target)
    }
}

fn copy_dir(from: &Path, to: &Path) -> Result<(), FetchError> {
    fs::create_dir_all(to).map_err(|err| FetchError::io(format!("create {}", to.display()), err))?;
    let entries =
        fs::read_dir(from).map_err(|err| FetchError::io(format!("read {}", from.display()), err))?;
    for entry in entries {
        let entry = entry.map_err(|err| FetchError::io(format!("read {}", from.display()), err))?;
        let source = entry.path();
        let target = to.join(entry.file_name());
        if source.is_dir() {
            copy_dir(&source, &target)?;
        } else {
            fs::copy(&source, &target).map_err(|err| {
                FetchError::io(format!("copy {}", source.display()), err)
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{config::AssetConfig, progress::SilentProgress};

    fn local(path: PathBuf) -> AssetConfig {
        AssetConfig::new("index", AssetSource::Local { path })
    }

    #[test]
    fn copies_single_file() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let file = src.path().join("index.bin");
        fs::write(&file, b"index").unwrap();

        let config = local(file.clone());
        let request = FetchRequest {
            config: &config,
            destination: dst.path(),
            credential: None,
        };
        let path = LocalDownloader.fetch(&request, &mut SilentProgress).unwrap();
        assert_eq!(path, dst.path().join("index.bin"));
        assert_eq!(fs::read(path).unwrap(), b"index");
        assert!(file.exists());
    }

    #[test]
    fn copies_directory_tree() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let bundle = src.path().join("templates");
        fs::create_dir_all(bundle.join("nested")).unwrap();
        fs::write(bundle.join("a.txt"), b"a").unwrap();
        fs::write(bundle.join("nested/b.txt"), b"b").unwrap();

        let config = local(bundle);
        let request = FetchRequest {
            config: &config,
            destination: dst.path(),
            credential: None,
        };
        let path = LocalDownloader.fetch(&request, &mut SilentProgress).unwrap();
        assert_eq!(fs::read(path.join("nested/b.txt")).unwrap(), b"b");
    }

    #[test]
    fn missing_source_is_terminal() {
        let dst = tempfile::tempdir().unwrap();
        let config = local(dst.path().join("absent.bin"));
        let request = FetchRequest {
            config: &config,
            destination: dst.path(),
            credential: None,
        };
        let err = LocalDownloader
            .fetch(&request, &mut SilentProgress)
            .unwrap_err();
        assert!(matches!(err, FetchError::Missing(_)));
        assert!(!err.is_retryable());
    }
}
