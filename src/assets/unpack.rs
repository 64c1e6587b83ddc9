use std::{
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
};

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use tar::Archive;
use thiserror::Error;
use zip::read::ZipArchive;

use super::config::UnpackFormat;

#[derive(Debug, Error)]
pub enum UnpackError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("archive entry {0:?} escapes the extraction directory")]
    UnsafeEntry(String),
    #[error("extraction directory {} already exists", .0.display())]
    DestinationExists(PathBuf),
    #[error("expected exactly one file in the archive, found {0}")]
    NotSingleFile(usize),
}

fn io_err(context: impl Into<String>) -> impl FnOnce(io::Error) -> UnpackError {
    let context = context.into();
    move |source| UnpackError::Io { context, source }
}

/// Extracts `archive` into `destination`, which must not exist yet, and
/// returns every regular file that ended up inside it, sorted.
pub fn unpack(
    archive: &Path,
    format: UnpackFormat,
    destination: &Path,
) -> Result<Vec<PathBuf>, UnpackError> {
    if destination.exists() {
        return Err(UnpackError::DestinationExists(destination.to_path_buf()));
    }
    fs::create_dir_all(destination).map_err(io_err("create extraction directory"))?;

    let file = File::open(archive).map_err(io_err(format!("open archive {}", archive.display())))?;
    match format {
        UnpackFormat::Zip => extract_zip(file, destination)?,
        UnpackFormat::Tar => extract_tar(file, destination)?,
        UnpackFormat::TarGz => extract_tar(GzDecoder::new(file), destination)?,
        UnpackFormat::TarBz2 => extract_tar(BzDecoder::new(file), destination)?,
    }

    let mut files = Vec::new();
    collect_files(destination, &mut files).map_err(io_err("list extracted files"))?;
    files.sort();
    Ok(files)
}

/// The only file of an extraction, for single-file assets.
pub fn single_file(files: &[PathBuf]) -> Result<&Path, UnpackError> {
    match files {
        [only] => Ok(only.as_path()),
        _ => Err(UnpackError::NotSingleFile(files.len())),
    }
}

fn extract_tar<R: Read>(reader: R, destination: &Path) -> Result<(), UnpackError> {
    let mut archive = Archive::new(reader);
    for entry in archive.entries().map_err(io_err("iterate tar entries"))? {
        let mut entry = entry.map_err(io_err("read tar entry"))?;
        let path = entry
            .path()
            .map_err(io_err("read tar entry path"))?
            .into_owned();
        let unpacked = entry
            .unpack_in(destination)
            .map_err(io_err(format!("unpack tar entry {}", path.display())))?;
        if !unpacked {
            return Err(UnpackError::UnsafeEntry(path.display().to_string()));
        }
    }
    Ok(())
}

fn extract_zip(file: File, destination: &Path) -> Result<(), UnpackError> {
    let mut archive = ZipArchive::new(file)?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| UnpackError::UnsafeEntry(entry.name().to_string()))?;
        let dest = destination.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&dest).map_err(io_err("create zip dir"))?;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(io_err("create zip file parent"))?;
            }
            let mut outfile = File::create(&dest)
                .map_err(io_err(format!("create {}", dest.display())))?;
            io::copy(&mut entry, &mut outfile)
                .map_err(io_err(format!("write {}", dest.display())))?;
        }
    }
    Ok(())
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(&entry.path(), files)?;
        } else if file_type.is_file() {
            files.push(entry.path());
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Write;

    use flate2::{write::GzEncoder, Compression};
    use zip::write::{FileOptions, ZipWriter};

    use super::*;

    pub(crate) fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut writer = ZipWriter::new(File::create(path).unwrap());
        for (name, data) in entries {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    fn append_entries<W: Write>(builder: &mut tar::Builder<W>, entries: &[(&str, &[u8])]) {
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
    }

    pub(crate) fn write_tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
        let encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        append_entries(&mut builder, entries);
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn write_tar_bz2(path: &Path, entries: &[(&str, &[u8])]) {
        let encoder =
            bzip2::write::BzEncoder::new(File::create(path).unwrap(), bzip2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        append_entries(&mut builder, entries);
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn write_tar(path: &Path, entries: &[(&str, &[u8])]) {
        let mut builder = tar::Builder::new(File::create(path).unwrap());
        append_entries(&mut builder, entries);
        builder.finish().unwrap();
    }

    #[test]
    fn extracts_every_supported_format() {
        let dir = tempfile::tempdir().unwrap();
        let entries: &[(&str, &[u8])] = &[("model/weights.bin", b"weights"), ("README", b"hi")];

        let cases: [(UnpackFormat, fn(&Path, &[(&str, &[u8])])); 4] = [
            (UnpackFormat::Zip, write_zip),
            (UnpackFormat::Tar, write_tar),
            (UnpackFormat::TarGz, write_tar_gz),
            (UnpackFormat::TarBz2, write_tar_bz2),
        ];
        for (format, write) in cases {
            let archive = dir.path().join(format!("bundle.{}", format.extension()));
            write(&archive, entries);
            let dest = dir.path().join(format!("out-{}", format.extension()));

            let files = unpack(&archive, format, &dest).unwrap();
            assert_eq!(
                files,
                vec![dest.join("README"), dest.join("model/weights.bin")],
                "{format:?}"
            );
            assert_eq!(fs::read(dest.join("model/weights.bin")).unwrap(), b"weights");
        }
    }

    #[test]
    fn refuses_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bundle.zip");
        write_zip(&archive, &[("a.txt", b"a")]);
        let err = unpack(&archive, UnpackFormat::Zip, dir.path()).unwrap_err();
        assert!(matches!(err, UnpackError::DestinationExists(_)));
    }

    #[test]
    fn corrupt_archive_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bundle.tar.gz");
        fs::write(&archive, b"definitely not gzip").unwrap();
        assert!(unpack(&archive, UnpackFormat::TarGz, &dir.path().join("out")).is_err());
    }

    #[test]
    fn zip_entries_outside_destination_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        write_zip(&archive, &[("../evil.txt", b"x")]);
        let err = unpack(&archive, UnpackFormat::Zip, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, UnpackError::UnsafeEntry(_)));
        assert!(!dir.path().join("evil.txt").exists());
    }

    #[test]
    fn single_file_requires_exactly_one() {
        let one = vec![PathBuf::from("a")];
        assert_eq!(single_file(&one).unwrap(), Path::new("a"));
        let two = vec![PathBuf::from("a"), PathBuf::from("b")];
        assert!(matches!(single_file(&two), Err(UnpackError::NotSingleFile(2))));
        assert!(matches!(single_file(&[]), Err(UnpackError::NotSingleFile(0))));
    }
}
