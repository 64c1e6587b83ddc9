use std::{
    fs::{self, File},
    io::{self, BufReader, Read},
    path::{Path, PathBuf},
};

use sha2::{Digest, Sha256};

pub const SHA256_PREFIX: &str = "sha256:";

/// Lowercase hex SHA-256 of the file at `path`, read in fixed-size chunks.
pub fn digest(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Digest of a file, or for a directory, of its sorted `relative path, file
/// digest` listing. Any added, removed, renamed or modified file changes it.
pub fn content_digest(path: &Path) -> io::Result<String> {
    if !path.is_dir() {
        return digest(path);
    }
    let mut files = Vec::new();
    collect_relative(path, Path::new(""), &mut files)?;
    files.sort();

    let mut hasher = Sha256::new();
    for relative in files {
        let file_digest = digest(&path.join(&relative))?;
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(file_digest.as_bytes());
        hasher.update(b"\n");
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn collect_relative(root: &Path, relative: &Path, files: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(root.join(relative))? {
        let entry = entry?;
        let child = relative.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_relative(root, &child, files)?;
        } else if file_type.is_file() {
            files.push(child);
        }
    }
    Ok(())
}

/// Parses a declared `sha256:<hex>` value into its lowercase hex digest.
pub fn parse_expected(expected: &str) -> Result<String, String> {
    let hex = expected
        .strip_prefix(SHA256_PREFIX)
        .ok_or_else(|| format!("checksum {expected:?} must start with {SHA256_PREFIX:?}"))?;
    if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!(
            "checksum {expected:?} must carry 64 hexadecimal characters"
        ));
    }
    Ok(hex.to_ascii_lowercase())
}

pub fn verify(path: &Path, expected: &str) -> io::Result<bool> {
    let expected =
        parse_expected(expected).map_err(|msg| io::Error::new(io::ErrorKind::InvalidInput, msg))?;
    Ok(digest(path)? == expected)
}
