//! Content verification and format-sniffing extraction of downloaded driver
//! artifacts.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use tokio::process::Command;

use crate::error::{DriverError, Result};
use crate::model::DRIVER_BINARY_PREFIX;

/// Archive format inferred from a filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Zip,
    Tar,
    Unknown,
}

/// Infers the archive format from the trailing extension tokens only:
/// `zip` is Zip, `tar` or `tar.<anything>` is Tar, no extension is None and
/// every other extension is Unknown.
pub fn detect_compression(filename: &str) -> Compression {
    let tokens: Vec<&str> = filename.split('.').collect();
    match tokens.as_slice() {
        [] | [_] => Compression::None,
        [.., "zip"] => Compression::Zip,
        [.., "tar"] => Compression::Tar,
        [_, .., "tar", _] => Compression::Tar,
        _ => Compression::Unknown,
    }
}

/// Hex MD5 digest of a file's contents.
pub fn compute_checksum(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Md5::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

pub fn checksum_bytes(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// Checks `path` against an expected hex digest. An empty expectation always
/// passes. Hashing runs on the blocking pool.
pub async fn verify_checksum(path: &Path, expected: &str, uri: &str) -> Result<()> {
    let expected = expected.trim();
    if expected.is_empty() {
        return Ok(());
    }

    let target = path.to_path_buf();
    let actual = tokio::task::spawn_blocking(move || compute_checksum(&target))
        .await
        .map_err(io::Error::other)??;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(DriverError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
            uri: uri.to_string(),
        });
    }
    Ok(())
}

/// Extracts `archive` into `dest` with the system `unzip`/`tar` tool and
/// returns the single driver executable it contained.
pub async fn extract(archive: &Path, compression: Compression, dest: &Path) -> Result<PathBuf> {
    let archive_name = archive.display().to_string();
    fs::create_dir_all(dest)?;

    let (tool, args): (&str, Vec<&OsStr>) = match compression {
        Compression::Zip => (
            "unzip",
            vec![
                OsStr::new("-o"),
                OsStr::new("-q"),
                archive.as_os_str(),
                OsStr::new("-d"),
                dest.as_os_str(),
            ],
        ),
        Compression::Tar => (
            "tar",
            vec![
                OsStr::new("-xf"),
                archive.as_os_str(),
                OsStr::new("-C"),
                dest.as_os_str(),
            ],
        ),
        Compression::None | Compression::Unknown => {
            return Err(DriverError::UnknownCompression(archive_name));
        }
    };

    let tool_path = find_tool(tool).ok_or_else(|| DriverError::ToolNotFound(tool.to_string()))?;
    tracing::debug!(tool = %tool_path.display(), archive = %archive_name, "Extracting driver archive");

    let output = Command::new(&tool_path)
        .args(&args)
        .output()
        .await
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => DriverError::ToolNotFound(tool.to_string()),
            _ => DriverError::Io(e),
        })?;

    if !output.status.success() {
        return Err(DriverError::ExtractionFailed {
            tool: tool.to_string(),
            archive: archive_name,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    locate_driver_binary(dest, &archive_name)
}

/// Finds the one file under `dir` whose name carries the driver prefix.
pub fn locate_driver_binary(dir: &Path, archive_name: &str) -> Result<PathBuf> {
    let mut candidates = Vec::new();
    collect_candidates(dir, &mut candidates)?;

    match candidates.len() {
        0 => Err(DriverError::ArtifactNotFound(archive_name.to_string())),
        1 => Ok(candidates.remove(0)),
        count => Err(DriverError::AmbiguousArtifact {
            archive: archive_name.to_string(),
            count,
        }),
    }
}

fn collect_candidates(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            collect_candidates(&path, out)?;
        } else if file_type.is_file()
            && entry
                .file_name()
                .to_string_lossy()
                .starts_with(DRIVER_BINARY_PREFIX)
        {
            out.push(path);
        }
    }
    Ok(())
}

/// Resolves an executable name against `$PATH`.
pub fn find_tool(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
