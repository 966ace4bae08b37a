//! Packaging of model-building code and unpacking of training output
//!
//! Code archives are gzip-compressed tar files. The training service rejects
//! archives above [`MAX_ARCHIVE_SIZE`], so the limit is enforced on the
//! compressed file before anything is submitted.

pub mod error;

pub use error::{ArchiveError, ArchiveResult};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Largest accepted compressed code archive
pub const MAX_ARCHIVE_SIZE: u64 = 4 * 1024 * 1024;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A packaged directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedArchive {
    pub path: PathBuf,
    /// Compressed size in bytes
    pub size: u64,
    /// Entry names, sorted
    pub entries: Vec<String>,
}

/// Builds size-limited `.tar.gz` archives from a directory
#[derive(Debug, Clone, Copy)]
pub struct ArchiveBuilder {
    limit: u64,
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self {
            limit: MAX_ARCHIVE_SIZE,
        }
    }
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: u64) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Package the content of `source_dir` into `archive_path`. Entry names
    /// are relative to `source_dir`. An archive over the limit is removed
    /// and reported.
    pub fn build(&self, source_dir: &Path, archive_path: &Path) -> ArchiveResult<PackagedArchive> {
        if !source_dir.is_dir() {
            return Err(ArchiveError::NotFound(source_dir.to_path_buf()));
        }
        if let Some(parent) = archive_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = File::create(archive_path)?;
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for entry in WalkDir::new(source_dir)
            .min_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(std::io::Error::from)?;
            let Ok(relative) = entry.path().strip_prefix(source_dir) else {
                continue;
            };
            if entry.file_type().is_dir() {
                builder.append_dir(relative, entry.path())?;
            } else if entry.file_type().is_file() {
                builder.append_path_with_name(entry.path(), relative)?;
            }
        }
        builder.into_inner()?.finish()?;

        let size = fs::metadata(archive_path)?.len();
        debug!("packaged {} into {} bytes", source_dir.display(), size);
        if size > self.limit {
            fs::remove_file(archive_path)?;
            return Err(ArchiveError::TooLarge {
                size,
                limit: self.limit,
            });
        }

        Ok(PackagedArchive {
            path: archive_path.to_path_buf(),
            size,
            entries: list_entries(archive_path)?,
        })
    }
}

/// Open a `.tar.gz` after checking the gzip signature
fn open_tar_gz(path: &Path) -> ArchiveResult<tar::Archive<GzDecoder<File>>> {
    if !path.is_file() {
        return Err(ArchiveError::NotFound(path.to_path_buf()));
    }
    let mut magic = [0u8; 2];
    let mut probe = File::open(path)?;
    if probe.read_exact(&mut magic).is_err() || magic != GZIP_MAGIC {
        return Err(ArchiveError::NotGzip(path.to_path_buf()));
    }
    Ok(tar::Archive::new(GzDecoder::new(File::open(path)?)))
}

fn corrupt(path: &Path, err: std::io::Error) -> ArchiveError {
    ArchiveError::Corrupt {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// Sorted entry names of a `.tar.gz`
pub fn list_entries(path: &Path) -> ArchiveResult<Vec<String>> {
    let mut archive = open_tar_gz(path)?;
    let mut names = Vec::new();
    for entry in archive.entries().map_err(|e| corrupt(path, e))? {
        let entry = entry.map_err(|e| corrupt(path, e))?;
        let name = entry.path().map_err(|e| corrupt(path, e))?;
        names.push(name.to_string_lossy().trim_end_matches('/').to_string());
    }
    names.sort();
    Ok(names)
}

/// Validate and unpack a `.tar.gz` into `target_dir`. Returns the entry
/// names.
pub fn extract(path: &Path, target_dir: &Path) -> ArchiveResult<Vec<String>> {
    // read the whole archive once before touching the target directory
    let entries = list_entries(path)?;
    fs::create_dir_all(target_dir)?;
    open_tar_gz(path)?
        .unpack(target_dir)
        .map_err(|e| corrupt(path, e))?;
    Ok(entries)
}

/// Recursively copy `source` into `target`, creating directories as needed.
/// Returns the number of files copied.
pub fn copy_dir(source: &Path, target: &Path) -> std::io::Result<usize> {
    if !source.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", source.display()),
        ));
    }

    let mut copied = 0;
    for entry in WalkDir::new(source) {
        let entry = entry?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&destination)?;
        } else {
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &destination)?;
            copied += 1;
        }
    }
    Ok(copied)
}
