use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error(
        "archive is too large ({:.2} MiB); archives larger than {:.0} MiB are rejected",
        mib(.size),
        mib(.limit)
    )]
    TooLarge { size: u64, limit: u64 },

    #[error("{} was not found", .0.display())]
    NotFound(PathBuf),

    #[error("{} is not a gzip-compressed tar file", .0.display())]
    NotGzip(PathBuf),

    #[error("{} is corrupt: {message}", .path.display())]
    Corrupt { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn mib(bytes: &u64) -> f64 {
    *bytes as f64 / (1024.0 * 1024.0)
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;
