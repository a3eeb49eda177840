//! Snapshot sources: where the exported files come from.

mod local;
mod parquet;
mod s3;

pub use local::LocalSource;
pub use parquet::{ParquetRowReader, RowTransformer};
pub use s3::S3Source;

use std::path::PathBuf;

use crate::error::Result;

/// A file to be processed - may be temporary.
#[derive(Debug, Clone, Default)]
pub struct FileInfo {
    /// Path relative to the source root; used for addressing remote files.
    pub relative_path: PathBuf,
    /// Absolute path of the local file (downloaded first when remote).
    pub local_path: PathBuf,
    /// File size in bytes.
    pub size: u64,
    /// Whether the file is a temporary download that must be removed.
    pub temp: bool,
}

/// An exported snapshot, on the local filesystem or in an object store.
pub trait Source: Send + Sync {
    /// Name of the snapshot (the export task identifier); folder and file
    /// names inside the export use it actively.
    fn snapshot_name(&self) -> &str;

    /// Resolve a relative path to a local file, downloading it first if the
    /// source is remote.
    fn get_file(&self, relative_path: &str) -> Result<FileInfo>;

    /// Release a file returned by [`Source::get_file`]; removes temporary
    /// downloads and does nothing for local files.
    fn dispose(&self, file: FileInfo);

    /// List entries directly under `relative_path` matching `mask` (a simple
    /// pattern with at most one `*`). With `folders_only`, only directories.
    fn list_files(&self, relative_path: &str, mask: &str, folders_only: bool)
        -> Result<Vec<String>>;

    /// List all file paths under `relative_path`, recursively.
    fn list_files_recursively(&self, relative_path: &str) -> Result<Vec<String>>;
}

/// Split a file mask into prefix and suffix around the single `*`.
pub(crate) fn split_mask(mask: &str) -> (&str, &str) {
    match mask.split_once('*') {
        Some((prefix, suffix)) => (prefix, suffix),
        None => (mask, ""),
    }
}
