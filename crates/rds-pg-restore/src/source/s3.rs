//! Remote object-store snapshot source.
//!
//! The seam exists so the orchestrator can run against a bucket export, but
//! the transport itself is not implemented: every operation reports a
//! configuration error.

use crate::error::{Result, RestoreError};

use super::{FileInfo, Source};

/// An AWS RDS database export living in an S3 bucket. Stub.
pub struct S3Source {
    snapshot_name: String,
    #[allow(dead_code)]
    bucket_path: String,
}

impl S3Source {
    pub fn new(bucket_path: impl Into<String>) -> Self {
        let bucket_path = bucket_path.into();
        let snapshot_name = bucket_path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        S3Source {
            snapshot_name,
            bucket_path,
        }
    }

    fn unimplemented<T>(&self) -> Result<T> {
        Err(RestoreError::Config(
            "the remote object store source is not implemented yet; use a local directory"
                .to_string(),
        ))
    }
}

impl Source for S3Source {
    fn snapshot_name(&self) -> &str {
        &self.snapshot_name
    }

    fn get_file(&self, _relative_path: &str) -> Result<FileInfo> {
        self.unimplemented()
    }

    fn dispose(&self, _file: FileInfo) {}

    fn list_files(
        &self,
        _relative_path: &str,
        _mask: &str,
        _folders_only: bool,
    ) -> Result<Vec<String>> {
        self.unimplemented()
    }

    fn list_files_recursively(&self, _relative_path: &str) -> Result<Vec<String>> {
        self.unimplemented()
    }
}
