//! Local-directory snapshot source.

use std::path::{Path, PathBuf};

use tracing::error;

use crate::error::{Result, RestoreError};

use super::{split_mask, FileInfo, Source};

/// An AWS RDS database export unpacked into a local directory.
///
/// The directory's own name is the snapshot name; the export's folder and
/// file names are derived from it.
pub struct LocalSource {
    snapshot_name: String,
    local_dir: PathBuf,
}

impl LocalSource {
    /// Create a source over `local_dir`, which must be an existing directory.
    pub fn new(local_dir: impl AsRef<Path>) -> Result<Self> {
        let local_dir = local_dir.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&local_dir).map_err(|e| {
            RestoreError::Config(format!(
                "failed to access local directory '{}': {}",
                local_dir.display(),
                e
            ))
        })?;
        if !metadata.is_dir() {
            return Err(RestoreError::Config(format!(
                "'{}' is not a directory",
                local_dir.display()
            )));
        }

        let snapshot_name = local_dir
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();

        Ok(LocalSource {
            snapshot_name,
            local_dir,
        })
    }
}

impl Source for LocalSource {
    fn snapshot_name(&self) -> &str {
        &self.snapshot_name
    }

    fn get_file(&self, relative_path: &str) -> Result<FileInfo> {
        let full_path = self.local_dir.join(relative_path);
        let metadata = std::fs::metadata(&full_path).map_err(|e| {
            error!(path = %full_path.display(), "file does not exist");
            RestoreError::Io(e)
        })?;
        Ok(FileInfo {
            relative_path: PathBuf::from(relative_path),
            local_path: full_path,
            size: metadata.len(),
            temp: false,
        })
    }

    fn dispose(&self, file: FileInfo) {
        if file.temp {
            if let Err(e) = std::fs::remove_file(&file.local_path) {
                error!(path = %file.local_path.display(), error = %e, "failed to delete file");
            }
        }
    }

    fn list_files(
        &self,
        relative_path: &str,
        mask: &str,
        folders_only: bool,
    ) -> Result<Vec<String>> {
        let dir = self.get_file(relative_path)?;
        let entries = std::fs::read_dir(&dir.local_path)?;
        let (prefix, suffix) = split_mask(mask);

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(prefix) && name.ends_with(suffix) {
                if !folders_only || entry.file_type()?.is_dir() {
                    files.push(
                        dir.relative_path
                            .join(&name)
                            .to_string_lossy()
                            .into_owned(),
                    );
                }
            }
        }
        files.sort();
        Ok(files)
    }

    fn list_files_recursively(&self, relative_path: &str) -> Result<Vec<String>> {
        let dir = self.get_file(relative_path)?;
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir.local_path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let entry_path = dir.relative_path.join(&name).to_string_lossy().into_owned();
            if entry.file_type()?.is_dir() {
                files.extend(self.list_files_recursively(&entry_path)?);
            } else {
                files.push(entry_path);
            }
        }
        Ok(files)
    }
}
