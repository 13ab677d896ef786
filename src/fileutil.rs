//! Applying mount responses to the target directory
//!
//! The orchestrator talks to the filesystem through two small traits so the
//! CSI node layer can swap in its own writer (e.g. an atomic symlink-swap
//! writer) without touching the RPC logic. [`LocalFiles`] is the default
//! implementation of both.

use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::provider::join_paths;
use crate::v1alpha1::File;

/// Mode applied to payload files that do not specify one (rw-r--r--)
pub const DEFAULT_FILE_MODE: u32 = 0o644;
/// Mode for directories created under the target (rwxr-xr-x)
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Errors raised while validating, writing or removing payload files
#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("invalid payload path: {0:?}")]
    InvalidPath(String),

    #[error("duplicate payload path: {0:?}")]
    DuplicatePath(String),

    #[error("invalid mode {mode:#o} for {path:?}")]
    InvalidMode { path: String, mode: i32 },

    #[error("{path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PayloadError {
    fn io(path: &Path, source: io::Error) -> Self {
        PayloadError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Validates and persists file payloads returned by a provider.
pub trait PayloadWriter: Send + Sync {
    /// Check the whole payload set before anything is written.
    fn validate(&self, files: &[File]) -> Result<(), PayloadError>;

    /// Write every payload under `target`.
    fn write(&self, target: &Path, files: &[File]) -> Result<(), PayloadError>;
}

/// Deletes artifacts of objects that are no longer part of the mount.
pub trait StaleRemover: Send + Sync {
    /// Remove the artifacts for `stale_ids` under `target`.
    fn remove(&self, target: &Path, stale_ids: &[String]) -> Result<(), PayloadError>;
}

/// Plain filesystem implementation of [`PayloadWriter`] and [`StaleRemover`].
///
/// Each file is written to a hidden temporary sibling and renamed into
/// place, so readers see either the old or the new content.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFiles;

impl LocalFiles {
    pub fn new() -> Self {
        Self
    }

    fn write_one(&self, target: &Path, file: &File) -> Result<(), PayloadError> {
        let dest = target.join(&file.path);
        if let Some(parent) = dest.parent() {
            fs::DirBuilder::new()
                .recursive(true)
                .mode(DEFAULT_DIR_MODE)
                .create(parent)
                .map_err(|e| PayloadError::io(parent, e))?;
        }

        let file_name = dest
            .file_name()
            .ok_or_else(|| PayloadError::InvalidPath(file.path.clone()))?;
        let mut tmp_name = std::ffi::OsString::from(".");
        tmp_name.push(file_name);
        tmp_name.push(".tmp");
        let tmp = dest.with_file_name(tmp_name);

        if let Err(e) = write_and_rename(&tmp, &dest, file) {
            let _ = fs::remove_file(&tmp);
            return Err(PayloadError::io(&dest, e));
        }

        trace!("wrote payload {:?} ({} bytes)", dest, file.contents.len());
        Ok(())
    }
}

impl PayloadWriter for LocalFiles {
    fn validate(&self, files: &[File]) -> Result<(), PayloadError> {
        let mut seen = HashSet::with_capacity(files.len());
        for file in files {
            validate_path(&file.path)?;
            if !(0..=0o777).contains(&file.mode) {
                return Err(PayloadError::InvalidMode {
                    path: file.path.clone(),
                    mode: file.mode,
                });
            }
            if !seen.insert(file.path.as_str()) {
                return Err(PayloadError::DuplicatePath(file.path.clone()));
            }
        }
        Ok(())
    }

    fn write(&self, target: &Path, files: &[File]) -> Result<(), PayloadError> {
        for file in files {
            self.write_one(target, file)?;
        }
        debug!("wrote {} payload file(s) under {:?}", files.len(), target);
        Ok(())
    }
}

impl StaleRemover for LocalFiles {
    fn remove(&self, target: &Path, stale_ids: &[String]) -> Result<(), PayloadError> {
        let mut first_error = None;

        for id in stale_ids {
            let path = match join_paths(target, id) {
                Ok(path) => path,
                Err(e) => {
                    // Object ids are not always file names; nothing to remove.
                    trace!("skipping stale object {:?}: {}", id, e);
                    continue;
                }
            };

            match fs::remove_file(&path) {
                Ok(()) => debug!("removed stale file {:?}", path),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("failed to remove stale file {:?}: {}", path, e);
                    first_error.get_or_insert(PayloadError::io(&path, e));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Payload paths must stay inside the target: relative, non-empty, and made
/// only of normal components.
fn validate_path(path: &str) -> Result<(), PayloadError> {
    let p = Path::new(path);
    let valid = !path.is_empty()
        && p.components().all(|c| matches!(c, Component::Normal(_)))
        && p.components().next().is_some();
    if valid {
        Ok(())
    } else {
        Err(PayloadError::InvalidPath(path.to_string()))
    }
}

fn write_and_rename(tmp: &Path, dest: &Path, file: &File) -> io::Result<()> {
    let mut out = fs::File::create(tmp)?;
    out.write_all(&file.contents)?;
    out.sync_all()?;
    fs::set_permissions(tmp, fs::Permissions::from_mode(payload_mode(file.mode)))?;
    fs::rename(tmp, dest)
}

fn payload_mode(mode: i32) -> u32 {
    match mode {
        0 => DEFAULT_FILE_MODE,
        m => m as u32 & 0o777,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file(path: &str, contents: &str, mode: i32) -> File {
        File {
            path: path.to_string(),
            mode,
            contents: contents.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_validate_accepts_nested_relative_paths() {
        let files = vec![file("a", "1", 0o644), file("dir/b", "2", 0)];
        assert!(LocalFiles.validate(&files).is_ok());
    }

    #[test]
    fn test_validate_rejects_escaping_paths() {
        for path in ["", "/etc/passwd", "../x", "a/../../x", "./a"] {
            let err = LocalFiles.validate(&[file(path, "", 0)]).unwrap_err();
            assert!(matches!(err, PayloadError::InvalidPath(_)), "{path:?}: {err}");
        }
    }

    #[test]
    fn test_validate_rejects_duplicates_and_bad_modes() {
        let err = LocalFiles
            .validate(&[file("a", "1", 0), file("a", "2", 0)])
            .unwrap_err();
        assert!(matches!(err, PayloadError::DuplicatePath(_)));

        let err = LocalFiles.validate(&[file("a", "1", 0o1777)]).unwrap_err();
        assert!(matches!(err, PayloadError::InvalidMode { .. }));

        let err = LocalFiles.validate(&[file("a", "1", -1)]).unwrap_err();
        assert!(matches!(err, PayloadError::InvalidMode { .. }));
    }

    #[test]
    fn test_write_creates_files_with_modes() {
        let dir = TempDir::new().unwrap();
        let files = vec![file("token", "secret", 0o600), file("nested/cert", "pem", 0)];
        LocalFiles.write(dir.path(), &files).unwrap();

        let token = dir.path().join("token");
        assert_eq!(fs::read_to_string(&token).unwrap(), "secret");
        assert_eq!(fs::metadata(&token).unwrap().permissions().mode() & 0o777, 0o600);

        let cert = dir.path().join("nested/cert");
        assert_eq!(fs::read_to_string(&cert).unwrap(), "pem");
        assert_eq!(
            fs::metadata(&cert).unwrap().permissions().mode() & 0o777,
            DEFAULT_FILE_MODE
        );

        // no temporaries left behind
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn test_write_replaces_existing_content() {
        let dir = TempDir::new().unwrap();
        LocalFiles.write(dir.path(), &[file("a", "old", 0)]).unwrap();
        LocalFiles.write(dir.path(), &[file("a", "new", 0)]).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("a")).unwrap(), "new");
    }

    #[test]
    fn test_remove_deletes_stale_files_only() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("keep"), "k").unwrap();
        fs::write(dir.path().join("stale"), "s").unwrap();

        let ids = vec![
            "stale".to_string(),
            "already-gone".to_string(),
            "secret/with/slashes".to_string(),
        ];
        LocalFiles.remove(dir.path(), &ids).unwrap();

        assert!(dir.path().join("keep").exists());
        assert!(!dir.path().join("stale").exists());
    }

    #[test]
    fn test_remove_reports_failures() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("a-directory")).unwrap();

        let err = LocalFiles
            .remove(dir.path(), &["a-directory".to_string()])
            .unwrap_err();
        assert!(matches!(err, PayloadError::Io { .. }));
    }
}
