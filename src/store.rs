//! Local persistent storage for transferred files.
//!
//! [`FileStore`] is the only seam through which the engine touches a
//! filesystem. [`LocalStore`] serves a single flat directory: names are
//! validated as [`FileName`]s, so no call can reach outside the root.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::{Result, TransferError};

/// Name of a regular file directly inside the store root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileName(String);

impl FileName {
    /// Validate a caller-supplied name.
    ///
    /// Rejects empty names, `.`/`..`, and anything containing a path
    /// separator or NUL.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(TransferError::InvalidName("empty file name".to_string()));
        }
        if name == "." || name == ".." {
            return Err(TransferError::InvalidName(format!("'{name}' is not a file")));
        }
        if name.contains(['/', '\\', '\0']) {
            return Err(TransferError::InvalidName(format!(
                "'{name}' must not contain path separators"
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FileName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Storage backend for the transfer engine.
///
/// Handles are plain owned values: dropping one releases the underlying
/// resource, which is how a session releases its file on every exit path.
#[async_trait]
pub trait FileStore: Send + Sync + 'static {
    type Reader: AsyncRead + Unpin + Send + 'static;
    type Writer: AsyncWrite + Unpin + Send + 'static;

    /// Names of regular files in the store, sorted.
    async fn list(&self) -> Result<Vec<FileName>>;

    /// Open an existing file for reading.
    async fn open_read(&self, name: &FileName) -> Result<Self::Reader>;

    /// Create or truncate a file for writing.
    async fn open_write(&self, name: &FileName) -> Result<Self::Writer>;
}

/// A [`FileStore`] backed by one directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &FileName) -> PathBuf {
        self.root.join(name.as_str())
    }
}

#[async_trait]
impl FileStore for LocalStore {
    type Reader = fs::File;
    type Writer = fs::File;

    async fn list(&self) -> Result<Vec<FileName>> {
        let unavailable = |e: std::io::Error| {
            TransferError::StoreUnavailable(format!("{}: {e}", self.root.display()))
        };

        let mut entries = fs::read_dir(&self.root).await.map_err(unavailable)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(unavailable)? {
            // Follows symlinks, so a link to a regular file is listed.
            let metadata = match fs::metadata(entry.path()).await {
                Ok(m) => m,
                Err(e) => {
                    debug!(path = %entry.path().display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }
            let Some(raw) = entry.file_name().to_str().map(str::to_owned) else {
                debug!(path = %entry.path().display(), "skipping non-UTF-8 file name");
                continue;
            };
            if let Ok(name) = FileName::new(raw) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn open_read(&self, name: &FileName) -> Result<Self::Reader> {
        let path = self.path_of(name);
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| TransferError::from_io(name.as_str(), e))?;
        if !metadata.is_file() {
            return Err(TransferError::NotFound(name.to_string()));
        }
        fs::File::open(&path)
            .await
            .map_err(|e| TransferError::from_io(name.as_str(), e))
    }

    async fn open_write(&self, name: &FileName) -> Result<Self::Writer> {
        fs::File::create(self.path_of(name))
            .await
            .map_err(|e| TransferError::StoreUnavailable(format!("{name}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn file_name_rejects_traversal() {
        assert!(FileName::new("notes.txt").is_ok());
        assert!(FileName::new("").is_err());
        assert!(FileName::new(".").is_err());
        assert!(FileName::new("..").is_err());
        assert!(FileName::new("../etc/passwd").is_err());
        assert!(FileName::new("a/b").is_err());
        assert!(FileName::new("a\\b").is_err());
        assert!(FileName::new("a\0b").is_err());
    }

    #[test]
    fn file_name_rejection_is_invalid_name() {
        let err = FileName::new("..").unwrap_err();
        assert!(matches!(err, TransferError::InvalidName(_)));
    }

    #[tokio::test]
    async fn list_returns_only_regular_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"b").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let store = LocalStore::new(dir.path());
        let names: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn list_of_missing_root_is_store_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("missing"));
        let err = store.list().await.unwrap_err();
        assert!(matches!(err, TransferError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn open_read_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        let name = FileName::new("ghost.txt").unwrap();
        let err = store.open_read(&name).await.unwrap_err();
        assert!(matches!(err, TransferError::NotFound(n) if n == "ghost.txt"));
    }

    #[tokio::test]
    async fn open_read_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let store = LocalStore::new(dir.path());
        let err = store
            .open_read(&FileName::new("sub").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::NotFound(_)));
    }

    #[tokio::test]
    async fn open_write_truncates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f"), b"old contents").unwrap();
        let store = LocalStore::new(dir.path());
        let name = FileName::new("f").unwrap();

        let mut writer = store.open_write(&name).await.unwrap();
        writer.write_all(b"new").await.unwrap();
        writer.flush().await.unwrap();
        drop(writer);

        let mut contents = Vec::new();
        store
            .open_read(&name)
            .await
            .unwrap()
            .read_to_end(&mut contents)
            .await
            .unwrap();
        assert_eq!(contents, b"new");
    }

    #[tokio::test]
    async fn open_write_in_missing_root_is_store_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("missing"));
        let err = store
            .open_write(&FileName::new("f").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::StoreUnavailable(_)));
    }
}
