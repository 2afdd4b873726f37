//! Filesystem storage collaborator
//!
//! Stored files live under `<root>/<handle>/<filename>`; one directory per
//! handle, created on demand. Handles never collide with each other by
//! construction, so concurrent uploads from different handles are
//! independent. Concurrent writes to the same `(handle, filename)` are
//! last-finisher-wins; the protocol does not arbitrate them.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};

pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the per-handle directory if it does not exist yet.
    pub async fn ensure_container(&self, handle: &str) -> Result<()> {
        let dir = self.container(handle)?;
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create container {}", dir.display()))?;
        Ok(())
    }

    /// Open `(handle, filename)` for a streaming write, truncating any
    /// previous version. The container must already exist.
    pub async fn create(&self, handle: &str, filename: &str) -> Result<File> {
        let path = self.file_path(handle, filename)?;
        File::create(&path)
            .await
            .with_context(|| format!("create {}", path.display()))
    }

    /// Open `(handle, filename)` for reading. `Ok(None)` means not found;
    /// other failures are real IO errors.
    pub async fn open(&self, handle: &str, filename: &str) -> Result<Option<(File, u64)>> {
        let path = self.file_path(handle, filename)?;
        match File::open(&path).await {
            Ok(file) => {
                let len = file
                    .metadata()
                    .await
                    .with_context(|| format!("stat {}", path.display()))?
                    .len();
                Ok(Some((file, len)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("open {}", path.display())),
        }
    }

    /// Remove `(handle, filename)` if present. Used to discard a partial
    /// upload after a mid-transfer storage failure.
    pub async fn remove(&self, handle: &str, filename: &str) -> Result<()> {
        let path = self.file_path(handle, filename)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
        }
    }

    /// Sorted filenames stored under `handle`. A handle that never uploaded
    /// (no container yet) simply owns nothing.
    pub async fn list(&self, handle: &str) -> Result<Vec<String>> {
        let dir = self.container(handle)?;
        let mut rd = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("read_dir {}", dir.display())),
        };
        let mut names = Vec::new();
        while let Some(entry) = rd.next_entry().await? {
            if entry.file_type().await.map(|ft| ft.is_file()).unwrap_or(false) {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn container(&self, handle: &str) -> Result<PathBuf> {
        validate_name(handle).context("invalid handle")?;
        Ok(self.root.join(handle))
    }

    fn file_path(&self, handle: &str, filename: &str) -> Result<PathBuf> {
        let dir = self.container(handle)?;
        validate_name(filename).context("invalid filename")?;
        Ok(dir.join(filename))
    }
}

/// Reject names that could escape the storage root or hide from listings.
/// Both handles and filenames are single path components: no separators, no
/// dot-prefixed names, no NUL.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("empty name");
    }
    if name.starts_with('.') {
        bail!("name starts with '.'");
    }
    if name.contains('\0') {
        bail!("name contains NUL byte");
    }
    if name.contains('/') || name.contains('\\') {
        bail!("name contains path separator");
    }
    Ok(())
}
