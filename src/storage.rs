//! Storage collaborator interface
//!
//! The file-storage tree is owned by the surrounding application; the
//! preview pipeline only stats and reads it, never writes. The trait keeps
//! the pipeline testable against throwaway directories, and `LocalStorage`
//! is the filesystem-backed implementation used in production.

use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Stat view of a source file, read-only to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceInfo {
    pub is_dir: bool,
    pub modified_ms: u64,
    pub len: u64,
}

/// Read-only access to the source tree.
pub trait Storage: Send + Sync + 'static {
    /// Absolute filesystem path for a logical path, or `None` when the
    /// logical path would escape the storage root.
    fn resolve(&self, logical: &str) -> Option<PathBuf>;

    /// Stat a logical path. `Ok(None)` means it does not exist (or is
    /// unresolvable), which the pipeline treats as "serve the placeholder".
    fn stat(&self, logical: &str) -> Result<Option<SourceInfo>>;

    /// Read the full contents of a source file.
    fn read_bytes(&self, logical: &str) -> Result<Vec<u8>>;
}

/// Filesystem-backed storage rooted at a directory.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Storage for LocalStorage {
    fn resolve(&self, logical: &str) -> Option<PathBuf> {
        let rel = Path::new(logical);
        if rel.is_absolute() {
            return None;
        }

        let mut resolved = self.root.clone();
        for component in rel.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                // `..` and platform prefixes could climb out of the root
                _ => return None,
            }
        }

        // The lexical check alone misses symlinks inside the root that
        // point outside it; verify the real path of anything that exists.
        if resolved.exists() {
            let real = resolved.canonicalize().ok()?;
            let real_root = self.root.canonicalize().ok()?;
            if !real.starts_with(&real_root) {
                return None;
            }
        }
        Some(resolved)
    }

    fn stat(&self, logical: &str) -> Result<Option<SourceInfo>> {
        let Some(path) = self.resolve(logical) else {
            return Ok(None);
        };

        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to stat {}", path.display()))
            }
        };

        let modified_ms = metadata
            .modified()
            .with_context(|| format!("no modification time for {}", path.display()))?
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        Ok(Some(SourceInfo {
            is_dir: metadata.is_dir(),
            modified_ms,
            len: metadata.len(),
        }))
    }

    fn read_bytes(&self, logical: &str) -> Result<Vec<u8>> {
        let path = self
            .resolve(logical)
            .with_context(|| format!("unresolvable source path: {logical}"))?;
        fs::read(&path).with_context(|| format!("failed to read {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_resolve_stays_inside_root() {
        let storage = LocalStorage::new("/srv/files");

        assert_eq!(
            storage.resolve("photos/cat.jpg"),
            Some(PathBuf::from("/srv/files/photos/cat.jpg"))
        );
        assert_eq!(
            storage.resolve("./photos/cat.jpg"),
            Some(PathBuf::from("/srv/files/photos/cat.jpg"))
        );
        assert_eq!(storage.resolve("../etc/passwd"), None);
        assert_eq!(storage.resolve("photos/../../etc/passwd"), None);
        assert_eq!(storage.resolve("/etc/passwd"), None);
    }

    #[test]
    fn test_stat_missing_is_none() -> Result<()> {
        let dir = tempdir()?;
        let storage = LocalStorage::new(dir.path());

        assert_eq!(storage.stat("nope.jpg")?, None);
        assert_eq!(storage.stat("../outside")?, None);
        Ok(())
    }

    #[test]
    fn test_stat_and_read() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("a.jpg"), b"hello")?;
        let storage = LocalStorage::new(dir.path());

        let info = storage.stat("a.jpg")?.expect("file exists");
        assert!(!info.is_dir);
        assert_eq!(info.len, 5);
        assert!(info.modified_ms > 0);

        assert_eq!(storage.read_bytes("a.jpg")?, b"hello");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escaping_root_is_rejected() -> Result<()> {
        let outside = tempdir()?;
        fs::write(outside.path().join("secret.jpg"), b"secret")?;
        let root = tempdir()?;
        std::os::unix::fs::symlink(
            outside.path().join("secret.jpg"),
            root.path().join("link.jpg"),
        )?;
        let storage = LocalStorage::new(root.path());

        assert_eq!(storage.resolve("link.jpg"), None);
        assert_eq!(storage.stat("link.jpg")?, None);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_inside_root_is_allowed() -> Result<()> {
        let root = tempdir()?;
        fs::write(root.path().join("real.jpg"), b"pixels")?;
        std::os::unix::fs::symlink(
            root.path().join("real.jpg"),
            root.path().join("alias.jpg"),
        )?;
        let storage = LocalStorage::new(root.path());

        assert!(storage.resolve("alias.jpg").is_some());
        assert_eq!(storage.read_bytes("alias.jpg")?, b"pixels");
        Ok(())
    }

    #[test]
    fn test_stat_directory() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir(dir.path().join("sub"))?;
        let storage = LocalStorage::new(dir.path());

        let info = storage.stat("sub")?.expect("dir exists");
        assert!(info.is_dir);
        Ok(())
    }
}
