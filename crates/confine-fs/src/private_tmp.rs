//! Per-launch private `/tmp` and `/var/tmp`

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use confine_core::{ConfineError, Result};
use log::debug;
use tempfile::TempDir;

const PREFIX: &str = "confine-private-";
const STICKY_WORLD_WRITABLE: u32 = 0o1777;

/// Host-side directories that replace `/tmp` and `/var/tmp` in the child.
///
/// The directory tree is removed when the guard is dropped.
#[derive(Debug)]
pub struct PrivateTmp {
    root: TempDir,
}

impl PrivateTmp {
    /// Create the directories under the system temp directory
    pub fn create() -> Result<Self> {
        Self::create_in(&std::env::temp_dir())
    }

    pub fn create_in(base: &Path) -> Result<Self> {
        let root = tempfile::Builder::new()
            .prefix(PREFIX)
            .tempdir_in(base)
            .map_err(|e| {
                ConfineError::Mount(format!(
                    "Failed to create private tmp under {}: {}",
                    base.display(),
                    e
                ))
            })?;

        for sub in ["tmp", "var-tmp"] {
            let dir = root.path().join(sub);
            fs::create_dir(&dir)?;
            fs::set_permissions(&dir, fs::Permissions::from_mode(STICKY_WORLD_WRITABLE))?;
        }

        debug!("Created private tmp at {}", root.path().display());
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Directory mounted over `/tmp`
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.path().join("tmp")
    }

    /// Directory mounted over `/var/tmp`
    pub fn var_tmp_dir(&self) -> PathBuf {
        self.root.path().join("var-tmp")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_and_modes() {
        let base = tempfile::tempdir().unwrap();
        let private = PrivateTmp::create_in(base.path()).unwrap();

        let name = private.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(PREFIX));

        let root_mode = fs::metadata(private.path()).unwrap().permissions().mode();
        assert_eq!(root_mode & 0o777, 0o700);

        for dir in [private.tmp_dir(), private.var_tmp_dir()] {
            let mode = fs::metadata(&dir).unwrap().permissions().mode();
            assert_eq!(mode & 0o7777, STICKY_WORLD_WRITABLE);
        }
    }

    #[test]
    fn test_removed_on_drop() {
        let base = tempfile::tempdir().unwrap();
        let private = PrivateTmp::create_in(base.path()).unwrap();
        let path = private.path().to_path_buf();
        fs::write(private.tmp_dir().join("scratch"), b"x").unwrap();
        drop(private);
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_base_is_mount_error() {
        let err = PrivateTmp::create_in(Path::new("/nonexistent-confine-base")).unwrap_err();
        assert!(matches!(err, ConfineError::Mount(_)));
    }
}
