//! Runtime directory creation

use std::ffi::CString;
use std::path::{Component, Path, PathBuf};

use confine_core::config::RuntimeDirectoryConfig;
use confine_core::util::path_to_cstring;
use confine_core::{ConfineError, Result};
use nix::unistd::Group;

use crate::mounts::{self, StepResult};

/// Root under which runtime directories are created
pub const DEFAULT_RUNTIME_ROOT: &str = "/run";
const DEFAULT_MODE: u32 = 0o755;

/// A runtime directory, resolved in the parent and created by the child
#[derive(Debug, Clone)]
pub struct RuntimeDirectoryPlan {
    path: PathBuf,
    /// Every missing component below the root, outermost first
    components: Vec<CString>,
    uid: libc::uid_t,
    gid: libc::gid_t,
    mode: libc::mode_t,
}

impl RuntimeDirectoryPlan {
    /// Resolve `config` below `root`, owned by `uid` and either the
    /// configured group or `primary_gid`.
    pub fn new(
        root: &Path,
        config: &RuntimeDirectoryConfig,
        uid: libc::uid_t,
        primary_gid: libc::gid_t,
    ) -> Result<Self> {
        let name = Path::new(&config.name);
        let valid = !config.name.is_empty()
            && name
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(ConfineError::InvalidConfig(format!(
                "Runtime directory '{}' must be a relative path without '..'",
                config.name
            )));
        }

        let mode = config.mode.unwrap_or(DEFAULT_MODE);
        if mode > 0o7777 {
            return Err(ConfineError::InvalidConfig(format!(
                "Invalid runtime directory mode {:o}",
                mode
            )));
        }

        let gid = match &config.group {
            Some(group) => Group::from_name(group)
                .map_err(|e| ConfineError::Identity(format!("Group lookup '{}': {}", group, e)))?
                .ok_or_else(|| ConfineError::Identity(format!("Unknown group '{}'", group)))?
                .gid
                .as_raw(),
            None => primary_gid,
        };

        let path = root.join(name);
        let mut components = Vec::new();
        let mut current = root.to_path_buf();
        for component in name.components() {
            current.push(component);
            components.push(path_to_cstring(&current)?);
        }

        Ok(Self {
            path,
            components,
            uid,
            gid,
            mode: mode as libc::mode_t,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the directory chain, then hand the leaf to its owner.
    ///
    /// Runs in the child; allocation-free.
    pub fn apply(&self) -> StepResult<'_> {
        for dir in &self.components {
            mounts::make_dir(dir, 0o755)?;
        }
        if let Some(leaf) = self.components.last() {
            mounts::chown(leaf, self.uid, self.gid)?;
            mounts::chmod(leaf, self.mode)?;
        }
        Ok(())
    }
}
