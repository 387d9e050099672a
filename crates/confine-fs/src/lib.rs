//! confine-fs: private mount namespace construction for confine
//!
//! The parent prepares a [`MountPlan`] (every path converted to a C string,
//! submounts read from the mount table); the child applies it between fork
//! and exec.

pub mod devices;
pub mod mountinfo;
pub mod mounts;
pub mod plan;
pub mod private_tmp;
pub mod runtime;

use std::path::{Path, PathBuf};

pub use devices::DevicePlan;
pub use mountinfo::{MountEntry, MountTable};
pub use plan::{KERNEL_MODULE_PATHS, MountPlan, validate_paths};
pub use private_tmp::PrivateTmp;
pub use runtime::{DEFAULT_RUNTIME_ROOT, RuntimeDirectoryPlan};

/// Directory below the runtime root holding placeholders and `/dev` staging
pub fn state_dir(runtime_root: &Path) -> PathBuf {
    runtime_root.join("confine")
}
