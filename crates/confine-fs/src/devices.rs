//! Minimal private `/dev`
//!
//! The tree is assembled on a tmpfs in a staging directory and then moved
//! over `/dev` in one step.

use std::ffi::CString;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;

use confine_core::Result;
use confine_core::util::path_to_cstring;
use log::{debug, warn};

use crate::mounts::{self, StepResult};

/// Device nodes cloned from the host
pub const DEVICE_NODES: &[&str] = &["null", "zero", "full", "random", "urandom", "tty"];

/// Host directories bound into the private `/dev`, and whether they must exist
const DEVICE_BINDS: &[(&str, bool)] = &[("pts", true), ("shm", true), ("mqueue", false)];

const DEVICE_LINKS: &[(&str, &str)] = &[
    ("pts/ptmx", "ptmx"),
    ("/proc/self/fd", "fd"),
    ("/proc/self/fd/0", "stdin"),
    ("/proc/self/fd/1", "stdout"),
    ("/proc/self/fd/2", "stderr"),
];

#[derive(Debug, Clone)]
struct DeviceNode {
    path: CString,
    mode: libc::mode_t,
    rdev: libc::dev_t,
}

#[derive(Debug, Clone)]
struct DeviceBind {
    source: CString,
    target: CString,
}

#[derive(Debug, Clone)]
struct DeviceLink {
    target: CString,
    link: CString,
}

/// Everything the child needs to build the private `/dev`
#[derive(Debug, Clone)]
pub struct DevicePlan {
    staging: CString,
    dev: CString,
    nodes: Vec<DeviceNode>,
    binds: Vec<DeviceBind>,
    links: Vec<DeviceLink>,
}

impl DevicePlan {
    /// Describe the private `/dev` from the host's `dev_root`, staged at `staging`
    pub fn new(dev_root: &Path, staging: &Path) -> Result<Self> {
        let mut nodes = Vec::new();
        for name in DEVICE_NODES {
            let host = dev_root.join(name);
            match std::fs::metadata(&host) {
                Ok(meta) if meta.file_type().is_char_device() => nodes.push(DeviceNode {
                    path: path_to_cstring(&staging.join(name))?,
                    mode: meta.mode() as libc::mode_t,
                    rdev: meta.rdev() as libc::dev_t,
                }),
                Ok(_) => warn!("{} is not a character device, skipping", host.display()),
                Err(e) => debug!("Skipping device {}: {}", host.display(), e),
            }
        }

        let mut binds = Vec::new();
        for (name, required) in DEVICE_BINDS {
            let host = dev_root.join(name);
            if !required && !host.is_dir() {
                continue;
            }
            binds.push(DeviceBind {
                source: path_to_cstring(&host)?,
                target: path_to_cstring(&staging.join(name))?,
            });
        }

        let links = DEVICE_LINKS
            .iter()
            .map(|(target, link)| {
                Ok(DeviceLink {
                    target: path_to_cstring(Path::new(target))?,
                    link: path_to_cstring(&staging.join(link))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            staging: path_to_cstring(staging)?,
            dev: path_to_cstring(dev_root)?,
            nodes,
            binds,
            links,
        })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Build the tree and move it over `/dev`. Runs in the child.
    pub fn apply(&self) -> StepResult<'_> {
        mounts::make_dir(&self.staging, 0o755)?;
        mounts::mount_tmpfs(
            &self.staging,
            libc::MS_NOSUID | libc::MS_NOEXEC | libc::MS_STRICTATIME,
            c"mode=755",
        )?;

        let old_umask = unsafe { libc::umask(0) };
        let populated = self.populate();
        unsafe { libc::umask(old_umask) };
        populated?;

        mounts::move_mount(&self.staging, &self.dev)
    }

    fn populate(&self) -> StepResult<'_> {
        for node in &self.nodes {
            mounts::make_node(&node.path, node.mode, node.rdev)?;
        }
        for bind in &self.binds {
            mounts::make_dir(&bind.target, 0o755)?;
            mounts::bind(&bind.source, &bind.target)?;
        }
        for link in &self.links {
            mounts::symlink(&link.target, &link.link)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_from_host_dev() {
        let plan = DevicePlan::new(Path::new("/dev"), Path::new("/run/confine/dev-staging"))
            .unwrap();
        assert!(plan.node_count() > 0);
        assert!(plan.nodes.iter().any(|n| n.path.as_bytes() == b"/run/confine/dev-staging/null"));
        for node in &plan.nodes {
            assert_eq!(node.mode & libc::S_IFMT, libc::S_IFCHR);
        }
        assert_eq!(plan.dev.as_bytes(), b"/dev");
        assert!(plan.links.iter().any(|l| l.link.as_bytes().ends_with(b"/ptmx")));
    }

    #[test]
    fn test_missing_nodes_are_skipped() {
        let fake = tempfile::tempdir().unwrap();
        std::fs::write(fake.path().join("null"), b"").unwrap();
        let plan = DevicePlan::new(fake.path(), Path::new("/staging")).unwrap();
        assert_eq!(plan.node_count(), 0);
        // pts and shm are always bound; mqueue only when present.
        assert_eq!(plan.binds.len(), 2);
    }
}
