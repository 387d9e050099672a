//! Namespace entry for confined launches

use nix::sched::CloneFlags;
use nix::unistd::Pid;

use confine_core::{ConfineError, ExecConfig, Result, StepError};

use crate::loopback::bring_up_loopback;

/// Namespace types a launch can isolate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceType {
    Mount,
    Net,
}

impl NamespaceType {
    /// Name of the namespace under `/proc/<pid>/ns`
    pub fn proc_name(self) -> &'static str {
        match self {
            NamespaceType::Mount => "mnt",
            NamespaceType::Net => "net",
        }
    }
}

/// Which namespaces the child unshares
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NamespacePlan {
    pub mount: bool,
    pub net: bool,
}

impl NamespacePlan {
    /// Derive the plan from an execution config.
    ///
    /// The mount namespace itself is entered by the filesystem stage, so
    /// only `net` is acted on here; `mount` is recorded for reporting.
    pub fn from_config(config: &ExecConfig) -> Self {
        Self {
            mount: config.filesystem.needs_mount_namespace(),
            net: config.private_network,
        }
    }

    /// Flags for the namespaces entered by [`NamespacePlan::enter`]
    pub fn to_clone_flags(&self) -> CloneFlags {
        let mut flags = CloneFlags::empty();
        if self.net {
            flags |= CloneFlags::CLONE_NEWNET;
        }
        flags
    }

    pub fn is_empty(&self) -> bool {
        !self.mount && !self.net
    }

    /// Enter the network namespace and bring up its loopback device.
    ///
    /// Runs in the forked child; allocation-free.
    pub fn enter(&self) -> std::result::Result<(), StepError<'static>> {
        let flags = self.to_clone_flags();
        if flags.is_empty() {
            return Ok(());
        }

        if unsafe { libc::unshare(flags.bits()) } != 0 {
            return Err(StepError::last_os("unshare network namespace"));
        }

        bring_up_loopback()
    }
}

/// Get namespace inode (for identification)
pub fn get_namespace_inode(ns_type: NamespaceType) -> Result<u64> {
    get_namespace_inode_for_pid(ns_type, None)
}

/// Get namespace inode for a specific process
pub fn get_namespace_inode_for_pid(ns_type: NamespaceType, pid: Option<Pid>) -> Result<u64> {
    use std::os::unix::fs::MetadataExt;

    let pid_str = match pid {
        Some(p) => p.as_raw().to_string(),
        None => "self".to_string(),
    };
    let path = format!("/proc/{}/ns/{}", pid_str, ns_type.proc_name());
    let stat = std::fs::metadata(&path).map_err(|e| {
        ConfineError::Namespace(format!(
            "Failed to get namespace info for pid={} ns={}: {}",
            pid_str,
            ns_type.proc_name(),
            e
        ))
    })?;
    Ok(stat.ino())
}

/// Check if two processes share a namespace
pub fn shares_namespace(ns_type: NamespaceType, pid1: Option<Pid>, pid2: Option<Pid>) -> Result<bool> {
    let inode1 = get_namespace_inode_for_pid(ns_type, pid1)?;
    let inode2 = get_namespace_inode_for_pid(ns_type, pid2)?;
    Ok(inode1 == inode2)
}
