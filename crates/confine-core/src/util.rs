//! Utility functions shared by the launcher crates

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use nix::unistd::{AccessFlags, access};

use crate::error::{ConfineError, Result};

/// Search path used when nothing else sets `PATH`
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Check if running as root
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Get current UID
pub fn get_uid() -> u32 {
    unsafe { libc::geteuid() }
}

/// Get current GID
pub fn get_gid() -> u32 {
    unsafe { libc::getegid() }
}

/// `errno` of the last failed libc call; safe to use after fork
pub fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Search `$PATH` (or the default search path) for an executable.
pub fn find_binary(name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let candidate = PathBuf::from(name);
        return access(&candidate, AccessFlags::X_OK).ok().map(|_| candidate);
    }

    let path_value = std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string());
    path_value.split(':').find_map(|entry| {
        let dir = if entry.is_empty() { "." } else { entry };
        let candidate = Path::new(dir).join(name);
        access(&candidate, AccessFlags::X_OK)
            .ok()
            .map(|_| candidate)
    })
}

/// Convert a path into a NUL-terminated string for raw syscalls.
pub fn path_to_cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        ConfineError::InvalidConfig(format!(
            "Path contains an interior NUL byte: {}",
            path.display()
        ))
    })
}

/// Convert a string into a NUL-terminated string, naming `what` on failure.
pub fn str_to_cstring(value: &str, what: &str) -> Result<CString> {
    CString::new(value)
        .map_err(|_| ConfineError::InvalidConfig(format!("{} contains a NUL byte", what)))
}
