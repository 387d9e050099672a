//! `/proc/self/mountinfo` parsing
//!
//! Read in the parent so the child knows which mounts to remount without
//! parsing anything after fork.

use std::ffi::OsString;
use std::fs;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

use confine_core::{ConfineError, Result};

/// One mount from the mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_point: PathBuf,
    /// Per-mount `MS_*` flags worth preserving across a remount
    pub flags: libc::c_ulong,
}

/// The mount table at the time it was read
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    /// Read the current process's mount table
    pub fn read() -> Result<Self> {
        let content = fs::read_to_string("/proc/self/mountinfo").map_err(|e| {
            ConfineError::Mount(format!("Cannot read /proc/self/mountinfo: {}", e))
        })?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let entries = content.lines().filter_map(parse_line).collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }

    /// Flags of the mount that contains `path`
    pub fn flags_for(&self, path: &Path) -> libc::c_ulong {
        self.entries
            .iter()
            .filter(|e| path.starts_with(&e.mount_point))
            .max_by_key(|e| e.mount_point.components().count())
            .map(|e| e.flags)
            .unwrap_or(0)
    }

    /// `path` itself followed by every mount point strictly below it.
    ///
    /// Each entry carries the flags to preserve when remounting it.
    pub fn mounts_at_or_below(&self, path: &Path) -> Vec<MountEntry> {
        let mut out = vec![MountEntry {
            mount_point: path.to_path_buf(),
            flags: self.flags_for(path),
        }];
        for entry in &self.entries {
            if entry.mount_point != path
                && entry.mount_point.starts_with(path)
                && !out.iter().any(|e| e.mount_point == entry.mount_point)
            {
                out.push(entry.clone());
            }
        }
        out[1..].sort_by(|a, b| a.mount_point.cmp(&b.mount_point));
        out
    }
}

fn parse_line(line: &str) -> Option<MountEntry> {
    let mut fields = line.split(' ');
    let mount_point = fields.nth(4)?;
    let options = fields.next()?;
    Some(MountEntry {
        mount_point: PathBuf::from(unescape(mount_point)),
        flags: options_to_flags(options),
    })
}

/// Decode the `\ooo` octal escapes the kernel uses for blanks and backslashes
fn unescape(field: &str) -> OsString {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let value = bytes[i + 1..i + 4]
                .iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            out.push(value as u8);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    OsString::from_vec(out)
}

fn options_to_flags(options: &str) -> libc::c_ulong {
    options.split(',').fold(0, |flags, opt| {
        flags
            | match opt {
                "ro" => libc::MS_RDONLY,
                "nosuid" => libc::MS_NOSUID,
                "nodev" => libc::MS_NODEV,
                "noexec" => libc::MS_NOEXEC,
                "noatime" => libc::MS_NOATIME,
                "nodiratime" => libc::MS_NODIRATIME,
                "relatime" => libc::MS_RELATIME,
                "strictatime" => libc::MS_STRICTATIME,
                _ => 0,
            }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
22 1 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw
23 22 0:21 / /proc rw,nosuid,nodev,noexec,relatime shared:5 - proc proc rw
24 22 0:5 / /dev rw,nosuid shared:2 - devtmpfs udev rw
25 24 0:22 / /dev/pts rw,nosuid,noexec,relatime shared:3 - devpts devpts rw
26 22 0:23 / /usr ro,relatime shared:6 - ext4 /dev/sda2 ro
27 26 0:24 / /usr/lib/with\\040space rw,nodev shared:7 - tmpfs tmpfs rw
";

    #[test]
    fn test_parse_entries_and_flags() {
        let table = MountTable::parse(SAMPLE);
        assert_eq!(table.entries().len(), 6);
        let proc_entry = &table.entries()[1];
        assert_eq!(proc_entry.mount_point, PathBuf::from("/proc"));
        assert_eq!(
            proc_entry.flags,
            libc::MS_NOSUID | libc::MS_NODEV | libc::MS_NOEXEC | libc::MS_RELATIME
        );
    }

    #[test]
    fn test_octal_escapes() {
        let table = MountTable::parse(SAMPLE);
        assert_eq!(
            table.entries()[5].mount_point,
            PathBuf::from("/usr/lib/with space")
        );
    }

    #[test]
    fn test_flags_for_uses_longest_prefix() {
        let table = MountTable::parse(SAMPLE);
        assert_eq!(
            table.flags_for(Path::new("/usr/share")),
            libc::MS_RDONLY | libc::MS_RELATIME
        );
        assert_eq!(table.flags_for(Path::new("/etc")), libc::MS_RELATIME);
        // "/dev/ptsx" is not below "/dev/pts"
        assert_eq!(table.flags_for(Path::new("/dev/ptsx")), libc::MS_NOSUID);
    }

    #[test]
    fn test_mounts_at_or_below() {
        let table = MountTable::parse(SAMPLE);
        let mounts = table.mounts_at_or_below(Path::new("/dev"));
        let points: Vec<_> = mounts.iter().map(|m| m.mount_point.clone()).collect();
        assert_eq!(points, vec![PathBuf::from("/dev"), PathBuf::from("/dev/pts")]);

        let mounts = table.mounts_at_or_below(Path::new("/etc"));
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].flags, libc::MS_RELATIME);
    }

    #[test]
    fn test_read_current_table() {
        let table = MountTable::read().unwrap();
        assert!(table.entries().iter().any(|e| e.mount_point == Path::new("/")));
    }
}
