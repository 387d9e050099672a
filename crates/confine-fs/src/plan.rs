//! The mount plan: built in the parent, applied in the child
//!
//! Application order inside the child:
//!
//! 1. runtime directory (on the host, before the namespace exists)
//! 2. new mount namespace with `/` recursively slave
//! 3. private `/tmp` and `/var/tmp`
//! 4. private `/dev`
//! 5. read-only paths
//! 6. inaccessible paths
//! 7. read-write paths
//! 8. final propagation of `/`

use std::ffi::CString;
use std::path::{Path, PathBuf};

use confine_core::config::{FilesystemConfig, MountPropagation, PathSpec};
use confine_core::util::path_to_cstring;
use confine_core::{ConfineError, Result, StepError};
use log::debug;

use crate::devices::DevicePlan;
use crate::mountinfo::MountTable;
use crate::mounts::{self, StepResult};
use crate::private_tmp::PrivateTmp;
use crate::runtime::RuntimeDirectoryPlan;

/// Paths hidden when kernel modules are protected
pub const KERNEL_MODULE_PATHS: &[&str] = &["/usr/lib/modules", "/lib/modules"];

const INACCESSIBLE_FLAGS: libc::c_ulong =
    libc::MS_RDONLY | libc::MS_NOSUID | libc::MS_NODEV | libc::MS_NOEXEC;

#[derive(Debug, Clone)]
struct Remount {
    target: CString,
    flags: libc::c_ulong,
}

/// One configured path and the mounts at or below it
#[derive(Debug, Clone)]
struct PathMount {
    path: CString,
    optional: bool,
    mounts: Vec<Remount>,
}

#[derive(Debug, Clone)]
struct TmpBind {
    source: CString,
    target: CString,
    optional: bool,
}

/// Placeholders bound over inaccessible paths
#[derive(Debug, Clone)]
struct Placeholders {
    root: CString,
    dir: CString,
    reg: CString,
}

impl Placeholders {
    fn new(state_dir: &Path) -> Result<Self> {
        let root = state_dir.join("inaccessible");
        Ok(Self {
            dir: path_to_cstring(&root.join("dir"))?,
            reg: path_to_cstring(&root.join("reg"))?,
            root: path_to_cstring(&root)?,
        })
    }

    fn create(&self) -> StepResult<'_> {
        mounts::make_dir(&self.root, 0o755)?;
        mounts::make_dir(&self.dir, 0)?;
        mounts::chmod(&self.dir, 0)?;
        mounts::make_file(&self.reg, 0)?;
        mounts::chmod(&self.reg, 0)
    }

    fn for_mode(&self, mode: libc::mode_t) -> &CString {
        if mode & libc::S_IFMT == libc::S_IFDIR {
            &self.dir
        } else {
            &self.reg
        }
    }
}

/// Everything the filesystem stage does, with every path prepared up front
#[derive(Debug, Clone)]
pub struct MountPlan {
    runtime_directory: Option<RuntimeDirectoryPlan>,
    namespace: bool,
    state_dir: CString,
    private_tmp: Vec<TmpBind>,
    devices: Option<DevicePlan>,
    read_only: Vec<PathMount>,
    inaccessible: Vec<PathMount>,
    read_write: Vec<PathMount>,
    placeholders: Placeholders,
    propagation: libc::c_ulong,
}

impl MountPlan {
    /// Build the plan against the current mount table
    pub fn from_config(
        config: &FilesystemConfig,
        private_tmp: Option<&PrivateTmp>,
        state_dir: &Path,
    ) -> Result<Self> {
        let table = if config.needs_mount_namespace() {
            MountTable::read()?
        } else {
            MountTable::default()
        };
        Self::with_mount_table(config, &table, private_tmp, state_dir)
    }

    pub fn with_mount_table(
        config: &FilesystemConfig,
        table: &MountTable,
        private_tmp: Option<&PrivateTmp>,
        state_dir: &Path,
    ) -> Result<Self> {
        if !state_dir.is_absolute() {
            return Err(ConfineError::InvalidConfig(format!(
                "State directory {} is not absolute",
                state_dir.display()
            )));
        }

        let private_tmp = match (config.private_tmp, private_tmp) {
            (false, _) => Vec::new(),
            (true, None) => {
                return Err(ConfineError::InvalidConfig(
                    "private_tmp requested without a private tmp directory".to_string(),
                ));
            }
            // /var/tmp first: its source may live under /tmp.
            (true, Some(tmp)) => vec![
                TmpBind {
                    source: path_to_cstring(&tmp.var_tmp_dir())?,
                    target: c"/var/tmp".to_owned(),
                    optional: true,
                },
                TmpBind {
                    source: path_to_cstring(&tmp.tmp_dir())?,
                    target: c"/tmp".to_owned(),
                    optional: false,
                },
            ],
        };

        let devices = if config.private_devices {
            Some(DevicePlan::new(
                Path::new("/dev"),
                &state_dir.join("dev-staging"),
            )?)
        } else {
            None
        };

        let mut inaccessible = config.inaccessible_paths.clone();
        if config.protect_kernel_modules {
            inaccessible.extend(KERNEL_MODULE_PATHS.iter().map(|p| PathSpec::optional(*p)));
        }

        let propagation = match config.mount_propagation.unwrap_or(MountPropagation::Shared) {
            MountPropagation::Shared => libc::MS_SHARED,
            MountPropagation::Slave => libc::MS_SLAVE,
            MountPropagation::Private => libc::MS_PRIVATE,
        };

        let plan = Self {
            runtime_directory: None,
            namespace: config.needs_mount_namespace(),
            state_dir: path_to_cstring(state_dir)?,
            private_tmp,
            devices,
            read_only: path_mounts(&config.read_only_paths, Some(table))?,
            inaccessible: path_mounts(&inaccessible, None)?,
            read_write: path_mounts(&config.read_write_paths, Some(table))?,
            placeholders: Placeholders::new(state_dir)?,
            propagation,
        };

        debug!(
            "Mount plan: namespace={} read_only={} inaccessible={} read_write={}",
            plan.namespace,
            plan.read_only.len(),
            plan.inaccessible.len(),
            plan.read_write.len()
        );
        Ok(plan)
    }

    pub fn with_runtime_directory(mut self, runtime: RuntimeDirectoryPlan) -> Self {
        self.runtime_directory = Some(runtime);
        self
    }

    pub fn runtime_directory(&self) -> Option<&Path> {
        self.runtime_directory.as_ref().map(|r| r.path())
    }

    /// Whether the child enters a private mount namespace
    pub fn needs_namespace(&self) -> bool {
        self.namespace
    }

    /// Whether applying the plan does anything at all
    pub fn is_empty(&self) -> bool {
        !self.namespace && self.runtime_directory.is_none()
    }

    /// Configured read-only paths in application order
    pub fn read_only_paths(&self) -> Vec<PathBuf> {
        paths_of(&self.read_only)
    }

    /// Configured inaccessible paths in application order
    pub fn inaccessible_paths(&self) -> Vec<PathBuf> {
        paths_of(&self.inaccessible)
    }

    /// Configured read-write paths in application order
    pub fn read_write_paths(&self) -> Vec<PathBuf> {
        paths_of(&self.read_write)
    }

    /// Run the filesystem stage. Runs in the child; allocation-free.
    pub fn apply(&self) -> std::result::Result<(), StepError<'_>> {
        if let Some(runtime) = &self.runtime_directory {
            runtime.apply()?;
        }
        if !self.namespace {
            return Ok(());
        }

        mounts::unshare_mount_namespace()?;
        mounts::set_propagation(c"/", libc::MS_SLAVE)?;

        if self.devices.is_some() || !self.inaccessible.is_empty() {
            mounts::make_dir(&self.state_dir, 0o755)?;
        }

        for bind in &self.private_tmp {
            if mounts::probe(&bind.target, bind.optional)?.is_some() {
                mounts::bind(&bind.source, &bind.target)?;
            }
        }

        if let Some(devices) = &self.devices {
            devices.apply()?;
        }

        for entry in &self.read_only {
            if mounts::probe(&entry.path, entry.optional)?.is_none() {
                continue;
            }
            mounts::bind(&entry.path, &entry.path)?;
            for mount in &entry.mounts {
                mounts::remount_bind(&mount.target, mount.flags | libc::MS_RDONLY)?;
            }
        }

        if !self.inaccessible.is_empty() {
            self.placeholders.create()?;
        }
        for entry in &self.inaccessible {
            let Some(mode) = mounts::probe(&entry.path, entry.optional)? else {
                continue;
            };
            let placeholder = self.placeholders.for_mode(mode);
            mounts::bind(placeholder, &entry.path)?;
            mounts::remount_bind(&entry.path, INACCESSIBLE_FLAGS)?;
        }

        for entry in &self.read_write {
            if mounts::probe(&entry.path, entry.optional)?.is_none() {
                continue;
            }
            mounts::bind(&entry.path, &entry.path)?;
            for mount in &entry.mounts {
                mounts::remount_bind(&mount.target, mount.flags & !libc::MS_RDONLY)?;
            }
        }

        mounts::set_propagation(c"/", self.propagation)
    }
}

/// Reject relative paths before anything is forked
pub fn validate_paths(config: &FilesystemConfig) -> Result<()> {
    check_absolute(&config.read_only_paths)?;
    check_absolute(&config.read_write_paths)?;
    check_absolute(&config.inaccessible_paths)
}

fn check_absolute(specs: &[PathSpec]) -> Result<()> {
    match specs.iter().find(|s| !s.path.is_absolute()) {
        Some(spec) => Err(ConfineError::InvalidConfig(format!(
            "Path {} is not absolute",
            spec.path.display()
        ))),
        None => Ok(()),
    }
}

/// Sort parents before children, drop duplicates (a required entry wins
/// over an optional one), and attach the mounts each path covers.
fn path_mounts(specs: &[PathSpec], table: Option<&MountTable>) -> Result<Vec<PathMount>> {
    check_absolute(specs)?;
    let mut specs = specs.to_vec();
    specs.sort();
    specs.dedup_by(|later, earlier| later.path == earlier.path);

    specs
        .iter()
        .map(|spec| {
            let mounts = match table {
                Some(table) => table
                    .mounts_at_or_below(&spec.path)
                    .into_iter()
                    .map(|m| {
                        Ok(Remount {
                            target: path_to_cstring(&m.mount_point)?,
                            flags: m.flags & !libc::MS_RDONLY,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
                None => Vec::new(),
            };
            Ok(PathMount {
                path: path_to_cstring(&spec.path)?,
                optional: spec.ignore_missing,
                mounts,
            })
        })
        .collect()
}

fn paths_of(entries: &[PathMount]) -> Vec<PathBuf> {
    use std::os::unix::ffi::OsStrExt;
    entries
        .iter()
        .map(|e| PathBuf::from(std::ffi::OsStr::from_bytes(e.path.as_bytes())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
22 1 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw
30 22 0:30 / /usr ro,nodev,relatime shared:6 - ext4 /dev/sda2 ro
31 30 0:31 / /usr/local rw,nosuid shared:7 - ext4 /dev/sda3 rw
";

    fn plan(config: &FilesystemConfig) -> MountPlan {
        MountPlan::with_mount_table(
            config,
            &MountTable::parse(TABLE),
            None,
            Path::new("/run/confine"),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_config_is_noop() {
        let p = plan(&FilesystemConfig::default());
        assert!(p.is_empty());
        assert!(!p.needs_namespace());
        assert!(p.apply().is_ok());
    }

    #[test]
    fn test_paths_sorted_parent_first_and_deduplicated() {
        let config = FilesystemConfig {
            read_only_paths: vec![
                PathSpec::optional("/usr/local"),
                PathSpec::required("/usr"),
                PathSpec::optional("/usr"),
                PathSpec::required("/etc"),
            ],
            ..Default::default()
        };
        let p = plan(&config);
        assert_eq!(
            p.read_only_paths(),
            vec![
                PathBuf::from("/etc"),
                PathBuf::from("/usr"),
                PathBuf::from("/usr/local")
            ]
        );
        let usr = &p.read_only[1];
        assert!(!usr.optional);
    }

    #[test]
    fn test_read_only_covers_submounts_with_their_flags() {
        let config = FilesystemConfig {
            read_only_paths: vec![PathSpec::required("/usr")],
            ..Default::default()
        };
        let p = plan(&config);
        let mounts = &p.read_only[0].mounts;
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].target.as_bytes(), b"/usr");
        assert_eq!(mounts[0].flags, libc::MS_NODEV | libc::MS_RELATIME);
        assert_eq!(mounts[1].target.as_bytes(), b"/usr/local");
        assert_eq!(mounts[1].flags, libc::MS_NOSUID);
    }

    #[test]
    fn test_kernel_module_paths_are_optional_inaccessible() {
        let config = FilesystemConfig {
            protect_kernel_modules: true,
            ..Default::default()
        };
        let p = plan(&config);
        assert!(p.needs_namespace());
        assert_eq!(
            p.inaccessible_paths(),
            vec![PathBuf::from("/lib/modules"), PathBuf::from("/usr/lib/modules")]
        );
        assert!(p.inaccessible.iter().all(|e| e.optional));
    }

    #[test]
    fn test_private_tmp_requires_directory() {
        let config = FilesystemConfig {
            private_tmp: true,
            ..Default::default()
        };
        let err = MountPlan::with_mount_table(
            &config,
            &MountTable::default(),
            None,
            Path::new("/run/confine"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfineError::InvalidConfig(_)));
    }

    #[test]
    fn test_private_tmp_binds_var_tmp_first() {
        let base = tempfile::tempdir().unwrap();
        let tmp = PrivateTmp::create_in(base.path()).unwrap();
        let config = FilesystemConfig {
            private_tmp: true,
            ..Default::default()
        };
        let p = MountPlan::with_mount_table(
            &config,
            &MountTable::default(),
            Some(&tmp),
            Path::new("/run/confine"),
        )
        .unwrap();
        assert_eq!(p.private_tmp[0].target.as_bytes(), b"/var/tmp");
        assert_eq!(p.private_tmp[1].target.as_bytes(), b"/tmp");
    }

    #[test]
    fn test_relative_paths_rejected() {
        let config = FilesystemConfig {
            inaccessible_paths: vec![PathSpec::required("relative")],
            ..Default::default()
        };
        let err = MountPlan::with_mount_table(
            &config,
            &MountTable::default(),
            None,
            Path::new("/run/confine"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfineError::InvalidConfig(_)));
    }

    #[test]
    fn test_propagation_defaults_to_shared() {
        let p = plan(&FilesystemConfig::default());
        assert_eq!(p.propagation, libc::MS_SHARED);

        let config = FilesystemConfig {
            mount_propagation: Some(MountPropagation::Private),
            ..Default::default()
        };
        assert_eq!(plan(&config).propagation, libc::MS_PRIVATE);
    }
}
