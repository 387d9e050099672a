//! Raw execution configuration
//!
//! [`ExecConfig`] is the serializable description an outer configuration
//! layer hands to the launcher. It is not validated here; the `confine`
//! crate turns it into an immutable, checked execution spec.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use caps::{Capability, CapsHashSet};
use serde::{Deserialize, Serialize};

use crate::error::{ConfineError, Result};
use crate::util::DEFAULT_PATH;

/// Default file mode creation mask
pub const DEFAULT_UMASK: u32 = 0o022;

/// Complete description of one unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecConfig {
    /// Program to execute; also used as argv[0]
    pub program: PathBuf,
    /// Arguments after argv[0]
    pub args: Vec<String>,
    /// Working directory of the child
    pub working_directory: Option<PathBuf>,
    /// File mode creation mask
    pub umask: u32,
    pub identity: IdentityConfig,
    pub environment: EnvironmentConfig,
    pub personality: Option<Personality>,
    pub filesystem: FilesystemConfig,
    /// Run in a network namespace with only a loopback device
    pub private_network: bool,
    pub runtime_directory: Option<RuntimeDirectoryConfig>,
    pub capabilities: CapabilityConfig,
    pub syscall_filter: Option<SyscallFilterConfig>,
    /// Ignore SIGPIPE instead of resetting it to the default action
    pub ignore_sigpipe: bool,
    /// Set `PR_SET_NO_NEW_PRIVS` before exec
    pub no_new_privileges: bool,
    /// Value written to `/proc/self/oom_score_adj`
    pub oom_score_adjust: Option<i32>,
    pub io_scheduling: Option<IoScheduling>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::new(),
            args: Vec::new(),
            working_directory: None,
            umask: DEFAULT_UMASK,
            identity: IdentityConfig::default(),
            environment: EnvironmentConfig::default(),
            personality: None,
            filesystem: FilesystemConfig::default(),
            private_network: false,
            runtime_directory: None,
            capabilities: CapabilityConfig::default(),
            syscall_filter: None,
            ignore_sigpipe: true,
            no_new_privileges: false,
            oom_score_adjust: None,
            io_scheduling: None,
        }
    }
}

impl ExecConfig {
    /// Configuration running `program` with defaults for everything else
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Parse a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON document from disk
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ConfineError::InvalidConfig(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }
}

/// User and group the child runs as
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentityConfig {
    pub user: Option<String>,
    pub group: Option<String>,
    pub supplementary_groups: Vec<String>,
}

impl IdentityConfig {
    pub fn is_empty(&self) -> bool {
        self.user.is_none() && self.group.is_none() && self.supplementary_groups.is_empty()
    }
}

/// Sources of the child's environment, merged in field order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvironmentConfig {
    /// Lowest-priority variables; only `PATH` unless replaced
    pub defaults: Vec<(String, String)>,
    /// `NAME=VALUE` assignments, highest priority
    pub assignments: Vec<String>,
    /// Names copied from the launcher's own environment
    pub pass_through: Vec<String>,
    /// Environment files, parsed in order
    pub files: Vec<PathSpec>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            defaults: vec![("PATH".to_string(), DEFAULT_PATH.to_string())],
            assignments: Vec::new(),
            pass_through: Vec::new(),
            files: Vec::new(),
        }
    }
}

/// Mount namespace configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilesystemConfig {
    pub private_tmp: bool,
    pub private_devices: bool,
    pub read_only_paths: Vec<PathSpec>,
    pub read_write_paths: Vec<PathSpec>,
    pub inaccessible_paths: Vec<PathSpec>,
    pub protect_kernel_modules: bool,
    /// Propagation applied to `/` once the mount plan is done
    pub mount_propagation: Option<MountPropagation>,
}

impl FilesystemConfig {
    /// Whether any option requires a private mount namespace
    pub fn needs_mount_namespace(&self) -> bool {
        self.private_tmp
            || self.private_devices
            || self.protect_kernel_modules
            || !self.read_only_paths.is_empty()
            || !self.read_write_paths.is_empty()
            || !self.inaccessible_paths.is_empty()
            || self.mount_propagation.is_some()
    }
}

/// A path with an optional leading `-` meaning "ignore if missing"
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PathSpec {
    pub path: PathBuf,
    pub ignore_missing: bool,
}

impl PathSpec {
    pub fn required(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ignore_missing: false,
        }
    }

    pub fn optional(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ignore_missing: true,
        }
    }
}

impl FromStr for PathSpec {
    type Err = ConfineError;

    fn from_str(s: &str) -> Result<Self> {
        let (ignore_missing, rest) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        if !rest.starts_with('/') {
            return Err(ConfineError::InvalidConfig(format!(
                "Path must be absolute: {}",
                s
            )));
        }
        Ok(Self {
            path: PathBuf::from(rest),
            ignore_missing,
        })
    }
}

impl TryFrom<String> for PathSpec {
    type Error = ConfineError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<PathSpec> for String {
    fn from(spec: PathSpec) -> String {
        spec.to_string()
    }
}

impl fmt::Display for PathSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ignore_missing {
            write!(f, "-")?;
        }
        write!(f, "{}", self.path.display())
    }
}

/// Execution domain requested with `personality(2)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Personality {
    #[serde(rename = "x86")]
    X86,
    #[serde(rename = "x86-64")]
    X86_64,
    #[serde(rename = "s390")]
    S390,
    #[serde(rename = "s390x")]
    S390x,
    #[serde(rename = "ppc")]
    Ppc,
    #[serde(rename = "ppc64")]
    Ppc64,
    #[serde(rename = "ppc64-le")]
    Ppc64Le,
    #[serde(rename = "arm")]
    Arm,
    #[serde(rename = "arm64")]
    Arm64,
}

impl Personality {
    pub fn name(self) -> &'static str {
        match self {
            Personality::X86 => "x86",
            Personality::X86_64 => "x86-64",
            Personality::S390 => "s390",
            Personality::S390x => "s390x",
            Personality::Ppc => "ppc",
            Personality::Ppc64 => "ppc64",
            Personality::Ppc64Le => "ppc64-le",
            Personality::Arm => "arm",
            Personality::Arm64 => "arm64",
        }
    }
}

impl FromStr for Personality {
    type Err = ConfineError;

    fn from_str(s: &str) -> Result<Self> {
        let personality = match s {
            "x86" => Personality::X86,
            "x86-64" => Personality::X86_64,
            "s390" => Personality::S390,
            "s390x" => Personality::S390x,
            "ppc" => Personality::Ppc,
            "ppc64" => Personality::Ppc64,
            "ppc64-le" => Personality::Ppc64Le,
            "arm" => Personality::Arm,
            "arm64" => Personality::Arm64,
            other => {
                return Err(ConfineError::InvalidConfig(format!(
                    "Unknown personality: {}",
                    other
                )));
            }
        };
        Ok(personality)
    }
}

impl fmt::Display for Personality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Propagation mode for the root mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountPropagation {
    Shared,
    Slave,
    Private,
}

/// Runtime directory created under the runtime root before exec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeDirectoryConfig {
    /// Relative name below the runtime root
    pub name: String,
    /// Owning group; defaults to the primary group of the child
    #[serde(default)]
    pub group: Option<String>,
    /// Directory mode; defaults to 0755
    #[serde(default)]
    pub mode: Option<u32>,
}

/// Capability limits
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CapabilityConfig {
    /// Upper bound for the child and its descendants; `None` keeps the inherited set
    pub bounding_set: Option<CapabilitySet>,
    /// Capabilities raised into the ambient set after the identity change
    pub ambient_set: Option<CapabilitySet>,
}

/// A set of capabilities, written as names to allow or names to drop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilitySet {
    /// Exactly these capabilities
    Allow(Vec<String>),
    /// Every known capability except these
    Drop(Vec<String>),
}

impl CapabilitySet {
    /// Resolve to the concrete set of allowed capabilities.
    pub fn resolve(&self) -> Result<CapsHashSet> {
        match self {
            CapabilitySet::Allow(names) => parse_capabilities(names),
            CapabilitySet::Drop(names) => {
                let dropped = parse_capabilities(names)?;
                Ok(caps::all().difference(&dropped).copied().collect())
            }
        }
    }

    /// Combine two sets; the result allows everything either one allows.
    pub fn merge(&self, other: &CapabilitySet) -> Result<CapabilitySet> {
        let mut union = self.resolve()?;
        union.extend(other.resolve()?);
        Ok(CapabilitySet::Allow(capability_names(&union)))
    }
}

/// Parse a capability name, with or without the `CAP_` prefix
pub fn parse_capability(name: &str) -> Result<Capability> {
    let upper = name.trim().to_ascii_uppercase();
    let full = if upper.starts_with("CAP_") {
        upper
    } else {
        format!("CAP_{}", upper)
    };
    Capability::from_str(&full)
        .map_err(|_| ConfineError::InvalidConfig(format!("Unknown capability: {}", name)))
}

fn parse_capabilities(names: &[String]) -> Result<CapsHashSet> {
    names.iter().map(|n| parse_capability(n)).collect()
}

/// Sorted, canonical names of a capability set
pub fn capability_names(set: &CapsHashSet) -> Vec<String> {
    let sorted: BTreeSet<String> = set.iter().map(|c| c.to_string()).collect();
    sorted.into_iter().collect()
}

/// Which syscalls a filter lists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Only listed syscalls may run
    #[default]
    Allow,
    /// Listed syscalls are blocked
    Deny,
}

/// What happens on a filter violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationAction {
    /// Kill the process with SIGSYS
    Kill,
    /// Fail the call with this errno (name like `EUCLEAN` or a number)
    Errno(String),
}

/// Syscall filter configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyscallFilterConfig {
    pub mode: FilterMode,
    /// Syscall names, `@group` references or `name:ERRNO` entries
    pub syscalls: Vec<String>,
    /// Default action for violations; kill when unset
    pub violation: Option<ViolationAction>,
}

/// I/O scheduling class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IoSchedulingClass {
    None,
    Realtime,
    BestEffort,
    Idle,
}

/// I/O scheduling class and priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IoScheduling {
    pub class: IoSchedulingClass,
    /// 0 (highest) to 7 (lowest)
    #[serde(default = "default_io_priority")]
    pub priority: u8,
}

fn default_io_priority() -> u8 {
    4
}
