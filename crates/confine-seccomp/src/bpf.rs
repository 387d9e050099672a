//! Seccomp BPF filter compilation with seccompiler, and raw installation

use std::collections::{BTreeMap, BTreeSet};
use std::convert::TryInto;

use confine_core::config::{FilterMode, SyscallFilterConfig, ViolationAction};
use confine_core::util::last_errno;
use confine_core::{ConfineError, Result};
use log::debug;
use seccompiler::{
    BpfProgram, SeccompAction, SeccompFilter as SeccompilerFilter, SeccompRule, TargetArch,
};

use crate::errno::parse_errno;
use crate::groups::expand_group;
use crate::syscall_table::get_syscall_number_from_name;

/// Syscalls an allow-list always permits so the child can finish setup and exec.
pub const EXEC_BOOTSTRAP_SYSCALLS: &[&str] = &[
    // Lifecycle
    "exit",
    "exit_group",
    // Exec
    "execve",
    "execveat",
    // Memory (linker)
    "brk",
    "mmap",
    "munmap",
    "mprotect",
    "madvise",
    // File (linker)
    "openat",
    "open",
    "read",
    "write",
    "close",
    "close_range",
    // Stat
    "fstat",
    "stat",
    "lstat",
    "newfstatat",
    "statx",
    // Access
    "access",
    "faccessat",
    "faccessat2",
    // Seek
    "lseek",
    // Links
    "readlink",
    "readlinkat",
    // libc init
    "arch_prctl",
    "set_tid_address",
    "set_robust_list",
    "futex",
    "getrandom",
    "rseq",
    "prlimit64",
    "prctl",
    // Stacking further filters
    "seccomp",
    // CWD
    "getcwd",
    // Identity
    "getpid",
    "gettid",
    "getuid",
    "geteuid",
    "getgid",
    "getegid",
    // FD
    "fcntl",
    // Signal disposition before exec
    "rt_sigaction",
    "rt_sigprocmask",
    "rt_sigreturn",
    "sigaltstack",
];

/// Action for one class of matched syscalls
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Verdict {
    Kill,
    Errno(u32),
}

impl Verdict {
    fn from_violation(action: Option<&ViolationAction>) -> Result<Self> {
        match action {
            None | Some(ViolationAction::Kill) => Ok(Verdict::Kill),
            Some(ViolationAction::Errno(value)) => Ok(Verdict::Errno(parse_errno(value)?)),
        }
    }

    fn action(self) -> SeccompAction {
        match self {
            Verdict::Kill => SeccompAction::KillProcess,
            Verdict::Errno(errno) => SeccompAction::Errno(errno),
        }
    }
}

const SECCOMP_SET_MODE_FILTER: libc::c_uint = 1;

/// Position of a program in the install sequence.
///
/// Every program after the first is loaded through `seccomp(2)` under the
/// programs already installed, so a program that can refuse that call goes
/// last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum InstallSlot {
    Deny,
    AllowList,
    DenySeccomp,
}

/// One parsed filter list entry
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    number: i64,
    errno: Option<u32>,
}

fn parse_entries(items: &[String]) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();

    for item in items {
        let (name, errno) = match item.split_once(':') {
            Some((name, errno)) => (name.trim(), Some(parse_errno(errno)?)),
            None => (item.trim(), None),
        };

        if name.starts_with('@') {
            for member in expand_group(name)? {
                if let Some(number) = get_syscall_number_from_name(member) {
                    entries.push(Entry { number, errno });
                }
            }
            continue;
        }

        let number = get_syscall_number_from_name(name).ok_or_else(|| {
            ConfineError::InvalidConfig(format!(
                "Unknown syscall: '{}'. This syscall is not supported on this architecture.",
                name
            ))
        })?;
        entries.push(Entry { number, errno });
    }

    Ok(entries)
}

fn target_arch() -> Result<TargetArch> {
    std::env::consts::ARCH
        .try_into()
        .map_err(|e| ConfineError::Seccomp(format!("Unsupported architecture: {:?}", e)))
}

fn build_program(
    rules: BTreeMap<i64, Vec<SeccompRule>>,
    mismatch_action: SeccompAction,
    match_action: SeccompAction,
    arch: TargetArch,
) -> Result<BpfProgram> {
    let filter = SeccompilerFilter::new(rules, mismatch_action, match_action, arch)
        .map_err(|e| ConfineError::Seccomp(format!("Failed to create filter: {}", e)))?;
    filter
        .try_into()
        .map_err(|e| ConfineError::Seccomp(format!("Failed to compile filter: {}", e)))
}

/// One or more BPF programs, installed together as stacked filters
#[derive(Debug, Clone, Default)]
pub struct CompiledFilter {
    programs: Vec<(InstallSlot, BpfProgram)>,
}

impl CompiledFilter {
    /// Compile a filter configuration for the running architecture.
    pub fn compile(config: &SyscallFilterConfig) -> Result<Self> {
        let entries = parse_entries(&config.syscalls)?;
        let violation = Verdict::from_violation(config.violation.as_ref())?;
        let arch = target_arch()?;

        match config.mode {
            FilterMode::Allow => {
                if entries.iter().any(|e| e.errno.is_some()) {
                    return Err(ConfineError::InvalidConfig(
                        "Per-syscall errno values are only valid in a deny list".to_string(),
                    ));
                }

                let mut allowed: BTreeSet<i64> = entries.iter().map(|e| e.number).collect();
                allowed.extend(
                    EXEC_BOOTSTRAP_SYSCALLS
                        .iter()
                        .filter_map(|name| get_syscall_number_from_name(name)),
                );

                let rules = allowed.into_iter().map(|nr| (nr, Vec::new())).collect();
                let program = build_program(rules, violation.action(), SeccompAction::Allow, arch)?;
                debug!("Compiled allow-list filter ({} instructions)", program.len());
                Ok(Self {
                    programs: vec![(InstallSlot::AllowList, program)],
                })
            }
            FilterMode::Deny => {
                if entries.is_empty() {
                    return Ok(Self::default());
                }

                // Later entries for the same syscall win.
                let mut by_syscall: BTreeMap<i64, Verdict> = BTreeMap::new();
                for entry in &entries {
                    let verdict = entry.errno.map(Verdict::Errno).unwrap_or(violation);
                    by_syscall.insert(entry.number, verdict);
                }

                let mut by_verdict: BTreeMap<Verdict, BTreeMap<i64, Vec<SeccompRule>>> =
                    BTreeMap::new();
                for (nr, verdict) in by_syscall {
                    by_verdict.entry(verdict).or_default().insert(nr, Vec::new());
                }

                let mut filter = Self::default();
                for (verdict, rules) in by_verdict {
                    let slot = if rules.contains_key(&(libc::SYS_seccomp as i64)) {
                        InstallSlot::DenySeccomp
                    } else {
                        InstallSlot::Deny
                    };
                    let program =
                        build_program(rules, SeccompAction::Allow, verdict.action(), arch)?;
                    filter.push(slot, program)?;
                }
                debug!("Compiled deny-list filter ({} programs)", filter.program_count());
                Ok(filter)
            }
        }
    }

    /// Deny every syscall of the given groups with `errno`.
    pub fn deny_groups(groups: &[&str], errno: u32) -> Result<Self> {
        let config = SyscallFilterConfig {
            mode: FilterMode::Deny,
            syscalls: groups.iter().map(|g| g.to_string()).collect(),
            violation: Some(ViolationAction::Errno(errno.to_string())),
        };
        Self::compile(&config)
    }

    /// Stack another filter's programs onto this one.
    ///
    /// Fails when both filters refuse `seccomp(2)`, since the second could
    /// never be installed.
    pub fn extend(&mut self, other: CompiledFilter) -> Result<()> {
        for (slot, program) in other.programs {
            self.push(slot, program)?;
        }
        Ok(())
    }

    fn push(&mut self, slot: InstallSlot, program: BpfProgram) -> Result<()> {
        if slot == InstallSlot::DenySeccomp
            && self.programs.iter().any(|(s, _)| *s == InstallSlot::DenySeccomp)
        {
            return Err(ConfineError::InvalidConfig(
                "Only one syscall filter may deny seccomp".to_string(),
            ));
        }
        self.programs.push((slot, program));
        // Stable: programs in the same slot keep their relative order.
        self.programs.sort_by_key(|(slot, _)| *slot);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    /// Install all programs on the calling thread.
    ///
    /// Safe to call between fork and exec: it sets `PR_SET_NO_NEW_PRIVS` once
    /// and then issues one `seccomp` call per already-compiled program,
    /// without allocating. Returns the raw errno on failure.
    pub fn install(&self) -> std::result::Result<(), i32> {
        if self.programs.is_empty() {
            return Ok(());
        }
        if unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) } != 0 {
            return Err(last_errno());
        }

        for (_, program) in &self.programs {
            let len = u16::try_from(program.len()).map_err(|_| libc::EINVAL)?;
            // seccompiler's sock_filter has the kernel layout.
            let fprog = libc::sock_fprog {
                len,
                filter: program.as_ptr() as *mut libc::sock_filter,
            };
            let ret = unsafe {
                libc::syscall(
                    libc::SYS_seccomp,
                    SECCOMP_SET_MODE_FILTER,
                    0u32,
                    &fprog as *const libc::sock_fprog,
                )
            };
            if ret != 0 {
                return Err(last_errno());
            }
        }
        Ok(())
    }
}
