//! Named syscall groups
//!
//! A group is referenced as `@name` in a filter list. Groups may include
//! other groups. Members that do not exist on the running architecture are
//! skipped when the group is expanded.

use std::collections::BTreeSet;

use confine_core::{ConfineError, Result};

use crate::syscall_table::get_syscall_number_from_name;

/// A named set of syscalls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallGroup {
    pub name: &'static str,
    pub description: &'static str,
    members: &'static [&'static str],
}

impl SyscallGroup {
    /// Raw members, including nested `@group` references
    pub fn members(&self) -> &'static [&'static str] {
        self.members
    }
}

pub const GROUPS: &[SyscallGroup] = &[
    SyscallGroup {
        name: "@default",
        description: "System calls that are always permitted",
        members: &[
            "arch_prctl",
            "brk",
            "clock_getres",
            "clock_gettime",
            "clock_nanosleep",
            "execve",
            "exit",
            "exit_group",
            "futex",
            "get_robust_list",
            "getegid",
            "geteuid",
            "getgid",
            "getgroups",
            "getpgid",
            "getpgrp",
            "getpid",
            "getppid",
            "getrandom",
            "getresgid",
            "getresuid",
            "getrlimit",
            "getsid",
            "gettid",
            "gettimeofday",
            "getuid",
            "membarrier",
            "mmap",
            "mprotect",
            "munmap",
            "nanosleep",
            "pause",
            "prlimit64",
            "restart_syscall",
            "rseq",
            "rt_sigreturn",
            "sched_getaffinity",
            "sched_yield",
            "set_robust_list",
            "set_tid_address",
            "time",
            "uname",
        ],
    },
    SyscallGroup {
        name: "@basic-io",
        description: "System calls for basic I/O: reading, writing, seeking, file descriptor duplication and closing",
        members: &[
            "close",
            "close_range",
            "dup",
            "dup2",
            "dup3",
            "lseek",
            "pread64",
            "preadv",
            "preadv2",
            "pwrite64",
            "pwritev",
            "pwritev2",
            "read",
            "readv",
            "write",
            "writev",
        ],
    },
    SyscallGroup {
        name: "@file-system",
        description: "File system operations: opening, creating files and directories, changing access modes and ownership",
        members: &[
            "access",
            "chdir",
            "chmod",
            "close",
            "creat",
            "faccessat",
            "faccessat2",
            "fallocate",
            "fchdir",
            "fchmod",
            "fchmodat",
            "fcntl",
            "fgetxattr",
            "flistxattr",
            "fremovexattr",
            "fsetxattr",
            "fstat",
            "fstatfs",
            "ftruncate",
            "futimesat",
            "getcwd",
            "getdents",
            "getdents64",
            "getxattr",
            "inotify_add_watch",
            "inotify_init",
            "inotify_init1",
            "inotify_rm_watch",
            "lgetxattr",
            "link",
            "linkat",
            "listxattr",
            "llistxattr",
            "lremovexattr",
            "lsetxattr",
            "lstat",
            "mkdir",
            "mkdirat",
            "mknod",
            "mknodat",
            "mmap",
            "munmap",
            "newfstatat",
            "open",
            "openat",
            "readlink",
            "readlinkat",
            "removexattr",
            "rename",
            "renameat",
            "renameat2",
            "rmdir",
            "setxattr",
            "stat",
            "statfs",
            "statx",
            "symlink",
            "symlinkat",
            "truncate",
            "unlink",
            "unlinkat",
            "utime",
            "utimensat",
            "utimes",
        ],
    },
    SyscallGroup {
        name: "@io-event",
        description: "Event loop system calls",
        members: &[
            "epoll_create",
            "epoll_create1",
            "epoll_ctl",
            "epoll_pwait",
            "epoll_wait",
            "eventfd",
            "eventfd2",
            "poll",
            "ppoll",
            "pselect6",
            "select",
        ],
    },
    SyscallGroup {
        name: "@ipc",
        description: "SysV IPC, POSIX message queues and other IPC",
        members: &[
            "memfd_create",
            "mq_getsetattr",
            "mq_notify",
            "mq_open",
            "mq_timedreceive",
            "mq_timedsend",
            "mq_unlink",
            "msgctl",
            "msgget",
            "msgrcv",
            "msgsnd",
            "pipe",
            "pipe2",
            "process_vm_readv",
            "process_vm_writev",
            "semctl",
            "semget",
            "semop",
            "semtimedop",
            "shmat",
            "shmctl",
            "shmdt",
            "shmget",
        ],
    },
    SyscallGroup {
        name: "@module",
        description: "Loading and unloading of kernel modules",
        members: &["delete_module", "finit_module", "init_module"],
    },
    SyscallGroup {
        name: "@mount",
        description: "Mounting and unmounting of file systems",
        members: &["chroot", "mount", "pivot_root", "umount2"],
    },
    SyscallGroup {
        name: "@network-io",
        description: "Network or Unix socket I/O",
        members: &[
            "accept",
            "accept4",
            "bind",
            "connect",
            "getpeername",
            "getsockname",
            "getsockopt",
            "listen",
            "recvfrom",
            "recvmmsg",
            "recvmsg",
            "sendmmsg",
            "sendmsg",
            "sendto",
            "setsockopt",
            "shutdown",
            "socket",
            "socketpair",
        ],
    },
    SyscallGroup {
        name: "@privileged",
        description: "All system calls which need super-user capabilities",
        members: &[
            "@clock",
            "@module",
            "@raw-io",
            "@reboot",
            "@swap",
            "_sysctl",
            "acct",
            "bpf",
            "capset",
            "chown",
            "chroot",
            "fanotify_init",
            "fchown",
            "fchownat",
            "lchown",
            "mount",
            "open_by_handle_at",
            "pivot_root",
            "quotactl",
            "setdomainname",
            "setfsgid",
            "setfsuid",
            "setgid",
            "setgroups",
            "sethostname",
            "setregid",
            "setresgid",
            "setresuid",
            "setreuid",
            "setuid",
            "umount2",
            "vhangup",
        ],
    },
    SyscallGroup {
        name: "@raw-io",
        description: "Raw I/O port access",
        members: &["ioperm", "iopl"],
    },
    SyscallGroup {
        name: "@reboot",
        description: "Reboot and reboot preparation/kexec",
        members: &["kexec_load", "reboot"],
    },
    SyscallGroup {
        name: "@swap",
        description: "Enabling and disabling swap devices",
        members: &["swapoff", "swapon"],
    },
    SyscallGroup {
        name: "@clock",
        description: "Changing the system clock",
        members: &["adjtimex", "clock_adjtime", "clock_settime", "settimeofday"],
    },
    SyscallGroup {
        name: "@process",
        description: "Process control, execution, namespacing operations",
        members: &[
            "arch_prctl",
            "capget",
            "clone",
            "clone3",
            "execveat",
            "fork",
            "getrusage",
            "kill",
            "pidfd_open",
            "pidfd_send_signal",
            "prctl",
            "rt_sigqueueinfo",
            "rt_tgsigqueueinfo",
            "setns",
            "tgkill",
            "times",
            "tkill",
            "unshare",
            "vfork",
            "wait4",
            "waitid",
        ],
    },
    SyscallGroup {
        name: "@signal",
        description: "System calls for manipulating and handling process signals",
        members: &[
            "rt_sigaction",
            "rt_sigpending",
            "rt_sigprocmask",
            "rt_sigsuspend",
            "rt_sigtimedwait",
            "sigaltstack",
            "signalfd",
            "signalfd4",
        ],
    },
];

/// Look up a group by name (with the leading `@`)
pub fn find_group(name: &str) -> Option<&'static SyscallGroup> {
    GROUPS.iter().find(|g| g.name == name)
}

/// Expand a group into the syscall names available on this architecture.
pub fn expand_group(name: &str) -> Result<BTreeSet<&'static str>> {
    let mut out = BTreeSet::new();
    let mut visiting = Vec::new();
    expand_into(name, &mut out, &mut visiting)?;
    Ok(out)
}

fn expand_into(
    name: &str,
    out: &mut BTreeSet<&'static str>,
    visiting: &mut Vec<&'static str>,
) -> Result<()> {
    let group = find_group(name)
        .ok_or_else(|| ConfineError::InvalidConfig(format!("Unknown syscall group: {}", name)))?;
    if visiting.contains(&group.name) {
        return Ok(());
    }
    visiting.push(group.name);

    for member in group.members {
        if member.starts_with('@') {
            expand_into(member, out, visiting)?;
        } else if get_syscall_number_from_name(member).is_some() {
            out.insert(member);
        }
    }

    visiting.pop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_group_expands() {
        for group in GROUPS {
            let expanded = expand_group(group.name).unwrap();
            if !matches!(group.name, "@raw-io") {
                assert!(!expanded.is_empty(), "{} expanded to nothing", group.name);
            }
        }
    }

    #[test]
    fn test_group_members_are_known_or_groups() {
        for group in GROUPS {
            for member in group.members() {
                if let Some(nested) = member.strip_prefix('@') {
                    assert!(find_group(&format!("@{}", nested)).is_some());
                }
            }
        }
    }

    #[test]
    fn test_privileged_includes_nested_groups() {
        let privileged = expand_group("@privileged").unwrap();
        assert!(privileged.contains("init_module"));
        assert!(privileged.contains("reboot"));
        assert!(privileged.contains("setuid"));
        assert!(privileged.contains("clock_settime"));
    }

    #[test]
    fn test_module_group() {
        let module = expand_group("@module").unwrap();
        assert_eq!(
            module.into_iter().collect::<Vec<_>>(),
            vec!["delete_module", "finit_module", "init_module"]
        );
    }

    #[test]
    fn test_unknown_group() {
        let err = expand_group("@nonsense").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_group_names_unique() {
        let mut names: Vec<_> = GROUPS.iter().map(|g| g.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), GROUPS.len());
    }
}
