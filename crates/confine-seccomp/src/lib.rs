//! confine-seccomp: Seccomp BPF syscall filtering (no root required)
//!
//! Turns allow/deny lists of syscall names and `@group` references into
//! seccomp BPF programs. Compilation happens before fork; the child only
//! installs the finished programs, as the last confinement step.

pub mod bpf;
pub mod errno;
pub mod groups;
pub mod syscall_table;

pub use bpf::{CompiledFilter, EXEC_BOOTSTRAP_SYSCALLS};
pub use errno::parse_errno;
pub use groups::{GROUPS, SyscallGroup, expand_group, find_group};
