//! confine: confined-process launcher and supervisor for Linux
//!
//! Builds a validated [`ExecutionSpec`] from a declarative configuration,
//! forks a child that confines itself in a fixed order (namespaces,
//! filesystem, identity and capabilities, syscall filter) and execs the
//! program, then supervises it until it exits, is killed, fails during
//! setup or exceeds its timeout.
//!
//! # Example
//!
//! ```ignore
//! use confine::{ExecutionSpec, run};
//! use std::time::Duration;
//!
//! let spec = ExecutionSpec::builder("/bin/echo")
//!     .arg("hello $USER")
//!     .private_tmp(true)
//!     .build()?;
//!
//! let result = run(&spec, Some(Duration::from_secs(30)))?;
//! println!("{}", result);
//! ```

use std::time::Duration;

pub mod execution;
pub mod monitoring;
pub mod spec;

pub use confine_core::{
    self as core, ConfineError, ExecConfig, Result, SetupFailure, SetupStage,
    SystemCapabilities, TerminationResult, config, util,
};
pub use confine_seccomp::{GROUPS, SyscallGroup};

pub use execution::{LaunchHandle, Launcher};
pub use monitoring::{DEFAULT_POLL_INTERVAL, Supervisor};
pub use spec::{ExecutionSpec, ExecutionSpecBuilder};

/// Launch `spec` and wait for it to terminate.
pub fn run(spec: &ExecutionSpec, timeout: Option<Duration>) -> Result<TerminationResult> {
    let handle = Launcher::launch(spec)?;
    Supervisor::new(handle, timeout).wait(DEFAULT_POLL_INTERVAL, |_| {})
}
