use console::style;
use log::{debug, info};
use std::path::Path;
use std::time::Duration;

use confine::config::{FilterMode, PathSpec, SyscallFilterConfig, ViolationAction};
use confine::{ExecConfig, ExecutionSpecBuilder, TerminationResult};

use crate::cli::DirectArgs;

/// Exit status when the timeout expired
pub const EXIT_TIMEOUT: i32 = 124;
/// Exit status when confinement setup failed in the child
pub const EXIT_SETUP_FAILED: i32 = 125;

/// Map a termination result onto a shell exit status
pub fn exit_code(result: &TerminationResult) -> i32 {
    match result {
        TerminationResult::Exited { code } => *code,
        TerminationResult::KilledBySignal { signal } => 128 + signal,
        TerminationResult::TimedOut => EXIT_TIMEOUT,
        TerminationResult::SetupFailed(_) => EXIT_SETUP_FAILED,
    }
}

/// Load a JSON execution spec and run it
pub fn run_spec_file(path: &Path, timeout: Option<u64>) -> Result<i32, Box<dyn std::error::Error>> {
    debug!("Loading spec from {}", path.display());
    let config = ExecConfig::from_json_file(path)?;
    execute(ExecutionSpecBuilder::from_config(config), timeout)
}

/// Run a program described by command-line flags
pub fn run_direct(
    program: String,
    args: DirectArgs,
    timeout: Option<u64>,
) -> Result<i32, Box<dyn std::error::Error>> {
    execute(direct_builder(program, args)?, timeout)
}

fn direct_builder(
    program: String,
    args: DirectArgs,
) -> Result<ExecutionSpecBuilder, Box<dyn std::error::Error>> {
    let mut builder = ExecutionSpecBuilder::new(program)
        .args(args.args)
        .private_tmp(args.private_tmp)
        .private_devices(args.private_devices)
        .private_network(args.private_network)
        .ignore_sigpipe(args.ignore_sigpipe)
        .no_new_privileges(args.no_new_privileges);

    if let Some(user) = args.user {
        builder = builder.user(user);
    }
    if let Some(group) = args.group {
        builder = builder.group(group);
    }
    if let Some(dir) = args.working_directory {
        builder = builder.working_directory(dir);
    }
    for assignment in args.environment {
        builder = builder.assignment(assignment);
    }
    for path in &args.read_only {
        builder = builder.read_only_path(path.parse::<PathSpec>()?);
    }
    for path in &args.inaccessible {
        builder = builder.inaccessible_path(path.parse::<PathSpec>()?);
    }

    let (mode, syscalls) = if !args.allow_syscall.is_empty() {
        (FilterMode::Allow, args.allow_syscall)
    } else {
        (FilterMode::Deny, args.deny_syscall)
    };
    if !syscalls.is_empty() {
        debug!("Syscall filter: {:?} {:?}", mode, syscalls);
        builder = builder.syscall_filter(SyscallFilterConfig {
            mode,
            syscalls,
            violation: Some(match args.syscall_errno {
                Some(errno) => ViolationAction::Errno(errno),
                None => ViolationAction::Kill,
            }),
        });
    }

    Ok(builder)
}

fn execute(
    builder: ExecutionSpecBuilder,
    timeout: Option<u64>,
) -> Result<i32, Box<dyn std::error::Error>> {
    let spec = builder.build()?;
    let timeout = timeout.map(Duration::from_secs);

    info!(
        "Executing: {} {:?}",
        spec.executable().display(),
        spec.config().args
    );
    let result = confine::run(&spec, timeout)?;
    report(&result);
    Ok(exit_code(&result))
}

fn report(result: &TerminationResult) {
    let outcome = match result {
        TerminationResult::Exited { code: 0 } => style(result.to_string()).green().bold(),
        TerminationResult::Exited { .. } => style(result.to_string()).yellow().bold(),
        _ => style(result.to_string()).red().bold(),
    };
    eprintln!("{}={}", style("result").dim(), outcome);
}
