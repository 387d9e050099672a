use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "confine-ctl")]
#[command(version, about = "Run programs under a confined execution spec", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
#[command(after_help = "EXAMPLES:
    # Direct execution
    confine-ctl --private-tmp --user nobody /bin/ls /tmp
    confine-ctl --deny-syscall @mount --syscall-errno EPERM mount -t tmpfs none /mnt

    # Using subcommands
    confine-ctl run --spec unit.json --timeout 30
    confine-ctl check
    confine-ctl groups

EXIT STATUS:
    The program's exit code, 128+N when killed by signal N,
    124 on timeout, 125 when confinement setup failed.
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub direct: DirectArgs,

    /// Kill the program after this many seconds
    #[arg(short, long, value_name = "SECONDS", global = true)]
    pub timeout: Option<u64>,

    /// Show verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Flags for direct mode: `confine-ctl [FLAGS] PROGRAM [ARGS...]`
#[derive(Args, Debug, Default)]
pub struct DirectArgs {
    /// Program to run
    #[arg(value_name = "PROGRAM")]
    pub program: Option<String>,

    /// Program arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Run as this user (name or uid)
    #[arg(short, long, value_name = "USER")]
    pub user: Option<String>,

    /// Run with this primary group (name or gid)
    #[arg(short, long, value_name = "GROUP")]
    pub group: Option<String>,

    /// Working directory of the program
    #[arg(short = 'w', long, value_name = "PATH")]
    pub working_directory: Option<PathBuf>,

    /// Set an environment variable (NAME=VALUE)
    #[arg(short = 'E', long = "setenv", value_name = "NAME=VALUE")]
    pub environment: Vec<String>,

    /// Give the program private /tmp and /var/tmp directories
    #[arg(long)]
    pub private_tmp: bool,

    /// Give the program a minimal private /dev
    #[arg(long)]
    pub private_devices: bool,

    /// Run in a network namespace with only loopback
    #[arg(long)]
    pub private_network: bool,

    /// Make a path read-only (prefix with '-' to ignore if missing)
    #[arg(long = "read-only", value_name = "PATH")]
    pub read_only: Vec<String>,

    /// Make a path inaccessible (prefix with '-' to ignore if missing)
    #[arg(long, value_name = "PATH")]
    pub inaccessible: Vec<String>,

    /// Ignore SIGPIPE in the program
    #[arg(long, value_name = "BOOL", default_value_t = true, action = clap::ArgAction::Set)]
    pub ignore_sigpipe: bool,

    /// Deny a syscall or @group (repeatable)
    #[arg(long, value_name = "SYSCALL", conflicts_with = "allow_syscall")]
    pub deny_syscall: Vec<String>,

    /// Allow only these syscalls or @groups (repeatable)
    #[arg(long, value_name = "SYSCALL")]
    pub allow_syscall: Vec<String>,

    /// Fail filtered syscalls with this errno instead of killing
    #[arg(long, value_name = "ERRNO")]
    pub syscall_errno: Option<String>,

    /// Set no_new_privs before exec
    #[arg(long)]
    pub no_new_privileges: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the program described by a JSON execution spec
    Run {
        /// Path to the JSON document
        #[arg(short, long, value_name = "FILE")]
        spec: PathBuf,
    },

    /// Report which kernel features are available
    Check,

    /// List the named syscall groups
    Groups,
}
