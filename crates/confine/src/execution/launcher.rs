//! Fork, staged child setup, and exec
//!
//! Everything the child needs is prepared in the parent: the environment,
//! argv, every path as a `CString`, the mount plan and compiled filters.
//! Between fork and exec the child runs a fixed pipeline of stages and
//! touches only that prepared data.
//!
//! Child order:
//! 1. Reset the signal mask and mark inherited fds close-on-exec
//! 2. Namespace: network namespace and loopback
//! 3. Filesystem: runtime directory and mount plan
//! 4. Privilege: personality, cwd, umask, identity, capabilities, resources
//! 5. SyscallFilter: install compiled filters (irreversible)
//! 6. Exec: SIGPIPE disposition, `execve`

use std::ffi::CString;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};

use confine_core::result::MAX_RECORD_LEN;
use confine_core::util::{last_errno, path_to_cstring, str_to_cstring};
use confine_core::{ConfineError, Result, SetupStage, StepError, TerminationResult};
use confine_env::{EnvironmentBuilder, expand_argv};
use confine_fs::{MountPlan, PrivateTmp};

use crate::execution::channel::{FailureChannel, failure_channel, write_record};
use crate::spec::ExecutionSpec;

const CLOSE_RANGE_CLOEXEC: libc::c_uint = 1 << 2;
const FALLBACK_MAX_FD: libc::c_int = 65536;

/// Executable image handed to `execve`
struct ExecImage {
    path: CString,
    _argv: Vec<CString>,
    _envp: Vec<CString>,
    argv_ptrs: Vec<*const libc::c_char>,
    envp_ptrs: Vec<*const libc::c_char>,
}

impl ExecImage {
    fn new(path: &Path, argv: Vec<CString>, envp: Vec<CString>) -> Result<Self> {
        let argv_ptrs = null_terminated(&argv);
        let envp_ptrs = null_terminated(&envp);
        Ok(Self {
            path: path_to_cstring(path)?,
            _argv: argv,
            _envp: envp,
            argv_ptrs,
            envp_ptrs,
        })
    }
}

fn null_terminated(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

/// A step failure tagged with the stage it happened in
#[derive(Debug, Clone, Copy)]
struct StageFailure<'a> {
    stage: SetupStage,
    error: StepError<'a>,
}

fn tag<'a>(
    stage: SetupStage,
    result: std::result::Result<(), StepError<'a>>,
) -> std::result::Result<(), StageFailure<'a>> {
    result.map_err(|error| StageFailure { stage, error })
}

/// Starts confined processes
pub struct Launcher;

impl Launcher {
    /// Fork a child, confine it and exec the spec's program.
    ///
    /// Errors here happen in the parent before or at fork. Anything that
    /// fails inside the child is reported by the supervisor as
    /// [`TerminationResult::SetupFailed`].
    pub fn launch(spec: &ExecutionSpec) -> Result<LaunchHandle> {
        let config = spec.config();

        let env = EnvironmentBuilder::new(&config.environment, spec.snapshot())
            .user(spec.user_environment())
            .runtime_directory(spec.runtime_directory().map(|rd| rd.path().to_path_buf()))
            .build()?;

        let mut argv = Vec::with_capacity(config.args.len() + 1);
        argv.push(path_to_cstring(&config.program)?);
        for arg in expand_argv(&config.args, &env) {
            argv.push(str_to_cstring(&arg, "argument")?);
        }
        let image = ExecImage::new(spec.executable(), argv, env.to_envp()?)?;

        let private_tmp = if config.filesystem.private_tmp {
            Some(match spec.private_tmp_base() {
                Some(base) => PrivateTmp::create_in(base)?,
                None => PrivateTmp::create()?,
            })
        } else {
            None
        };

        let mut mounts = MountPlan::from_config(
            &config.filesystem,
            private_tmp.as_ref(),
            spec.state_dir(),
        )?;
        if let Some(runtime) = spec.runtime_directory() {
            mounts = mounts.with_runtime_directory(runtime.clone());
        }

        let (channel, write_end) = failure_channel()?;

        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                drop(channel);
                run_child(spec, &mounts, &image, write_end.as_raw_fd())
            }
            Ok(ForkResult::Parent { child }) => {
                drop(write_end);
                channel.set_nonblocking()?;
                let pidfd = open_pidfd(child);
                info!(
                    "Launched {} as pid {}",
                    spec.executable().display(),
                    child
                );
                Ok(LaunchHandle {
                    pid: child,
                    channel,
                    pidfd,
                    private_tmp,
                    started: Instant::now(),
                    reaped: false,
                })
            }
            Err(e) => Err(ConfineError::Syscall(format!("fork failed: {}", e))),
        }
    }
}

/// Child side. Never returns.
fn run_child(spec: &ExecutionSpec, mounts: &MountPlan, image: &ExecImage, channel: RawFd) -> ! {
    reset_signal_mask();
    mark_inherited_fds_cloexec();

    let failure = match run_stages(spec, mounts, image) {
        Ok(()) => StageFailure {
            stage: SetupStage::Exec,
            error: StepError::new("execve returned", 0),
        },
        Err(failure) => failure,
    };

    let mut record = [0u8; MAX_RECORD_LEN];
    let len = failure.error.encode(failure.stage, &mut record);
    write_record(channel, &record[..len]);
    unsafe { libc::_exit(failure.stage.exit_code()) }
}

fn run_stages<'a>(
    spec: &'a ExecutionSpec,
    mounts: &'a MountPlan,
    image: &'a ExecImage,
) -> std::result::Result<(), StageFailure<'a>> {
    tag(SetupStage::Namespace, spec.namespaces().enter())?;
    tag(SetupStage::Filesystem, mounts.apply())?;
    tag(SetupStage::Privilege, spec.privilege().apply())?;
    tag(
        SetupStage::SyscallFilter,
        spec.filter()
            .install()
            .map_err(|errno| StepError::new("install seccomp filter", errno)),
    )?;
    tag(SetupStage::Exec, exec(image, spec.config().ignore_sigpipe))
}

fn exec(image: &ExecImage, ignore_sigpipe: bool) -> std::result::Result<(), StepError<'_>> {
    let disposition = if ignore_sigpipe {
        libc::SIG_IGN
    } else {
        libc::SIG_DFL
    };
    if unsafe { libc::signal(libc::SIGPIPE, disposition) } == libc::SIG_ERR {
        return Err(StepError::last_os("set SIGPIPE disposition"));
    }

    unsafe {
        libc::execve(
            image.path.as_ptr(),
            image.argv_ptrs.as_ptr(),
            image.envp_ptrs.as_ptr(),
        )
    };
    Err(StepError::last_os("execve").with_subject(image.path.to_bytes()))
}

fn reset_signal_mask() {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigprocmask(libc::SIG_SETMASK, &set, std::ptr::null_mut());
    }
}

/// Inherited descriptors above stderr must not leak into the program.
fn mark_inherited_fds_cloexec() {
    let ret = unsafe {
        libc::syscall(
            libc::SYS_close_range,
            3 as libc::c_uint,
            libc::c_uint::MAX,
            CLOSE_RANGE_CLOEXEC,
        )
    };
    if ret == 0 {
        return;
    }

    let max = match unsafe { libc::sysconf(libc::_SC_OPEN_MAX) } {
        n if n > 0 => (n as libc::c_int).min(FALLBACK_MAX_FD),
        _ => FALLBACK_MAX_FD,
    };
    for fd in 3..max {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if flags >= 0 {
            unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) };
        }
    }
}

fn open_pidfd(pid: Pid) -> Option<OwnedFd> {
    let fd = unsafe { libc::syscall(libc::SYS_pidfd_open, pid.as_raw(), 0) };
    if fd < 0 {
        debug!("pidfd_open unavailable: {}", std::io::Error::last_os_error());
        return None;
    }
    Some(unsafe { OwnedFd::from_raw_fd(fd as RawFd) })
}

/// A running (or finished but unreaped) confined process
#[derive(Debug)]
pub struct LaunchHandle {
    pid: Pid,
    channel: FailureChannel,
    pidfd: Option<OwnedFd>,
    private_tmp: Option<PrivateTmp>,
    started: Instant,
    reaped: bool,
}

impl LaunchHandle {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Time since fork
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Host directory backing the private `/tmp`, if any
    pub fn private_tmp_path(&self) -> Option<&Path> {
        self.private_tmp.as_ref().map(|tmp| tmp.path())
    }

    /// Readable once the child has exited, when the kernel supports pidfds
    pub fn pidfd(&self) -> Option<BorrowedFd<'_>> {
        use std::os::fd::AsFd;
        self.pidfd.as_ref().map(|fd| fd.as_fd())
    }

    pub fn is_reaped(&self) -> bool {
        self.reaped
    }

    /// Reap the child if it has exited, without blocking.
    pub fn try_reap(&mut self) -> Result<Option<TerminationResult>> {
        self.reap(Some(WaitPidFlag::WNOHANG))
    }

    /// Block until the child exits.
    pub fn reap_blocking(&mut self) -> Result<TerminationResult> {
        loop {
            if let Some(result) = self.reap(None)? {
                return Ok(result);
            }
        }
    }

    /// Send SIGKILL. A child that already exited is not an error.
    pub fn kill(&self) -> Result<()> {
        if self.reaped {
            return Err(ConfineError::AlreadyFinished);
        }
        match kill(self.pid, Signal::SIGKILL) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => {
                warn!("Process {} already exited before SIGKILL", self.pid);
                Ok(())
            }
            Err(e) => Err(ConfineError::Syscall(format!("Failed to send SIGKILL: {}", e))),
        }
    }

    /// Sleep until the child may have exited or `max_wait` passed.
    pub fn wait_exit(&self, max_wait: Duration) -> Result<()> {
        let Some(pidfd) = &self.pidfd else {
            std::thread::sleep(max_wait);
            return Ok(());
        };

        let mut fds = [libc::pollfd {
            fd: pidfd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        }];
        let timeout = max_wait.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        let ret = unsafe { libc::poll(fds.as_mut_ptr(), 1, timeout) };
        if ret < 0 && last_errno() != libc::EINTR {
            return Err(ConfineError::ProcessMonitoring(format!(
                "poll on pidfd failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    fn reap(&mut self, flags: Option<WaitPidFlag>) -> Result<Option<TerminationResult>> {
        if self.reaped {
            return Err(ConfineError::AlreadyFinished);
        }
        let status = loop {
            match waitpid(self.pid, flags) {
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    return Err(ConfineError::ProcessMonitoring(format!(
                        "waitpid failed: {}",
                        e
                    )));
                }
                Ok(status) => break status,
            }
        };

        let result = match status {
            WaitStatus::Exited(_, code) => TerminationResult::Exited { code },
            WaitStatus::Signaled(_, signal, _) => TerminationResult::KilledBySignal {
                signal: signal as i32,
            },
            _ => return Ok(None),
        };
        self.reaped = true;

        // A setup-failure record wins over the wait status.
        let result = match self.channel.drain() {
            Some(failure) => TerminationResult::SetupFailed(failure),
            None => result,
        };
        debug!("Reaped pid {}: {}", self.pid, result);
        Ok(Some(result))
    }
}

impl Drop for LaunchHandle {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        let _ = kill(self.pid, Signal::SIGKILL);
        loop {
            match waitpid(self.pid, None) {
                Err(Errno::EINTR) => continue,
                Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) | Err(_) => break,
                Ok(_) => continue,
            }
        }
        self.reaped = true;
    }
}
