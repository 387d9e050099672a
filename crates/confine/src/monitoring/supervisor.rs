//! Supervision of a launched process until it terminates
//!
//! [`Supervisor::poll`] performs one bounded wait step so it can be driven
//! from an external event loop; [`Supervisor::wait`] loops it.

use std::time::{Duration, Instant};

use log::{info, warn};
use nix::unistd::Pid;

use confine_core::{ConfineError, Result, TerminationResult};

use crate::execution::LaunchHandle;

/// Default step length for [`Supervisor::wait`]
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Watches one launched process, enforcing an optional timeout
#[derive(Debug)]
pub struct Supervisor {
    handle: LaunchHandle,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    result: Option<TerminationResult>,
}

impl Supervisor {
    /// Start supervising; the timeout counts from now.
    pub fn new(handle: LaunchHandle, timeout: Option<Duration>) -> Self {
        Self {
            handle,
            timeout,
            deadline: timeout.map(|t| Instant::now() + t),
            result: None,
        }
    }

    pub fn pid(&self) -> Pid {
        self.handle.pid()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn handle(&self) -> &LaunchHandle {
        &self.handle
    }

    /// Final result, once the process has terminated
    pub fn result(&self) -> Option<&TerminationResult> {
        self.result.as_ref()
    }

    /// Wait at most `max_wait` for the process to terminate.
    ///
    /// Returns `Ok(None)` while it is still running. Calling again after a
    /// result was returned fails with [`ConfineError::AlreadyFinished`].
    pub fn poll(&mut self, max_wait: Duration) -> Result<Option<TerminationResult>> {
        if self.result.is_some() {
            return Err(ConfineError::AlreadyFinished);
        }

        if let Some(result) = self.handle.try_reap()? {
            return Ok(Some(self.finish(result)));
        }
        if self.deadline_passed() {
            return self.time_out().map(Some);
        }

        let wait = match self.deadline {
            Some(deadline) => max_wait.min(deadline.saturating_duration_since(Instant::now())),
            None => max_wait,
        };
        self.handle.wait_exit(wait)?;

        if let Some(result) = self.handle.try_reap()? {
            return Ok(Some(self.finish(result)));
        }
        if self.deadline_passed() {
            return self.time_out().map(Some);
        }
        Ok(None)
    }

    /// Poll until the process terminates, calling `on_tick` with the elapsed
    /// time after every step that did not finish it.
    pub fn wait<F>(&mut self, poll_interval: Duration, mut on_tick: F) -> Result<TerminationResult>
    where
        F: FnMut(Duration),
    {
        loop {
            if let Some(result) = self.poll(poll_interval)? {
                return Ok(result);
            }
            on_tick(self.handle.elapsed());
        }
    }

    /// Kill the process and reap it.
    pub fn kill(&mut self) -> Result<TerminationResult> {
        if self.result.is_some() {
            return Err(ConfineError::AlreadyFinished);
        }
        self.handle.kill()?;
        let result = self.handle.reap_blocking()?;
        Ok(self.finish(result))
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn time_out(&mut self) -> Result<TerminationResult> {
        warn!(
            "Process {} exceeded its timeout of {:?}, killing",
            self.handle.pid(),
            self.timeout.unwrap_or_default()
        );
        self.handle.kill()?;
        // A child that exited on its own before the SIGKILL keeps its status.
        let result = match self.handle.reap_blocking()? {
            TerminationResult::KilledBySignal { signal } if signal == libc::SIGKILL => {
                TerminationResult::TimedOut
            }
            other => other,
        };
        Ok(self.finish(result))
    }

    fn finish(&mut self, result: TerminationResult) -> TerminationResult {
        info!(
            "Process {} {} after {:?}",
            self.handle.pid(),
            result,
            self.handle.elapsed()
        );
        self.result = Some(result.clone());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::Launcher;
    use crate::spec::ExecutionSpecBuilder;
    use confine_core::SystemCapabilities;

    fn launch(program: &str, args: &[&str]) -> LaunchHandle {
        let spec = ExecutionSpecBuilder::new(program)
            .args(args.iter().copied())
            .system_capabilities(SystemCapabilities::detect())
            .build()
            .unwrap();
        Launcher::launch(&spec).unwrap()
    }

    #[test]
    fn test_poll_returns_none_while_running() {
        let mut supervisor = Supervisor::new(launch("/bin/sleep", &["5"]), None);
        assert!(supervisor.poll(Duration::from_millis(10)).unwrap().is_none());
        let result = supervisor.kill().unwrap();
        assert_eq!(
            result,
            TerminationResult::KilledBySignal {
                signal: libc::SIGKILL
            }
        );
    }

    #[test]
    fn test_wait_reports_exit_and_ticks() {
        let mut supervisor = Supervisor::new(launch("/bin/sh", &["-c", "sleep 0.2; exit 3"]), None);
        let mut ticks = 0;
        let result = supervisor
            .wait(Duration::from_millis(20), |_| ticks += 1)
            .unwrap();
        assert_eq!(result, TerminationResult::Exited { code: 3 });
        assert!(ticks > 0);
        assert_eq!(supervisor.result(), Some(&result));
    }

    #[test]
    fn test_poll_after_finish_fails() {
        let mut supervisor = Supervisor::new(launch("/bin/true", &[]), None);
        supervisor.wait(DEFAULT_POLL_INTERVAL, |_| {}).unwrap();
        assert!(matches!(
            supervisor.poll(Duration::ZERO),
            Err(ConfineError::AlreadyFinished)
        ));
    }

    #[test]
    fn test_exit_racing_the_deadline_keeps_status() {
        let mut supervisor = Supervisor::new(
            launch("/bin/sh", &["-c", "exit 7"]),
            Some(Duration::ZERO),
        );
        // Exited but not yet reaped when the deadline handling runs.
        supervisor.handle.wait_exit(Duration::from_secs(2)).unwrap();
        let result = supervisor.time_out().unwrap();
        assert_eq!(result, TerminationResult::Exited { code: 7 });
        assert_eq!(supervisor.result(), Some(&result));
    }

    #[test]
    fn test_timeout_kills_child() {
        let mut supervisor = Supervisor::new(
            launch("/bin/sleep", &["30"]),
            Some(Duration::from_millis(200)),
        );
        let pid = supervisor.pid();
        let started = Instant::now();
        let result = supervisor.wait(DEFAULT_POLL_INTERVAL, |_| {}).unwrap();
        assert_eq!(result, TerminationResult::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(
            nix::sys::signal::kill(pid, None),
            Err(nix::errno::Errno::ESRCH)
        );
    }
}
