//! Setup-failure channel between the forked child and the launcher
//!
//! A close-on-exec pipe. A child that reaches `execve` successfully closes
//! its end implicitly; a child that fails writes one record and exits. The
//! launcher reads only after reaping, so the read end is non-blocking.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use log::warn;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::unistd::pipe2;

use confine_core::result::MAX_RECORD_LEN;
use confine_core::util::last_errno;
use confine_core::{ConfineError, Result, SetupFailure};

/// Parent side of the channel
#[derive(Debug)]
pub struct FailureChannel {
    read: OwnedFd,
}

/// Create the channel; the returned fd is the child's write end.
pub fn failure_channel() -> Result<(FailureChannel, OwnedFd)> {
    let (read, write) = pipe2(OFlag::O_CLOEXEC)
        .map_err(|e| ConfineError::Syscall(format!("pipe2 failed: {}", e)))?;
    Ok((FailureChannel { read }, write))
}

impl FailureChannel {
    /// Switch the read end to non-blocking; done once the write end is dropped.
    pub fn set_nonblocking(&self) -> Result<()> {
        let flags = fcntl(self.read.as_raw_fd(), FcntlArg::F_GETFL)
            .map_err(|e| ConfineError::Syscall(format!("fcntl F_GETFL failed: {}", e)))?;
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(self.read.as_raw_fd(), FcntlArg::F_SETFL(flags))
            .map_err(|e| ConfineError::Syscall(format!("fcntl F_SETFL failed: {}", e)))?;
        Ok(())
    }

    /// Read whatever the child wrote. `None` when it wrote nothing.
    pub fn drain(&self) -> Option<SetupFailure> {
        let mut buf = [0u8; MAX_RECORD_LEN];
        let mut len = 0usize;
        while len < buf.len() {
            let n = unsafe {
                libc::read(
                    self.read.as_raw_fd(),
                    buf[len..].as_mut_ptr().cast(),
                    buf.len() - len,
                )
            };
            if n > 0 {
                len += n as usize;
                continue;
            }
            if n < 0 && last_errno() == libc::EINTR {
                continue;
            }
            break;
        }

        if len == 0 {
            return None;
        }
        let failure = SetupFailure::decode(&buf[..len]);
        if failure.is_none() {
            warn!("Discarding malformed setup-failure record ({} bytes)", len);
        }
        failure
    }
}

/// Write a complete record from the child. Allocation-free; errors are
/// ignored since the exit code still identifies the stage.
pub fn write_record(fd: RawFd, record: &[u8]) {
    let mut written = 0usize;
    while written < record.len() {
        let n = unsafe {
            libc::write(
                fd,
                record[written..].as_ptr().cast(),
                record.len() - written,
            )
        };
        if n > 0 {
            written += n as usize;
        } else if n < 0 && last_errno() == libc::EINTR {
            continue;
        } else {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confine_core::{SetupStage, StepError};

    #[test]
    fn test_empty_channel_drains_to_none() {
        let (channel, write) = failure_channel().unwrap();
        drop(write);
        channel.set_nonblocking().unwrap();
        assert!(channel.drain().is_none());
    }

    #[test]
    fn test_open_empty_channel_does_not_block() {
        let (channel, _write) = failure_channel().unwrap();
        channel.set_nonblocking().unwrap();
        assert!(channel.drain().is_none());
    }

    #[test]
    fn test_record_round_trip_through_pipe() {
        let (channel, write) = failure_channel().unwrap();
        let mut buf = [0u8; MAX_RECORD_LEN];
        let n = StepError::new("setresuid", libc::EPERM).encode(SetupStage::Privilege, &mut buf);
        write_record(write.as_raw_fd(), &buf[..n]);
        drop(write);
        channel.set_nonblocking().unwrap();

        let failure = channel.drain().unwrap();
        assert_eq!(failure.stage, SetupStage::Privilege);
        assert_eq!(failure.errno, libc::EPERM);
        assert_eq!(failure.message, "setresuid");
    }

    #[test]
    fn test_both_ends_close_on_exec() {
        let (channel, write) = failure_channel().unwrap();
        for fd in [channel.read.as_raw_fd(), write.as_raw_fd()] {
            let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
            assert!(flags & libc::FD_CLOEXEC != 0);
        }
    }
}
