//! OOM score and I/O scheduling adjustments

use confine_core::config::{IoScheduling, IoSchedulingClass};
use confine_core::{ConfineError, Result, StepError};

pub const OOM_SCORE_ADJ_MIN: i32 = -1000;
pub const OOM_SCORE_ADJ_MAX: i32 = 1000;

const IOPRIO_WHO_PROCESS: libc::c_int = 1;
const IOPRIO_CLASS_SHIFT: u32 = 13;
const IOPRIO_MAX_LEVEL: u8 = 7;

/// Check the range and render the value written to `oom_score_adj`
pub fn oom_score_value(adjust: i32) -> Result<Vec<u8>> {
    if !(OOM_SCORE_ADJ_MIN..=OOM_SCORE_ADJ_MAX).contains(&adjust) {
        return Err(ConfineError::InvalidConfig(format!(
            "OOM score adjustment {} outside {}..={}",
            adjust, OOM_SCORE_ADJ_MIN, OOM_SCORE_ADJ_MAX
        )));
    }
    Ok(adjust.to_string().into_bytes())
}

/// Encode an `ioprio_set` value
pub fn ioprio_value(scheduling: &IoScheduling) -> Result<libc::c_int> {
    if scheduling.priority > IOPRIO_MAX_LEVEL {
        return Err(ConfineError::InvalidConfig(format!(
            "I/O priority {} outside 0..={}",
            scheduling.priority, IOPRIO_MAX_LEVEL
        )));
    }
    let (class, level) = match scheduling.class {
        // The kernel rejects a level without a class.
        IoSchedulingClass::None => (0, 0),
        IoSchedulingClass::Realtime => (1, scheduling.priority),
        IoSchedulingClass::BestEffort => (2, scheduling.priority),
        IoSchedulingClass::Idle => (3, 0),
    };
    Ok(((class << IOPRIO_CLASS_SHIFT) | u32::from(level)) as libc::c_int)
}

/// Write a pre-rendered value to `/proc/self/oom_score_adj`. Runs in the child.
pub fn write_oom_score(value: &[u8]) -> std::result::Result<(), StepError<'static>> {
    let fd = unsafe {
        libc::open(
            c"/proc/self/oom_score_adj".as_ptr(),
            libc::O_WRONLY | libc::O_CLOEXEC,
        )
    };
    if fd < 0 {
        return Err(StepError::last_os("open oom_score_adj"));
    }
    let written = unsafe { libc::write(fd, value.as_ptr().cast(), value.len()) };
    let result = if written < 0 {
        Err(StepError::last_os("write oom_score_adj"))
    } else {
        Ok(())
    };
    unsafe { libc::close(fd) };
    result
}

/// Apply an encoded I/O priority to the calling process. Runs in the child.
pub fn set_ioprio(value: libc::c_int) -> std::result::Result<(), StepError<'static>> {
    let ret = unsafe { libc::syscall(libc::SYS_ioprio_set, IOPRIO_WHO_PROCESS, 0, value) };
    if ret != 0 {
        return Err(StepError::last_os("ioprio_set"));
    }
    Ok(())
}

/// Set `PR_SET_NO_NEW_PRIVS`. Runs in the child.
pub fn set_no_new_privs() -> std::result::Result<(), StepError<'static>> {
    nix::sys::prctl::set_no_new_privs()
        .map_err(|errno| StepError::new("set no_new_privs", errno as i32))
}
