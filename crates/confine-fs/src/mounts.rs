//! Raw mount helpers used by the child between fork and exec
//!
//! Every function here takes pre-built C strings and performs a single
//! syscall. Nothing allocates.

use std::ffi::CStr;
use std::ptr;

use confine_core::StepError;
use confine_core::util::last_errno;

pub type StepResult<'a> = std::result::Result<(), StepError<'a>>;

fn check<'a>(ret: libc::c_int, step: &'static str, subject: &'a CStr) -> StepResult<'a> {
    if ret != 0 {
        return Err(StepError::new(step, last_errno()).with_subject(subject.to_bytes()));
    }
    Ok(())
}

/// Enter a new mount namespace
pub fn unshare_mount_namespace() -> StepResult<'static> {
    if unsafe { libc::unshare(libc::CLONE_NEWNS) } != 0 {
        return Err(StepError::last_os("unshare mount namespace"));
    }
    Ok(())
}

/// Change the propagation type of `target` and every mount below it
pub fn set_propagation(target: &CStr, flags: libc::c_ulong) -> StepResult<'_> {
    let ret = unsafe {
        libc::mount(
            ptr::null(),
            target.as_ptr(),
            ptr::null(),
            flags | libc::MS_REC,
            ptr::null(),
        )
    };
    check(ret, "set mount propagation of", target)
}

/// Recursive bind mount of `source` onto `target`
pub fn bind<'a>(source: &'a CStr, target: &'a CStr) -> StepResult<'a> {
    let ret = unsafe {
        libc::mount(
            source.as_ptr(),
            target.as_ptr(),
            ptr::null(),
            libc::MS_BIND | libc::MS_REC,
            ptr::null(),
        )
    };
    check(ret, "bind mount", target)
}

/// Change the flags of an existing bind mount
pub fn remount_bind(target: &CStr, flags: libc::c_ulong) -> StepResult<'_> {
    let ret = unsafe {
        libc::mount(
            ptr::null(),
            target.as_ptr(),
            ptr::null(),
            libc::MS_REMOUNT | libc::MS_BIND | flags,
            ptr::null(),
        )
    };
    check(ret, "remount", target)
}

pub fn mount_tmpfs<'a>(target: &'a CStr, flags: libc::c_ulong, options: &CStr) -> StepResult<'a> {
    let ret = unsafe {
        libc::mount(
            c"tmpfs".as_ptr(),
            target.as_ptr(),
            c"tmpfs".as_ptr(),
            flags,
            options.as_ptr().cast(),
        )
    };
    check(ret, "mount tmpfs on", target)
}

/// Move the mount at `source` to `target`
pub fn move_mount<'a>(source: &CStr, target: &'a CStr) -> StepResult<'a> {
    let ret = unsafe {
        libc::mount(
            source.as_ptr(),
            target.as_ptr(),
            ptr::null(),
            libc::MS_MOVE,
            ptr::null(),
        )
    };
    check(ret, "move mount onto", target)
}

/// `mkdir`, treating an existing entry as success
pub fn make_dir(path: &CStr, mode: libc::mode_t) -> StepResult<'_> {
    if unsafe { libc::mkdir(path.as_ptr(), mode) } != 0 {
        let errno = last_errno();
        if errno != libc::EEXIST {
            return Err(StepError::new("mkdir", errno).with_subject(path.to_bytes()));
        }
    }
    Ok(())
}

/// Create an empty regular file with `mode`, keeping an existing one
pub fn make_file(path: &CStr, mode: libc::mode_t) -> StepResult<'_> {
    let fd = unsafe {
        libc::open(
            path.as_ptr(),
            libc::O_CREAT | libc::O_WRONLY | libc::O_CLOEXEC | libc::O_NOFOLLOW,
            mode as libc::c_uint,
        )
    };
    if fd < 0 {
        return Err(StepError::new("create", last_errno()).with_subject(path.to_bytes()));
    }
    unsafe { libc::close(fd) };
    Ok(())
}

pub fn chmod(path: &CStr, mode: libc::mode_t) -> StepResult<'_> {
    check(unsafe { libc::chmod(path.as_ptr(), mode) }, "chmod", path)
}

pub fn chown(path: &CStr, uid: libc::uid_t, gid: libc::gid_t) -> StepResult<'_> {
    check(unsafe { libc::chown(path.as_ptr(), uid, gid) }, "chown", path)
}

pub fn make_node(path: &CStr, mode: libc::mode_t, rdev: libc::dev_t) -> StepResult<'_> {
    check(unsafe { libc::mknod(path.as_ptr(), mode, rdev) }, "mknod", path)
}

pub fn symlink<'a>(target: &CStr, link: &'a CStr) -> StepResult<'a> {
    check(
        unsafe { libc::symlink(target.as_ptr(), link.as_ptr()) },
        "symlink",
        link,
    )
}

/// `stat` the path; `Ok(None)` when it is missing and `optional` is set.
pub fn probe(path: &CStr, optional: bool) -> std::result::Result<Option<libc::mode_t>, StepError<'_>> {
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::stat(path.as_ptr(), &mut st) } != 0 {
        let errno = last_errno();
        if errno == libc::ENOENT && optional {
            return Ok(None);
        }
        return Err(StepError::new("stat", errno).with_subject(path.to_bytes()));
    }
    Ok(Some(st.st_mode))
}
