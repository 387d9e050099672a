//! Loopback bring-up inside a fresh network namespace

use confine_core::StepError;

/// Set `IFF_UP` on `lo`. Uses only raw syscalls.
pub fn bring_up_loopback() -> Result<(), StepError<'static>> {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(StepError::last_os("open socket for loopback setup"));
    }

    let result = set_up(fd);
    unsafe { libc::close(fd) };
    result
}

fn set_up(fd: libc::c_int) -> Result<(), StepError<'static>> {
    let mut req: libc::ifreq = unsafe { std::mem::zeroed() };
    for (dst, src) in req.ifr_name.iter_mut().zip(b"lo\0") {
        *dst = *src as libc::c_char;
    }

    if unsafe { libc::ioctl(fd, libc::SIOCGIFFLAGS as _, &mut req as *mut libc::ifreq) } < 0 {
        return Err(StepError::last_os("read loopback flags"));
    }

    let flags = unsafe { req.ifr_ifru.ifru_flags };
    if flags & libc::IFF_UP as libc::c_short != 0 {
        return Ok(());
    }
    req.ifr_ifru.ifru_flags = flags | (libc::IFF_UP | libc::IFF_RUNNING) as libc::c_short;

    if unsafe { libc::ioctl(fd, libc::SIOCSIFFLAGS as _, &req as *const libc::ifreq) } < 0 {
        return Err(StepError::last_os("bring up loopback"));
    }
    Ok(())
}
