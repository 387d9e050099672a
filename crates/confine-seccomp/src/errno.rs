//! Errno names accepted in filter configuration

use confine_core::{ConfineError, Result};

const ERRNO_NAMES: &[(&str, i32)] = &[
    ("EPERM", libc::EPERM),
    ("ENOENT", libc::ENOENT),
    ("ESRCH", libc::ESRCH),
    ("EINTR", libc::EINTR),
    ("EIO", libc::EIO),
    ("ENXIO", libc::ENXIO),
    ("E2BIG", libc::E2BIG),
    ("ENOEXEC", libc::ENOEXEC),
    ("EBADF", libc::EBADF),
    ("ECHILD", libc::ECHILD),
    ("EAGAIN", libc::EAGAIN),
    ("ENOMEM", libc::ENOMEM),
    ("EACCES", libc::EACCES),
    ("EFAULT", libc::EFAULT),
    ("EBUSY", libc::EBUSY),
    ("EEXIST", libc::EEXIST),
    ("EXDEV", libc::EXDEV),
    ("ENODEV", libc::ENODEV),
    ("ENOTDIR", libc::ENOTDIR),
    ("EISDIR", libc::EISDIR),
    ("EINVAL", libc::EINVAL),
    ("ENFILE", libc::ENFILE),
    ("EMFILE", libc::EMFILE),
    ("ENOTTY", libc::ENOTTY),
    ("ETXTBSY", libc::ETXTBSY),
    ("EFBIG", libc::EFBIG),
    ("ENOSPC", libc::ENOSPC),
    ("ESPIPE", libc::ESPIPE),
    ("EROFS", libc::EROFS),
    ("EMLINK", libc::EMLINK),
    ("EPIPE", libc::EPIPE),
    ("EDOM", libc::EDOM),
    ("ERANGE", libc::ERANGE),
    ("ENOSYS", libc::ENOSYS),
    ("ENOTSUP", libc::ENOTSUP),
    ("EOPNOTSUPP", libc::EOPNOTSUPP),
    ("EAFNOSUPPORT", libc::EAFNOSUPPORT),
    ("ECONNREFUSED", libc::ECONNREFUSED),
    ("ETIMEDOUT", libc::ETIMEDOUT),
    ("EUCLEAN", libc::EUCLEAN),
];

/// Largest errno the kernel accepts in a filter return value
pub const MAX_ERRNO: u32 = 4095;

/// Parse an errno given by name (`EUCLEAN`) or number (`117`).
pub fn parse_errno(value: &str) -> Result<u32> {
    let value = value.trim();
    let parsed = match value.parse::<u32>() {
        Ok(n) => Some(n),
        Err(_) => ERRNO_NAMES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(value))
            .map(|(_, n)| *n as u32),
    };

    match parsed {
        Some(n) if n <= MAX_ERRNO => Ok(n),
        _ => Err(ConfineError::InvalidConfig(format!(
            "Invalid errno: {:?}",
            value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_by_name_and_number() {
        assert_eq!(parse_errno("EUCLEAN").unwrap(), libc::EUCLEAN as u32);
        assert_eq!(parse_errno("eperm").unwrap(), libc::EPERM as u32);
        assert_eq!(parse_errno("38").unwrap(), 38);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_errno("ENOTREAL").is_err());
        assert!(parse_errno("5000").is_err());
        assert!(parse_errno("-1").is_err());
    }
}
