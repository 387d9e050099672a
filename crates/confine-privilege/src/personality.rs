//! Execution domain selection

use confine_core::config::Personality;
use confine_core::{ConfineError, Result, StepError};

/// Native Linux execution domain
pub const PER_LINUX: libc::c_ulong = 0x0000;
/// 32-bit execution domain on a 64-bit kernel
pub const PER_LINUX32: libc::c_ulong = 0x0008;

/// Map a personality to its `personality(2)` value, if the running
/// architecture can provide it.
pub fn persona_for(personality: Personality) -> Option<libc::c_ulong> {
    #[cfg(target_arch = "x86_64")]
    let persona = match personality {
        Personality::X86_64 => Some(PER_LINUX),
        Personality::X86 => Some(PER_LINUX32),
        _ => None,
    };
    #[cfg(target_arch = "x86")]
    let persona = match personality {
        Personality::X86 => Some(PER_LINUX),
        _ => None,
    };
    #[cfg(target_arch = "aarch64")]
    let persona = match personality {
        Personality::Arm64 => Some(PER_LINUX),
        Personality::Arm => Some(PER_LINUX32),
        _ => None,
    };
    #[cfg(target_arch = "arm")]
    let persona = match personality {
        Personality::Arm => Some(PER_LINUX),
        _ => None,
    };
    #[cfg(target_arch = "s390x")]
    let persona = match personality {
        Personality::S390x => Some(PER_LINUX),
        Personality::S390 => Some(PER_LINUX32),
        _ => None,
    };
    #[cfg(all(target_arch = "powerpc64", target_endian = "big"))]
    let persona = match personality {
        Personality::Ppc64 => Some(PER_LINUX),
        Personality::Ppc => Some(PER_LINUX32),
        _ => None,
    };
    #[cfg(all(target_arch = "powerpc64", target_endian = "little"))]
    let persona = match personality {
        Personality::Ppc64Le => Some(PER_LINUX),
        _ => None,
    };
    #[cfg(target_arch = "powerpc")]
    let persona = match personality {
        Personality::Ppc => Some(PER_LINUX),
        _ => None,
    };
    #[cfg(not(any(
        target_arch = "x86_64",
        target_arch = "x86",
        target_arch = "aarch64",
        target_arch = "arm",
        target_arch = "s390x",
        target_arch = "powerpc64",
        target_arch = "powerpc"
    )))]
    let persona = {
        let _ = personality;
        None
    };
    persona
}

/// Like [`persona_for`], rejecting personalities foreign to this architecture
pub fn resolve_persona(personality: Personality) -> Result<libc::c_ulong> {
    persona_for(personality).ok_or_else(|| {
        ConfineError::InvalidConfig(format!(
            "Personality {} is not supported on {}",
            personality,
            std::env::consts::ARCH
        ))
    })
}

/// Switch the execution domain. Runs in the child.
pub fn set_persona(persona: libc::c_ulong) -> std::result::Result<(), StepError<'static>> {
    if unsafe { libc::personality(persona) } == -1 {
        return Err(StepError::last_os("personality"));
    }
    Ok(())
}
