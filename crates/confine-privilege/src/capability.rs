//! Bounding and ambient capability sets

use caps::{Capability, CapsHashSet};
use confine_core::StepError;
use confine_core::config::{CapabilityConfig, capability_names};
use confine_core::{ConfineError, Result};
use log::debug;

/// Capabilities the child drops from its bounding set and raises into its
/// ambient set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityPlan {
    /// Supported capabilities outside the allowed bounding set
    bounding_drop: Vec<Capability>,
    ambient: Vec<Capability>,
}

impl CapabilityPlan {
    /// Resolve `config`, removing `forced_drops` from the bounding set.
    ///
    /// Fails when an ambient capability falls outside the effective bounding set.
    pub fn new(config: &CapabilityConfig, forced_drops: &[Capability]) -> Result<Self> {
        let supported = caps::runtime::thread_all_supported();

        let mut allowed: CapsHashSet = match &config.bounding_set {
            Some(set) => set.resolve()?,
            None => supported.clone(),
        };
        for cap in forced_drops {
            allowed.remove(cap);
        }

        let ambient = match &config.ambient_set {
            Some(set) => set.resolve()?,
            None => CapsHashSet::new(),
        };
        let outside: CapsHashSet = ambient.difference(&allowed).copied().collect();
        if !outside.is_empty() {
            return Err(ConfineError::InvalidConfig(format!(
                "Ambient capabilities outside the bounding set: {}",
                capability_names(&outside).join(", ")
            )));
        }

        let mut bounding_drop: Vec<Capability> =
            supported.difference(&allowed).copied().collect();
        bounding_drop.sort_by_key(|c| c.index());
        let mut ambient: Vec<Capability> = ambient.into_iter().collect();
        ambient.sort_by_key(|c| c.index());

        debug!(
            "Capability plan: drop {} from bounding set, {} ambient",
            bounding_drop.len(),
            ambient.len()
        );
        Ok(Self {
            bounding_drop,
            ambient,
        })
    }

    pub fn bounding_drop(&self) -> &[Capability] {
        &self.bounding_drop
    }

    pub fn ambient(&self) -> &[Capability] {
        &self.ambient
    }

    /// Whether capabilities must survive the uid change
    pub fn needs_keep_caps(&self) -> bool {
        !self.bounding_drop.is_empty() || !self.ambient.is_empty()
    }

    /// Drop everything outside the bounding set. Runs in the child.
    pub fn apply_bounding(&self) -> std::result::Result<(), StepError<'static>> {
        if self.bounding_drop.is_empty() {
            return Ok(());
        }
        // Dropping needs CAP_SETPCAP in the effective set, which a uid
        // change under keep-caps has cleared.
        raise(RawSet::Effective, Capability::CAP_SETPCAP, "raise CAP_SETPCAP")?;
        for cap in &self.bounding_drop {
            let ret = unsafe {
                libc::prctl(
                    libc::PR_CAPBSET_DROP,
                    libc::c_ulong::from(cap.index()),
                    0,
                    0,
                    0,
                )
            };
            if ret != 0 {
                return Err(StepError::last_os("drop bounding capability"));
            }
        }
        Ok(())
    }

    /// Raise the ambient set, then clear keep-caps. Runs in the child.
    pub fn apply_ambient(&self) -> std::result::Result<(), StepError<'static>> {
        for cap in &self.ambient {
            raise(RawSet::Inheritable, *cap, "raise inheritable capability")?;
            let ret = unsafe {
                libc::prctl(
                    libc::PR_CAP_AMBIENT,
                    libc::PR_CAP_AMBIENT_RAISE,
                    libc::c_ulong::from(cap.index()),
                    0,
                    0,
                )
            };
            if ret != 0 {
                return Err(StepError::last_os("raise ambient capability"));
            }
        }
        set_keep_caps(false)
    }
}

const LINUX_CAPABILITY_VERSION_3: u32 = 0x2008_0522;

#[repr(C)]
struct CapUserHeader {
    version: u32,
    pid: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct CapUserData {
    effective: u32,
    permitted: u32,
    inheritable: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawSet {
    Effective,
    Inheritable,
}

/// Add `cap` to one set of the calling thread with raw `capget`/`capset`.
///
/// Runs in the child, so everything stays on the stack.
fn raise(
    set: RawSet,
    cap: Capability,
    step: &'static str,
) -> std::result::Result<(), StepError<'static>> {
    let mut header = CapUserHeader {
        version: LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    };
    let mut data = [CapUserData::default(); 2];

    let ret = unsafe {
        libc::syscall(
            libc::SYS_capget,
            &mut header as *mut CapUserHeader,
            data.as_mut_ptr(),
        )
    };
    if ret != 0 {
        return Err(StepError::last_os("capget"));
    }

    let index = usize::from(cap.index());
    let bit = 1u32 << (index % 32);
    let word = &mut data[index / 32];
    match set {
        RawSet::Effective => word.effective |= bit,
        RawSet::Inheritable => word.inheritable |= bit,
    }

    let ret = unsafe {
        libc::syscall(
            libc::SYS_capset,
            &header as *const CapUserHeader,
            data.as_ptr(),
        )
    };
    if ret != 0 {
        return Err(StepError::last_os(step));
    }
    Ok(())
}

/// Toggle `PR_SET_KEEPCAPS`. Runs in the child.
pub fn set_keep_caps(keep: bool) -> std::result::Result<(), StepError<'static>> {
    nix::sys::prctl::set_keepcaps(keep)
        .map_err(|errno| StepError::new("set keep-caps", errno as i32))
}

/// Capabilities removed from the bounding set regardless of configuration
pub fn forced_drops(private_devices: bool, protect_kernel_modules: bool) -> Vec<Capability> {
    let mut drops = Vec::new();
    if private_devices {
        drops.extend([Capability::CAP_MKNOD, Capability::CAP_SYS_RAWIO]);
    }
    if protect_kernel_modules {
        drops.push(Capability::CAP_SYS_MODULE);
    }
    drops
}
