//! The privilege stage: built in the parent, applied in the child
//!
//! Child order:
//!
//! 1. personality
//! 2. working directory and umask
//! 3. supplementary groups, gid, keep-caps, uid
//! 4. bounding set
//! 5. ambient set, keep-caps cleared
//! 6. OOM score, I/O priority, `no_new_privs`

use std::ffi::CString;

use confine_core::util::path_to_cstring;
use confine_core::{ConfineError, ExecConfig, Result, StepError};
use nix::unistd::{Gid, Uid};

use crate::capability::{CapabilityPlan, set_keep_caps};
use crate::identity::ResolvedIdentity;
use crate::personality::{resolve_persona, set_persona};
use crate::resources::{
    ioprio_value, oom_score_value, set_ioprio, set_no_new_privs, write_oom_score,
};

/// Everything the privilege stage does, resolved up front
#[derive(Debug, Clone)]
pub struct PrivilegePlan {
    persona: Option<libc::c_ulong>,
    working_directory: Option<CString>,
    umask: libc::mode_t,
    groups: Option<Vec<Gid>>,
    gid: Option<Gid>,
    uid: Option<Uid>,
    capabilities: CapabilityPlan,
    oom_score: Option<Vec<u8>>,
    ioprio: Option<libc::c_int>,
    no_new_privileges: bool,
}

impl PrivilegePlan {
    pub fn new(
        config: &ExecConfig,
        identity: &ResolvedIdentity,
        capabilities: CapabilityPlan,
    ) -> Result<Self> {
        let persona = config.personality.map(resolve_persona).transpose()?;
        let working_directory = config
            .working_directory
            .as_deref()
            .map(path_to_cstring)
            .transpose()?;
        if config.umask > 0o777 {
            return Err(ConfineError::InvalidConfig(format!(
                "Invalid umask {:o}",
                config.umask
            )));
        }

        Ok(Self {
            persona,
            working_directory,
            umask: config.umask as libc::mode_t,
            groups: identity.set_groups.then(|| identity.supplementary.clone()),
            gid: identity.gid(),
            uid: identity.uid(),
            capabilities,
            oom_score: config.oom_score_adjust.map(oom_score_value).transpose()?,
            ioprio: config.io_scheduling.as_ref().map(ioprio_value).transpose()?,
            no_new_privileges: config.no_new_privileges,
        })
    }

    pub fn capabilities(&self) -> &CapabilityPlan {
        &self.capabilities
    }

    /// Run the privilege stage. Runs in the child.
    pub fn apply(&self) -> std::result::Result<(), StepError<'_>> {
        if let Some(persona) = self.persona {
            set_persona(persona)?;
        }

        if let Some(dir) = &self.working_directory
            && unsafe { libc::chdir(dir.as_ptr()) } != 0
        {
            return Err(StepError::last_os("chdir").with_subject(dir.to_bytes()));
        }
        unsafe { libc::umask(self.umask) };

        self.change_identity()?;
        self.capabilities.apply_bounding()?;
        self.capabilities.apply_ambient()?;

        if let Some(value) = &self.oom_score {
            write_oom_score(value)?;
        }
        if let Some(value) = self.ioprio {
            set_ioprio(value)?;
        }
        if self.no_new_privileges {
            set_no_new_privs()?;
        }
        Ok(())
    }

    fn change_identity(&self) -> std::result::Result<(), StepError<'static>> {
        if let Some(groups) = &self.groups {
            nix::unistd::setgroups(groups)
                .map_err(|errno| StepError::new("setgroups", errno as i32))?;
        }
        if let Some(gid) = self.gid {
            nix::unistd::setresgid(gid, gid, gid)
                .map_err(|errno| StepError::new("setresgid", errno as i32))?;
        }
        if let Some(uid) = self.uid {
            if self.capabilities.needs_keep_caps() {
                set_keep_caps(true)?;
            }
            nix::unistd::setresuid(uid, uid, uid)
                .map_err(|errno| StepError::new("setresuid", errno as i32))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confine_core::config::{IoScheduling, IoSchedulingClass, Personality};

    fn plan(config: &ExecConfig) -> Result<PrivilegePlan> {
        PrivilegePlan::new(config, &ResolvedIdentity::default(), CapabilityPlan::default())
    }

    #[test]
    fn test_default_plan_has_no_identity_change() {
        let p = plan(&ExecConfig::new("/bin/true")).unwrap();
        assert!(p.groups.is_none());
        assert!(p.uid.is_none());
        assert!(p.gid.is_none());
        assert_eq!(p.umask, 0o022);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = ExecConfig::new("/bin/true");
        config.oom_score_adjust = Some(2000);
        assert!(plan(&config).unwrap_err().is_configuration());

        let mut config = ExecConfig::new("/bin/true");
        config.io_scheduling = Some(IoScheduling {
            class: IoSchedulingClass::BestEffort,
            priority: 9,
        });
        assert!(plan(&config).unwrap_err().is_configuration());

        let mut config = ExecConfig::new("/bin/true");
        config.umask = 0o1777;
        assert!(plan(&config).unwrap_err().is_configuration());
    }

    #[test]
    fn test_native_personality_accepted() {
        let native = [
            Personality::X86_64,
            Personality::Arm64,
            Personality::S390x,
            Personality::Ppc64,
            Personality::Ppc64Le,
        ]
        .into_iter()
        .find(|p| crate::personality::persona_for(*p).is_some());
        if let Some(native) = native {
            let mut config = ExecConfig::new("/bin/true");
            config.personality = Some(native);
            assert!(plan(&config).unwrap().persona.is_some());
        }
    }
}
