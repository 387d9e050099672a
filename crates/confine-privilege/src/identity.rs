//! User and group resolution
//!
//! Names are resolved once in the parent; the child only receives numbers.

use std::ffi::CString;
use std::path::PathBuf;

use confine_core::config::IdentityConfig;
use confine_core::{ConfineError, Result};
use log::debug;
use nix::unistd::{Gid, Group, Uid, User};

/// Account details of the target user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub name: String,
    pub uid: Uid,
    pub gid: Gid,
    pub home: PathBuf,
    pub shell: PathBuf,
}

/// Numeric identity the child switches to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub user: Option<UserInfo>,
    /// Explicit primary group, overriding the user's own
    pub group: Option<Gid>,
    /// Supplementary groups, sorted and deduplicated
    pub supplementary: Vec<Gid>,
    /// Whether the child calls `setgroups`
    pub set_groups: bool,
}

impl ResolvedIdentity {
    pub fn resolve(config: &IdentityConfig) -> Result<Self> {
        let user = config.user.as_deref().map(lookup_user).transpose()?;
        let group = config.group.as_deref().map(lookup_group).transpose()?;

        let mut supplementary: Vec<Gid> = Vec::new();
        if let Some(user) = &user {
            let primary = group.unwrap_or(user.gid);
            let name = CString::new(user.name.as_str()).map_err(|_| {
                ConfineError::InvalidConfig(format!("Invalid user name '{}'", user.name))
            })?;
            supplementary.extend(nix::unistd::getgrouplist(&name, primary).map_err(|e| {
                ConfineError::Identity(format!("getgrouplist for '{}': {}", user.name, e))
            })?);
        }
        for name in &config.supplementary_groups {
            supplementary.push(lookup_group(name)?);
        }
        supplementary.sort_by_key(|g| g.as_raw());
        supplementary.dedup();

        let identity = Self {
            set_groups: user.is_some() || !config.supplementary_groups.is_empty(),
            user,
            group,
            supplementary,
        };
        debug!(
            "Resolved identity: uid={:?} gid={:?} groups={}",
            identity.uid(),
            identity.gid(),
            identity.supplementary.len()
        );
        Ok(identity)
    }

    /// Target uid, `None` when the child keeps the launcher's
    pub fn uid(&self) -> Option<Uid> {
        self.user.as_ref().map(|u| u.uid)
    }

    /// Target gid, `None` when the child keeps the launcher's
    pub fn gid(&self) -> Option<Gid> {
        self.group.or(self.user.as_ref().map(|u| u.gid))
    }

    /// Effective uid the child ends up with
    pub fn effective_uid(&self) -> Uid {
        self.uid().unwrap_or_else(Uid::effective)
    }

    /// Effective gid the child ends up with
    pub fn effective_gid(&self) -> Gid {
        self.gid().unwrap_or_else(Gid::effective)
    }

    /// Whether the child changes its uid
    pub fn changes_user(&self) -> bool {
        self.user
            .as_ref()
            .is_some_and(|u| u.uid != Uid::effective())
    }
}

/// Look a user up by name or numeric uid
fn lookup_user(name: &str) -> Result<UserInfo> {
    let found = match name.parse::<u32>() {
        Ok(uid) => User::from_uid(Uid::from_raw(uid)),
        Err(_) => User::from_name(name),
    }
    .map_err(|e| ConfineError::Identity(format!("User lookup '{}': {}", name, e)))?;

    match found {
        Some(user) => Ok(UserInfo {
            name: user.name,
            uid: user.uid,
            gid: user.gid,
            home: user.dir,
            shell: user.shell,
        }),
        None => Err(ConfineError::InvalidConfig(format!("Unknown user '{}'", name))),
    }
}

/// Look a group up by name or numeric gid
fn lookup_group(name: &str) -> Result<Gid> {
    if let Ok(gid) = name.parse::<u32>() {
        return Ok(Gid::from_raw(gid));
    }
    Group::from_name(name)
        .map_err(|e| ConfineError::Identity(format!("Group lookup '{}': {}", name, e)))?
        .map(|g| g.gid)
        .ok_or_else(|| ConfineError::InvalidConfig(format!("Unknown group '{}'", name)))
}
