//! confine-privilege: identity and privilege reduction for confine
//!
//! Users, groups and capability sets are resolved in the parent; the child
//! applies a [`PrivilegePlan`] of plain numbers between fork and exec.

pub mod capability;
pub mod identity;
pub mod personality;
pub mod reducer;
pub mod resources;

pub use capability::{CapabilityPlan, forced_drops};
pub use identity::{ResolvedIdentity, UserInfo};
pub use personality::{persona_for, resolve_persona};
pub use reducer::PrivilegePlan;
