//! Execution layer: fork, staged confinement and exec
//!
//! The launcher prepares everything in the parent and hands the child a
//! fixed stage pipeline; failures come back over the setup-failure channel.

pub mod channel;
pub mod launcher;

pub use channel::FailureChannel;
pub use launcher::{LaunchHandle, Launcher};
