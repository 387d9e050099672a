//! confine-core: shared types, errors, and feature detection for confine
//!
//! This crate provides the foundational types used by all confine sub-crates:
//! - Error types and Result alias
//! - The serializable execution configuration
//! - Termination results and the setup-failure record
//! - Runtime feature detection (seccomp, ambient capabilities, namespaces)

pub mod capabilities;
pub mod config;
pub mod error;
pub mod result;
pub mod util;

pub use capabilities::SystemCapabilities;
pub use config::ExecConfig;
pub use error::{ConfineError, Result};
pub use result::{SetupFailure, SetupStage, StepError, TerminationResult};
