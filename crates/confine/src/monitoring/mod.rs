//! Monitoring layer: supervision of launched processes

pub mod supervisor;

pub use supervisor::{DEFAULT_POLL_INTERVAL, Supervisor};
