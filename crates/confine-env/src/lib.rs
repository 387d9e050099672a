//! confine-env: environment assembly for confined launches
//!
//! Merges process defaults, a pass-through snapshot, environment files and
//! explicit assignments into the final variable set handed to `execve`.

pub mod builder;
pub mod environment;
pub mod file;
pub mod interpolate;
pub mod snapshot;

pub use builder::{EnvironmentBuilder, UserEnvironment, validate_assignments};
pub use environment::Environment;
pub use file::{load_env_file, parse_env_file};
pub use interpolate::expand_argv;
pub use snapshot::PassThroughSnapshot;
