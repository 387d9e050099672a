//! confine-namespace: namespace entry for confined launches
//!
//! Provides the network namespace plan (with loopback bring-up) and
//! namespace inode inspection helpers. The mount namespace is entered by
//! the filesystem stage in `confine-fs`.

pub mod config;
pub mod loopback;

pub use config::{
    NamespacePlan, NamespaceType, get_namespace_inode, get_namespace_inode_for_pid,
    shares_namespace,
};
