//! Facade crate re-exporting the workspace's `pgib-*` crates under one
//! name, matching how the proxmox-backup workspace's root crate pulls
//! together its own `pbs-*` members.

pub use pgib_build as build;
pub use pgib_buildcfg as buildcfg;
pub use pgib_manifest as manifest;
pub use pgib_pack as pack;
pub use pgib_scan as scan;
pub use pgib_storage as storage;
pub use pgib_tools as tools;
pub use pgib_types as types;
