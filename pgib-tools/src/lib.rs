//! Small utilities shared between the manifest, builder and block-delta crates.

pub mod filters;
pub mod intern;
pub mod mcv;
