//! Manifest builder and incremental-decision engine (§4.2): turns a
//! [`pgib_scan::Scanner`] walk plus an optional prior manifest into a
//! fully decided [`pgib_manifest::Manifest`], ready for the copy pass.

pub mod builder;
pub mod complete;
pub mod incremental;
pub mod owner;

pub use builder::{build, validate, BuildOptions, TargetSpec, ValidateOptions};
pub use complete::{complete, CompleteOptions};
pub use incremental::{incremental, IncrementalOptions};
pub use owner::{NullOwnerResolver, NumericOwnerResolver, OwnerResolver};
