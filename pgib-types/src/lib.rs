//! Shared types used by the manifest, scanner and block-delta crates.

pub mod error;
pub mod lsn;
pub mod regex;

mod backup_type;
mod mode;
mod target;

pub use backup_type::BackupType;
pub use error::CoreError;
pub use lsn::{Lsn, WalSegment};
pub use mode::Mode;
pub use target::TargetType;
