//! Manifest data model (§3), text serialization (§4.4), link-check (§3.2
//! invariant 4) and the block-delta planner (§4.5).

pub mod blockdelta;
pub mod blockmap;
pub mod database_entry;
pub mod file_entry;
pub mod header;
pub mod link_entry;
pub mod linkcheck;
pub mod manifest;
pub mod owner;
pub mod path_entry;
pub mod stanza;
pub mod target;
pub mod text;
pub mod variant;

pub use blockdelta::{plan_block_delta, BlockMapEntry, PlannedBlock, PlannedRead, PlannedSuperBlock};
pub use database_entry::DatabaseEntry;
pub use file_entry::{BlockIncr, FileEntry, SHA1_EMPTY};
pub use header::ManifestHeader;
pub use link_entry::LinkEntry;
pub use linkcheck::link_check;
pub use manifest::Manifest;
pub use owner::{OwnerId, ReferenceId};
pub use path_entry::PathEntry;
pub use stanza::{Stanza, StanzaDb, StanzaHistoryEntry};
pub use target::Target;
pub use variant::Variant;
