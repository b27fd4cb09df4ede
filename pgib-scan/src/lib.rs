//! Directory scanner (§4.1): walks a data directory through a `Storage`
//! capability and yields target-relative file/path/link records.

mod exclude;
mod scanner;

pub use exclude::ExcludeSet;
pub use scanner::{EntryKind, ScanEntry, Scanner};
