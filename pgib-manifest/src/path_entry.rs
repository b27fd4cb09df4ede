use pgib_types::Mode;

use crate::owner::OwnerId;

/// A directory within some target (§3.1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathEntry {
    /// Target-relative name, e.g. `pg_data/base/1`.
    pub name: String,
    pub mode: Mode,
    pub user: Option<OwnerId>,
    pub group: Option<OwnerId>,
}
