use crate::owner::OwnerId;

/// A symbolic link to be recreated at restore (§3.1). Distinct from a
/// `Target` of type `Link` (a tablespace or file-link root of the backup
/// itself) - this is an ordinary symlink encountered while scanning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkEntry {
    pub name: String,
    pub destination: String,
    pub user: Option<OwnerId>,
    pub group: Option<OwnerId>,
}
