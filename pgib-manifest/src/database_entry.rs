/// A PostgreSQL database recorded for reference (§3.1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseEntry {
    pub name: String,
    pub oid: u32,
    pub last_system_oid: u32,
}
