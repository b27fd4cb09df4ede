use anyhow::{bail, Result};
use pgib_tools::intern::InternTable;

use crate::database_entry::DatabaseEntry;
use crate::file_entry::FileEntry;
use crate::header::ManifestHeader;
use crate::link_entry::LinkEntry;
use crate::owner::{OwnerId, ReferenceId};
use crate::path_entry::PathEntry;
use crate::target::Target;

/// The in-memory catalogue of every object in one backup (§3.1). Created
/// either by the builder (scan + optional prior manifest) or by loading a
/// saved repository artifact - both converge on this same representation
/// (§3.3).
///
/// Entries are appended during build and are otherwise mutated only
/// through the `*_update`/`*_remove` operations below, matching the
/// lifecycle rule in §3.3. Owner (user/group) names and reference (prior
/// backup label) strings are interned once per manifest; entries hold
/// non-owning [`OwnerId`]/[`ReferenceId`] handles into those tables.
#[derive(Clone, Debug)]
pub struct Manifest {
    pub header: ManifestHeader,
    targets: Vec<Target>,
    paths: Vec<PathEntry>,
    files: Vec<FileEntry>,
    links: Vec<LinkEntry>,
    databases: Vec<DatabaseEntry>,
    owners: InternTable,
    references: InternTable,
}

impl Manifest {
    /// §3.2 invariant 1: a fresh manifest always starts with exactly one
    /// `pg_data` target.
    pub fn new(header: ManifestHeader, pg_data_path: impl Into<String>) -> Self {
        let mut m = Manifest {
            header,
            targets: Vec::new(),
            paths: Vec::new(),
            files: Vec::new(),
            links: Vec::new(),
            databases: Vec::new(),
            owners: InternTable::new(),
            references: InternTable::new(),
        };
        m.targets.push(Target::new_pg_data(pg_data_path));
        m
    }

    // -- owner / reference interning ------------------------------------

    pub fn intern_owner(&mut self, name: &str) -> OwnerId {
        OwnerId(self.owners.intern(name))
    }

    pub fn owner_name(&self, id: OwnerId) -> &str {
        self.owners.get(id.0)
    }

    pub fn intern_reference(&mut self, label: &str) -> ReferenceId {
        ReferenceId(self.references.intern(label))
    }

    pub fn reference_name(&self, id: ReferenceId) -> &str {
        self.references.get(id.0)
    }

    pub fn references(&self) -> impl Iterator<Item = (ReferenceId, &str)> {
        self.references.iter().map(|(id, s)| (ReferenceId(id), s))
    }

    /// §3.2 invariant 10: the reference list contains the current backup's
    /// own label once it has been assigned.
    pub fn set_backup_label(&mut self, label: impl Into<String>) {
        let label = label.into();
        self.intern_reference(&label);
        self.header.backup_label = label;
    }

    // -- targets ----------------------------------------------------------

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn target_add(&mut self, target: Target) {
        self.targets.push(target);
    }

    pub fn target_find(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name == name)
    }

    pub fn target_update(&mut self, name: &str, mut f: impl FnMut(&mut Target)) -> Result<()> {
        match self.targets.iter_mut().find(|t| t.name == name) {
            Some(t) => {
                f(t);
                Ok(())
            }
            None => bail!("assertion failed: no such target '{name}'"),
        }
    }

    pub fn target_remove(&mut self, name: &str) -> Result<()> {
        let before = self.targets.len();
        self.targets.retain(|t| t.name != name);
        if self.targets.len() == before {
            bail!("assertion failed: no such target '{name}'");
        }
        Ok(())
    }

    // -- paths -------------------------------------------------------------

    pub fn paths(&self) -> &[PathEntry] {
        &self.paths
    }

    pub fn path_add(&mut self, path: PathEntry) {
        self.paths.push(path);
    }

    // -- files --------------------------------------------------------------

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn files_mut(&mut self) -> &mut [FileEntry] {
        &mut self.files
    }

    pub fn file_add(&mut self, file: FileEntry) {
        self.files.push(file);
    }

    pub fn file_find(&self, name: &str) -> Option<&FileEntry> {
        // Sorted ascending by name (§4.2.1 step 4); binary search once built.
        self.files
            .binary_search_by(|f| f.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.files[i])
    }

    pub fn file_update(&mut self, name: &str, mut f: impl FnMut(&mut FileEntry)) -> Result<()> {
        match self.files.iter_mut().find(|e| e.name == name) {
            Some(e) => {
                f(e);
                Ok(())
            }
            None => bail!("assertion failed: no such file '{name}'"),
        }
    }

    // -- links --------------------------------------------------------------

    pub fn links(&self) -> &[LinkEntry] {
        &self.links
    }

    pub fn link_add(&mut self, link: LinkEntry) {
        self.links.push(link);
    }

    pub fn link_update(&mut self, name: &str, mut f: impl FnMut(&mut LinkEntry)) -> Result<()> {
        match self.links.iter_mut().find(|l| l.name == name) {
            Some(l) => {
                f(l);
                Ok(())
            }
            None => bail!("assertion failed: no such link '{name}'"),
        }
    }

    pub fn link_remove(&mut self, name: &str) -> Result<()> {
        let before = self.links.len();
        self.links.retain(|l| l.name != name);
        if self.links.len() == before {
            bail!("assertion failed: no such link '{name}'");
        }
        Ok(())
    }

    // -- databases ------------------------------------------------------------

    pub fn databases(&self) -> &[DatabaseEntry] {
        &self.databases
    }

    pub fn database_add(&mut self, db: DatabaseEntry) {
        self.databases.push(db);
    }

    // -- ordering -----------------------------------------------------------

    /// §4.2.1 step 4 / §5 "Ordering guarantees": sort every set ascending,
    /// byte-wise, by primary name.
    pub fn sort(&mut self) {
        self.targets.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        self.paths.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        self.files.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        self.links.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        self.databases.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
    }

    /// §3.2 invariant 1: exactly one `pg_data` target with an absolute path.
    pub fn check_pg_data_invariant(&self) -> Result<()> {
        let pg_data: Vec<_> = self.targets.iter().filter(|t| t.name == "pg_data").collect();
        if pg_data.len() != 1 {
            bail!(
                "assertion failed: manifest must contain exactly one pg_data target, found {}",
                pg_data.len()
            );
        }
        if !pg_data[0].is_absolute() {
            bail!("assertion failed: pg_data target path must be absolute");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ManifestHeader;

    fn header() -> ManifestHeader {
        ManifestHeader::new_full(1_700_000_000, 1, "15", 1500, 1300, 6_000_000_000_000_000_000, true)
    }

    #[test]
    fn new_manifest_has_exactly_one_pg_data_target() {
        let m = Manifest::new(header(), "/var/lib/postgresql/15/main");
        assert!(m.check_pg_data_invariant().is_ok());
        assert_eq!(m.targets().len(), 1);
    }

    #[test]
    fn owner_interning_deduplicates_across_entries() {
        let mut m = Manifest::new(header(), "/data");
        let a = m.intern_owner("postgres");
        let b = m.intern_owner("postgres");
        let c = m.intern_owner("root");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(m.owner_name(a), "postgres");
    }

    #[test]
    fn set_backup_label_interns_its_own_label() {
        let mut m = Manifest::new(header(), "/data");
        m.set_backup_label("20260727-120000F");
        assert!(m
            .references()
            .any(|(_, label)| label == "20260727-120000F"));
    }

    #[test]
    fn sort_orders_files_byte_wise_ascending() {
        let mut m = Manifest::new(header(), "/data");
        for name in ["pg_data/z", "pg_data/a", "pg_data/m"] {
            m.file_add(crate::file_entry::FileEntry {
                name: name.to_string(),
                mode: pgib_types::Mode::new(0o600),
                user: None,
                group: None,
                size: 0,
                size_repo: 0,
                timestamp: 0,
                checksum_sha1: crate::file_entry::SHA1_EMPTY,
                checksum_repo_sha1: None,
                reference: None,
                bundle_id: None,
                bundle_offset: 0,
                block_incr: crate::file_entry::BlockIncr::none(),
                checksum_page: None,
                checksum_page_error: Vec::new(),
                copy: true,
                delta: false,
                resume: false,
            });
        }
        m.sort();
        let names: Vec<_> = m.files().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["pg_data/a", "pg_data/m", "pg_data/z"]);
    }
}
