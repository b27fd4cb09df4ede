use pgib_types::TargetType;

/// A logical root of a backup (§3.1): the data directory (always
/// `pg_data`), a tablespace (`pg_tblspc/<oid>`), or a symlinked file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    /// Target-relative name, e.g. `pg_data`, `pg_tblspc/16401`, or the name
    /// of a symlinked file target.
    pub name: String,
    pub target_type: TargetType,
    /// Filesystem path. Absolute for `Path` targets (invariant §3.2.1);
    /// `Link` targets may carry a relative path (§3.1: "Only link targets
    /// may hold a path that is not already absolute").
    pub path: String,
    /// Set only when this target is a symlinked single file rather than a
    /// directory root.
    pub file: Option<String>,
    pub tablespace_id: Option<u32>,
    pub tablespace_name: Option<String>,
}

impl Target {
    pub fn new_pg_data(path: impl Into<String>) -> Self {
        Target {
            name: "pg_data".to_string(),
            target_type: TargetType::Path,
            path: path.into(),
            file: None,
            tablespace_id: None,
            tablespace_name: None,
        }
    }

    pub fn new_tablespace(id: u32, display_name: impl Into<String>, path: impl Into<String>) -> Self {
        Target {
            name: format!("pg_tblspc/{id}"),
            target_type: TargetType::Link,
            path: path.into(),
            file: None,
            tablespace_id: Some(id),
            tablespace_name: Some(display_name.into()),
        }
    }

    pub fn is_file(&self) -> bool {
        self.file.is_some()
    }

    pub fn is_absolute(&self) -> bool {
        self.path.starts_with('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_target_requires_absolute_path() {
        let t = Target::new_pg_data("/var/lib/postgresql/15/main");
        assert!(t.is_absolute());
        assert_eq!(t.target_type, TargetType::Path);
    }

    #[test]
    fn tablespace_target_carries_id_and_name() {
        let t = Target::new_tablespace(16401, "fast_ssd", "/mnt/ssd/pg_tblspc/16401");
        assert_eq!(t.name, "pg_tblspc/16401");
        assert_eq!(t.tablespace_id, Some(16401));
        assert_eq!(t.tablespace_name.as_deref(), Some("fast_ssd"));
    }
}
