use anyhow::Result;
use pgib_types::{CoreError, TargetType};

use crate::manifest::Manifest;

/// `manifestLinkCheck` (§4.2.1 step 6, §3.2 invariant 4, testable property
/// 8): no two link targets may have paths where one is a prefix of the
/// other, unless both are file (not directory) links.
pub fn link_check(manifest: &Manifest) -> Result<()> {
    let links: Vec<_> = manifest
        .targets()
        .iter()
        .filter(|t| t.target_type == TargetType::Link)
        .collect();

    for i in 0..links.len() {
        for j in (i + 1)..links.len() {
            let a = links[i];
            let b = links[j];

            if a.is_file() && b.is_file() {
                continue;
            }

            if is_prefix(&a.path, &b.path) || is_prefix(&b.path, &a.path) {
                return Err(CoreError::LinkDestination(format!(
                    "'{}' and '{}' target paths overlap ('{}' and '{}')",
                    a.name, b.name, a.path, b.path
                ))
                .into());
            }
        }
    }

    Ok(())
}

/// `a/` is a prefix of `b` (or `a == b`), treated directory-wise so that
/// `/data` is not considered a prefix of `/data2`.
fn is_prefix(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let a_dir = format!("{}/", a.trim_end_matches('/'));
    b.starts_with(&a_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ManifestHeader;
    use crate::target::Target;

    fn base_manifest() -> Manifest {
        Manifest::new(
            ManifestHeader::new_full(0, 1, "15", 1500, 1300, 1, true),
            "/var/lib/postgresql/15/main",
        )
    }

    #[test]
    fn overlapping_directory_links_are_rejected() {
        let mut m = base_manifest();
        m.target_add(Target::new_tablespace(1, "a", "/mnt/a"));
        m.target_add(Target::new_tablespace(2, "b", "/mnt/a/sub"));
        assert!(link_check(&m).is_err());
    }

    #[test]
    fn disjoint_directory_links_are_accepted() {
        let mut m = base_manifest();
        m.target_add(Target::new_tablespace(1, "a", "/mnt/a"));
        m.target_add(Target::new_tablespace(2, "b", "/mnt/b"));
        assert!(link_check(&m).is_ok());
    }

    #[test]
    fn overlapping_file_links_are_exempt() {
        let mut m = base_manifest();
        let mut t1 = Target::new_tablespace(1, "a", "/mnt/a/one.conf");
        t1.file = Some("one.conf".to_string());
        let mut t2 = Target::new_tablespace(2, "b", "/mnt/a/one.conf.bak");
        t2.file = Some("one.conf.bak".to_string());
        m.target_add(t1);
        m.target_add(t2);
        assert!(link_check(&m).is_ok());
    }

    #[test]
    fn identical_directory_path_is_not_spuriously_rejected_by_suffix_match() {
        let mut m = base_manifest();
        m.target_add(Target::new_tablespace(1, "a", "/mnt/data"));
        m.target_add(Target::new_tablespace(2, "b", "/mnt/data2"));
        assert!(link_check(&m).is_ok());
    }
}
