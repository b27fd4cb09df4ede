//! Exclusion policy (§4.1): two disjoint sets, a "contents" exclude that
//! drops everything beneath a prefix while keeping the prefix itself, and
//! a "single" exclude that drops exactly one entry.

use anyhow::Result;
use pathpatterns::{MatchEntry, MatchList, MatchType, PatternFlag};

#[derive(Default)]
pub struct ExcludeSet {
    patterns: Vec<MatchEntry>,
}

impl ExcludeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every descendant of `path` (but not `path` itself).
    pub fn add_contents_exclude(&mut self, path: &str) -> Result<()> {
        let pattern = format!("{}/**", path.trim_end_matches('/'));
        self.patterns.push(MatchEntry::parse_pattern(
            pattern.as_str(),
            PatternFlag::PATH_NAME,
            MatchType::Exclude,
        )?);
        Ok(())
    }

    /// Drops exactly the one entry at `path`.
    pub fn add_single_exclude(&mut self, path: &str) -> Result<()> {
        self.patterns.push(MatchEntry::parse_pattern(
            path,
            PatternFlag::PATH_NAME,
            MatchType::Exclude,
        )?);
        Ok(())
    }

    pub fn is_excluded(&self, target_relative_path: &str) -> bool {
        self.patterns.matches(target_relative_path.as_bytes(), None) == Some(MatchType::Exclude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contents_exclude_drops_descendants_but_keeps_prefix() {
        let mut set = ExcludeSet::new();
        set.add_contents_exclude("pg_data/pg_wal").unwrap();
        assert!(!set.is_excluded("pg_data/pg_wal"));
        assert!(set.is_excluded("pg_data/pg_wal/000000010000000000000001"));
    }

    #[test]
    fn single_exclude_drops_only_that_entry() {
        let mut set = ExcludeSet::new();
        set.add_single_exclude("pg_data/postmaster.pid").unwrap();
        assert!(set.is_excluded("pg_data/postmaster.pid"));
        assert!(!set.is_excluded("pg_data/postmaster.opts"));
    }
}
