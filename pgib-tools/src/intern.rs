//! Append-only string interning table.
//!
//! The manifest stores one distinct owner name (or backup label) once and
//! has every entry hold a small, non-owning [`InternId`] into the table
//! instead of allocating a `String` per entry. See the "Interned owner and
//! reference lists" design note: a single manifest may have thousands of
//! files but only a handful of distinct users, groups, or prior labels.

use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InternId(u32);

/// An append-only table of interned strings.
///
/// Insertion never invalidates a previously returned [`InternId`]; the same
/// string always maps back to the same id for the life of the table.
#[derive(Clone, Debug, Default)]
pub struct InternTable {
    strings: Vec<String>,
    index: HashMap<String, InternId>,
}

impl InternTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `value`, returning its id. Re-interning an already-known
    /// string returns the original id rather than appending a duplicate.
    pub fn intern(&mut self, value: &str) -> InternId {
        if let Some(id) = self.index.get(value) {
            return *id;
        }
        let id = InternId(self.strings.len() as u32);
        self.strings.push(value.to_string());
        self.index.insert(value.to_string(), id);
        id
    }

    pub fn get(&self, id: InternId) -> &str {
        &self.strings[id.0 as usize]
    }

    pub fn find(&self, value: &str) -> Option<InternId> {
        self.index.get(value).copied()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (InternId, &str)> {
        self.strings
            .iter()
            .enumerate()
            .map(|(i, s)| (InternId(i as u32), s.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reinterning_returns_same_id() {
        let mut t = InternTable::new();
        let a = t.intern("postgres");
        let b = t.intern("root");
        let a2 = t.intern("postgres");
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(t.get(a), "postgres");
        assert_eq!(t.len(), 2);
    }
}
