use pgib_tools::intern::InternId;

/// Interned reference to a user or group name (§3.3: "User and group
/// strings are interned into a per-manifest owner list").
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OwnerId(pub(crate) InternId);

/// Interned reference to a backup label in the manifest's reference list
/// (§3.1 Manifest, §3.2 invariant 9).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReferenceId(pub(crate) InternId);
