//! Owner (user/group) name resolution.
//!
//! [`pgib_storage::StorageInfo`] only carries raw numeric uid/gid - turning
//! those into names is an OS user-database lookup, an external collaborator
//! exactly like the cipher/hash primitives named in spec §1's Non-goals.
//! The builder programs against this trait instead of calling into `libc`
//! or `/etc/passwd` itself.

/// Resolves numeric uid/gid to names for the manifest's owner list
/// (§3.1 File/Path/Link `user`/`group`, §3.3 "interned owner list").
pub trait OwnerResolver {
    fn user_name(&self, uid: u32) -> Option<String>;
    fn group_name(&self, gid: u32) -> Option<String>;
}

/// Records every file, path and link with an unknown owner (§4.4: "User/
/// group fields encode as the JSON string `false`... when the owner is
/// absent"). Useful for tests and for backends with no user database.
pub struct NullOwnerResolver;

impl OwnerResolver for NullOwnerResolver {
    fn user_name(&self, _uid: u32) -> Option<String> {
        None
    }

    fn group_name(&self, _gid: u32) -> Option<String> {
        None
    }
}

/// Records the raw numeric id as a decimal string rather than leaving the
/// owner unresolved - useful in containers/chroots with no name service
/// but where preserving *some* ownership distinction on restore matters
/// more than a human-readable name.
pub struct NumericOwnerResolver;

impl OwnerResolver for NumericOwnerResolver {
    fn user_name(&self, uid: u32) -> Option<String> {
        Some(uid.to_string())
    }

    fn group_name(&self, gid: u32) -> Option<String> {
        Some(gid.to_string())
    }
}
