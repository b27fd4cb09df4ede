//! Patterns recognized while scanning a live cluster.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// `t<pid>_<relfilenode>` - a temporary relation left over from a crashed backend.
    pub static ref TEMP_RELATION_REGEX: Regex =
        Regex::new(r"^t[0-9]+_[0-9]+(_[a-z]+)?(\.[0-9]+)?$").unwrap();

    /// A 24 character hex WAL segment file name.
    pub static ref WAL_SEGMENT_REGEX: Regex = Regex::new(r"^[0-9A-F]{24}$").unwrap();

    /// `pg_tblspc/<oid>` tablespace link entries under the data directory.
    pub static ref TABLESPACE_PATH_REGEX: Regex =
        Regex::new(r"^pg_tblspc/([0-9]+)$").unwrap();

    /// The relfilenode base id of a file inside a database directory, used to pair a
    /// relation with its `_init` fork when deciding whether it is unlogged.
    pub static ref RELATION_BASE_ID_REGEX: Regex =
        Regex::new(r"^([0-9]+)(_init)?(\.[0-9]+)?(_vm|_fsm)?$").unwrap();
}
