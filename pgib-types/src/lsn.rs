use std::fmt;

use crate::error::CoreError;

/// A PostgreSQL log sequence number, printed as `<hi>/<lo>` in hex.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Lsn(pub u64);

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl std::str::FromStr for Lsn {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hi, lo) = s
            .split_once('/')
            .ok_or_else(|| CoreError::format(format!("invalid lsn '{s}'")))?;
        let hi = u64::from_str_radix(hi, 16)
            .map_err(|_| CoreError::format(format!("invalid lsn '{s}'")))?;
        let lo = u64::from_str_radix(lo, 16)
            .map_err(|_| CoreError::format(format!("invalid lsn '{s}'")))?;
        Ok(Lsn((hi << 32) | lo))
    }
}

/// A 24-character hex WAL segment name, e.g. `000000010000000100000010`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalSegment(String);

impl WalSegment {
    pub fn parse(name: &str) -> Result<Self, CoreError> {
        if name.len() != 24 || !name.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CoreError::format(format!(
                "invalid wal segment name '{name}'"
            )));
        }
        Ok(WalSegment(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The timeline id, the leading 8 hex characters.
    pub fn timeline(&self) -> &str {
        &self.0[0..8]
    }

    /// True when `self` and `other` were archived on the same timeline.
    pub fn same_timeline(&self, other: &WalSegment) -> bool {
        self.timeline() == other.timeline()
    }
}

impl fmt::Display for WalSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
