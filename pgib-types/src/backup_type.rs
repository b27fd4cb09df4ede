use serde::{Deserialize, Serialize};

/// Kind of backup recorded in `[backup] backup-type`.
///
/// `Full` carries every file; `Diff` and `Incr` carry only what changed
/// since, respectively, the last full or the immediately preceding backup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Full,
    Diff,
    Incr,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Full => "full",
            BackupType::Diff => "diff",
            BackupType::Incr => "incr",
        }
    }

    /// A diff backup needs a full parent; an incr backup needs a full or
    /// diff parent. Both need the prior manifest to already be final.
    pub fn requires_prior(&self) -> bool {
        !matches!(self, BackupType::Full)
    }
}

impl std::fmt::Display for BackupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackupType {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(BackupType::Full),
            "diff" => Ok(BackupType::Diff),
            "incr" => Ok(BackupType::Incr),
            other => Err(crate::error::CoreError::format(format!(
                "unknown backup type '{other}'"
            ))),
        }
    }
}
