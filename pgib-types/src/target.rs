use serde::{Deserialize, Serialize};

/// A [`Target`](crate) is either a plain directory root (`pg_data`, a
/// tablespace) or a symlinked file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Path,
    Link,
}
