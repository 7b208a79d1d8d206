//! Identity and offset newtypes shared by manifests and keys

use serde::{Deserialize, Serialize};

/// Immutable cluster identity; scopes every remote key
///
/// Restricted to `[A-Za-z0-9_-]` so it can be embedded in object keys
/// without escaping.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClusterUuid(String);

impl ClusterUuid {
    pub fn parse(value: &str) -> Result<Self, String> {
        if value.is_empty() {
            return Err("cluster uuid must not be empty".to_string());
        }
        if let Some(bad) = value
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(format!(
                "cluster uuid {:?} contains invalid character {:?}",
                value, bad
            ));
        }
        Ok(ClusterUuid(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ClusterUuid {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ClusterUuid::parse(&value)
    }
}

impl From<ClusterUuid> for String {
    fn from(uuid: ClusterUuid) -> Self {
        uuid.0
    }
}

impl std::fmt::Display for ClusterUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical offset into the controlling log
///
/// Zero is the "no snapshot recorded" sentinel on the wire; a valid local
/// snapshot always covers a positive offset.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LogOffset(pub i64);

impl LogOffset {
    pub const NONE: LogOffset = LogOffset(0);

    pub fn is_set(&self) -> bool {
        self.0 > 0
    }
}

impl std::fmt::Display for LogOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
