use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-supplied identifier of one observation. Requests may use either a
/// JSON integer or a JSON string; the two spaces do not collide in storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObservationId {
    Int(i64),
    Text(String),
}

impl ObservationId {
    /// Storage key for this id. Tagged so that integer `1` and string `"1"`
    /// map to different keys.
    pub fn storage_key(&self) -> Vec<u8> {
        match self {
            ObservationId::Int(n) => format!("i:{n}").into_bytes(),
            ObservationId::Text(s) => format!("s:{s}").into_bytes(),
        }
    }
}

impl fmt::Display for ObservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservationId::Int(n) => write!(f, "{n}"),
            ObservationId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ObservationId {
    fn from(n: i64) -> Self {
        ObservationId::Int(n)
    }
}

impl From<&str> for ObservationId {
    fn from(s: &str) -> Self {
        ObservationId::Text(s.to_string())
    }
}
