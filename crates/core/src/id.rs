//! Global transaction identifiers.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

const MAX_GID_LEN: usize = 128;

/// Identifier of a global transaction.
///
/// Gids travel to participants as request parameters and end up in barrier
/// rows and XA transaction ids, so they are restricted to printable,
/// quote-free text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Gid(String);

impl Gid {
    /// Generate a fresh gid.
    ///
    /// Uses UUIDv7 (time-ordered) so gids sort roughly by creation time.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().simple().to_string())
    }

    /// Accept a caller-supplied gid after validation.
    pub fn new(value: impl Into<String>) -> Result<Self, CoreError> {
        let value = value.into();
        if value.is_empty() {
            return Err(CoreError::invalid_gid("gid must not be empty"));
        }
        if value.len() > MAX_GID_LEN {
            return Err(CoreError::invalid_gid(format!(
                "gid longer than {MAX_GID_LEN} bytes"
            )));
        }
        if let Some(c) = value
            .chars()
            .find(|c| c.is_whitespace() || c.is_control() || matches!(c, '\'' | '"' | '\\'))
        {
            return Err(CoreError::invalid_gid(format!(
                "gid contains forbidden character {c:?}"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Gid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Gid {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Gid {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Gid> for String {
    fn from(value: Gid) -> Self {
        value.0
    }
}

/// Wire form of a branch index: 1-based, zero padded to two digits.
pub fn branch_id(index: u32) -> String {
    format!("{:02}", index + 1)
}
