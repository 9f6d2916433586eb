//! Server identifiers.

use crate::error::ProtocolError;
use std::fmt;

/// A three character server identifier: one digit followed by two
/// uppercase alphanumerics (e.g. `00A`, `1X2`).
///
/// User IDs are prefixed with the SID of the server that owns the user,
/// so the owning server of any UID is its first three characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServerId(String);

impl ServerId {
    /// Wrap a SID without validating it.
    pub fn new(sid: impl Into<String>) -> Self {
        Self(sid.into())
    }

    /// Parse and validate a SID.
    pub fn parse(sid: &str) -> Result<Self, ProtocolError> {
        let bytes = sid.as_bytes();
        let valid = bytes.len() == 3
            && bytes[0].is_ascii_digit()
            && bytes[1..]
                .iter()
                .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase());
        if valid {
            Ok(Self(sid.to_string()))
        } else {
            Err(ProtocolError::InvalidServerId(sid.to_string()))
        }
    }

    /// Borrow the SID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The SID owning a UID, if the UID is long enough to carry one.
    pub fn of_uid(uid: &str) -> Option<Self> {
        uid.get(0..3).map(Self::new)
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
