//! Strong type definitions for the shipsync engine.
//!
//! Identifiers are newtypes so a local record id can never be passed where
//! an external id or a filter key is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// A 16-byte random identifier for an import session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub [u8; 16]);

impl SessionId {
    /// Generate a fresh random session id.
    pub fn generate() -> Self {
        Self(rand::random())
    }

    /// Create a session id from raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let bytes = hex::decode(s).map_err(|e| CoreError::MalformedId(e.to_string()))?;
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| CoreError::MalformedId(format!("expected 16 bytes: {s}")))?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.to_hex())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Local row id of a parent, child or profile record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_newtype!(
    /// Identifier assigned by the external shipment system.
    ExternalId
);

string_newtype!(
    /// Partition key scoping a bulk import and its mutual exclusion.
    FilterKey
);

string_newtype!(
    /// A package status value as stored locally (e.g. `in_transit`).
    StatusValue
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_hex_roundtrip() {
        let id = SessionId::from_bytes([0x42; 16]);
        let recovered = SessionId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, recovered);
    }

    #[test]
    fn test_session_id_rejects_wrong_length() {
        assert!(SessionId::from_hex("abcd").is_err());
        assert!(SessionId::from_hex("not hex").is_err());
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }

    #[test]
    fn test_string_newtypes_serialize_transparently() {
        let key = FilterKey::new("warehouse-7");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"warehouse-7\"");
        assert_eq!(key.to_string(), "warehouse-7");
    }
}
