//! Time-sortable identifiers for log files and bundles.
//!
//! Both id kinds wrap a UUIDv7: a 48-bit millisecond timestamp followed by
//! counter and random bits, so ids sort by creation time and stay unique
//! across processes. The canonical text form is the 32-character lowercase
//! hex ("simple") encoding, which doubles as the on-disk filename.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use thiserror::Error;
use uuid::Uuid;

/// Number of bytes occupied by one id in canonical text form.
pub const ENCODED_LEN: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("`{input}` is not a valid {kind} id")]
pub struct ParseIdError {
    pub kind: &'static str,
    pub input: String,
}

/// Parse exactly one canonical id. Uppercase hex, hyphens and braces are
/// rejected so that every accepted input re-encodes to identical bytes.
fn parse_canonical(kind: &'static str, input: &[u8]) -> Result<Uuid, ParseIdError> {
    let err = || ParseIdError {
        kind,
        input: String::from_utf8_lossy(input).into_owned(),
    };
    if input.len() != ENCODED_LEN || !input.iter().all(|b| matches!(*b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(err());
    }
    Uuid::try_parse_ascii(input).map_err(|_| err())
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh id stamped with the current time.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn parse_bytes(input: &[u8]) -> Result<Self, ParseIdError> {
                parse_canonical($kind, input).map(Self)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0.as_simple(), f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0.as_simple())
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse_bytes(s.as_bytes())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

define_id!(
    /// Identifies one uploaded log file, in staging and in permanent storage.
    FileId,
    "log file"
);

impl FileId {
    /// Write the canonical encoding into `buf`, which must be exactly
    /// [`ENCODED_LEN`] bytes long.
    pub fn encode_into(&self, buf: &mut [u8]) {
        self.0.as_simple().encode_lower(buf);
    }
}

define_id!(
    /// Identifies an ordered group of log files uploaded in one request.
    BundleId,
    "log bundle"
);
