//! Salesforce record identifiers
//!
//! A record Id comes in two encodings: the 15-character case-sensitive form and
//! the 18-character case-insensitive form, which appends a three-character
//! checksum of the capitalization of the first fifteen. Every [`SalesforceId`]
//! is normalized to the 18-character form on construction, so equality and
//! hashing never depend on which encoding the caller supplied.

use amaxa_common::{AmaxaError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const CHECKSUM_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ012345";

/// Length of the case-sensitive Id encoding
pub const SHORT_ID_LENGTH: usize = 15;

/// Length of the case-insensitive Id encoding
pub const LONG_ID_LENGTH: usize = 18;

/// A Salesforce record Id, always stored in its 18-character form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SalesforceId(String);

impl SalesforceId {
    /// Parse a 15- or 18-character Id, ignoring surrounding whitespace
    pub fn new(id: &str) -> Result<Self> {
        let id = id.trim();

        if !id.is_ascii() {
            return Err(AmaxaError::InvalidId(id.to_string()));
        }

        match id.len() {
            SHORT_ID_LENGTH => Ok(Self(format!("{}{}", id, checksum(id.as_bytes())))),
            LONG_ID_LENGTH => Ok(Self(id.to_string())),
            _ => Err(AmaxaError::InvalidId(id.to_string())),
        }
    }

    /// The 18-character form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 15-character case-sensitive form
    pub fn short_form(&self) -> &str {
        &self.0[..SHORT_ID_LENGTH]
    }

    /// The three-character key prefix identifying the record's sObject type
    pub fn key_prefix(&self) -> &str {
        &self.0[..3]
    }
}

/// One checksum character per 5-character block: bit `j` is set when the
/// `j`th character of the block is an uppercase letter.
fn checksum(short: &[u8]) -> String {
    short
        .chunks(5)
        .map(|block| {
            let bits = block
                .iter()
                .enumerate()
                .filter(|(_, c)| c.is_ascii_uppercase())
                .fold(0usize, |acc, (j, _)| acc | (1 << j));
            CHECKSUM_ALPHABET[bits] as char
        })
        .collect()
}

impl fmt::Display for SalesforceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SalesforceId {
    type Err = AmaxaError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<&str> for SalesforceId {
    type Error = AmaxaError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl AsRef<str> for SalesforceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for SalesforceId {
    fn eq(&self, other: &str) -> bool {
        SalesforceId::new(other).is_ok_and(|other| *self == other)
    }
}

impl PartialEq<&str> for SalesforceId {
    fn eq(&self, other: &&str) -> bool {
        *self == **other
    }
}

impl Serialize for SalesforceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SalesforceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        SalesforceId::new(&raw).map_err(serde::de::Error::custom)
    }
}
