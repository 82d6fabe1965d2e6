//! Phone number canonicalisation and hashing.
//!
//! Equality between numbers is defined only on the normalized form: ASCII
//! digits with at most one `+`, and only in leading position. Country codes
//! are not inferred, so `555-012-3456` and `+1 555 012 3456` are different
//! numbers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Strip everything except digits and a single leading `+`.
///
/// A `+` survives only if it precedes every digit. A result consisting of a
/// lone `+` collapses to the empty string. Total and idempotent.
pub fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_digit() {
            out.push(c);
        } else if c == '+' && out.is_empty() {
            out.push(c);
        }
    }
    if out == "+" {
        out.clear();
    }
    out
}

/// Lowercase hex SHA-256 digest of a normalized number (64 chars).
///
/// The only form of a number that is ever persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NumberHash(String);

impl NumberHash {
    /// Hash an already-normalized number.
    pub fn of_normalized(normalized: &str) -> Self {
        Self(format!("{:x}", Sha256::digest(normalized.as_bytes())))
    }

    /// Accept a stored digest if it is well-formed.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let valid = hex.len() == 64 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        valid.then(|| Self(hex.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NumberHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A phone number as received from the platform, with its normalized form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneNumber {
    raw: String,
    normalized: String,
}

impl PhoneNumber {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let normalized = normalize(&raw);
        Self { raw, normalized }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// True when nothing usable survived normalization.
    ///
    /// Blank numbers never match the cache or the contact list.
    pub fn is_blank(&self) -> bool {
        self.normalized.is_empty()
    }

    pub fn hash(&self) -> NumberHash {
        NumberHash::of_normalized(&self.normalized)
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for PhoneNumber {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}
