//! Wrapper for secret-bearing strings.
//!
//! [`Secret`] has no `Display` and no `Serialize` impl, and its `Debug`
//! output never contains the value. The only ways out are [`Secret::expose`]
//! (for handing the value to a child process) and [`Secret::masked`]
//! (for audit records).

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};

/// Character replacing every character of a secret in redacted output.
pub const MASK_CHAR: char = '*';

pub struct Secret {
    value: SecretString,
}

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: SecretString::from(value.into()),
        }
    }

    /// Expose the plaintext. Callers must not log or persist the result.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    /// Length in characters, without exposing the value.
    pub fn len(&self) -> usize {
        self.value.expose_secret().chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    /// One `*` per character of the value. For ASCII tokens this equals
    /// the byte length; a multi-byte character still masks to a single `*`.
    pub fn masked(&self) -> String {
        std::iter::repeat(MASK_CHAR).take(self.len()).collect()
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Clone for Secret {
    fn clone(&self) -> Self {
        Self::new(self.expose().to_string())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([REDACTED, {} chars])", self.len())
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Secret::new)
    }
}
