//! Credentials that must never reach logs
//!
//! API keys and AWS secrets live in [`SecretString`]. Formatting it always
//! prints `[REDACTED]`; adapters read the value with
//! [`SecretString::expose_secret`] only while building auth headers or SDK
//! credentials. Serde sees the plain string so config files round-trip.

use serde::{Deserialize, Serialize};
use std::fmt;

const REDACTED: &str = "[REDACTED]";

#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    /// Blank or whitespace-only values count as absent
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// `Bearer <key>` for the Authorization header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }

    /// Last four characters, enough to tell two keys apart in a debug log
    pub fn fingerprint(&self) -> String {
        let len = self.0.chars().count();
        if len < 12 {
            return REDACTED.to_string();
        }
        let tail: String = self.0.chars().skip(len - 4).collect();
        format!("...{}", tail)
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
