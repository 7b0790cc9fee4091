//! Redacting wrapper for credentials
//!
//! Access tokens, refresh tokens and passwords pass through several layers
//! that log with `tracing` and derive `Debug`. Wrapping them in `Secret`
//! keeps the raw value out of every formatted representation and wipes the
//! memory on drop.

use serde::{Deserialize, Deserializer};
use std::fmt;
use zeroize::Zeroize;

/// Sensitive value - redacted in Debug/Display/logs
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Wrap a sensitive value.
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Compare against a plain string without exposing the value to the caller.
    ///
    /// Runs over the full length of both inputs so the comparison time does
    /// not depend on where the first mismatching byte is.
    pub fn matches(&self, other: &str) -> bool {
        let ours = self.0.as_bytes();
        let theirs = other.as_bytes();
        if ours.len() != theirs.len() {
            return false;
        }
        ours.iter()
            .zip(theirs)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl From<String> for Secret<String> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl<'de, T: Zeroize + Deserialize<'de>> Deserialize<'de> for Secret<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Self::new)
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_debug_and_display() {
        let secret = Secret::new(String::from("rt_live_token"));
        assert_eq!(format!("{secret:?}"), "[REDACTED]");
        assert_eq!(format!("{secret}"), "[REDACTED]");
    }

    #[test]
    fn redacts_inside_derived_debug() {
        #[derive(Debug)]
        #[allow(dead_code)]
        struct Holder {
            access: Option<Secret<String>>,
        }

        let holder = Holder {
            access: Some(Secret::from(String::from("at_live_token"))),
        };
        let debug = format!("{holder:?}");
        assert!(!debug.contains("at_live_token"), "leaked: {debug}");
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn exposes_value() {
        let secret = Secret::new(String::from("password123"));
        assert_eq!(secret.expose(), "password123");
    }

    #[test]
    fn matches_compares_full_value() {
        let secret = Secret::new(String::from("at_abc"));
        assert!(secret.matches("at_abc"));
        assert!(!secret.matches("at_abd"));
        assert!(!secret.matches("at_ab"));
        assert!(!secret.matches(""));
    }

    #[test]
    fn deserializes_from_plain_string() {
        #[derive(serde::Deserialize)]
        struct Account {
            password: Secret<String>,
        }

        let account: Account = toml::from_str(r#"password = "hunter2""#).unwrap();
        assert_eq!(account.password.expose(), "hunter2");
        assert_eq!(format!("{:?}", account.password), "[REDACTED]");
    }
}
