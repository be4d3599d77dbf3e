//! Secret wrapper for sensitive values
//!
//! OAuth access and refresh tokens pass through logs, Debug output, and the
//! persisted credential file. The wrapper keeps them out of the first two
//! (redacted Debug/Display, zeroized on drop) while the serde impls let the
//! credential store serialize them to disk.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

/// Sensitive value - redacted in Debug/Display/logs
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Create a new secret value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
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

impl<T: Zeroize + PartialEq> PartialEq for Secret<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl From<String> for Secret<String> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Secret<String> {
    fn from(value: &str) -> Self {
        Self::new(value.to_owned())
    }
}

// Serde passes the raw value through: tokens must survive the roundtrip to
// the credential file. Redaction applies to Debug/Display only.
impl<T: Zeroize + Serialize> Serialize for Secret<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de, T: Zeroize + Deserialize<'de>> Deserialize<'de> for Secret<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Secret::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_redacts_debug() {
        let secret = Secret::new(String::from("rt_live_token"));
        let debug = format!("{:?}", secret);
        assert_eq!(debug, "[REDACTED]");
        assert!(!debug.contains("rt_live_token"));
    }

    #[test]
    fn secret_exposes_value() {
        let secret = Secret::new(String::from("rt_live_token"));
        assert_eq!(secret.expose(), "rt_live_token");
    }

    #[test]
    fn secret_roundtrips_through_serde() {
        let secret: Secret<String> = "at_serialized".into();
        let json = serde_json::to_string(&secret).unwrap();
        assert_eq!(json, "\"at_serialized\"");

        let back: Secret<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.expose(), "at_serialized");
    }

    #[test]
    fn secret_equality_compares_inner() {
        let a: Secret<String> = "same".into();
        let b: Secret<String> = "same".into();
        let c: Secret<String> = "different".into();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
