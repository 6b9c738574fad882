use std::fmt;

use serde::{Deserialize, Deserializer};

/// A wrapper that keeps the shared profile key out of logs.
///
/// The HMAC key configured for a profile is loaded together with the rest
/// of the connector configuration, and that configuration is routinely
/// printed when debugging. `Secret<T>` makes sure the key itself never is:
/// `Debug` and `Display` always render `[REDACTED]`, and the value is only
/// reachable through [`expose_secret`](Self::expose_secret).
///
/// # Examples
///
/// ```
/// use shadowd_connector::Secret;
///
/// let key = Secret::new("profile-key".to_string());
///
/// assert_eq!(format!("{:?}", key), "[REDACTED]");
/// assert_eq!(format!("{}", key), "[REDACTED]");
/// assert_eq!(key.expose_secret(), "profile-key");
/// ```
// Do NOT derive Clone, Copy or Default: the key must not be duplicated casually.
pub struct Secret<T> {
    // Must stay private, otherwise redaction can be bypassed (CWE-532).
    inner: T,
}

impl<T> Secret<T> {
    /// Wraps a sensitive value.
    pub fn new(value: T) -> Self {
        Self { inner: value }
    }

    /// Explicitly exposes the wrapped value.
    ///
    /// Only the signer should need this. Never log the result.
    pub fn expose_secret(&self) -> &T {
        &self.inner
    }
}

impl<T> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Secret<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Secret::new)
    }
}
