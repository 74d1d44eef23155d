//! User-context fingerprints.
//!
//! Events do not carry raw user attributes. Instead, the user context is reduced to a stable
//! digest that analytics storage can group by.
use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// A user attribute value used as fingerprint input.
#[derive(Debug, Clone, PartialEq, From, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserAttribute {
    String(String),
    Number(f64),
    Boolean(bool),
}

impl From<&str> for UserAttribute {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// Hex-encoded MD5 digest of a user id and its attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserFingerprint(String);

impl UserFingerprint {
    /// Compute fingerprint of `user_id` and `attributes`.
    ///
    /// Attributes are sorted by name first, so the result does not depend on map iteration order.
    ///
    /// ```
    /// # use std::collections::HashMap;
    /// # use eventlog_core::UserFingerprint;
    /// let a = UserFingerprint::compute("user-1", &HashMap::from([
    ///     ("country".to_owned(), "US".into()),
    ///     ("age".to_owned(), 30.0.into()),
    /// ]));
    /// let b = UserFingerprint::compute("user-1", &HashMap::from([
    ///     ("age".to_owned(), 30.0.into()),
    ///     ("country".to_owned(), "US".into()),
    /// ]));
    /// assert_eq!(a, b);
    /// ```
    pub fn compute(user_id: &str, attributes: &HashMap<String, UserAttribute>) -> UserFingerprint {
        let mut sorted: Vec<_> = attributes.iter().collect();
        sorted.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));

        let mut context = md5::Context::new();
        context.consume(user_id.as_bytes());
        for (name, value) in sorted {
            // Separators keep ("ab", "c") and ("a", "bc") from colliding.
            context.consume(b"\x1f");
            context.consume(name.as_bytes());
            context.consume(b"=");
            match value {
                UserAttribute::String(s) => {
                    context.consume(b"s:");
                    context.consume(s.as_bytes());
                }
                UserAttribute::Number(n) => {
                    context.consume(b"n:");
                    context.consume(n.to_bits().to_be_bytes());
                }
                UserAttribute::Boolean(b) => {
                    context.consume(if *b { b"b:1" } else { b"b:0" });
                }
            }
        }

        UserFingerprint(format!("{:x}", context.compute()))
    }

    /// Use an externally computed fingerprint as is.
    pub fn from_raw(value: impl Into<String>) -> UserFingerprint {
        UserFingerprint(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
