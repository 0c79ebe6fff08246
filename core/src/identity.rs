/// Identity normalization — maps a raw email/identity string to a key
/// that is safe to embed in a document path segment.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized user identity, used as the path segment for every
/// per-user document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserKey(String);

impl UserKey {
    /// Normalize a raw identity string: `.` and `@` become `-`.
    ///
    /// Deterministic, pure and total — no validation of email
    /// well-formedness, no case folding. Distinct raw identities that
    /// normalize to the same key collide undetected; callers accept
    /// that risk.
    pub fn normalize(raw: &str) -> Self {
        Self(raw.replace('.', "-").replace('@', "-"))
    }

    /// Wrap an already-normalized key (e.g. read back from a document).
    pub fn from_normalized(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
