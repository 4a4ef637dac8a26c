//! Peer Identity - Name-derived identifiers for mesh participants
//!
//! Every participant registers with the transport under a `PeerId`. Identities
//! are plain strings derived from a human display name: the name is slugged and
//! appended to the well-known seed identity, so all members of one mesh share a
//! namespace and the seed itself is just the bare constant. No keys, no central
//! registry - whoever registers a name first holds it for as long as they stay
//! online.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The well-known bootstrap identity every instance dials first.
pub const SEED_IDENTITY: &str = "meshchat-seed";

/// Minimum slug length accepted at the login/UI boundary.
///
/// The core itself accepts any name; enforcing this is the caller's job.
pub const MIN_NAME_SLUG_LEN: usize = 3;

/// Opaque identity of one mesh participant's transport endpoint.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// The well-known seed identity.
    pub fn seed() -> Self {
        Self(SEED_IDENTITY.to_string())
    }

    /// Derive the identity for a display name under this id's namespace.
    ///
    /// `seed().derive("Alice Smith")` yields `meshchat-seed-alice-smith`.
    pub fn derive(&self, display_name: &str) -> Self {
        Self(format!("{}-{}", self.0, slug(display_name)))
    }

    /// Derive a display-name identity under the default seed namespace.
    pub fn from_display_name(display_name: &str) -> Self {
        Self::seed().derive(display_name)
    }

    /// Whether this is the bare seed identity.
    pub fn is_seed(&self) -> bool {
        self.0 == SEED_IDENTITY
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for PeerId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalize a display name into an identifier-safe slug.
///
/// Case-folded to lowercase; every run of non-alphanumeric characters becomes
/// a single hyphen; leading and trailing hyphens are trimmed.
pub fn slug(display_name: &str) -> String {
    let mut out = String::with_capacity(display_name.len());
    let mut pending_hyphen = false;

    for c in display_name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_normalization() {
        assert_eq!(slug("Alice"), "alice");
        assert_eq!(slug("Alice Smith"), "alice-smith");
        assert_eq!(slug("bob!!jones"), "bob-jones");
        assert_eq!(slug("  spaced   out  "), "spaced-out");
        assert_eq!(slug("UPPER_case.123"), "upper-case-123");
    }

    #[test]
    fn test_slug_degenerate_input() {
        assert_eq!(slug(""), "");
        assert_eq!(slug("!!!"), "");
    }

    #[test]
    fn test_display_name_derivation() {
        let id = PeerId::from_display_name("Alice Smith");
        assert_eq!(id.as_str(), "meshchat-seed-alice-smith");
        assert!(!id.is_seed());
    }

    #[test]
    fn test_seed_identity() {
        let seed = PeerId::seed();
        assert_eq!(seed.as_str(), SEED_IDENTITY);
        assert!(seed.is_seed());
    }

    #[test]
    fn test_custom_namespace_derivation() {
        let room: PeerId = "game-room".into();
        assert_eq!(room.derive("Dana").as_str(), "game-room-dana");
    }

    #[test]
    fn test_derivation_is_deterministic() {
        assert_eq!(
            PeerId::from_display_name("Carol"),
            PeerId::from_display_name("carol")
        );
    }

    #[test]
    fn test_serde_transparent() {
        let id = PeerId::from_display_name("alice");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"meshchat-seed-alice\"");
        let back: PeerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
