use rand::{Rng, distr::Alphanumeric};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::state::lenient;

const NONCE_LENGTH: usize = 8;

/// Who is driving a client: a case-insensitive user id and whether that user is the GM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    user_id: String,
    is_gm: bool,
}

/// Proof that the caller acts with the GM role.
///
/// Only [`Identity::gm_capability`] hands these out, so privileged paths (forced lock
/// takeover, round confirmation) take one as an argument instead of a bare flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GmCapability {
    _private: (),
}

impl Identity {
    /// Build an identity, normalising the user id (trimmed, lower-cased).
    pub fn new(user_id: impl AsRef<str>, is_gm: bool) -> Self {
        Self {
            user_id: normalize_user_id(user_id.as_ref()),
            is_gm,
        }
    }

    /// Normalised user id, also used as turn lock holder id.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Whether this identity carries the GM role.
    pub fn is_gm(&self) -> bool {
        self.is_gm
    }

    /// GM capability token, available to GM identities only.
    pub fn gm_capability(&self) -> Option<GmCapability> {
        self.is_gm.then_some(GmCapability { _private: () })
    }

    /// Role recorded in snapshot metadata.
    pub fn role(&self) -> AuthorRole {
        if self.is_gm {
            AuthorRole::Gm
        } else {
            AuthorRole::Player
        }
    }
}

/// Lower-case, whitespace-trimmed form used for every user id comparison.
pub fn normalize_user_id(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Role of the client that authored a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorRole {
    /// Moderator client.
    Gm,
    /// Any player client.
    #[default]
    #[serde(other)]
    Player,
}

/// Authorship stamp attached to every persisted snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    /// Write time in milliseconds since the Unix epoch.
    #[serde(default, deserialize_with = "lenient::millis_or_zero")]
    pub updated_at: i64,
    /// `authorId:timestamp:nonce`, unique per write.
    #[serde(default, deserialize_with = "lenient::string_or_empty")]
    #[validate(length(min = 1))]
    pub signature: String,
    /// Normalised id of the author.
    #[serde(default, deserialize_with = "lenient::string_or_empty")]
    #[validate(length(min = 1))]
    pub author_id: String,
    /// Role of the author.
    #[serde(default)]
    pub author_role: AuthorRole,
    /// Whether the author held the GM role.
    #[serde(default, deserialize_with = "lenient::bool_or_false")]
    pub author_is_gm: bool,
}

impl SnapshotMetadata {
    /// Stamp a fresh metadata record for `identity` with a random nonce.
    pub fn stamp(identity: &Identity, now_ms: i64) -> Self {
        let nonce: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LENGTH)
            .map(char::from)
            .collect();
        Self::with_nonce(identity, now_ms, &nonce)
    }

    /// Stamp metadata with an explicit nonce.
    pub fn with_nonce(identity: &Identity, now_ms: i64, nonce: &str) -> Self {
        Self {
            updated_at: now_ms,
            signature: format!("{}:{}:{}", identity.user_id(), now_ms, nonce),
            author_id: identity.user_id().to_string(),
            author_role: identity.role(),
            author_is_gm: identity.is_gm(),
        }
    }

    /// Whether `user_id` (any casing) authored this snapshot.
    pub fn is_authored_by(&self, user_id: &str) -> bool {
        !self.author_id.is_empty() && normalize_user_id(&self.author_id) == normalize_user_id(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_ids_are_normalised() {
        let identity = Identity::new("  Alice ", false);
        assert_eq!(identity.user_id(), "alice");
        assert!(identity.gm_capability().is_none());
        assert!(Identity::new("gm", true).gm_capability().is_some());
    }

    #[test]
    fn stamped_signature_carries_author_and_time() {
        let identity = Identity::new("Bob", true);
        let metadata = SnapshotMetadata::stamp(&identity, 1_700);
        let parts: Vec<&str> = metadata.signature.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "bob");
        assert_eq!(parts[1], "1700");
        assert_eq!(parts[2].len(), NONCE_LENGTH);
        assert_eq!(metadata.author_role, AuthorRole::Gm);
        assert!(metadata.author_is_gm);
        assert!(metadata.is_authored_by("BOB"));
    }

    #[test]
    fn two_stamps_never_share_a_signature() {
        let identity = Identity::new("carol", false);
        let first = SnapshotMetadata::stamp(&identity, 5);
        let second = SnapshotMetadata::stamp(&identity, 5);
        assert_ne!(first.signature, second.signature);
    }

    #[test]
    fn malformed_metadata_defaults_fields() {
        let metadata: SnapshotMetadata = serde_json::from_value(serde_json::json!({
            "updatedAt": "oops",
            "authorRole": "wizard",
            "authorIsGm": "yes",
        }))
        .unwrap();
        assert_eq!(metadata.updated_at, 0);
        assert_eq!(metadata.author_role, AuthorRole::Player);
        assert!(!metadata.author_is_gm);
        assert!(metadata.signature.is_empty());
    }
}
