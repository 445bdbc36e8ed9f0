//! Decision taken for each fetched snapshot before anything touches the local board.

use crate::state::{board::BoardSnapshot, identity::SnapshotMetadata};

/// Signature and hash of the last write confirmed by the store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PersistedMarker {
    /// Signature of the confirmed write.
    pub signature: String,
    /// Hash of the confirmed snapshot; combat-only writes have none.
    pub hash: Option<String>,
}

/// Local facts a fetched snapshot is checked against.
#[derive(Debug, Clone, Copy)]
pub struct MergeContext<'a> {
    /// Hash of the last snapshot merged into the local board.
    pub last_accepted_hash: Option<&'a str>,
    /// Whether an own write is still tracked or travelling.
    pub write_pending: bool,
    /// Last own write confirmed by the store.
    pub last_persisted: Option<&'a PersistedMarker>,
    /// Normalised id of the local user.
    pub user_id: &'a str,
    /// Authorship of the local board.
    pub local_metadata: Option<&'a SnapshotMetadata>,
}

/// What to do with a fetched snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// Merge it into the local board.
    Accept,
    /// Same content as the last merged snapshot.
    Unchanged,
    /// An own write is pending; look again on the next poll.
    Deferred,
    /// The snapshot is our own write coming back.
    Echo,
    /// The local board carries a GM write at least as recent.
    Superseded,
}

/// Decide how to treat `remote`, whose change-detection hash is `remote_hash`.
///
/// Checks run in order and the first match wins: unchanged hash, pending own write,
/// own authorship, then GM recency. A missing hash never counts as unchanged.
pub fn decide_merge(
    remote: &BoardSnapshot,
    remote_hash: Option<&str>,
    ctx: &MergeContext<'_>,
) -> MergeDecision {
    if remote_hash.is_some() && remote_hash == ctx.last_accepted_hash {
        return MergeDecision::Unchanged;
    }

    if ctx.write_pending {
        return MergeDecision::Deferred;
    }

    let remote_meta = remote.metadata.as_ref();
    if is_echo(remote_meta, remote_hash, ctx) {
        return MergeDecision::Echo;
    }

    if let Some(local) = ctx.local_metadata.filter(|local| local.author_is_gm) {
        let remote_at = remote_meta.map(|meta| meta.updated_at).unwrap_or(0);
        if remote_at < local.updated_at {
            return MergeDecision::Superseded;
        }
        if remote_at == local.updated_at {
            let remote_is_gm = remote_meta.is_some_and(|meta| meta.author_is_gm);
            let same_write = remote_meta.is_some_and(|meta| meta.signature == local.signature);
            if !remote_is_gm || same_write {
                return MergeDecision::Superseded;
            }
        }
    }

    MergeDecision::Accept
}

fn is_echo(
    remote_meta: Option<&SnapshotMetadata>,
    remote_hash: Option<&str>,
    ctx: &MergeContext<'_>,
) -> bool {
    if let Some(meta) = remote_meta {
        if meta.is_authored_by(ctx.user_id) {
            return true;
        }
        let persisted_signature = ctx.last_persisted.map(|marker| marker.signature.as_str());
        if !meta.signature.is_empty() && Some(meta.signature.as_str()) == persisted_signature {
            return true;
        }
    }

    let persisted_hash = ctx.last_persisted.and_then(|marker| marker.hash.as_deref());
    remote_hash.is_some() && remote_hash == persisted_hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::identity::Identity;

    fn snapshot(metadata: Option<SnapshotMetadata>) -> BoardSnapshot {
        BoardSnapshot {
            metadata,
            ..BoardSnapshot::default()
        }
    }

    fn ctx<'a>(user_id: &'a str) -> MergeContext<'a> {
        MergeContext {
            last_accepted_hash: None,
            write_pending: false,
            last_persisted: None,
            user_id,
            local_metadata: None,
        }
    }

    #[test]
    fn unchanged_hash_short_circuits() {
        let remote = snapshot(None);
        let context = MergeContext {
            last_accepted_hash: Some("h1"),
            write_pending: true,
            ..ctx("alice")
        };
        assert_eq!(decide_merge(&remote, Some("h1"), &context), MergeDecision::Unchanged);
        assert_eq!(decide_merge(&remote, None, &context), MergeDecision::Deferred);
    }

    #[test]
    fn own_writes_are_echoes() {
        let alice = Identity::new("alice", false);
        let remote = snapshot(Some(SnapshotMetadata::with_nonce(&alice, 5, "abc")));
        assert_eq!(decide_merge(&remote, Some("h"), &ctx("ALICE")), MergeDecision::Echo);

        let bob = Identity::new("bob", false);
        let from_bob = snapshot(Some(SnapshotMetadata::with_nonce(&bob, 5, "abc")));
        let marker = PersistedMarker {
            signature: from_bob.metadata.as_ref().unwrap().signature.clone(),
            hash: None,
        };
        let context = MergeContext {
            last_persisted: Some(&marker),
            ..ctx("alice")
        };
        assert_eq!(decide_merge(&from_bob, Some("h"), &context), MergeDecision::Echo);

        let marker = PersistedMarker {
            signature: "other".into(),
            hash: Some("h".into()),
        };
        let context = MergeContext {
            last_persisted: Some(&marker),
            ..ctx("alice")
        };
        assert_eq!(decide_merge(&snapshot(None), Some("h"), &context), MergeDecision::Echo);
    }

    #[test]
    fn gm_recency_rejects_older_and_tied_player_writes() {
        let gm = Identity::new("gm", true);
        let other_gm = Identity::new("co-gm", true);
        let player = Identity::new("pat", false);
        let local = SnapshotMetadata::with_nonce(&gm, 100, "n1");
        let context = MergeContext {
            local_metadata: Some(&local),
            ..ctx("viewer")
        };

        let older = snapshot(Some(SnapshotMetadata::with_nonce(&player, 99, "x")));
        let tied_player = snapshot(Some(SnapshotMetadata::with_nonce(&player, 100, "x")));
        let tied_gm = snapshot(Some(SnapshotMetadata::with_nonce(&other_gm, 100, "x")));
        let same_write = snapshot(Some(local.clone()));
        let newer = snapshot(Some(SnapshotMetadata::with_nonce(&player, 101, "x")));
        let unsigned = snapshot(None);

        assert_eq!(decide_merge(&older, Some("a"), &context), MergeDecision::Superseded);
        assert_eq!(decide_merge(&tied_player, Some("b"), &context), MergeDecision::Superseded);
        assert_eq!(decide_merge(&tied_gm, Some("c"), &context), MergeDecision::Accept);
        assert_eq!(decide_merge(&same_write, Some("d"), &context), MergeDecision::Superseded);
        assert_eq!(decide_merge(&newer, Some("e"), &context), MergeDecision::Accept);
        assert_eq!(decide_merge(&unsigned, Some("f"), &context), MergeDecision::Superseded);
    }

    #[test]
    fn player_local_state_never_blocks() {
        let player = Identity::new("pat", false);
        let local = SnapshotMetadata::with_nonce(&player, 100, "n1");
        let context = MergeContext {
            local_metadata: Some(&local),
            ..ctx("viewer")
        };
        let older = snapshot(Some(SnapshotMetadata::with_nonce(&Identity::new("gm", true), 50, "x")));
        assert_eq!(decide_merge(&older, Some("a"), &context), MergeDecision::Accept);
    }
}
