//! Snapshot synchronisation: canonical hashing, signed writes, polling and merging.

/// Canonical serialisation and board hashing.
pub mod codec;
/// Turn effect broadcast and replay guard.
pub mod effects;
/// Merge decision for fetched snapshots.
pub mod merge;
/// Signed board and combat writes.
pub mod persistence;
/// Periodic fetch and merge of the shared board.
pub mod poller;
/// Session tying the board, writer, poller and combat rules together.
pub mod session;

pub use self::session::{CombatReport, SessionSettings, SyncError, SyncSession};
