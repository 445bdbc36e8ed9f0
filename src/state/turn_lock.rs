//! Advisory single-holder lock marking who is mid-turn in a scene.
//!
//! The lock is a plain field of the combat state, so it travels with every snapshot. It keeps
//! two people from believing they both take the same creature's turn; it does not protect
//! against a misbehaving client.

use thiserror::Error;

use crate::state::{
    CombatantId,
    combat::TurnLock,
    identity::{GmCapability, Identity, normalize_user_id},
};

/// How an acquisition treats a lock held by someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    /// Fail when a different holder owns the lock.
    Normal,
    /// Take the lock over; only a GM can build this, after the user confirmed.
    Force(GmCapability),
}

/// The lock is held by someone else.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{holder_name} is already taking a turn")]
pub struct LockContention {
    /// Current holder id.
    pub holder_id: String,
    /// Current holder display name.
    pub holder_name: String,
    /// Combatant the holder is acting for.
    pub combatant_id: Option<CombatantId>,
}

/// The requester may not release the lock.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("only {holder_name} or the GM can end this turn")]
pub struct ReleaseDenied {
    /// Current holder display name.
    pub holder_name: String,
}

/// Acquire `slot` for `holder`, acting for `combatant_id`.
///
/// The same holder may re-acquire, which refreshes the combatant and timestamp. A different
/// holder is rejected unless `mode` is [`AcquireMode::Force`]; on rejection the slot is
/// untouched.
pub fn acquire(
    slot: &mut Option<TurnLock>,
    holder: &Identity,
    holder_name: &str,
    combatant_id: Option<&str>,
    mode: AcquireMode,
    now_ms: i64,
) -> Result<(), LockContention> {
    if let Some(current) = slot.as_ref() {
        let same_holder = normalize_user_id(&current.holder_id) == holder.user_id();
        if !same_holder && mode == AcquireMode::Normal {
            return Err(LockContention {
                holder_id: current.holder_id.clone(),
                holder_name: current.holder_name.clone(),
                combatant_id: current.combatant_id.clone(),
            });
        }
    }

    *slot = Some(TurnLock {
        holder_id: holder.user_id().to_string(),
        holder_name: holder_name.to_string(),
        combatant_id: combatant_id.map(str::to_string),
        locked_at: now_ms,
    });
    Ok(())
}

/// Release `slot` on behalf of `requester`.
///
/// Succeeds for the holder, for anyone presenting a GM capability, and on an empty slot.
pub fn release(
    slot: &mut Option<TurnLock>,
    requester: &Identity,
    gm: Option<GmCapability>,
) -> Result<(), ReleaseDenied> {
    let Some(current) = slot.as_ref() else {
        return Ok(());
    };
    if gm.is_none() && normalize_user_id(&current.holder_id) != requester.user_id() {
        return Err(ReleaseDenied {
            holder_name: current.holder_name.clone(),
        });
    }
    slot.take();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_holder_is_rejected_without_force() {
        let alice = Identity::new("alice", false);
        let bob = Identity::new("bob", false);
        let mut slot = None;

        let first = acquire(&mut slot, &alice, "Alice", Some("hero"), AcquireMode::Normal, 1);
        let second = acquire(&mut slot, &bob, "Bob", Some("rogue"), AcquireMode::Normal, 2);

        assert!(first.is_ok());
        let contention = second.unwrap_err();
        assert_eq!(contention.holder_name, "Alice");
        assert_eq!(slot.as_ref().map(|lock| lock.holder_id.as_str()), Some("alice"));
        assert_eq!(slot.as_ref().map(|lock| lock.locked_at), Some(1));
    }

    #[test]
    fn same_holder_reacquires() {
        let alice = Identity::new("Alice", false);
        let mut slot = None;
        acquire(&mut slot, &alice, "Alice", Some("hero"), AcquireMode::Normal, 1).unwrap();
        acquire(&mut slot, &Identity::new("ALICE", false), "Alice", Some("pet"), AcquireMode::Normal, 3).unwrap();
        let lock = slot.unwrap();
        assert_eq!(lock.combatant_id.as_deref(), Some("pet"));
        assert_eq!(lock.locked_at, 3);
    }

    #[test]
    fn gm_force_overrides() {
        let alice = Identity::new("alice", false);
        let gm = Identity::new("gm", true);
        let mut slot = None;
        acquire(&mut slot, &alice, "Alice", Some("hero"), AcquireMode::Normal, 1).unwrap();

        let capability = gm.gm_capability().unwrap();
        acquire(&mut slot, &gm, "GM", Some("dragon"), AcquireMode::Force(capability), 2).unwrap();
        assert_eq!(slot.unwrap().holder_id, "gm");
    }

    #[test]
    fn release_requires_holder_or_gm() {
        let alice = Identity::new("alice", false);
        let bob = Identity::new("bob", false);
        let gm = Identity::new("gm", true);
        let mut slot = None;
        acquire(&mut slot, &alice, "Alice", None, AcquireMode::Normal, 1).unwrap();

        assert!(release(&mut slot, &bob, None).is_err());
        assert!(slot.is_some());
        assert!(release(&mut slot, &gm, gm.gm_capability()).is_ok());
        assert!(slot.is_none());
        assert!(release(&mut slot, &bob, None).is_ok());
    }

    #[test]
    fn at_most_one_of_two_competing_acquires_wins() {
        for (first, second) in [("alice", "bob"), ("bob", "alice")] {
            let mut slot = None;
            let a = acquire(&mut slot, &Identity::new(first, false), first, None, AcquireMode::Normal, 1);
            let b = acquire(&mut slot, &Identity::new(second, false), second, None, AcquireMode::Normal, 1);
            assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|won| **won).count(), 1);
        }
    }
}
