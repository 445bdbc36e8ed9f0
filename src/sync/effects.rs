use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast;
use tracing::debug;

use crate::state::combat::TurnEffect;

/// Broadcast hub fanning turn effects out to whoever renders them.
pub struct EffectHub {
    sender: broadcast::Sender<TurnEffect>,
    guard: Mutex<EffectReplayGuard>,
}

impl EffectHub {
    /// Construct a hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self {
            sender,
            guard: Mutex::new(EffectReplayGuard::default()),
        }
    }

    /// Broadcast `current` if this client has not replayed it yet.
    pub fn replay(&self, current: Option<&TurnEffect>) -> Option<TurnEffect> {
        let fresh = self
            .guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observe(current)?;
        debug!(signature = %fresh.signature(), "replaying turn effect");
        self.broadcast(fresh.clone());
        Some(fresh)
    }

    /// Remember `current` as already played; used when joining a running combat, whose
    /// last effect is history rather than news.
    pub fn prime(&self, current: Option<&TurnEffect>) {
        if let Some(effect) = current {
            self.guard
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .mark_seen(effect);
        }
    }

    /// Broadcast an effect triggered on this client and remember it as replayed.
    pub fn emit_local(&self, effect: TurnEffect) {
        self.guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .mark_seen(&effect);
        self.broadcast(effect);
    }

    /// Register a new subscriber that will receive subsequent effects.
    pub fn subscribe(&self) -> broadcast::Receiver<TurnEffect> {
        self.sender.subscribe()
    }

    /// Send an effect to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, effect: TurnEffect) {
        let _ = self.sender.send(effect);
    }
}

/// Remembers the last replayed effect so each one plays once per client.
#[derive(Debug, Default)]
pub struct EffectReplayGuard {
    last_signature: Option<String>,
}

impl EffectReplayGuard {
    /// Return `effect` when it differs from the last one seen, remembering it.
    pub fn observe(&mut self, effect: Option<&TurnEffect>) -> Option<TurnEffect> {
        let effect = effect?;
        let signature = effect.signature();
        if self.last_signature.as_deref() == Some(signature.as_str()) {
            return None;
        }
        self.last_signature = Some(signature);
        Some(effect.clone())
    }

    /// Remember `effect` without playing it.
    pub fn mark_seen(&mut self, effect: &TurnEffect) {
        self.last_signature = Some(effect.signature());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn effect(at: i64) -> TurnEffect {
        TurnEffect {
            kind: "ambush".into(),
            combatant_id: Some("orc".into()),
            triggered_at: at,
            payload: None,
        }
    }

    #[test]
    fn each_effect_replays_once() {
        let mut guard = EffectReplayGuard::default();
        assert_eq!(guard.observe(Some(&effect(1))), Some(effect(1)));
        assert_eq!(guard.observe(Some(&effect(1))), None);
        assert_eq!(guard.observe(Some(&effect(2))), Some(effect(2)));
        assert_eq!(guard.observe(Some(&effect(2))), None);
        assert_eq!(guard.observe(None), None);
    }

    #[test]
    fn local_effects_are_not_replayed() {
        let mut guard = EffectReplayGuard::default();
        guard.mark_seen(&effect(5));
        assert_eq!(guard.observe(Some(&effect(5))), None);
    }

    #[tokio::test]
    async fn hub_replays_fresh_effects_once() {
        let hub = EffectHub::new(4);
        let mut receiver = hub.subscribe();
        assert!(hub.replay(None).is_none());
        hub.prime(Some(&effect(1)));
        assert!(hub.replay(Some(&effect(1))).is_none());

        hub.emit_local(effect(3));
        assert_eq!(receiver.recv().await.unwrap(), effect(3));
        assert!(hub.replay(Some(&effect(3))).is_none());

        assert_eq!(hub.replay(Some(&effect(4))), Some(effect(4)));
        assert_eq!(receiver.recv().await.unwrap(), effect(4));
        assert!(receiver.try_recv().is_err());
    }
}
