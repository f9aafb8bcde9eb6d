//! Callback model and execution effects.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// What a callback does when it finally runs.
///
/// Tag-and-payload replaces the function-pointer-plus-argument shape: the
/// executor dispatches on the tag and interprets the payload accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallbackKind {
    /// Return `payload` bytes of deferred memory.
    ReclaimMemory,
    /// Drop one reference on object `payload`.
    ReleaseRef,
    /// Wake waiter `payload`.
    WakeWaiter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallbackState {
    Idle,
    Pending,
    Processing,
    Done,
}

/// A deferred unit of work waiting for a grace period.
#[derive(Debug, Clone)]
pub struct Callback {
    pub id: u64,
    pub kind: CallbackKind,
    pub payload: u64,
    pub state: CallbackState,
    pub enqueued_at_ns: u64,
    /// Grace-period generation the callback was enqueued in. It must not
    /// execute before the next generation.
    pub gp_seq: u64,
}

impl Callback {
    /// A freshly built callback is `Idle`; it turns `Pending` when a queue
    /// accepts it.
    pub fn new(id: u64, kind: CallbackKind, payload: u64, now_ns: u64, gp_seq: u64) -> Self {
        Self {
            id,
            kind,
            payload,
            state: CallbackState::Idle,
            enqueued_at_ns: now_ns,
            gp_seq,
        }
    }
}

/// Aggregated side effects of executed callbacks.
///
/// Shared between the grace-period processor and the NOCB workers; every
/// execution path funnels through [`ExecEffects::apply`].
#[derive(Default)]
pub struct ExecEffects {
    pub memory_reclaimed_bytes: AtomicU64,
    pub refs_released: AtomicU64,
    pub waiters_woken: AtomicU64,
    pub callback_latency_ns: AtomicU64,
}

impl ExecEffects {
    /// Execute one callback in place. Must be called outside any queue or
    /// segment lock. The callback leaves in `Done` state; processors count
    /// only callbacks they observe reaching it.
    pub fn apply(&self, cb: &mut Callback, now_ns: u64) {
        cb.state = CallbackState::Processing;
        match cb.kind {
            CallbackKind::ReclaimMemory => {
                self.memory_reclaimed_bytes
                    .fetch_add(cb.payload, Ordering::Relaxed);
            }
            CallbackKind::ReleaseRef => {
                self.refs_released.fetch_add(1, Ordering::Relaxed);
            }
            CallbackKind::WakeWaiter => {
                self.waiters_woken.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.callback_latency_ns.fetch_add(
            now_ns.saturating_sub(cb.enqueued_at_ns),
            Ordering::Relaxed,
        );
        cb.state = CallbackState::Done;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_dispatches_on_kind() {
        let effects = ExecEffects::default();
        let mut reclaim = Callback::new(1, CallbackKind::ReclaimMemory, 4096, 0, 0);
        let mut release = Callback::new(2, CallbackKind::ReleaseRef, 7, 0, 0);
        let mut wake = Callback::new(3, CallbackKind::WakeWaiter, 1, 0, 0);
        effects.apply(&mut reclaim, 10);
        effects.apply(&mut release, 10);
        effects.apply(&mut wake, 10);

        assert_eq!(effects.memory_reclaimed_bytes.load(Ordering::Relaxed), 4096);
        assert_eq!(effects.refs_released.load(Ordering::Relaxed), 1);
        assert_eq!(effects.waiters_woken.load(Ordering::Relaxed), 1);
        assert_eq!(effects.callback_latency_ns.load(Ordering::Relaxed), 30);
    }

    #[test]
    fn callback_walks_idle_to_done() {
        let effects = ExecEffects::default();
        let mut cb = Callback::new(1, CallbackKind::ReleaseRef, 0, 0, 0);
        assert_eq!(cb.state, CallbackState::Idle);

        effects.apply(&mut cb, 10);
        assert_eq!(cb.state, CallbackState::Done);
    }
}
