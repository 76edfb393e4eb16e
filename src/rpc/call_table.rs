// Call Table - the index of outstanding outbound invocations, keyed by
// call id. Owned solely by the Actor System's single-consumer engine; no
// mutex, per §5.

use crate::envelope::CallResult;
use crate::error::RuntimeError;
use crate::ids::{CallId, PeerId};
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::oneshot;

/// What a suspended `remote_call` eventually resolves to. Mirrors
/// `CallResult` minus the wire-level `Failure` variant: a handler or
/// transport failure surfaces as `Err(RuntimeError)` instead, so callers
/// use ordinary `Result` plumbing.
#[derive(Clone, Debug)]
pub enum RemoteOutcome {
    Success(Vec<u8>),
    Void,
}

impl RemoteOutcome {
    pub fn from_call_result(result: CallResult) -> Result<Self, RuntimeError> {
        match result {
            CallResult::Success(bytes) => Ok(Self::Success(bytes)),
            CallResult::Void => Ok(Self::Void),
            CallResult::Failure(err) => Err(err),
        }
    }
}

/// One outstanding `remote_call`: the peer it targets, its deadline, and
/// the waker that resumes the suspended caller.
pub struct CallSlot {
    pub call_id: CallId,
    pub target_peer: PeerId,
    pub deadline: Instant,
    waker: Option<oneshot::Sender<Result<RemoteOutcome, RuntimeError>>>,
}

impl CallSlot {
    pub fn new(
        call_id: CallId,
        target_peer: PeerId,
        deadline: Instant,
        waker: oneshot::Sender<Result<RemoteOutcome, RuntimeError>>,
    ) -> Self {
        Self {
            call_id,
            target_peer,
            deadline,
            waker: Some(waker),
        }
    }

    /// Resolve the suspended caller. A no-op if already resolved (the
    /// waker is consumed on first use) and if the receiver has already
    /// been dropped (cancellation raced the resolution).
    fn resolve(&mut self, outcome: Result<RemoteOutcome, RuntimeError>) {
        if let Some(waker) = self.waker.take() {
            let _ = waker.send(outcome);
        }
    }

    /// Consumes the slot, resolving it with an error. Used by the engine
    /// for deadline expiry and host-state/disconnect failure paths.
    pub fn fail(mut self, err: RuntimeError) {
        self.resolve(Err(err));
    }
}

/// Per-process index over live call slots. Invariant: at most one slot
/// per `call_id` (§3 invariant 1); `call_id`s themselves are unique for
/// the process lifetime by construction (122 random bits, §3 invariant 2).
#[derive(Default)]
pub struct CallTable {
    slots: HashMap<CallId, CallSlot>,
}

impl CallTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, slot: CallSlot) {
        self.slots.insert(slot.call_id, slot);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, call_id: &CallId) -> bool {
        self.slots.contains_key(call_id)
    }

    /// The peer a live call slot targets, without consuming it — used to
    /// find which session's FIFO queue to update once a `Response` is
    /// about to resolve the slot.
    pub fn peer_of(&self, call_id: &CallId) -> Option<PeerId> {
        self.slots.get(call_id).map(|slot| slot.target_peer)
    }

    /// Removes and resolves a call slot by id. Returns `false` if the id
    /// is unknown — the canonical path for §3 invariant 7: a Response for
    /// an unknown `call_id` is simply not found here and dropped by the
    /// caller, never affecting a live call.
    pub fn resolve(&mut self, call_id: &CallId, outcome: Result<RemoteOutcome, RuntimeError>) -> bool {
        match self.slots.remove(call_id) {
            Some(mut slot) => {
                slot.resolve(outcome);
                true
            }
            None => false,
        }
    }

    /// Removes a call slot without resolving its waker — used for
    /// cooperative cancellation, where any later-arriving Response must
    /// be dropped as stale (§4.3, §5).
    pub fn remove_silently(&mut self, call_id: &CallId) -> Option<CallSlot> {
        self.slots.remove(call_id)
    }

    /// Every slot whose deadline has passed `now`, removed and ready to
    /// be resolved with `Timeout` by the caller.
    pub fn drain_expired(&mut self, now: Instant) -> Vec<CallSlot> {
        let expired: Vec<CallId> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.slots.remove(&id))
            .collect()
    }

    /// Every slot targeting `peer`, removed — used on disconnect and on
    /// a `PoweredOff`/`Unauthorized` transition (the latter via
    /// `drain_all`).
    pub fn drain_for_peer(&mut self, peer: PeerId) -> Vec<CallSlot> {
        let ids: Vec<CallId> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.target_peer == peer)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter().filter_map(|id| self.slots.remove(&id)).collect()
    }

    /// Every live slot, removed — used when the host powers off or loses
    /// authorization (§4.3 Event Bridge, `StateChanged`).
    pub fn drain_all(&mut self) -> Vec<CallSlot> {
        self.slots.drain().map(|(_, slot)| slot).collect()
    }
}
