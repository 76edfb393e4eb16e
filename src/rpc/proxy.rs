// RemoteHandle - the stub-facing proxy returned by `discover`/`connect`.
// Generated stubs hold one of these per remote actor and call `call` for
// each method, passing the method's own `Direction` (known at codegen
// time from the same `TypeDescriptor` used to derive the service) so the
// engine knows whether to suspend for a `Response`.

use crate::error::RuntimeError;
use crate::ids::{Aid, PeerId};
use crate::mapping::Direction;

use super::call_table::RemoteOutcome;
use super::handle::ActorSystem;

#[derive(Clone)]
pub struct RemoteHandle {
    system: ActorSystem,
    aid: Aid,
    peer_id: PeerId,
}

impl RemoteHandle {
    pub(crate) fn new(system: ActorSystem, aid: Aid, peer_id: PeerId) -> Self {
        Self { system, aid, peer_id }
    }

    /// The actor id this handle addresses on the remote peer.
    pub fn aid(&self) -> Aid {
        self.aid
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Invokes `method_name` with already-encoded `args`. `direction`
    /// governs whether this suspends for a matching `Response`
    /// (`RequestResponse` and the initial call of `SubscribeStream`) or
    /// returns as soon as the write is accepted (`OneWayNotify`).
    pub async fn call(
        &self,
        method_name: impl Into<String>,
        args: Vec<u8>,
        direction: Direction,
    ) -> Result<RemoteOutcome, RuntimeError> {
        self.system
            .remote_call(self.peer_id, self.aid, method_name.into(), args, direction.into())
            .await
    }
}
