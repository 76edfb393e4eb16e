// Actor System - the public, clonable handle onto a running engine. Every
// method here is a request/reply round trip over the command channel; the
// engine task is the only thing that ever touches host/transport state.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::error::RuntimeError;
use crate::host::{CentralHostBackend, PeripheralHostBackend};
use crate::ids::{Aid, CallId, PeerId, U128};
use crate::mapping::TypeDescriptor;
use crate::registry::MethodRegistry;

use super::call_table::RemoteOutcome;
use super::config::RuntimeConfig;
use super::engine::{Command, Engine, ResponseShape};
use super::proxy::RemoteHandle;

const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Handle onto a running Actor System. Cloning is cheap (an `mpsc::Sender`
/// clone); every clone talks to the same single-consumer engine task.
#[derive(Clone)]
pub struct ActorSystem {
    commands: mpsc::Sender<Command>,
}

impl ActorSystem {
    /// Spawns the engine task and returns a handle to it. Either host may
    /// be omitted: a central-only system can `discover`/`connect`/
    /// `remote_call` but not `start_advertising`; a peripheral-only system
    /// is the reverse.
    pub fn new(
        peripheral: Option<Arc<dyn PeripheralHostBackend>>,
        central: Option<Arc<dyn CentralHostBackend>>,
        config: RuntimeConfig,
    ) -> Self {
        let (commands, receiver) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let engine = Engine::new(peripheral, central, config);
        tokio::spawn(engine.run(receiver));
        Self { commands }
    }

    /// Registers `methods` as a local instance of the type described by
    /// `type_desc`, derives its GATT layout, and begins advertising it.
    /// Fails with `NotPermitted` if this system has no peripheral host, or
    /// `PoweredOff`/`Unauthorized` if the adapter isn't ready.
    pub async fn start_advertising(
        &self,
        type_desc: TypeDescriptor,
        methods: MethodRegistry,
        local_name: Option<String>,
    ) -> Result<Aid, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Command::StartAdvertising { type_desc, methods, local_name, reply }).await;
        rx.await.unwrap_or(Err(RuntimeError::Cancelled))
    }

    pub async fn stop_advertising(&self, aid: Aid) -> Result<(), RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Command::StopAdvertising { aid, reply }).await;
        rx.await.unwrap_or(Err(RuntimeError::Cancelled))
    }

    /// Scans for `timeout`, resolving every matching peer it sees into a
    /// `RemoteHandle` the same way `connect` would. Returns whatever was
    /// resolved by the time the timeout elapses, even an empty list.
    pub async fn discover(&self, type_desc: TypeDescriptor, timeout: Duration) -> Result<Vec<RemoteHandle>, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Command::Discover { type_desc, timeout, reply }).await;
        let infos = rx.await.unwrap_or(Err(RuntimeError::Cancelled))?;
        Ok(infos
            .into_iter()
            .map(|info| RemoteHandle::new(self.clone(), info.aid, info.peer_id))
            .collect())
    }

    /// Connects directly to an already-known `peer_id` (skipping scanning)
    /// and resolves it the same way a matching `discover` result would.
    pub async fn connect(&self, peer_id: PeerId, type_desc: TypeDescriptor) -> Result<RemoteHandle, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Command::Connect { peer_id, type_desc, reply }).await;
        let info = rx.await.unwrap_or(Err(RuntimeError::Cancelled))?;
        Ok(RemoteHandle::new(self.clone(), info.aid, info.peer_id))
    }

    pub(crate) async fn remote_call(
        &self,
        peer_id: PeerId,
        recipient: Aid,
        method_name: String,
        args: Vec<u8>,
        shape: ResponseShape,
    ) -> Result<RemoteOutcome, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Command::RemoteCall { peer_id, recipient, method_name, args, shape, reply }).await;
        rx.await.unwrap_or(Err(RuntimeError::Cancelled))
    }

    /// Pushes a notification on `characteristic` to `targets` (or every
    /// current subscriber, if `None`). Used for `SubscribeStream` methods
    /// pushing values outside of a direct `remote_call` response.
    pub async fn update_value(
        &self,
        characteristic: U128,
        bytes: Vec<u8>,
        targets: Option<HashSet<PeerId>>,
    ) -> Result<(), RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Command::UpdateValue { characteristic, bytes, targets, reply }).await;
        rx.await.unwrap_or(Err(RuntimeError::Cancelled))
    }

    /// Cooperatively cancels a suspended `remote_call`. Best-effort: any
    /// `Response` that was already in flight is dropped as stale instead
    /// of resolving the (already-abandoned) caller.
    pub async fn cancel(&self, call_id: CallId) {
        let _ = self.commands.send(Command::Cancel { call_id }).await;
    }

    async fn dispatch(&self, command: Command) {
        // If the engine task has already stopped, `command` (and the
        // `oneshot::Sender` it carries) is simply dropped here; the
        // caller's `rx.await` then observes a closed channel and falls
        // back to `Cancelled`, same as an explicit `cancel`.
        let _ = self.commands.send(command).await;
    }
}
