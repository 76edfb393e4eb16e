// RPC Core engine: the single consumer that owns every piece of mutable
// state (instance registry, framing, peer sessions, call table) and the
// only task that ever touches a `Host` trait object. Everything else talks
// to it through `Command`s sent over an `mpsc` channel and answered on a
// `oneshot`, so no state here is ever behind a mutex.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::envelope::{CallResult, Envelope, EnvelopeCodec, Header, Invocation, Response};
use crate::error::RuntimeError;
use crate::framing::{FeedOutcome, Framing};
use crate::host::{
    AdvertisementData, CentralHostBackend, DiscoveredPeripheral, HostEvent, HostState,
    PeripheralHostBackend, ScanFilter, ScanOptions, WriteKind,
};
use crate::ids::{Aid, CallId, PeerId, U128};
use crate::mapping::{derive_service, Direction, TypeDescriptor};
use crate::registry::{HandlerOutcome, InstanceRegistry, LocalInstance, MethodRegistry, RemoteProxy};

use super::call_table::{CallSlot, CallTable, RemoteOutcome};
use super::config::RuntimeConfig;
use super::retry::{deliver_response_with_retry, PeripheralNotifySink};
use super::session::{PeerSession, SessionState};

/// How a `remote_call` should resolve: suspend for a matching `Response`,
/// or return as soon as the write is accepted. Derived by callers from the
/// target method's `Direction` (`RemoteHandle::call` does this for
/// generated stubs); kept explicit here since the engine has no other way
/// to know a `SubscribeStream` method's first call behaves like a
/// `RequestResponse` one (the subscription itself, not the stream).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseShape {
    RequestResponse,
    OneWay,
}

impl From<Direction> for ResponseShape {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::OneWayNotify => ResponseShape::OneWay,
            Direction::RequestResponse | Direction::SubscribeStream => ResponseShape::RequestResponse,
        }
    }
}

/// Identifies a freshly-resolved remote actor to the handle layer.
#[derive(Clone, Copy, Debug)]
pub struct RemoteHandleInfo {
    pub aid: Aid,
    pub peer_id: PeerId,
}

type Reply<T> = oneshot::Sender<Result<T, RuntimeError>>;

pub(crate) enum Command {
    StartAdvertising {
        type_desc: TypeDescriptor,
        methods: MethodRegistry,
        local_name: Option<String>,
        reply: Reply<Aid>,
    },
    StopAdvertising {
        aid: Aid,
        reply: Reply<()>,
    },
    Discover {
        type_desc: TypeDescriptor,
        timeout: std::time::Duration,
        reply: oneshot::Sender<Result<Vec<RemoteHandleInfo>, RuntimeError>>,
    },
    Connect {
        peer_id: PeerId,
        type_desc: TypeDescriptor,
        reply: Reply<RemoteHandleInfo>,
    },
    RemoteCall {
        peer_id: PeerId,
        recipient: Aid,
        method_name: String,
        args: Vec<u8>,
        shape: ResponseShape,
        reply: Reply<RemoteOutcome>,
    },
    UpdateValue {
        characteristic: U128,
        bytes: Vec<u8>,
        targets: Option<HashSet<PeerId>>,
        reply: Reply<()>,
    },
    Cancel {
        call_id: CallId,
    },
}

struct DiscoverySession {
    service_uuid: U128,
    type_desc: TypeDescriptor,
    deadline: Instant,
    seen: HashSet<PeerId>,
    results: Vec<RemoteHandleInfo>,
    reply: Option<oneshot::Sender<Result<Vec<RemoteHandleInfo>, RuntimeError>>>,
}

/// Owns every mutable piece of RPC Core state. Lives entirely inside the
/// task spawned by `ActorSystem::new`; never shared or cloned.
pub(crate) struct Engine {
    config: RuntimeConfig,
    peripheral: Option<Arc<dyn PeripheralHostBackend>>,
    central: Option<Arc<dyn CentralHostBackend>>,
    instances: InstanceRegistry,
    framing: Framing,
    sessions: HashMap<PeerId, PeerSession>,
    call_table: CallTable,
    discoveries: Vec<DiscoverySession>,
    pending_release: Vec<(PeerId, Instant)>,
    ready: bool,
    last_host_state: HostState,
}

impl Engine {
    pub(crate) fn new(
        peripheral: Option<Arc<dyn PeripheralHostBackend>>,
        central: Option<Arc<dyn CentralHostBackend>>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            config,
            peripheral,
            central,
            instances: InstanceRegistry::new(),
            framing: Framing::new(),
            sessions: HashMap::new(),
            call_table: CallTable::new(),
            discoveries: Vec::new(),
            pending_release: Vec::new(),
            ready: false,
            last_host_state: HostState::Unknown,
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        // Subscribe before bringing the adapter up, so the `StateChanged`
        // `initialize` provokes is never missed to a race against this
        // task's own scheduling.
        let mut central_events = self.central.as_ref().map(|c| c.events());
        let mut peripheral_events = self.peripheral.as_ref().map(|p| p.events());

        if let Some(peripheral) = self.peripheral.clone() {
            if let Err(err) = peripheral.initialize().await {
                warn!(?err, "peripheral host failed to initialize");
            }
            // Apply whatever `initialize` just queued (at minimum a
            // `StateChanged`) before the select loop below ever gets a
            // chance to pull a command off the channel ahead of it.
            if let Some(events) = &mut peripheral_events {
                while let Ok(event) = events.try_recv() {
                    self.handle_host_event(event).await;
                }
            }
        }

        let mut deadline_tick = tokio::time::interval(self.config.deadline_poll_interval);

        loop {
            tokio::select! {
                maybe_cmd = commands.recv() => {
                    match maybe_cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    }
                }
                event = next_host_event(&mut central_events) => {
                    self.handle_host_event(event).await;
                }
                event = next_host_event(&mut peripheral_events) => {
                    self.handle_host_event(event).await;
                }
                _ = deadline_tick.tick() => {
                    self.check_deadlines().await;
                }
            }
        }
    }

    // ---- Command handling -------------------------------------------

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartAdvertising { type_desc, methods, local_name, reply } => {
                let _ = reply.send(self.start_advertising(type_desc, methods, local_name).await);
            }
            Command::StopAdvertising { aid, reply } => {
                self.instances.unregister_local(&aid);
                if let Some(peripheral) = &self.peripheral {
                    let _ = peripheral.stop_advertising().await;
                }
                let _ = reply.send(Ok(()));
            }
            Command::Discover { type_desc, timeout, reply } => {
                self.start_discovery(type_desc, timeout, reply).await;
            }
            Command::Connect { peer_id, type_desc, reply } => {
                let service_uuid = derive_service(&type_desc).service_uuid;
                let outcome = self.resolve_peer(peer_id, &type_desc, service_uuid).await;
                let _ = reply.send(outcome);
            }
            Command::RemoteCall { peer_id, recipient, method_name, args, shape, reply } => {
                self.handle_remote_call(peer_id, recipient, method_name, args, shape, reply).await;
            }
            Command::UpdateValue { characteristic, bytes, targets, reply } => {
                let Some(peripheral) = self.peripheral.clone() else {
                    let _ = reply.send(Err(RuntimeError::NotPermitted));
                    return;
                };
                let _ = reply.send(peripheral.update_value(characteristic, bytes, targets).await);
            }
            Command::Cancel { call_id } => {
                if let Some(slot) = self.call_table.remove_silently(&call_id) {
                    if let Some(session) = self.sessions.get_mut(&slot.target_peer) {
                        session.remove_outbound(call_id);
                    }
                }
            }
        }
    }

    async fn start_advertising(
        &mut self,
        type_desc: TypeDescriptor,
        methods: MethodRegistry,
        local_name: Option<String>,
    ) -> Result<Aid, RuntimeError> {
        let Some(peripheral) = self.peripheral.clone() else {
            return Err(RuntimeError::NotPermitted);
        };
        if !self.ready {
            return Err(self.not_ready_error());
        }

        let service = derive_service(&type_desc);
        peripheral.add_service(service.clone()).await?;

        let aid = Aid::generate();
        self.instances.register_local(aid, LocalInstance { service: service.clone(), methods });

        let ad = AdvertisementData {
            local_name,
            service_uuids: vec![service.service_uuid],
            ..Default::default()
        };
        if let Err(err) = peripheral.start_advertising(ad).await {
            self.instances.unregister_local(&aid);
            return Err(err);
        }
        Ok(aid)
    }

    async fn start_discovery(
        &mut self,
        type_desc: TypeDescriptor,
        timeout: std::time::Duration,
        reply: oneshot::Sender<Result<Vec<RemoteHandleInfo>, RuntimeError>>,
    ) {
        let Some(central) = self.central.clone() else {
            let _ = reply.send(Err(RuntimeError::NotPermitted));
            return;
        };
        let service_uuid = derive_service(&type_desc).service_uuid;
        if let Err(err) = central
            .scan_for_peripherals(ScanFilter::for_service(service_uuid), ScanOptions::default())
            .await
        {
            let _ = reply.send(Err(err));
            return;
        }

        self.discoveries.push(DiscoverySession {
            service_uuid,
            type_desc,
            deadline: Instant::now() + timeout,
            seen: HashSet::new(),
            results: Vec::new(),
            reply: Some(reply),
        });
    }

    /// Connects to `peer_id`, resolves its services/characteristics, and
    /// subscribes to every non-`OneWayNotify` method. Run inline rather
    /// than as a spawned task: every `Host` trait call here awaits its own
    /// definitive outcome (both backends in this crate resolve `connect`,
    /// `discover_services`, and `set_notify` synchronously to completion,
    /// mirroring the emitted event rather than depending on it), so
    /// nothing here needs to wait on the engine's own event consumption.
    async fn resolve_peer(
        &mut self,
        peer_id: PeerId,
        type_desc: &TypeDescriptor,
        service_uuid: U128,
    ) -> Result<RemoteHandleInfo, RuntimeError> {
        let Some(central) = self.central.clone() else {
            return Err(RuntimeError::NotPermitted);
        };

        self.sessions.entry(peer_id).or_insert_with(|| PeerSession::new(peer_id)).state =
            SessionState::Connecting;

        central.connect(peer_id, self.config.connect_timeout).await?;
        {
            let session = self.sessions.entry(peer_id).or_insert_with(|| PeerSession::new(peer_id));
            session.state = SessionState::Connected;
            session.service_uuid = Some(service_uuid);
        }

        central.discover_services(peer_id, Some(vec![service_uuid])).await?;
        central.discover_characteristics(peer_id, service_uuid).await?;

        let service = derive_service(type_desc);
        let awaited: HashSet<U128> = service
            .methods
            .iter()
            .filter(|m| m.direction != Direction::OneWayNotify)
            .map(|m| m.char_uuid)
            .collect();
        {
            let session = self.sessions.get_mut(&peer_id).expect("just inserted above");
            session.state = SessionState::ServicesResolved;
            session.pending_subscriptions = awaited;
        }

        let mtu = central.max_write_length(peer_id, WriteKind::WithResponse).await;
        self.framing.negotiate(peer_id, mtu);

        for method in service.methods.iter().filter(|m| m.direction != Direction::OneWayNotify) {
            match central.set_notify(peer_id, service_uuid, method.char_uuid, true).await {
                Ok(()) => {
                    let session = self.sessions.get_mut(&peer_id).expect("session exists");
                    session.subscriptions.insert(method.char_uuid);
                    session.pending_subscriptions.remove(&method.char_uuid);
                }
                Err(err) => {
                    warn!(?peer_id, method = %method.name, ?err, "failed to subscribe to method characteristic");
                }
            }
        }

        let session = self.sessions.get_mut(&peer_id).expect("session exists");
        if session.pending_subscriptions.is_empty() {
            session.state = SessionState::Ready;
        }

        let aid = Aid::generate();
        let proxy = RemoteProxy { peer_id, recipient: aid, service };
        self.instances.register_remote(aid, proxy);
        Ok(RemoteHandleInfo { aid, peer_id })
    }

    async fn handle_remote_call(
        &mut self,
        peer_id: PeerId,
        recipient: Aid,
        method_name: String,
        args: Vec<u8>,
        shape: ResponseShape,
        reply: Reply<RemoteOutcome>,
    ) {
        let ready = self.sessions.get(&peer_id).map(|s| s.state.is_ready()).unwrap_or(false);
        if !ready {
            let _ = reply.send(Err(RuntimeError::PeerUnreachable));
            return;
        }
        let Some((_, proxy)) = self.instances.remote_by_peer(peer_id) else {
            let _ = reply.send(Err(RuntimeError::PeerUnreachable));
            return;
        };
        let Some(char_uuid) = proxy.char_uuid(&method_name) else {
            let _ = reply.send(Err(RuntimeError::MethodNotFound));
            return;
        };
        let service_uuid = proxy.service_uuid();
        let Some(central) = self.central.clone() else {
            let _ = reply.send(Err(RuntimeError::NotPermitted));
            return;
        };

        let call_id = CallId::generate();
        let header = Header::new(call_id, recipient, None);
        let envelope = Envelope::Invocation(Invocation { header, target: method_name, arguments: args });
        let bytes = match EnvelopeCodec::encode(&envelope) {
            Ok(bytes) => bytes,
            Err(err) => {
                let _ = reply.send(Err(err));
                return;
            }
        };
        let frames = self.framing.fragment(call_id, &peer_id, &bytes);

        for frame in &frames {
            if let Err(err) = central
                .write(peer_id, service_uuid, char_uuid, frame.to_bytes(), WriteKind::WithResponse)
                .await
            {
                let _ = reply.send(Err(err));
                return;
            }
        }

        match shape {
            ResponseShape::OneWay => {
                let _ = reply.send(Ok(RemoteOutcome::Void));
            }
            ResponseShape::RequestResponse => {
                let deadline = Instant::now() + self.config.call_timeout;
                self.call_table.insert(CallSlot::new(call_id, peer_id, deadline, reply));
                if let Some(session) = self.sessions.get_mut(&peer_id) {
                    session.push_outbound(call_id);
                }
            }
        }
    }

    fn not_ready_error(&self) -> RuntimeError {
        match self.last_host_state {
            HostState::Unauthorized => RuntimeError::Unauthorized,
            HostState::Unsupported => RuntimeError::NotPermitted,
            _ => RuntimeError::PoweredOff,
        }
    }

    // ---- Event Bridge -------------------------------------------------

    async fn handle_host_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::StateChanged(state) => self.on_state_changed(state),
            HostEvent::PeripheralDiscovered(discovered) => self.on_peripheral_discovered(discovered).await,
            HostEvent::PeripheralConnected(peer) => {
                let session = self.sessions.entry(peer).or_insert_with(|| PeerSession::new(peer));
                if matches!(session.state, SessionState::Discovered | SessionState::Connecting) {
                    session.state = SessionState::Connected;
                }
            }
            HostEvent::PeripheralDisconnected(peer, err) => self.on_disconnected(peer, err),
            HostEvent::ServiceDiscovered(peer, services) => {
                debug!(?peer, ?services, "service discovery acknowledged");
            }
            HostEvent::CharacteristicValueUpdated { peer, bytes, error, .. } => match (bytes, error) {
                (Some(bytes), None) => self.on_central_value_update(peer, bytes).await,
                (None, Some(err)) => self.on_att_error(peer, err),
                _ => {}
            },
            HostEvent::NotificationStateChanged { peer, characteristic, enabled, .. } => {
                self.on_notification_state_changed(peer, characteristic, enabled);
            }
            HostEvent::WriteRequestReceived { central, service, characteristic, bytes } => {
                self.on_write_request(central, service, characteristic, bytes).await;
            }
            HostEvent::ReadRequestReceived { .. } => {
                // Every characteristic this crate maps is write|notify; a
                // read request implies a central we didn't generate, and
                // there is nothing meaningful to answer with.
            }
            HostEvent::CentralSubscribed { central, characteristic, .. } => {
                self.on_central_subscribed(central, characteristic).await;
            }
            HostEvent::CentralUnsubscribed { central, characteristic, .. } => {
                if let Some(session) = self.sessions.get_mut(&central) {
                    session.subscriptions.remove(&characteristic);
                }
            }
        }
    }

    fn on_state_changed(&mut self, state: HostState) {
        let was_ready = self.ready;
        self.last_host_state = state;
        self.ready = state == HostState::PoweredOn;

        if was_ready && !self.ready {
            let err = self.not_ready_error();
            for slot in self.call_table.drain_all() {
                slot.fail(err.clone());
            }
            for session in self.sessions.values_mut() {
                session.pending_outbound.clear();
            }
        }
    }

    async fn on_peripheral_discovered(&mut self, discovered: DiscoveredPeripheral) {
        let peer_id = discovered.peer_id;
        let advertised = &discovered.advertisement.service_uuids;

        let mut matches = Vec::new();
        for (index, discovery) in self.discoveries.iter_mut().enumerate() {
            if advertised.contains(&discovery.service_uuid) && discovery.seen.insert(peer_id) {
                matches.push((index, discovery.type_desc.clone(), discovery.service_uuid));
            }
        }

        for (index, type_desc, service_uuid) in matches {
            match self.resolve_peer(peer_id, &type_desc, service_uuid).await {
                Ok(info) => {
                    if let Some(discovery) = self.discoveries.get_mut(index) {
                        discovery.results.push(info);
                    }
                }
                Err(err) => {
                    warn!(?peer_id, ?err, "failed to resolve a discovered peripheral");
                }
            }
        }
    }

    fn on_disconnected(&mut self, peer: PeerId, err: Option<RuntimeError>) {
        if let Some(session) = self.sessions.get_mut(&peer) {
            session.state = SessionState::Disconnected;
            session.subscriptions.clear();
            session.pending_outbound.clear();
        }

        let mapped = err.unwrap_or(RuntimeError::PeerUnreachable);
        for slot in self.call_table.drain_for_peer(peer) {
            slot.fail(mapped.clone());
        }

        self.instances.unregister_remote_by_peer(peer);
        self.pending_release.push((peer, Instant::now() + self.config.disconnect_grace));
    }

    async fn on_central_value_update(&mut self, peer: PeerId, bytes: Vec<u8>) {
        if let FeedOutcome::Complete(payload) = self.framing.feed(peer, &bytes) {
            match EnvelopeCodec::decode(&payload) {
                Ok(Envelope::Response(response)) => self.dispatch_response(response),
                Ok(Envelope::Invocation(_)) => {
                    warn!(?peer, "central received an Invocation envelope on a value update; dropping");
                }
                Err(err) => warn!(?peer, ?err, "failed to decode envelope from a notification"),
            }
        }
    }

    fn dispatch_response(&mut self, response: Response) {
        let call_id = response.header.call_id;
        let peer = self.call_table.peer_of(&call_id);
        let outcome = RemoteOutcome::from_call_result(response.result);
        if self.call_table.resolve(&call_id, outcome) {
            if let Some(peer) = peer {
                if let Some(session) = self.sessions.get_mut(&peer) {
                    session.remove_outbound(call_id);
                }
            }
        } else {
            debug!(?call_id, "dropped response for an unknown or already-resolved call id (stale)");
        }
    }

    fn on_att_error(&mut self, peer: PeerId, err: RuntimeError) {
        let Some(session) = self.sessions.get_mut(&peer) else { return };
        let Some(call_id) = session.pop_oldest_outbound() else {
            debug!(?peer, "ATT error with no pending call for this peer; dropped");
            return;
        };
        self.call_table.resolve(&call_id, Err(err));
    }

    fn on_notification_state_changed(&mut self, peer: PeerId, characteristic: U128, enabled: bool) {
        let Some(session) = self.sessions.get_mut(&peer) else { return };
        if enabled {
            session.subscriptions.insert(characteristic);
            session.pending_subscriptions.remove(&characteristic);
            if session.state == SessionState::ServicesResolved && session.pending_subscriptions.is_empty() {
                session.state = SessionState::Ready;
            }
        } else {
            session.subscriptions.remove(&characteristic);
        }
    }

    async fn on_central_subscribed(&mut self, central: PeerId, characteristic: U128) {
        let session = self.sessions.entry(central).or_insert_with(|| PeerSession::new(central));
        session.subscriptions.insert(characteristic);

        if let Some(peripheral) = self.peripheral.clone() {
            let mtu = peripheral.negotiated_mtu(central).await;
            self.framing.negotiate(central, mtu);
        }
    }

    async fn on_write_request(&mut self, central: PeerId, service: U128, characteristic: U128, bytes: Vec<u8>) {
        let payload = match self.framing.feed(central, &bytes) {
            FeedOutcome::Complete(payload) => payload,
            FeedOutcome::Pending | FeedOutcome::Dropped => return,
        };

        let invocation = match EnvelopeCodec::decode(&payload) {
            Ok(Envelope::Invocation(invocation)) => invocation,
            Ok(Envelope::Response(_)) => {
                warn!(?central, "peripheral received a Response envelope on a write; dropping");
                return;
            }
            Err(err) => {
                warn!(?central, ?err, "failed to decode an invocation");
                return;
            }
        };

        let Some(peripheral) = self.peripheral.clone() else { return };
        let call_id = invocation.header.call_id;
        let direction = self.method_direction(service, &invocation.target);
        let result = self.run_handler(service, &invocation.target, invocation.arguments).await;

        // A `OneWayNotify` caller never subscribes to its characteristic
        // (`resolve_peer` only awaits notify-acks for non-one-way methods),
        // so sending a Response here would just burn the full retry
        // backoff against a peer that can never receive it. Fire-and-forget
        // really is fire-and-forget on the peripheral side too.
        if direction == Some(Direction::OneWayNotify) {
            return;
        }

        // Attribution only: routing back to `central` is physical (the
        // characteristic plus the peer id), not by `Aid`.
        let response = Response {
            header: Header::new(call_id, invocation.header.sender.unwrap_or(invocation.header.recipient), Some(invocation.header.recipient)),
            result,
        };
        self.send_response(peripheral, characteristic, central, response).await;
    }

    /// The registered direction of `method_name` on the local instance
    /// bound to `service_uuid`, if both the instance and the method are
    /// known. `None` (unknown method) is treated like a response-expecting
    /// call: the caller gets back `Failure(MethodNotFound)` rather than
    /// silence, since there is no direction to say otherwise.
    fn method_direction(&self, service_uuid: U128, method_name: &str) -> Option<Direction> {
        self.instances
            .local_by_service(service_uuid)
            .and_then(|(_, instance)| instance.service.method(method_name))
            .map(|method| method.direction)
    }

    async fn run_handler(&self, service_uuid: U128, method_name: &str, args: Vec<u8>) -> CallResult {
        let handler = match self.instances.local_by_service(service_uuid) {
            Some((_, instance)) => instance.methods.get(method_name),
            None => None,
        };
        let Some(handler) = handler else {
            return CallResult::Failure(RuntimeError::MethodNotFound);
        };
        match handler(args).await {
            Ok(HandlerOutcome::Success(bytes)) => CallResult::Success(bytes),
            Ok(HandlerOutcome::Void) => CallResult::Void,
            Err(err) => CallResult::Failure(err),
        }
    }

    async fn send_response(
        &mut self,
        peripheral: Arc<dyn PeripheralHostBackend>,
        characteristic: U128,
        target: PeerId,
        response: Response,
    ) {
        let call_id = response.header.call_id;
        let header = response.header;
        let envelope = Envelope::Response(response);
        let bytes = match EnvelopeCodec::encode(&envelope) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(?call_id, ?err, "failed to encode a response");
                return;
            }
        };
        let frames: Vec<Vec<u8>> = self
            .framing
            .fragment(call_id, &target, &bytes)
            .into_iter()
            .map(|frame| frame.to_bytes())
            .collect();

        let fallback = Envelope::Response(Response {
            header,
            result: CallResult::Failure(RuntimeError::TransportFailed("response delivery failed after retries".into())),
        });
        let fallback_bytes = EnvelopeCodec::encode(&fallback).unwrap_or_default();
        let fallback_frame = self
            .framing
            .fragment(call_id, &target, &fallback_bytes)
            .into_iter()
            .next()
            .map(|frame| frame.to_bytes())
            .unwrap_or_default();

        let sink = PeripheralNotifySink { peripheral: peripheral.as_ref() };
        deliver_response_with_retry(&sink, characteristic, target, &frames, &fallback_frame, &self.config).await;
    }

    // ---- Deadlines ------------------------------------------------------

    async fn check_deadlines(&mut self) {
        let now = Instant::now();

        for slot in self.call_table.drain_expired(now) {
            if let Some(session) = self.sessions.get_mut(&slot.target_peer) {
                session.remove_outbound(slot.call_id);
            }
            slot.fail(RuntimeError::Timeout);
        }

        let mut finished = Vec::new();
        for (index, discovery) in self.discoveries.iter().enumerate() {
            if discovery.deadline <= now {
                finished.push(index);
            }
        }
        let any_finished = !finished.is_empty();
        for index in finished.into_iter().rev() {
            let mut discovery = self.discoveries.remove(index);
            if let Some(reply) = discovery.reply.take() {
                let _ = reply.send(Ok(discovery.results));
            }
        }
        if any_finished && self.discoveries.is_empty() {
            if let Some(central) = &self.central {
                let _ = central.stop_scan().await;
            }
        }

        let mut still_pending = Vec::new();
        for (peer, deadline) in self.pending_release.drain(..) {
            if deadline > now {
                still_pending.push((peer, deadline));
                continue;
            }
            let idle = self.sessions.get(&peer).map(|s| s.is_idle()).unwrap_or(true);
            if idle {
                self.sessions.remove(&peer);
                self.framing.remove(&peer);
            }
        }
        self.pending_release = still_pending;
    }
}

async fn next_host_event(rx: &mut Option<broadcast::Receiver<HostEvent>>) -> HostEvent {
    let Some(receiver) = rx else {
        return std::future::pending().await;
    };
    loop {
        match receiver.recv().await {
            Ok(event) => return event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "host event stream lagged; some events were dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return std::future::pending().await,
        }
    }
}
