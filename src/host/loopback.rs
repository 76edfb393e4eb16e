// In-process Host pair used by tests and seed scenarios: a `LoopbackAir`
// stands in for the platform BLE stack, and `LoopbackCentralHost` /
// `LoopbackPeripheralHost` are thin views onto it that implement the real
// Host traits. This is the only place in the crate that takes a mutex —
// it is simulated hardware, not RPC Core state, so the single-consumer,
// no-mutex design rule for the Event Bridge does not apply to it.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::error::RuntimeError;
use crate::ids::{PeerId, U128};
use crate::mapping::ServiceDescriptor;

use super::central::{CentralHostBackend, ScanFilter, ScanOptions, WriteKind};
use super::events::{AdvertisementData, DiscoveredPeripheral, HostEvent, HostState};
use super::peripheral::PeripheralHostBackend;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_MAX_WRITE_LENGTH: usize = 247;

struct PeripheralRecord {
    service: Option<ServiceDescriptor>,
    advertisement: Option<AdvertisementData>,
    advertising: bool,
    events: broadcast::Sender<HostEvent>,
    subscribers: HashMap<U128, HashSet<PeerId>>,
    connected_centrals: HashMap<PeerId, broadcast::Sender<HostEvent>>,
}

impl PeripheralRecord {
    fn service_uuid_for(&self, characteristic: U128) -> Option<U128> {
        let service = self.service.as_ref()?;
        if service.method_by_char(characteristic).is_some() {
            Some(service.service_uuid)
        } else {
            None
        }
    }
}

/// Shared "air": the set of peripherals currently registered, their
/// advertising/subscription state, and the negotiated MTU every link in
/// this simulated environment uses.
pub struct LoopbackAir {
    peripherals: Mutex<HashMap<PeerId, PeripheralRecord>>,
    max_write_length: Mutex<usize>,
}

impl LoopbackAir {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            peripherals: Mutex::new(HashMap::new()),
            max_write_length: Mutex::new(DEFAULT_MAX_WRITE_LENGTH),
        })
    }

    /// Override the simulated MTU every connection in this air negotiates
    /// to; used by tests that need a small `max_payload` (fragmentation
    /// scenarios) without a real negotiation handshake.
    pub fn set_max_write_length(&self, len: usize) {
        *self.max_write_length.lock().unwrap() = len;
    }
}

pub struct LoopbackPeripheralHost {
    air: Arc<LoopbackAir>,
    peer_id: PeerId,
    events: broadcast::Sender<HostEvent>,
    powered_on: std::sync::atomic::AtomicBool,
}

impl LoopbackPeripheralHost {
    pub fn new(air: Arc<LoopbackAir>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let peer_id = PeerId::generate();
        air.peripherals.lock().unwrap().insert(
            peer_id,
            PeripheralRecord {
                service: None,
                advertisement: None,
                advertising: false,
                events: events.clone(),
                subscribers: HashMap::new(),
                connected_centrals: HashMap::new(),
            },
        );
        Self {
            air,
            peer_id,
            events,
            powered_on: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// This peripheral's own identity, as it will appear to centrals that
    /// discover it.
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }
}

#[async_trait]
impl PeripheralHostBackend for LoopbackPeripheralHost {
    fn events(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    async fn initialize(&self) -> Result<(), RuntimeError> {
        self.powered_on.store(true, std::sync::atomic::Ordering::SeqCst);
        let _ = self.events.send(HostEvent::StateChanged(HostState::PoweredOn));
        Ok(())
    }

    async fn add_service(&self, service: ServiceDescriptor) -> Result<(), RuntimeError> {
        if !self.powered_on.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(RuntimeError::PoweredOff);
        }
        let mut peripherals = self.air.peripherals.lock().unwrap();
        let record = peripherals
            .get_mut(&self.peer_id)
            .expect("peripheral registered at construction");
        record.service = Some(service);
        Ok(())
    }

    async fn start_advertising(&self, data: AdvertisementData) -> Result<(), RuntimeError> {
        let mut peripherals = self.air.peripherals.lock().unwrap();
        let record = peripherals
            .get_mut(&self.peer_id)
            .expect("peripheral registered at construction");
        record.advertisement = Some(data);
        record.advertising = true;
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), RuntimeError> {
        let mut peripherals = self.air.peripherals.lock().unwrap();
        if let Some(record) = peripherals.get_mut(&self.peer_id) {
            record.advertising = false;
        }
        Ok(())
    }

    async fn update_value(
        &self,
        characteristic: U128,
        bytes: Vec<u8>,
        targets: Option<HashSet<PeerId>>,
    ) -> Result<(), RuntimeError> {
        let peripherals = self.air.peripherals.lock().unwrap();
        let record = peripherals
            .get(&self.peer_id)
            .ok_or(RuntimeError::PeerUnreachable)?;
        let service_uuid = record
            .service_uuid_for(characteristic)
            .ok_or_else(|| RuntimeError::other(1, "unknown characteristic"))?;

        let subscribers = record
            .subscribers
            .get(&characteristic)
            .cloned()
            .unwrap_or_default();
        let recipients: Vec<PeerId> = match targets {
            Some(targets) => subscribers.intersection(&targets).copied().collect(),
            None => subscribers.into_iter().collect(),
        };

        if recipients.is_empty() {
            return Err(RuntimeError::PeerUnreachable);
        }

        for central in recipients {
            if let Some(sender) = record.connected_centrals.get(&central) {
                let _ = sender.send(HostEvent::CharacteristicValueUpdated {
                    peer: self.peer_id,
                    service: service_uuid,
                    characteristic,
                    bytes: Some(bytes.clone()),
                    error: None,
                });
            }
        }
        Ok(())
    }

    async fn subscribed_centrals(&self, characteristic: U128) -> HashSet<PeerId> {
        self.air
            .peripherals
            .lock()
            .unwrap()
            .get(&self.peer_id)
            .and_then(|record| record.subscribers.get(&characteristic).cloned())
            .unwrap_or_default()
    }

    async fn negotiated_mtu(&self, _central: PeerId) -> usize {
        *self.air.max_write_length.lock().unwrap()
    }
}

pub struct LoopbackCentralHost {
    air: Arc<LoopbackAir>,
    peer_id: PeerId,
    events: broadcast::Sender<HostEvent>,
}

impl LoopbackCentralHost {
    pub fn new(air: Arc<LoopbackAir>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            air,
            peer_id: PeerId::generate(),
            events,
        }
    }

    /// This central's own identity, as it will appear to peripherals it
    /// writes to (the `central_id` of `WriteRequestReceived`/
    /// `CentralSubscribed`).
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }
}

#[async_trait]
impl CentralHostBackend for LoopbackCentralHost {
    fn events(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    async fn scan_for_peripherals(
        &self,
        filter: ScanFilter,
        _options: ScanOptions,
    ) -> Result<(), RuntimeError> {
        let peripherals = self.air.peripherals.lock().unwrap();
        for (peer_id, record) in peripherals.iter() {
            if !record.advertising {
                continue;
            }
            let Some(advertisement) = &record.advertisement else {
                continue;
            };
            if filter.matches(&advertisement.service_uuids) {
                let _ = self.events.send(HostEvent::PeripheralDiscovered(DiscoveredPeripheral {
                    peer_id: *peer_id,
                    advertisement: advertisement.clone(),
                    rssi: Some(-40),
                }));
            }
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn connect(&self, peer: PeerId, _timeout: Duration) -> Result<(), RuntimeError> {
        let mut peripherals = self.air.peripherals.lock().unwrap();
        let record = peripherals.get_mut(&peer).ok_or(RuntimeError::PeerUnreachable)?;
        if !record.advertising {
            return Err(RuntimeError::PeerUnreachable);
        }
        record.connected_centrals.insert(self.peer_id, self.events.clone());
        let _ = self.events.send(HostEvent::PeripheralConnected(peer));
        Ok(())
    }

    async fn disconnect(&self, peer: PeerId) -> Result<(), RuntimeError> {
        let mut peripherals = self.air.peripherals.lock().unwrap();
        if let Some(record) = peripherals.get_mut(&peer) {
            record.connected_centrals.remove(&self.peer_id);
            for subscribers in record.subscribers.values_mut() {
                subscribers.remove(&self.peer_id);
            }
        }
        let _ = self.events.send(HostEvent::PeripheralDisconnected(peer, None));
        Ok(())
    }

    async fn discover_services(
        &self,
        peer: PeerId,
        _filter: Option<Vec<U128>>,
    ) -> Result<(), RuntimeError> {
        let peripherals = self.air.peripherals.lock().unwrap();
        let record = peripherals.get(&peer).ok_or(RuntimeError::PeerUnreachable)?;
        let service_uuid = record
            .service
            .as_ref()
            .ok_or_else(|| RuntimeError::other(2, "peripheral has no service"))?
            .service_uuid;
        let _ = self.events.send(HostEvent::ServiceDiscovered(peer, vec![service_uuid]));
        Ok(())
    }

    async fn discover_characteristics(&self, peer: PeerId, _service: U128) -> Result<(), RuntimeError> {
        let peripherals = self.air.peripherals.lock().unwrap();
        if peripherals.contains_key(&peer) {
            Ok(())
        } else {
            Err(RuntimeError::PeerUnreachable)
        }
    }

    async fn read(&self, peer: PeerId, service: U128, characteristic: U128) -> Result<(), RuntimeError> {
        let _ = self.events.send(HostEvent::CharacteristicValueUpdated {
            peer,
            service,
            characteristic,
            bytes: Some(Vec::new()),
            error: None,
        });
        Ok(())
    }

    async fn write(
        &self,
        peer: PeerId,
        service: U128,
        characteristic: U128,
        bytes: Vec<u8>,
        _kind: WriteKind,
    ) -> Result<(), RuntimeError> {
        let peripherals = self.air.peripherals.lock().unwrap();
        let record = peripherals.get(&peer).ok_or(RuntimeError::PeerUnreachable)?;
        if !record.connected_centrals.contains_key(&self.peer_id) {
            return Err(RuntimeError::PeerUnreachable);
        }
        let _ = record.events.send(HostEvent::WriteRequestReceived {
            central: self.peer_id,
            service,
            characteristic,
            bytes,
        });
        Ok(())
    }

    async fn set_notify(
        &self,
        peer: PeerId,
        service: U128,
        characteristic: U128,
        enabled: bool,
    ) -> Result<(), RuntimeError> {
        let mut peripherals = self.air.peripherals.lock().unwrap();
        let record = peripherals.get_mut(&peer).ok_or(RuntimeError::PeerUnreachable)?;
        let subscribers = record.subscribers.entry(characteristic).or_default();
        if enabled {
            subscribers.insert(self.peer_id);
        } else {
            subscribers.remove(&self.peer_id);
        }
        let peripheral_event = if enabled {
            HostEvent::CentralSubscribed {
                central: self.peer_id,
                service,
                characteristic,
            }
        } else {
            HostEvent::CentralUnsubscribed {
                central: self.peer_id,
                service,
                characteristic,
            }
        };
        let _ = record.events.send(peripheral_event);
        let _ = self.events.send(HostEvent::NotificationStateChanged {
            peer,
            service,
            characteristic,
            enabled,
        });
        Ok(())
    }

    async fn max_write_length(&self, _peer: PeerId, _kind: WriteKind) -> usize {
        *self.air.max_write_length.lock().unwrap()
    }
}

impl LoopbackCentralHost {
    /// Simulates a platform ATT-layer failure arriving for a pending write
    /// on `characteristic`, the way a real `CentralHostBackend` would
    /// surface one: a `CharacteristicValueUpdated` event carrying an error
    /// instead of bytes, with no indication of which write it belongs to.
    /// There is no real radio underneath this backend to fault-inject at,
    /// so this is the loopback's only way to exercise the Event Bridge's
    /// FIFO oldest-pending-call handling (§4.3, §7).
    pub fn inject_att_error(&self, peer: PeerId, service: U128, characteristic: U128, err: RuntimeError) {
        let _ = self.events.send(HostEvent::CharacteristicValueUpdated {
            peer,
            service,
            characteristic,
            bytes: None,
            error: Some(err),
        });
    }
}
