// Real Central Host backed by `btleplug`. Only the central role is
// implemented: btleplug has no cross-platform peripheral/GATT-server API,
// so a real Peripheral Host backend is out of reach here; peripherals in
// this crate run on the loopback backend only. Gated behind the
// `btleplug` feature so the default build never links a platform BLE
// stack.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central as _, CentralEvent, Manager as _, Peripheral as _, ScanFilter as BtleScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::RuntimeError;
use crate::ids::{PeerId, U128};

use super::central::{CentralHostBackend, ScanFilter, ScanOptions, WriteKind};
use super::events::{AdvertisementData, DiscoveredPeripheral, HostEvent, HostState};

const EVENT_CHANNEL_CAPACITY: usize = 256;

fn to_uuid(value: U128) -> uuid::Uuid {
    value.as_uuid()
}

fn from_uuid(value: uuid::Uuid) -> U128 {
    U128::from_uuid(value)
}

fn map_btleplug_error(err: btleplug::Error) -> RuntimeError {
    RuntimeError::TransportFailed(err.to_string())
}

/// Central Host backed by the platform's first available BLE adapter.
/// Peripheral identities are exposed to the rest of the crate as `PeerId`;
/// internally this backend keeps a table mapping those ids back to
/// btleplug's own `PeripheralId` plus the cached `Peripheral` handle.
pub struct BtleplugCentralHost {
    adapter: Adapter,
    events: broadcast::Sender<HostEvent>,
    peripherals: Mutex<HashMap<PeerId, (PeripheralId, Peripheral)>>,
    /// Peers whose `peripheral.notifications()` stream is already being
    /// forwarded, so a second `set_notify(enabled=true)` (one per RPC
    /// characteristic) doesn't spawn a second forwarder racing the first.
    /// `Arc`-wrapped so the spawned forwarder task can hold its own handle
    /// without borrowing `self` (trait methods only ever see `&self`).
    notification_forwarders: std::sync::Arc<Mutex<std::collections::HashSet<PeerId>>>,
}

impl BtleplugCentralHost {
    /// Connects to the platform's first BLE adapter and begins forwarding
    /// its event stream. Fails with `Unsupported` (as `RuntimeError::Other`)
    /// if no adapter is present.
    pub async fn new() -> Result<std::sync::Arc<Self>, RuntimeError> {
        let manager = Manager::new().await.map_err(map_btleplug_error)?;
        let adapters = manager.adapters().await.map_err(map_btleplug_error)?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| RuntimeError::other(10, "no BLE adapter available"))?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let host = std::sync::Arc::new(Self {
            adapter,
            events,
            peripherals: Mutex::new(HashMap::new()),
            notification_forwarders: std::sync::Arc::new(Mutex::new(std::collections::HashSet::new())),
        });
        host.clone().spawn_event_forwarder().await?;
        let _ = host.events.send(HostEvent::StateChanged(HostState::PoweredOn));
        Ok(host)
    }

    async fn spawn_event_forwarder(self: std::sync::Arc<Self>) -> Result<(), RuntimeError> {
        let mut upstream = self.adapter.events().await.map_err(map_btleplug_error)?;

        tokio::spawn(async move {
            while let Some(event) = upstream.next().await {
                if let Some(translated) = self.translate_event(event).await {
                    let _ = self.events.send(translated);
                }
            }
        });
        Ok(())
    }

    fn record_discovery(&self, peripheral_id: PeripheralId, peripheral: Peripheral) -> PeerId {
        let mut peripherals = self.peripherals.lock().unwrap();
        for (peer_id, (known_id, handle)) in peripherals.iter_mut() {
            if *known_id == peripheral_id {
                *handle = peripheral;
                return *peer_id;
            }
        }
        let peer_id = PeerId::generate();
        peripherals.insert(peer_id, (peripheral_id, peripheral));
        peer_id
    }

    fn peripheral_for(&self, peer: PeerId) -> Result<Peripheral, RuntimeError> {
        self.peripherals
            .lock()
            .unwrap()
            .get(&peer)
            .map(|(_, p)| p.clone())
            .ok_or(RuntimeError::PeerUnreachable)
    }

    /// Opens `peripheral.notifications()` for `peer` and forwards every
    /// value onto the shared event stream as a `CharacteristicValueUpdated`,
    /// the way `loopback::update_value` delivers a Response notification
    /// straight to the Event Bridge. Idempotent: a peer's stream is only
    /// ever drained once, no matter how many of its characteristics get
    /// subscribed to (the RPC Core subscribes per-method, one `set_notify`
    /// call per non-one-way characteristic).
    async fn ensure_notification_forwarder(
        &self,
        peer: PeerId,
        peripheral: &Peripheral,
    ) -> Result<(), RuntimeError> {
        {
            let mut forwarders = self.notification_forwarders.lock().unwrap();
            if !forwarders.insert(peer) {
                return Ok(());
            }
        }

        let mut stream = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(err) => {
                self.notification_forwarders.lock().unwrap().remove(&peer);
                return Err(map_btleplug_error(err));
            }
        };

        let events = self.events.clone();
        let forwarders = self.notification_forwarders.clone();
        let peripheral = peripheral.clone();
        tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                let service = peripheral
                    .characteristics()
                    .into_iter()
                    .find(|c| c.uuid == notification.uuid)
                    .map(|c| from_uuid(c.service_uuid));
                let Some(service) = service else {
                    debug!(uuid = ?notification.uuid, "notification for an unknown characteristic; dropping");
                    continue;
                };
                let _ = events.send(HostEvent::CharacteristicValueUpdated {
                    peer,
                    service,
                    characteristic: from_uuid(notification.uuid),
                    bytes: Some(notification.value),
                    error: None,
                });
            }
            forwarders.lock().unwrap().remove(&peer);
        });
        Ok(())
    }

    async fn translate_event(&self, event: CentralEvent) -> Option<HostEvent> {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let peripheral = self.adapter.peripheral(&id).await.ok()?;
                let properties = peripheral.properties().await.ok()??;
                let advertisement = AdvertisementData {
                    local_name: properties.local_name,
                    service_uuids: properties.services.into_iter().map(from_uuid).collect(),
                    manufacturer_data: properties.manufacturer_data.into_values().next(),
                    service_data: properties
                        .service_data
                        .into_iter()
                        .map(|(uuid, bytes)| (from_uuid(uuid), bytes))
                        .collect(),
                    tx_power: properties.tx_power_level,
                };
                let peer_id = self.record_discovery(id, peripheral);
                Some(HostEvent::PeripheralDiscovered(DiscoveredPeripheral {
                    peer_id,
                    advertisement,
                    rssi: properties.rssi.map(i16::from),
                }))
            }
            CentralEvent::DeviceDisconnected(_id) => None,
            other => {
                debug!(?other, "unhandled btleplug central event");
                None
            }
        }
    }
}

#[async_trait]
impl CentralHostBackend for BtleplugCentralHost {
    fn events(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    async fn scan_for_peripherals(
        &self,
        filter: ScanFilter,
        _options: ScanOptions,
    ) -> Result<(), RuntimeError> {
        let services = filter.service_uuids.iter().copied().map(to_uuid).collect();
        self.adapter
            .start_scan(BtleScanFilter { services })
            .await
            .map_err(map_btleplug_error)
    }

    async fn stop_scan(&self) -> Result<(), RuntimeError> {
        self.adapter.stop_scan().await.map_err(map_btleplug_error)
    }

    async fn connect(&self, peer: PeerId, timeout: Duration) -> Result<(), RuntimeError> {
        let peripheral = self.peripheral_for(peer)?;
        tokio::time::timeout(timeout, peripheral.connect())
            .await
            .map_err(|_| RuntimeError::Timeout)?
            .map_err(map_btleplug_error)?;
        let _ = self.events.send(HostEvent::PeripheralConnected(peer));
        Ok(())
    }

    async fn disconnect(&self, peer: PeerId) -> Result<(), RuntimeError> {
        let peripheral = self.peripheral_for(peer)?;
        peripheral.disconnect().await.map_err(map_btleplug_error)?;
        let _ = self.events.send(HostEvent::PeripheralDisconnected(peer, None));
        Ok(())
    }

    async fn discover_services(
        &self,
        peer: PeerId,
        _filter: Option<Vec<U128>>,
    ) -> Result<(), RuntimeError> {
        let peripheral = self.peripheral_for(peer)?;
        peripheral.discover_services().await.map_err(map_btleplug_error)?;
        let service_uuids = peripheral
            .services()
            .into_iter()
            .map(|s| from_uuid(s.uuid))
            .collect();
        let _ = self.events.send(HostEvent::ServiceDiscovered(peer, service_uuids));
        Ok(())
    }

    async fn discover_characteristics(&self, peer: PeerId, _service: U128) -> Result<(), RuntimeError> {
        // btleplug discovers characteristics as part of `discover_services`;
        // nothing further to request here.
        self.peripheral_for(peer).map(|_| ())
    }

    async fn read(&self, peer: PeerId, service: U128, characteristic: U128) -> Result<(), RuntimeError> {
        let peripheral = self.peripheral_for(peer)?;
        let target = find_characteristic(&peripheral, characteristic)?;
        match peripheral.read(&target).await {
            Ok(bytes) => {
                let _ = self.events.send(HostEvent::CharacteristicValueUpdated {
                    peer,
                    service,
                    characteristic,
                    bytes: Some(bytes),
                    error: None,
                });
                Ok(())
            }
            Err(err) => {
                let _ = self.events.send(HostEvent::CharacteristicValueUpdated {
                    peer,
                    service,
                    characteristic,
                    bytes: None,
                    error: Some(map_btleplug_error(err)),
                });
                Err(RuntimeError::TransportFailed("read failed".into()))
            }
        }
    }

    async fn write(
        &self,
        peer: PeerId,
        _service: U128,
        characteristic: U128,
        bytes: Vec<u8>,
        kind: WriteKind,
    ) -> Result<(), RuntimeError> {
        let peripheral = self.peripheral_for(peer)?;
        let target = find_characteristic(&peripheral, characteristic)?;
        let write_type = match kind {
            WriteKind::WithResponse => WriteType::WithResponse,
            WriteKind::WithoutResponse => WriteType::WithoutResponse,
        };
        peripheral
            .write(&target, &bytes, write_type)
            .await
            .map_err(map_btleplug_error)
    }

    async fn set_notify(
        &self,
        peer: PeerId,
        _service: U128,
        characteristic: U128,
        enabled: bool,
    ) -> Result<(), RuntimeError> {
        let peripheral = self.peripheral_for(peer)?;
        let target = find_characteristic(&peripheral, characteristic)?;
        if enabled {
            peripheral.subscribe(&target).await.map_err(map_btleplug_error)?;
            self.ensure_notification_forwarder(peer, &peripheral).await?;
        } else {
            peripheral.unsubscribe(&target).await.map_err(map_btleplug_error)?;
        }
        Ok(())
    }

    async fn max_write_length(&self, peer: PeerId, _kind: WriteKind) -> usize {
        match self.peripheral_for(peer) {
            Ok(_) => 247,
            Err(_) => {
                warn!(?peer, "max_write_length requested for unknown peer");
                23
            }
        }
    }
}

fn find_characteristic(
    peripheral: &Peripheral,
    char_uuid: U128,
) -> Result<btleplug::api::Characteristic, RuntimeError> {
    let target = to_uuid(char_uuid);
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == target)
        .ok_or(RuntimeError::MethodNotFound)
}
