// Unified host event stream. Both Host components translate native
// callbacks into this one typed enum; the Event Bridge is the only
// consumer.

use crate::ids::{PeerId, U128};
use crate::error::RuntimeError;

/// Power/authorization state of the local adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

/// One advertisement observed while scanning.
#[derive(Clone, Debug)]
pub struct DiscoveredPeripheral {
    pub peer_id: PeerId,
    pub advertisement: AdvertisementData,
    pub rssi: Option<i16>,
}

/// Advertisement payload, both emitted by a peripheral and observed by a
/// scanning central.
#[derive(Clone, Debug, Default)]
pub struct AdvertisementData {
    pub local_name: Option<String>,
    pub service_uuids: Vec<U128>,
    pub manufacturer_data: Option<Vec<u8>>,
    pub service_data: std::collections::HashMap<U128, Vec<u8>>,
    pub tx_power: Option<i8>,
}

#[derive(Clone, Debug)]
pub enum HostEvent {
    StateChanged(HostState),
    PeripheralDiscovered(DiscoveredPeripheral),
    PeripheralConnected(PeerId),
    PeripheralDisconnected(PeerId, Option<RuntimeError>),
    ServiceDiscovered(PeerId, Vec<U128>),
    CharacteristicValueUpdated {
        peer: PeerId,
        service: U128,
        characteristic: U128,
        bytes: Option<Vec<u8>>,
        error: Option<RuntimeError>,
    },
    NotificationStateChanged {
        peer: PeerId,
        service: U128,
        characteristic: U128,
        enabled: bool,
    },
    WriteRequestReceived {
        central: PeerId,
        service: U128,
        characteristic: U128,
        bytes: Vec<u8>,
    },
    ReadRequestReceived {
        central: PeerId,
        service: U128,
        characteristic: U128,
    },
    CentralSubscribed {
        central: PeerId,
        service: U128,
        characteristic: U128,
    },
    CentralUnsubscribed {
        central: PeerId,
        service: U128,
        characteristic: U128,
    },
}
