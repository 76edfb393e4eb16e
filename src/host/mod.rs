// BLE Abstraction - Peripheral Host and Central Host. The only components
// allowed to touch platform BLE callbacks; everything downstream consumes
// the unified `HostEvent` stream.

mod central;
mod events;
mod loopback;
mod peripheral;

#[cfg(feature = "btleplug")]
mod btleplug_backend;

pub use central::{CentralHostBackend, ScanFilter, ScanOptions, WriteKind};
pub use events::{AdvertisementData, DiscoveredPeripheral, HostEvent, HostState};
pub use loopback::{LoopbackAir, LoopbackCentralHost, LoopbackPeripheralHost};
pub use peripheral::PeripheralHostBackend;

#[cfg(feature = "btleplug")]
pub use btleplug_backend::BtleplugCentralHost;
