// Central Host - the narrow capability surface a scanning/connecting role
// needs. Results of multi-step operations (service/characteristic
// discovery, reads) arrive asynchronously as `HostEvent`s on the shared
// stream; the trait's own async methods only report immediate
// accept/reject of the command.

use crate::error::RuntimeError;
use crate::ids::{PeerId, U128};
use async_trait::async_trait;
use std::time::Duration;

use super::events::HostEvent;

/// Which BLE write primitive to use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteKind {
    WithResponse,
    WithoutResponse,
}

/// A peripheral matches a `ScanFilter` if its advertised service uuids
/// intersect `service_uuids` (when non-empty), or it advertises any uuid
/// present in `solicited_service_uuids`.
#[derive(Clone, Debug, Default)]
pub struct ScanFilter {
    pub service_uuids: Vec<U128>,
    pub solicited_service_uuids: Vec<U128>,
}

impl ScanFilter {
    pub fn for_service(service_uuid: U128) -> Self {
        Self {
            service_uuids: vec![service_uuid],
            solicited_service_uuids: Vec::new(),
        }
    }

    pub fn matches(&self, advertised: &[U128]) -> bool {
        let intersects_filter = !self.service_uuids.is_empty()
            && advertised.iter().any(|uuid| self.service_uuids.contains(uuid));
        let intersects_solicited = advertised
            .iter()
            .any(|uuid| self.solicited_service_uuids.contains(uuid));
        intersects_filter || intersects_solicited
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ScanOptions {
    pub allow_duplicates: bool,
}

#[async_trait]
pub trait CentralHostBackend: Send + Sync {
    fn events(&self) -> tokio::sync::broadcast::Receiver<HostEvent>;

    async fn scan_for_peripherals(
        &self,
        filter: ScanFilter,
        options: ScanOptions,
    ) -> Result<(), RuntimeError>;

    async fn stop_scan(&self) -> Result<(), RuntimeError>;

    async fn connect(&self, peer: PeerId, timeout: Duration) -> Result<(), RuntimeError>;

    async fn disconnect(&self, peer: PeerId) -> Result<(), RuntimeError>;

    async fn discover_services(
        &self,
        peer: PeerId,
        filter: Option<Vec<U128>>,
    ) -> Result<(), RuntimeError>;

    async fn discover_characteristics(&self, peer: PeerId, service: U128) -> Result<(), RuntimeError>;

    async fn read(&self, peer: PeerId, service: U128, characteristic: U128) -> Result<(), RuntimeError>;

    async fn write(
        &self,
        peer: PeerId,
        service: U128,
        characteristic: U128,
        bytes: Vec<u8>,
        kind: WriteKind,
    ) -> Result<(), RuntimeError>;

    async fn set_notify(
        &self,
        peer: PeerId,
        service: U128,
        characteristic: U128,
        enabled: bool,
    ) -> Result<(), RuntimeError>;

    /// Monotonic per session after negotiation; always within `[23, 512]`.
    async fn max_write_length(&self, peer: PeerId, kind: WriteKind) -> usize;
}
