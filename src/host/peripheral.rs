// Peripheral Host - advertises a service and answers writes/reads from
// connected centrals. Outcomes of connection-level events (subscribe,
// write, disconnect) arrive on the shared `HostEvent` stream.

use crate::error::RuntimeError;
use crate::ids::{PeerId, U128};
use crate::mapping::ServiceDescriptor;
use async_trait::async_trait;
use std::collections::HashSet;

use super::events::{AdvertisementData, HostEvent};

#[async_trait]
pub trait PeripheralHostBackend: Send + Sync {
    fn events(&self) -> tokio::sync::broadcast::Receiver<HostEvent>;

    /// Brings the adapter up. Resolves once the backend settles into
    /// `PoweredOn`, `Unauthorized`, `Unsupported`, or `PoweredOff` — the
    /// caller observes the terminal state via a `StateChanged` event.
    async fn initialize(&self) -> Result<(), RuntimeError>;

    /// Rejects with `PoweredOff` unless the adapter is currently powered on.
    async fn add_service(&self, service: ServiceDescriptor) -> Result<(), RuntimeError>;

    async fn start_advertising(&self, data: AdvertisementData) -> Result<(), RuntimeError>;

    async fn stop_advertising(&self) -> Result<(), RuntimeError>;

    /// Sends `bytes` as a notification on `characteristic`. When `targets`
    /// is `Some` and its intersection with current subscribers is empty,
    /// this fails with `PeerUnreachable` rather than silently notifying no
    /// one; it must never broadcast past `targets`.
    async fn update_value(
        &self,
        characteristic: U128,
        bytes: Vec<u8>,
        targets: Option<HashSet<PeerId>>,
    ) -> Result<(), RuntimeError>;

    async fn subscribed_centrals(&self, characteristic: U128) -> HashSet<PeerId>;

    /// The MTU negotiated for `central`'s link, used to size outbound
    /// notification fragments. Mirrors `CentralHostBackend::max_write_length`
    /// but queried from the peripheral's side of the same physical link.
    async fn negotiated_mtu(&self, central: PeerId) -> usize;
}
