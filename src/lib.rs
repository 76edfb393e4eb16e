//! Bleu - RPC over Bluetooth Low Energy GATT.
//!
//! Typed actor calls across a BLE link: a declarative [`mapping::TypeDescriptor`]
//! derives a deterministic GATT service layout, the [`framing`] layer
//! fragments/reassembles envelopes across the negotiated MTU, and the
//! [`rpc::ActorSystem`] ties a [`host`] backend to local and remote actor
//! instances.
//!
//! Most applications only need [`rpc::ActorSystem`], [`mapping`], and
//! [`host::LoopbackAir`] (or the `btleplug`-gated real central backend)
//! to get started.

pub mod envelope;
pub mod error;
pub mod framing;
pub mod host;
pub mod ids;
pub mod mapping;
pub mod registry;
pub mod rpc;

pub use error::RuntimeError;
pub use ids::{Aid, CallId, PeerId, U128};
