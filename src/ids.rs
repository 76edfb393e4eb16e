//! Core identifiers: actor ids, call ids, and the 128-bit uuid type shared by
//! the mapping, envelope, and transport layers.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 128-bit uuid, used for service uuids, characteristic uuids, actor ids,
/// and call ids alike. Thin wrapper so the crate's public API never leaks
/// the backing `uuid` crate directly.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct U128(uuid::Uuid);

impl U128 {
    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> uuid::Uuid {
        self.0
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> [u8; 16] {
        *self.0.as_bytes()
    }
}

impl fmt::Debug for U128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for U128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Actor identifier: names one actor instance process-wide and, when
/// advertised, on-air. Created once at instance construction; immutable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Aid(U128);

impl Aid {
    pub fn generate() -> Self {
        Self(U128::generate())
    }

    pub fn from_u128(value: U128) -> Self {
        Self(value)
    }

    pub fn as_u128(&self) -> U128 {
        self.0
    }
}

impl fmt::Debug for Aid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Aid({})", self.0)
    }
}

impl fmt::Display for Aid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation identifier assigned to each outbound invocation; unique
/// across the process lifetime.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(U128);

impl CallId {
    /// Allocate a fresh call id. Collisions are astronomically unlikely
    /// (122 random bits) and are not guarded against beyond that.
    pub fn generate() -> Self {
        Self(U128::generate())
    }

    pub fn from_u128(value: U128) -> Self {
        Self(value)
    }

    pub fn as_u128(&self) -> U128 {
        self.0
    }
}

impl fmt::Debug for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallId({})", self.0)
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one remote peer (a connected central, from a peripheral's
/// point of view, or a connected peripheral, from a central's) across the
/// host abstraction, the framing layer's reassembly tables, and the RPC
/// core's peer sessions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(U128);

impl PeerId {
    pub fn generate() -> Self {
        Self(U128::generate())
    }

    pub fn from_u128(value: U128) -> Self {
        Self(value)
    }

    pub fn as_u128(&self) -> U128 {
        self.0
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fill a fresh 128-bit value from the OS rng. Kept separate from
/// `U128::generate` (which goes through `uuid::Uuid::new_v4`) for call
/// sites that want raw bytes, e.g. `ConnectionId`-style local handles.
pub fn random_bytes_16() -> [u8; 16] {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
