// Service Mapper - derives a deterministic GATT service layout from a
// declarative description of an actor type.
//
// Replaces runtime reflection: callers hand the mapper a `TypeDescriptor`
// (name + caller-ordered method list), produced by whatever stub-generation
// front-end sits above this crate (out of scope here).

mod uuid_derive;

pub use uuid_derive::NS_BLEU;

use crate::ids::U128;
use serde::{Deserialize, Serialize};

/// How a method's invocations flow between caller and callee.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Caller suspends for a matching `Response`.
    RequestResponse,
    /// Fire-and-forget; no `Response` is expected or waited on.
    OneWayNotify,
    /// The callee pushes a stream of values after the initial call.
    SubscribeStream,
}

/// One method a stub generator wants to expose as a GATT characteristic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: String,
    pub char_uuid: U128,
    pub direction: Direction,
}

/// A caller-ordered description of an actor type: its fully qualified name
/// and its methods in the order the stub generator declared them.
///
/// Method order is caller-supplied and does not affect the derived uuids;
/// it exists purely so callers can iterate methods in a stable, predictable
/// order.
#[derive(Clone, Debug)]
pub struct TypeDescriptor {
    pub fqname: String,
    pub methods: Vec<(String, Direction)>,
}

impl TypeDescriptor {
    pub fn new(fqname: impl Into<String>) -> Self {
        Self {
            fqname: fqname.into(),
            methods: Vec::new(),
        }
    }

    pub fn with_method(mut self, name: impl Into<String>, direction: Direction) -> Self {
        self.methods.push((name.into(), direction));
        self
    }
}

/// Deterministic projection of a typed actor onto a GATT service and its
/// method characteristics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub service_uuid: U128,
    pub methods: Vec<MethodDescriptor>,
}

impl ServiceDescriptor {
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn method_by_char(&self, char_uuid: U128) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.char_uuid == char_uuid)
    }
}

/// Pure function from a `TypeDescriptor` to a `ServiceDescriptor`. Two
/// calls for the same `fqname` and method names always produce
/// byte-identical uuids, on any host.
pub fn derive_service(type_desc: &TypeDescriptor) -> ServiceDescriptor {
    let service_uuid = uuid_derive::service_uuid(&type_desc.fqname);
    let methods = type_desc
        .methods
        .iter()
        .map(|(name, direction)| MethodDescriptor {
            name: name.clone(),
            char_uuid: uuid_derive::char_uuid(service_uuid, &type_desc.fqname, name),
            direction: *direction,
        })
        .collect();

    ServiceDescriptor {
        service_uuid,
        methods,
    }
}
