// Instance Registry - maps actor ids to local instances and to remote
// proxy handles. This is the only path by which the Event Bridge finds a
// handler for an incoming Invocation. Instances are never
// garbage-collected implicitly; users unregister.

use super::method::MethodRegistry;
use crate::ids::{Aid, PeerId, U128};
use crate::mapping::ServiceDescriptor;
use std::collections::HashMap;

/// A locally-registered actor: its service layout and its method handlers.
pub struct LocalInstance {
    pub service: ServiceDescriptor,
    pub methods: MethodRegistry,
}

/// A handle to an actor living on a remote peer, reached by writing to the
/// characteristic that corresponds to each method. Carries the full
/// `ServiceDescriptor` (not just a name-to-uuid map) so the RPC Core can
/// also recover each method's `Direction` without a second lookup table.
#[derive(Clone, Debug)]
pub struct RemoteProxy {
    pub peer_id: PeerId,
    pub recipient: Aid,
    pub service: ServiceDescriptor,
}

impl RemoteProxy {
    pub fn service_uuid(&self) -> U128 {
        self.service.service_uuid
    }

    pub fn char_uuid(&self, method_name: &str) -> Option<U128> {
        self.service.method(method_name).map(|m| m.char_uuid)
    }

    pub fn direction(&self, method_name: &str) -> Option<crate::mapping::Direction> {
        self.service.method(method_name).map(|m| m.direction)
    }
}

#[derive(Default)]
pub struct InstanceRegistry {
    local: HashMap<Aid, LocalInstance>,
    remote: HashMap<Aid, RemoteProxy>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_local(&mut self, aid: Aid, instance: LocalInstance) {
        self.local.insert(aid, instance);
    }

    pub fn unregister_local(&mut self, aid: &Aid) {
        self.local.remove(aid);
    }

    pub fn local(&self, aid: &Aid) -> Option<&LocalInstance> {
        self.local.get(aid)
    }

    /// The single local instance bound to a given service uuid, if any —
    /// used by the peripheral side to find which exported actor a central
    /// is writing to. A GATT server never binds two local instances to the
    /// same service uuid, so this lookup is unambiguous; the physical
    /// service/characteristic uuid pair carried by the host event is what
    /// actually drives dispatch; the envelope's `recipient` field is
    /// carried alongside for attribution, not routing.
    pub fn local_by_service(&self, service_uuid: U128) -> Option<(&Aid, &LocalInstance)> {
        self.local
            .iter()
            .find(|(_, instance)| instance.service.service_uuid == service_uuid)
    }

    pub fn register_remote(&mut self, aid: Aid, proxy: RemoteProxy) {
        self.remote.insert(aid, proxy);
    }

    pub fn unregister_remote(&mut self, aid: &Aid) {
        self.remote.remove(aid);
    }

    pub fn remote(&self, aid: &Aid) -> Option<&RemoteProxy> {
        self.remote.get(aid)
    }

    pub fn remote_by_peer(&self, peer_id: PeerId) -> Option<(&Aid, &RemoteProxy)> {
        self.remote.iter().find(|(_, proxy)| proxy.peer_id == peer_id)
    }

    /// Drops every remote proxy bound to `peer_id` — called once a peer's
    /// disconnect grace window has passed.
    pub fn unregister_remote_by_peer(&mut self, peer_id: PeerId) {
        self.remote.retain(|_, proxy| proxy.peer_id != peer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{derive_service, Direction, TypeDescriptor};

    fn sample_service() -> ServiceDescriptor {
        derive_service(&TypeDescriptor::new("com.example.TempSensor").with_method(
            "read",
            Direction::RequestResponse,
        ))
    }

    #[test]
    fn local_by_service_finds_the_bound_instance() {
        let mut registry = InstanceRegistry::new();
        let aid = Aid::generate();
        let service = sample_service();
        let service_uuid = service.service_uuid;
        registry.register_local(
            aid,
            LocalInstance {
                service,
                methods: MethodRegistry::new(),
            },
        );

        let (found_aid, _) = registry.local_by_service(service_uuid).unwrap();
        assert_eq!(*found_aid, aid);
        assert!(registry
            .local_by_service(U128::generate())
            .is_none());
    }

    #[test]
    fn remote_by_peer_finds_the_registered_proxy() {
        let mut registry = InstanceRegistry::new();
        let peer_id = PeerId::generate();
        let aid = Aid::generate();
        registry.register_remote(
            aid,
            RemoteProxy {
                peer_id,
                recipient: Aid::generate(),
                service: sample_service(),
            },
        );

        let (found_aid, _) = registry.remote_by_peer(peer_id).unwrap();
        assert_eq!(*found_aid, aid);
    }
}
