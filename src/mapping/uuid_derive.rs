// UUID5-style, domain-separated derivation:
//
//   service_uuid = uuid5(NS_BLEU, fqname + ".Service")
//   char_uuid    = uuid5(service_uuid, fqname + "." + method_name)
//
// Derivation is pure: same inputs always produce the same uuid, on any host.

use crate::ids::U128;
use uuid::Uuid;

/// Fixed namespace constant for all Bleu uuid5 derivations. Arbitrary but
/// stable across the lifetime of the protocol; changing it would change
/// every derived service/characteristic uuid.
pub const NS_BLEU: Uuid = Uuid::from_bytes([
    0xbe, 0x1e, 0x00, 0x00, 0x57, 0xad, 0x5b, 0x1e, 0x8b, 0xad, 0xf0, 0x0d, 0xca, 0xfe, 0xba, 0xbe,
]);

pub fn service_uuid(fqname: &str) -> U128 {
    let name = format!("{fqname}.Service");
    U128::from_uuid(Uuid::new_v5(&NS_BLEU, name.as_bytes()))
}

pub fn char_uuid(service_uuid: U128, fqname: &str, method_name: &str) -> U128 {
    let name = format!("{fqname}.{method_name}");
    U128::from_uuid(Uuid::new_v5(&service_uuid.as_uuid(), name.as_bytes()))
}
