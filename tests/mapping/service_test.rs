// Service Mapper Tests
// Black-box coverage of the public `mapping` API: derivation determinism
// is already covered in-module, so these focus on properties only visible
// from outside the crate.

use bleu::mapping::{derive_service, Direction, TypeDescriptor};

// ============================================================================
// DERIVATION STABILITY ACROSS MANY TYPES
// ============================================================================

#[test]
fn test_a_large_batch_of_distinct_fqnames_never_collides() {
    let mut seen = std::collections::HashSet::new();
    for i in 0..500 {
        let desc = TypeDescriptor::new(format!("com.example.Device{i}"))
            .with_method("read", Direction::RequestResponse);
        let service = derive_service(&desc);
        assert!(seen.insert(service.service_uuid), "service uuid collision at index {i}");
    }
}

#[test]
fn test_char_uuids_within_one_service_never_collide() {
    let desc = TypeDescriptor::new("com.example.Dashboard")
        .with_method("read_temp", Direction::RequestResponse)
        .with_method("read_humidity", Direction::RequestResponse)
        .with_method("calibrate", Direction::OneWayNotify)
        .with_method("stream_alerts", Direction::SubscribeStream);
    let service = derive_service(&desc);

    let mut seen = std::collections::HashSet::new();
    for method in &service.methods {
        assert!(seen.insert(method.char_uuid), "char uuid collision for {}", method.name);
    }
}

// ============================================================================
// SERVICE DESCRIPTOR LOOKUPS
// ============================================================================

#[test]
fn test_method_by_char_agrees_with_method_by_name() {
    let desc = TypeDescriptor::new("com.example.TempSensor")
        .with_method("read", Direction::RequestResponse);
    let service = derive_service(&desc);
    let by_name = service.method("read").unwrap();
    let by_char = service.method_by_char(by_name.char_uuid).unwrap();
    assert_eq!(by_name.name, by_char.name);
}

#[test]
fn test_unknown_method_name_and_char_uuid_both_return_none() {
    let desc = TypeDescriptor::new("com.example.TempSensor")
        .with_method("read", Direction::RequestResponse);
    let service = derive_service(&desc);
    assert!(service.method("does-not-exist").is_none());
    assert!(service.method_by_char(bleu::U128::generate()).is_none());
}

// ============================================================================
// DIRECTION ROUND-TRIPS OVER THE WIRE CODEC
// ============================================================================

#[test]
fn test_direction_survives_postcard_round_trip() {
    for direction in [Direction::RequestResponse, Direction::OneWayNotify, Direction::SubscribeStream] {
        let bytes = postcard::to_allocvec(&direction).unwrap();
        let decoded: Direction = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, direction);
    }
}

// ============================================================================
// BUILDER ERGONOMICS
// ============================================================================

#[test]
fn test_with_method_preserves_declaration_order_regardless_of_uuid_derivation() {
    let desc = TypeDescriptor::new("com.example.Counter")
        .with_method("increment", Direction::RequestResponse)
        .with_method("reset", Direction::OneWayNotify)
        .with_method("value", Direction::SubscribeStream);

    let names: Vec<&str> = desc.methods.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["increment", "reset", "value"]);

    let service = derive_service(&desc);
    let service_names: Vec<&str> = service.methods.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(service_names, vec!["increment", "reset", "value"]);
}
