// Actor System / Event Bridge Tests
// End-to-end coverage of `ActorSystem` wiring a loopback Host pair together:
// adapter readiness gating, discovery/connect resolution, and basic
// request-response / one-way call dispatch. Call-lifecycle edge cases
// (cancel, concurrency, timeouts) live in `call_table_test.rs`; the six
// named seed scenarios live in `scenarios_test.rs`.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bleu::host::{CentralHostBackend, LoopbackAir, LoopbackCentralHost, LoopbackPeripheralHost, PeripheralHostBackend};
use bleu::mapping::{Direction, TypeDescriptor};
use bleu::registry::{Handler, HandlerOutcome, MethodRegistry};
use bleu::rpc::{ActorSystem, RemoteOutcome, RuntimeConfig};
use bleu::RuntimeError;

fn make_handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HandlerOutcome, RuntimeError>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)) as Pin<Box<dyn Future<Output = Result<HandlerOutcome, RuntimeError>> + Send>>)
}

fn counter_type() -> TypeDescriptor {
    TypeDescriptor::new("com.example.Counter")
        .with_method("increment", Direction::RequestResponse)
        .with_method("reset", Direction::OneWayNotify)
}

fn counter_methods() -> MethodRegistry {
    let count = Arc::new(AtomicI64::new(0));
    let mut methods = MethodRegistry::new();

    let inc_count = count.clone();
    methods.register(
        "increment",
        make_handler(move |_args| {
            let count = inc_count.clone();
            async move {
                let value = count.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(HandlerOutcome::Success(value.to_be_bytes().to_vec()))
            }
        }),
    );

    methods.register(
        "reset",
        make_handler(move |_args| {
            let count = count.clone();
            async move {
                count.store(0, Ordering::SeqCst);
                Ok(HandlerOutcome::Void)
            }
        }),
    );

    methods
}

// ============================================================================
// ADAPTER READINESS
// ============================================================================

#[tokio::test]
async fn test_start_advertising_without_a_peripheral_host_is_not_permitted() {
    let air = LoopbackAir::new();
    let central = Arc::new(LoopbackCentralHost::new(air));
    let system = ActorSystem::new(None, Some(central), RuntimeConfig::default());

    let result = system.start_advertising(counter_type(), counter_methods(), None).await;
    assert!(matches!(result, Err(RuntimeError::NotPermitted)));
}

#[tokio::test]
async fn test_start_advertising_succeeds_once_the_adapter_initializes() {
    let air = LoopbackAir::new();
    let peripheral = Arc::new(LoopbackPeripheralHost::new(air));
    let system = ActorSystem::new(Some(peripheral), None, RuntimeConfig::default());

    let aid = system
        .start_advertising(counter_type(), counter_methods(), Some("counter-1".to_string()))
        .await
        .unwrap();
    let _ = aid;
}

// ============================================================================
// DISCOVER / CONNECT
// ============================================================================

#[tokio::test]
async fn test_connect_resolves_a_running_peripheral_into_a_remote_handle() {
    let air = LoopbackAir::new();
    let peripheral_host = Arc::new(LoopbackPeripheralHost::new(air.clone()));
    let peripheral_peer_id = peripheral_host.peer_id();
    let peripheral = ActorSystem::new(Some(peripheral_host), None, RuntimeConfig::default());
    peripheral
        .start_advertising(counter_type(), counter_methods(), None)
        .await
        .unwrap();

    let central_host = Arc::new(LoopbackCentralHost::new(air));
    let central = ActorSystem::new(None, Some(central_host), RuntimeConfig::default());

    let handle = central.connect(peripheral_peer_id, counter_type()).await.unwrap();
    assert_eq!(handle.peer_id(), peripheral_peer_id);
}

#[tokio::test]
async fn test_connect_to_a_peer_that_never_advertised_fails() {
    let air = LoopbackAir::new();
    let central_host = Arc::new(LoopbackCentralHost::new(air));
    let central = ActorSystem::new(None, Some(central_host), RuntimeConfig::default());

    let result = central.connect(bleu::PeerId::generate(), counter_type()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_discover_finds_an_advertising_peer_within_the_timeout() {
    let air = LoopbackAir::new();
    let peripheral_host = Arc::new(LoopbackPeripheralHost::new(air.clone()));
    let peripheral_peer_id = peripheral_host.peer_id();
    let peripheral = ActorSystem::new(Some(peripheral_host), None, RuntimeConfig::default());
    peripheral
        .start_advertising(counter_type(), counter_methods(), None)
        .await
        .unwrap();

    let central_host = Arc::new(LoopbackCentralHost::new(air));
    let central = ActorSystem::new(None, Some(central_host), RuntimeConfig::default());

    let handles = central.discover(counter_type(), Duration::from_millis(150)).await.unwrap();
    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].peer_id(), peripheral_peer_id);
}

#[tokio::test]
async fn test_discover_with_nothing_advertising_returns_an_empty_list() {
    let air = LoopbackAir::new();
    let central_host = Arc::new(LoopbackCentralHost::new(air));
    let central = ActorSystem::new(None, Some(central_host), RuntimeConfig::default());

    let handles = central.discover(counter_type(), Duration::from_millis(100)).await.unwrap();
    assert!(handles.is_empty());
}

// ============================================================================
// REMOTE CALLS
// ============================================================================

async fn connected_pair() -> (ActorSystem, ActorSystem, bleu::rpc::RemoteHandle) {
    let air = LoopbackAir::new();
    let peripheral_host = Arc::new(LoopbackPeripheralHost::new(air.clone()));
    let peripheral_peer_id = peripheral_host.peer_id();
    let peripheral = ActorSystem::new(Some(peripheral_host), None, RuntimeConfig::default());
    peripheral
        .start_advertising(counter_type(), counter_methods(), None)
        .await
        .unwrap();

    let central_host = Arc::new(LoopbackCentralHost::new(air));
    let central = ActorSystem::new(None, Some(central_host), RuntimeConfig::default());
    let handle = central.connect(peripheral_peer_id, counter_type()).await.unwrap();

    (peripheral, central, handle)
}

#[tokio::test]
async fn test_request_response_call_reaches_the_local_handler_and_returns_its_result() {
    let (_peripheral, _central, handle) = connected_pair().await;

    let outcome = handle.call("increment", Vec::new(), Direction::RequestResponse).await.unwrap();
    match outcome {
        RemoteOutcome::Success(bytes) => {
            assert_eq!(i64::from_be_bytes(bytes.try_into().unwrap()), 1);
        }
        RemoteOutcome::Void => panic!("expected a Success outcome"),
    }
}

#[tokio::test]
async fn test_one_way_call_returns_void_immediately() {
    let (_peripheral, _central, handle) = connected_pair().await;

    let outcome = handle.call("reset", Vec::new(), Direction::OneWayNotify).await.unwrap();
    assert!(matches!(outcome, RemoteOutcome::Void));
}

#[tokio::test]
async fn test_call_to_an_unregistered_method_name_fails_with_method_not_found() {
    let (_peripheral, _central, handle) = connected_pair().await;

    let result = handle.call("does_not_exist", Vec::new(), Direction::RequestResponse).await;
    assert!(matches!(result, Err(RuntimeError::MethodNotFound)));
}
