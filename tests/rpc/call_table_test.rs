// Call Table Tests (integration-level)
// `CallTable`/`CallSlot` are private to the engine, so these exercise the
// same lifecycle — outstanding calls, cancellation, timeouts, concurrent
// ordering — entirely through the public `ActorSystem` surface.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bleu::host::{LoopbackAir, LoopbackCentralHost, LoopbackPeripheralHost};
use bleu::mapping::{Direction, TypeDescriptor};
use bleu::registry::{Handler, HandlerOutcome, MethodRegistry};
use bleu::rpc::{ActorSystem, RemoteHandle, RemoteOutcome, RuntimeConfig};
use bleu::RuntimeError;

fn make_handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HandlerOutcome, RuntimeError>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)) as Pin<Box<dyn Future<Output = Result<HandlerOutcome, RuntimeError>> + Send>>)
}

fn echo_type() -> TypeDescriptor {
    TypeDescriptor::new("com.example.Echo").with_method("echo", Direction::RequestResponse)
}

fn echo_methods_with_delay(delay: Duration) -> MethodRegistry {
    let mut methods = MethodRegistry::new();
    methods.register(
        "echo",
        make_handler(move |args| {
            let delay = delay;
            async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(HandlerOutcome::Success(args))
            }
        }),
    );
    methods
}

async fn connected_pair(
    config: RuntimeConfig,
    handler_delay: Duration,
) -> (ActorSystem, ActorSystem, RemoteHandle) {
    let air = LoopbackAir::new();
    let peripheral_host = Arc::new(LoopbackPeripheralHost::new(air.clone()));
    let peripheral_peer_id = peripheral_host.peer_id();
    let peripheral = ActorSystem::new(Some(peripheral_host), None, config.clone());
    peripheral
        .start_advertising(echo_type(), echo_methods_with_delay(handler_delay), None)
        .await
        .unwrap();

    let central_host = Arc::new(LoopbackCentralHost::new(air));
    let central = ActorSystem::new(None, Some(central_host), config);
    let handle = central.connect(peripheral_peer_id, echo_type()).await.unwrap();

    (peripheral, central, handle)
}

// ============================================================================
// CONCURRENT CALLS RESOLVE INDEPENDENTLY
// ============================================================================

#[tokio::test]
async fn test_three_concurrent_calls_each_resolve_to_their_own_argument() {
    let (_peripheral, _central, handle) = connected_pair(RuntimeConfig::default(), Duration::ZERO).await;

    let (a, b, c) = tokio::join!(
        handle.call("echo", vec![1], Direction::RequestResponse),
        handle.call("echo", vec![2], Direction::RequestResponse),
        handle.call("echo", vec![3], Direction::RequestResponse),
    );

    for (result, expected) in [(a, 1u8), (b, 2), (c, 3)] {
        match result.unwrap() {
            RemoteOutcome::Success(bytes) => assert_eq!(bytes, vec![expected]),
            RemoteOutcome::Void => panic!("expected Success"),
        }
    }
}

// ============================================================================
// CANCELLATION
// ============================================================================

#[tokio::test]
async fn test_cancelling_a_suspended_call_lets_a_later_response_arrive_harmlessly() {
    let config = RuntimeConfig::default().with_call_timeout(Duration::from_secs(10));
    let (_peripheral, _central, handle) = connected_pair(config, Duration::from_millis(80)).await;

    let call = tokio::spawn({
        let handle = handle.clone();
        async move { handle.call("echo", vec![9], Direction::RequestResponse).await }
    });

    // Give the write a moment to land, then abort the waiting task: this
    // drops its `oneshot::Receiver`, the same shape `ActorSystem::cancel`
    // leaves behind (a closed reply channel the engine can't resolve).
    tokio::time::sleep(Duration::from_millis(10)).await;
    call.abort();
    let _ = call.await;

    // The handler's delayed response still arrives on the wire afterwards;
    // the engine must not panic or wedge handling it for an abandoned call,
    // and the session must keep serving fresh calls normally.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let outcome = handle.call("echo", vec![7], Direction::RequestResponse).await.unwrap();
    match outcome {
        RemoteOutcome::Success(bytes) => assert_eq!(bytes, vec![7]),
        RemoteOutcome::Void => panic!("expected Success"),
    }
}

// ============================================================================
// TIMEOUTS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_a_call_whose_handler_never_returns_in_time_fails_with_timeout() {
    let config = RuntimeConfig::default().with_call_timeout(Duration::from_millis(50));
    let (_peripheral, _central, handle) = connected_pair(config, Duration::from_secs(3600)).await;

    let result = handle.call("echo", vec![1], Direction::RequestResponse).await;
    assert!(matches!(result, Err(RuntimeError::Timeout)));
}

#[tokio::test(start_paused = true)]
async fn test_a_stale_response_after_timeout_does_not_disturb_a_later_call() {
    let config = RuntimeConfig::default().with_call_timeout(Duration::from_millis(50));
    let (_peripheral, _central, handle) = connected_pair(config, Duration::from_millis(200)).await;

    let first = handle.call("echo", vec![1], Direction::RequestResponse).await;
    assert!(matches!(first, Err(RuntimeError::Timeout)));

    // Let the slow handler's response land on the (by-then-closed) call
    // slot and be dropped as stale before proving the session still works.
    tokio::time::sleep(Duration::from_millis(250)).await;

    let second = handle.call("echo", vec![2], Direction::RequestResponse).await.unwrap();
    match second {
        RemoteOutcome::Success(bytes) => assert_eq!(bytes, vec![2]),
        RemoteOutcome::Void => panic!("expected Success"),
    }
}
