// Retry policy for delivering a Response notification from peripheral to
// central (§4.3 "Retry policy").
//
// Up to `max_response_attempts` attempts with correct exponential backoff:
// attempt 0 is immediate, attempt 1 follows a 50ms delay, attempt 2 a
// 100ms delay; the attempt counter increments *after* the delay, not
// before, so the first retry really does land ~50ms after the first
// failure rather than ~0ms. On final failure the peripheral sends an
// immediate single-frame error response instead of retrying again, so the
// central fails fast instead of waiting out its whole call deadline.

use crate::ids::{PeerId, U128};
use crate::rpc::config::RuntimeConfig;
use std::collections::HashSet;
use tracing::{debug, warn};

#[async_trait::async_trait]
pub trait NotifySink: Send + Sync {
    async fn notify(&self, characteristic: U128, bytes: Vec<u8>, target: PeerId) -> Result<(), crate::error::RuntimeError>;
}

/// Attempts to deliver every frame of a Response notification to `target`,
/// retrying the whole message on failure per the schedule above. Returns
/// `true` if some attempt delivered every frame; `false` if all attempts
/// were exhausted, in which case `fallback_frame` (a single-frame
/// encoding of an immediate error response) has already been sent once,
/// best-effort.
pub async fn deliver_response_with_retry(
    sink: &dyn NotifySink,
    characteristic: U128,
    target: PeerId,
    frames: &[Vec<u8>],
    fallback_frame: &[u8],
    config: &RuntimeConfig,
) -> bool {
    let mut attempt: u8 = 0;
    loop {
        match try_deliver(sink, characteristic, target, frames).await {
            Ok(()) => {
                debug!(?target, attempt, "response delivered");
                return true;
            }
            Err(_) if attempt + 1 < config.max_response_attempts => {
                let delay = config.response_retry_backoff[attempt as usize];
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                warn!(?target, attempt, ?err, "response delivery exhausted retries, sending fallback error");
                let _ = sink.notify(characteristic, fallback_frame.to_vec(), target).await;
                return false;
            }
        }
    }
}

async fn try_deliver(
    sink: &dyn NotifySink,
    characteristic: U128,
    target: PeerId,
    frames: &[Vec<u8>],
) -> Result<(), crate::error::RuntimeError> {
    for frame in frames {
        sink.notify(characteristic, frame.clone(), target).await?;
    }
    Ok(())
}

/// Adapter from a `PeripheralHostBackend` to the narrower `NotifySink`
/// this module tests against, so retry logic doesn't need to know about
/// subscriber-set intersection bookkeeping.
pub struct PeripheralNotifySink<'a> {
    pub peripheral: &'a dyn crate::host::PeripheralHostBackend,
}

#[async_trait::async_trait]
impl<'a> NotifySink for PeripheralNotifySink<'a> {
    async fn notify(&self, characteristic: U128, bytes: Vec<u8>, target: PeerId) -> Result<(), crate::error::RuntimeError> {
        self.peripheral
            .update_value(characteristic, bytes, Some(HashSet::from([target])))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct FlakySink {
        failures_remaining: AtomicUsize,
        attempts_at: Mutex<Vec<tokio::time::Instant>>,
    }

    #[async_trait::async_trait]
    impl NotifySink for FlakySink {
        async fn notify(&self, _characteristic: U128, _bytes: Vec<u8>, _target: PeerId) -> Result<(), RuntimeError> {
            self.attempts_at.lock().unwrap().push(tokio::time::Instant::now());
            if self.failures_remaining.load(Ordering::SeqCst) > 0 {
                self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
                Err(RuntimeError::TransportFailed("simulated".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_first_attempt_without_delay() {
        let sink = FlakySink {
            failures_remaining: AtomicUsize::new(0),
            attempts_at: Mutex::new(Vec::new()),
        };
        let config = RuntimeConfig::default();
        let delivered = deliver_response_with_retry(
            &sink,
            U128::generate(),
            PeerId::generate(),
            &[vec![1, 2, 3]],
            &[],
            &config,
        )
        .await;
        assert!(delivered);
        assert_eq!(sink.attempts_at.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_schedule_matches_0_50_100ms() {
        let sink = FlakySink {
            failures_remaining: AtomicUsize::new(2),
            attempts_at: Mutex::new(Vec::new()),
        };
        let config = RuntimeConfig::default();
        let start = tokio::time::Instant::now();
        let delivered = deliver_response_with_retry(
            &sink,
            U128::generate(),
            PeerId::generate(),
            &[vec![1, 2, 3]],
            &[],
            &config,
        )
        .await;
        assert!(delivered);

        let attempts = sink.attempts_at.lock().unwrap();
        assert_eq!(attempts.len(), 3);
        let offsets: Vec<Duration> = attempts.iter().map(|t| t.duration_since(start)).collect();
        assert_eq!(offsets[0], Duration::from_millis(0));
        assert_eq!(offsets[1], Duration::from_millis(50));
        assert_eq!(offsets[2], Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_all_attempts_sends_fallback_once() {
        let sink = FlakySink {
            failures_remaining: AtomicUsize::new(10),
            attempts_at: Mutex::new(Vec::new()),
        };
        let config = RuntimeConfig::default();
        let delivered = deliver_response_with_retry(
            &sink,
            U128::generate(),
            PeerId::generate(),
            &[vec![1, 2, 3]],
            &[9, 9, 9],
            &config,
        )
        .await;
        assert!(!delivered);
        // 3 failed real attempts + 1 fallback notify call.
        assert_eq!(sink.attempts_at.lock().unwrap().len(), 4);
    }
}
