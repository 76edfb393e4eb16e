// RuntimeConfig - tunables for the Actor System. Builder style, matching
// the teacher's `TransportConfig`/`GossipConfig` `with_*` pattern.

use std::time::Duration;

/// How long a peer session is kept around, idle, after `Disconnected` with
/// an empty reassembly table and empty pending list, before its transport
/// state is finally released.
const DEFAULT_DISCONNECT_GRACE: Duration = Duration::from_millis(500);

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Default deadline for a `remote_call` awaiting a `Response`.
    pub call_timeout: Duration,
    /// Delay before each Response-notification retry attempt, in order.
    /// `response_retry_backoff.len()` is one less than
    /// `max_response_attempts` (the first attempt is immediate).
    pub response_retry_backoff: [Duration; 2],
    /// Total attempts (including the first, immediate one) to deliver a
    /// Response notification before giving up and sending an explicit
    /// error-response instead.
    pub max_response_attempts: u8,
    /// Floor enforced on any negotiated `max_payload` (§4.2).
    pub min_max_payload: usize,
    /// How long a disconnected peer session survives before its framing
    /// and call-table state are released, in case in-flight writes
    /// straggle in.
    pub disconnect_grace: Duration,
    /// How often the engine scans the call table for expired deadlines.
    pub deadline_poll_interval: Duration,
    /// Timeout passed to `CentralHostBackend::connect` during `discover`.
    pub connect_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            response_retry_backoff: [Duration::from_millis(50), Duration::from_millis(100)],
            max_response_attempts: 3,
            min_max_payload: crate::framing::MIN_MAX_PAYLOAD,
            disconnect_grace: DEFAULT_DISCONNECT_GRACE,
            deadline_poll_interval: Duration::from_millis(20),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace = grace;
        self
    }
}
