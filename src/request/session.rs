use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Idle interval applied before the first CONNECT names one.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(90);

/// The one per-connection cell the service may touch: the negotiated idle
/// interval, in milliseconds, already widened by the protocol's 1.5x grace
/// factor. Zero disables the idle timer. Everything else about a session
/// stays on the connection's task.
#[derive(Debug)]
pub struct SessionState {
    keep_alive_ms: AtomicU64,
}

impl SessionState {
    pub fn new() -> SessionState {
        SessionState {
            keep_alive_ms: AtomicU64::new(DEFAULT_KEEP_ALIVE.as_millis() as u64),
        }
    }

    /// Applies a CONNECT's keep-alive seconds: 1.5x the requested interval,
    /// or disabled entirely at zero.
    pub fn negotiate_keep_alive(&self, seconds: u16) {
        self.keep_alive_ms
            .store(u64::from(seconds) * 1500, Ordering::Relaxed);
    }

    /// The current idle interval, or `None` when the timer is disabled.
    pub fn keep_alive(&self) -> Option<Duration> {
        match self.keep_alive_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
