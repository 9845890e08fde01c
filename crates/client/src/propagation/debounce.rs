// Quiet-period timer for the propagation hooks.
//
// Every push restarts the window; the timer is ready once a full window has
// passed without a push. Uses tokio's clock so paused-time tests drive it.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::DEFAULT_DEBOUNCE_MS;

/// Smallest accepted window.
const MIN_DEBOUNCE_MS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceConfig {
    pub window: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self { window: Duration::from_millis(DEFAULT_DEBOUNCE_MS) }
    }
}

impl DebounceConfig {
    /// Window of `ms` milliseconds, raised to the minimum if below it.
    pub fn with_millis(ms: u64) -> Self {
        Self { window: Duration::from_millis(ms.max(MIN_DEBOUNCE_MS)) }
    }

    pub fn with_window(window: Duration) -> Self {
        Self::with_millis(u64::try_from(window.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Coalesces bursts of activity into one firing.
#[derive(Debug)]
pub struct Debouncer {
    config: DebounceConfig,
    last_seen: Option<Instant>,
}

impl Debouncer {
    pub fn new(config: DebounceConfig) -> Self {
        Self { config, last_seen: None }
    }

    pub fn push(&mut self) {
        self.push_at(Instant::now());
    }

    pub(crate) fn push_at(&mut self, now: Instant) {
        self.last_seen = Some(now);
    }

    /// `true` exactly once per burst, after the window elapsed.
    pub fn drain_ready(&mut self) -> bool {
        self.drain_ready_at(Instant::now())
    }

    pub(crate) fn drain_ready_at(&mut self, now: Instant) -> bool {
        match self.last_seen {
            Some(last) if now.duration_since(last) >= self.config.window => {
                self.last_seen = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.last_seen.is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.last_seen.map(|last| last + self.config.window)
    }
}
