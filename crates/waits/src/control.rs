use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Externally observable playback state polled by every wait loop and
/// dispatch retry: stopping playback must never leave a wait pending.
///
/// Pausing and stopping both cancel the current token; resuming swaps in a
/// fresh one so later waits observe a clean token.
pub struct PlaybackFlags {
    playing: AtomicBool,
    paused: AtomicBool,
    stopping: AtomicBool,
    delay_ms: AtomicU64,
    max_delay_ms: u64,
    cancel: Mutex<CancellationToken>,
}

impl PlaybackFlags {
    pub const DEFAULT_MAX_DELAY_MS: u64 = 5000;

    pub fn new() -> Self {
        Self::with_max_delay(Self::DEFAULT_MAX_DELAY_MS)
    }

    pub fn with_max_delay(max_delay_ms: u64) -> Self {
        Self {
            playing: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            max_delay_ms,
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// True when playback is not running, paused, or tearing down — the
    /// short-circuit condition for in-flight waits and retries.
    pub fn pausing(&self) -> bool {
        !self.playing.load(Ordering::Relaxed)
            || self.paused.load(Ordering::Relaxed)
            || self.stopping.load(Ordering::Relaxed)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
        self.cancel.lock().cancel();
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
        self.stopping.store(false, Ordering::Relaxed);
        self.playing.store(true, Ordering::Relaxed);
        *self.cancel.lock() = CancellationToken::new();
    }

    pub fn stop(&self) {
        self.stopping.store(true, Ordering::Relaxed);
        self.playing.store(false, Ordering::Relaxed);
        self.cancel.lock().cancel();
    }

    /// Token observed by waits started from now on.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.lock().clone()
    }

    /// Clamp silently to `[0, max_delay]` rather than rejecting.
    pub fn set_delay(&self, delay_ms: i64) {
        let clamped = delay_ms.clamp(0, self.max_delay_ms as i64) as u64;
        self.delay_ms.store(clamped, Ordering::Relaxed);
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms.load(Ordering::Relaxed)
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }
}

impl Default for PlaybackFlags {
    fn default() -> Self {
        Self::new()
    }
}
