//! Generic bounded polling wait and the typed wait conditions built on it.
//!
//! Every component that needs to await an asynchronous browser event goes
//! through [`poll_until`]: probe a piece of shared state on a fixed
//! interval, resolve as soon as it yields a value, fail with a timeout
//! after the full tick budget, and abandon the wait benignly when playback
//! is paused or stopped.

pub mod conditions;
mod control;

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use replaykit_core_types::ReplayError;

pub use control::PlaybackFlags;

/// Polling cadence and budget. Defaults follow the engine-wide generic wait:
/// 500 ms × 60 ticks, roughly thirty seconds.
#[derive(Clone, Copy, Debug)]
pub struct WaitConfig {
    pub interval: Duration,
    pub max_ticks: u32,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            max_ticks: 60,
        }
    }
}

impl WaitConfig {
    /// Total budget after which the wait times out.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_ticks
    }
}

/// How a wait ended short of a timeout.
#[derive(Debug, Eq, PartialEq)]
pub enum WaitOutcome<T> {
    Satisfied(T),
    /// Playback was paused or stopped; the wait resolves benignly since the
    /// run is being torn down anyway.
    Interrupted,
}

impl<T> WaitOutcome<T> {
    pub fn satisfied(self) -> Option<T> {
        match self {
            WaitOutcome::Satisfied(value) => Some(value),
            WaitOutcome::Interrupted => None,
        }
    }
}

/// Poll `probe` every `config.interval` until it yields a value.
///
/// The probe is first consulted after one interval, never eagerly, and the
/// wait rejects with a timeout after exactly `max_ticks` unsatisfied probes.
/// Cancelling `cancel` abandons the wait immediately with
/// [`WaitOutcome::Interrupted`] — no timer outlives the run.
pub async fn poll_until<T>(
    config: WaitConfig,
    cancel: &CancellationToken,
    what: &str,
    mut probe: impl FnMut() -> Option<T>,
) -> Result<WaitOutcome<T>, ReplayError> {
    let mut ticks = 0u32;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(target: "waits", what, "wait interrupted");
                return Ok(WaitOutcome::Interrupted);
            }
            _ = sleep(config.interval) => {}
        }
        if let Some(value) = probe() {
            return Ok(WaitOutcome::Satisfied(value));
        }
        ticks += 1;
        if ticks >= config.max_ticks {
            return Err(ReplayError::timeout(what, config.budget().as_millis() as u64));
        }
    }
}

/// Deadline-based variant polling every 100 ms, used where the caller
/// supplies the bound (new-window appearance).
pub async fn poll_until_deadline<T>(
    deadline: Duration,
    cancel: &CancellationToken,
    what: &str,
    mut probe: impl FnMut() -> Option<T>,
) -> Result<WaitOutcome<T>, ReplayError> {
    let interval = Duration::from_millis(100);
    let started = tokio::time::Instant::now();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(WaitOutcome::Interrupted),
            _ = sleep(interval) => {}
        }
        if let Some(value) = probe() {
            return Ok(WaitOutcome::Satisfied(value));
        }
        if started.elapsed() > deadline {
            return Err(ReplayError::timeout(what, deadline.as_millis() as u64));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn resolves_as_soon_as_probe_yields() {
        let ticks = Arc::new(AtomicU32::new(0));
        let probe_ticks = Arc::clone(&ticks);
        let cancel = CancellationToken::new();
        let started = tokio::time::Instant::now();

        let outcome = poll_until(WaitConfig::default(), &cancel, "value", move || {
            let seen = probe_ticks.fetch_add(1, Ordering::Relaxed) + 1;
            (seen == 3).then_some(seen)
        })
        .await
        .unwrap();

        assert_eq!(outcome, WaitOutcome::Satisfied(3));
        // three probes, one per interval, none before the first interval
        assert_eq!(started.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_exactly_the_tick_budget() {
        let config = WaitConfig {
            interval: Duration::from_millis(500),
            max_ticks: 4,
        };
        let cancel = CancellationToken::new();
        let probes = Arc::new(AtomicU32::new(0));
        let probe_count = Arc::clone(&probes);
        let started = tokio::time::Instant::now();

        let err = poll_until(config, &cancel, "never", move || {
            probe_count.fetch_add(1, Ordering::Relaxed);
            None::<()>
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ReplayError::Timeout { budget_ms: 2000, .. }));
        assert_eq!(probes.load(Ordering::Relaxed), 4);
        assert_eq!(started.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn satisfied_on_final_tick_beats_timeout() {
        let config = WaitConfig {
            interval: Duration::from_millis(500),
            max_ticks: 4,
        };
        let cancel = CancellationToken::new();
        let ticks = Arc::new(AtomicU32::new(0));
        let probe_ticks = Arc::clone(&ticks);

        let outcome = poll_until(config, &cancel, "edge", move || {
            let seen = probe_ticks.fetch_add(1, Ordering::Relaxed) + 1;
            (seen == 4).then_some(())
        })
        .await
        .unwrap();

        assert_eq!(outcome, WaitOutcome::Satisfied(()));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_benignly() {
        let cancel = CancellationToken::new();
        let waiter = cancel.clone();
        let handle = tokio::spawn(async move {
            poll_until(WaitConfig::default(), &waiter, "cancelled", || None::<()>).await
        });

        tokio::time::sleep(Duration::from_millis(1200)).await;
        cancel.cancel();
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome, WaitOutcome::Interrupted);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_variant_enforces_caller_bound() {
        let cancel = CancellationToken::new();
        let err = poll_until_deadline(
            Duration::from_millis(250),
            &cancel,
            "new window to appear",
            || None::<()>,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ReplayError::Timeout { budget_ms: 250, .. }));
    }
}
