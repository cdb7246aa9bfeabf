//! Interface to the external playback controller.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use replaykit_core_types::ReplayError;

/// Callbacks into the controller that owns the run: aborting playback,
/// breakpoints, log echo, sub-test invocation and speed changes. The engine
/// never acts on the controller directly.
#[async_trait]
pub trait PlaybackHost: Send + Sync {
    /// Abort the run from outside command execution, e.g. when the playing
    /// tab is closed from under the engine.
    async fn abort(&self, reason: &str);

    /// Suspend at a breakpoint until the user resumes.
    async fn break_point(&self);

    /// Append a line to the run's log.
    async fn echo(&self, message: &str);

    /// Invoke another test case and resolve with its result.
    async fn call_test_case(
        &self,
        test_case: &str,
        assertions_disabled: bool,
    ) -> Result<Value, ReplayError>;

    /// Observe a change of the inter-command delay.
    async fn speed_changed(&self, delay_ms: u64);
}

/// Host that logs and otherwise does nothing, for the demo binary.
pub struct NoopHost;

#[async_trait]
impl PlaybackHost for NoopHost {
    async fn abort(&self, reason: &str) {
        info!(target: "host", reason, "playback aborted");
    }

    async fn break_point(&self) {
        info!(target: "host", "breakpoint reached");
    }

    async fn echo(&self, message: &str) {
        info!(target: "host", "echo: {message}");
    }

    async fn call_test_case(
        &self,
        test_case: &str,
        assertions_disabled: bool,
    ) -> Result<Value, ReplayError> {
        info!(target: "host", test_case, assertions_disabled, "sub-test invoked");
        Ok(json!({ "result": "success" }))
    }

    async fn speed_changed(&self, delay_ms: u64) {
        info!(target: "host", delay_ms, "playback speed changed");
    }
}
