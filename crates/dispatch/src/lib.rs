//! Frame-targeted command dispatch.
//!
//! Every playback command that runs inside the page goes through
//! [`Dispatcher::send`]: resolve the current tab and frame, post the command
//! over the control surface, and recover broken frame channels by
//! re-resolving and resending on a fixed cadence within a hard budget
//! measured from the first attempt. The budget is deliberately wall-clock:
//! a frame that has been gone for five seconds is not coming back.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use replaykit_core_types::{NativeFrameId, ReplayError, TabId};
use replaykit_session::{FrameMap, WindowSession};
use replaykit_surface::BrowserSurface;
use replaykit_waits::PlaybackFlags;

/// Command namespace reserved for an out-of-process driver; the engine
/// acknowledges these without touching the page.
const RESERVED_PREFIX: &str = "webdriver";

/// Cadence of channel-broken resends.
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Total recovery budget, measured from the first attempt.
const RETRY_BUDGET: Duration = Duration::from_secs(5);

/// Routes page commands to the currently targeted frame.
pub struct Dispatcher {
    surface: Arc<dyn BrowserSurface>,
    session: Arc<WindowSession>,
    frames: Arc<FrameMap>,
    flags: Arc<PlaybackFlags>,
}

impl Dispatcher {
    pub fn new(
        surface: Arc<dyn BrowserSurface>,
        session: Arc<WindowSession>,
        frames: Arc<FrameMap>,
        flags: Arc<PlaybackFlags>,
    ) -> Self {
        Self {
            surface,
            session,
            frames,
            flags,
        }
    }

    /// Send one command to the current playing frame and await its response.
    ///
    /// `top` pins the message to the tab's top frame regardless of the
    /// currently selected frame. A broken channel to a child frame is
    /// retried every 100 ms for up to five seconds; the top frame and
    /// `waitPreparation` never retry, since neither has a child frame that
    /// could still be attaching. Resolving benignly while playback is
    /// pausing keeps teardown from surfacing spurious step failures.
    pub async fn send(
        &self,
        command: &str,
        target: &str,
        value: &str,
        top: bool,
    ) -> Result<Value, ReplayError> {
        if command.starts_with(RESERVED_PREFIX) {
            debug!(target: "dispatch", command, "reserved namespace, acknowledged locally");
            return Ok(json!({ "result": "success" }));
        }

        let payload = json!({
            "command": command,
            "target": target,
            "value": value,
        });
        let started = Instant::now();

        loop {
            let tab = self.session.assert_alive()?;
            let frame = self.resolve_frame(tab, top)?;

            let outcome = match self.surface.send_to_frame(tab, frame, payload.clone()).await {
                // A vanished receiver answers with nothing at all; class it
                // with broken channels so the same recovery applies.
                Ok(Value::Null) => Err(ReplayError::channel_broken(format!(
                    "empty response from frame {frame} of tab {tab}"
                ))),
                Ok(response) => Ok(response),
                Err(err) => Err(ReplayError::from(err)),
            };

            let err = match outcome {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            if !err.is_channel_broken() || frame.is_top() || command == "waitPreparation" {
                return Err(err);
            }
            if self.flags.pausing() {
                debug!(target: "dispatch", command, "channel broken while pausing, resolving benignly");
                return Ok(Value::Null);
            }
            if started.elapsed() >= RETRY_BUDGET {
                warn!(target: "dispatch", command, %tab, %frame, "recovery budget exhausted");
                return Err(ReplayError::channel_broken(format!(
                    "frame {frame} of tab {tab} no longer exists"
                )));
            }
            sleep(RETRY_INTERVAL).await;
        }
    }

    /// Send a pre-built payload to the current frame, single attempt.
    /// Used by the debugging channel for its in-page preparation step.
    pub async fn send_payload(&self, payload: Value, top: bool) -> Result<Value, ReplayError> {
        let tab = self.session.assert_alive()?;
        let frame = self.resolve_frame(tab, top)?;
        match self.surface.send_to_frame(tab, frame, payload).await {
            Ok(Value::Null) => Err(ReplayError::channel_broken(format!(
                "empty response from frame {frame} of tab {tab}"
            ))),
            Ok(response) => Ok(response),
            Err(err) => Err(err.into()),
        }
    }

    fn resolve_frame(&self, tab: TabId, top: bool) -> Result<NativeFrameId, ReplayError> {
        if top {
            return Ok(NativeFrameId::TOP);
        }
        let path = self.session.current_frame();
        self.frames.frame_id(tab, &path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replaykit_core_types::{FramePath, WindowId};
    use replaykit_surface::stub::StubSurface;
    use replaykit_surface::SurfaceError;

    struct Fixture {
        surface: Arc<StubSurface>,
        session: Arc<WindowSession>,
        frames: Arc<FrameMap>,
        flags: Arc<PlaybackFlags>,
        dispatcher: Dispatcher,
        tab: TabId,
    }

    fn fixture() -> Fixture {
        let surface = Arc::new(StubSurface::new());
        let session = Arc::new(WindowSession::new("case-1"));
        let frames = Arc::new(FrameMap::new());
        let flags = Arc::new(PlaybackFlags::new());

        let tab = surface.add_tab(WindowId(1), "https://example.test/").id;
        session.set_current_window(WindowId(1));
        session.set_current_tab(tab);
        session.register_tab(tab, "root");
        frames.init_tab(tab);

        let dispatcher = Dispatcher::new(
            Arc::clone(&surface) as Arc<dyn BrowserSurface>,
            Arc::clone(&session),
            Arc::clone(&frames),
            Arc::clone(&flags),
        );
        Fixture {
            surface,
            session,
            frames,
            flags,
            dispatcher,
            tab,
        }
    }

    fn select_child_frame(fx: &Fixture) -> NativeFrameId {
        let path = FramePath::root().child(1);
        fx.frames.set_frame(fx.tab, path.clone(), NativeFrameId(7));
        fx.session.set_current_frame(path);
        NativeFrameId(7)
    }

    fn broken(tab: TabId, frame: NativeFrameId) -> Result<Value, SurfaceError> {
        Err(SurfaceError::ChannelBroken { tab, frame })
    }

    #[tokio::test]
    async fn reserved_namespace_is_acknowledged_without_sending() {
        let fx = fixture();
        let response = fx
            .dispatcher
            .send("webdriverAnswerOnVisiblePrompt", "", "ok", false)
            .await
            .unwrap();
        assert_eq!(response["result"], "success");
        assert!(fx.surface.sent().is_empty());
    }

    #[tokio::test]
    async fn sends_to_current_frame_and_returns_response() {
        let fx = fixture();
        let frame = select_child_frame(&fx);
        fx.surface.push_response(Ok(json!({ "result": "clicked" })));

        let response = fx
            .dispatcher
            .send("clickElement", "id=go", "", false)
            .await
            .unwrap();
        assert_eq!(response["result"], "clicked");

        let sent = fx.surface.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].frame, frame);
        assert_eq!(sent[0].payload["command"], "clickElement");
        assert_eq!(sent[0].payload["target"], "id=go");
    }

    #[tokio::test]
    async fn top_flag_pins_the_top_frame() {
        let fx = fixture();
        select_child_frame(&fx);
        fx.dispatcher
            .send("waitPreparation", "", "", true)
            .await
            .unwrap();
        assert_eq!(fx.surface.sent()[0].frame, NativeFrameId::TOP);
    }

    #[tokio::test(start_paused = true)]
    async fn broken_child_channel_retries_until_the_frame_answers() {
        let fx = fixture();
        let frame = select_child_frame(&fx);
        for _ in 0..3 {
            fx.surface.push_response(broken(fx.tab, frame));
        }
        let started = Instant::now();

        let response = fx
            .dispatcher
            .send("clickElement", "id=go", "", false)
            .await
            .unwrap();
        assert_eq!(response["result"], "success");
        assert_eq!(fx.surface.sent().len(), 4);
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_stops_exactly_at_the_budget() {
        let fx = fixture();
        let frame = select_child_frame(&fx);
        // first attempt at t=0, then one resend per 100ms tick up to t=5000
        for _ in 0..=50 {
            fx.surface.push_response(broken(fx.tab, frame));
        }
        let started = Instant::now();

        let err = fx
            .dispatcher
            .send("clickElement", "id=go", "", false)
            .await
            .unwrap_err();
        assert!(err.is_channel_broken());
        assert!(err.to_string().contains("no longer exists"));
        assert_eq!(fx.surface.sent().len(), 51);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_response_is_classed_as_broken_channel() {
        let fx = fixture();
        select_child_frame(&fx);
        fx.surface.push_response(Ok(Value::Null));
        fx.surface.push_response(Ok(json!({ "result": "success" })));

        let response = fx
            .dispatcher
            .send("clickElement", "id=go", "", false)
            .await
            .unwrap();
        assert_eq!(response["result"], "success");
        assert_eq!(fx.surface.sent().len(), 2);
    }

    #[tokio::test]
    async fn top_frame_failures_propagate_without_retry() {
        let fx = fixture();
        fx.surface.push_response(broken(fx.tab, NativeFrameId::TOP));
        let err = fx
            .dispatcher
            .send("clickElement", "id=go", "", false)
            .await
            .unwrap_err();
        assert!(err.is_channel_broken());
        assert_eq!(fx.surface.sent().len(), 1);
    }

    #[tokio::test]
    async fn wait_preparation_never_retries() {
        let fx = fixture();
        let frame = select_child_frame(&fx);
        fx.surface.push_response(broken(fx.tab, frame));
        let err = fx
            .dispatcher
            .send("waitPreparation", "", "", false)
            .await
            .unwrap_err();
        assert!(err.is_channel_broken());
        assert_eq!(fx.surface.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pausing_resolves_a_broken_channel_benignly() {
        let fx = fixture();
        let frame = select_child_frame(&fx);
        for _ in 0..10 {
            fx.surface.push_response(broken(fx.tab, frame));
        }
        let flags = Arc::clone(&fx.flags);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            flags.pause();
        });

        let response = fx
            .dispatcher
            .send("clickElement", "id=go", "", false)
            .await
            .unwrap();
        assert_eq!(response, Value::Null);
        assert!(fx.surface.sent().len() < 10);
    }

    #[tokio::test]
    async fn dead_session_fails_before_sending() {
        let fx = fixture();
        fx.session.invalidate_current_tab();
        let err = fx
            .dispatcher
            .send("clickElement", "id=go", "", false)
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::WindowNotSelected));
        assert!(fx.surface.sent().is_empty());
    }
}
