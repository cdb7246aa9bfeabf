//! Interactions that cannot be synthesized from inside the page: real
//! mouse movement, native Enter keystrokes and file-input injection.
//!
//! Each operation attaches a short-lived debug session to the playing tab,
//! performs its low-level commands and detaches again on every path,
//! success or failure. Operations that need the frame's document fall back
//! to the content-script path when the frame is unreachable over the debug
//! channel (cross-origin).

pub mod dom;

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::debug;

use replaykit_core_types::ReplayError;
use replaykit_dispatch::Dispatcher;
use replaykit_session::WindowSession;
use replaykit_surface::debug::{DebugConnector, DebugSession};

pub use dom::{frame_document, locator_to_css};

/// Marker within a typed value that requires a native Enter keystroke.
pub const ENTER_KEY_MARKER: &str = "${KEY_ENTER}";

/// Pause after a native Enter so a triggered submit can start before the
/// next command runs.
const ENTER_SETTLE: Duration = Duration::from_millis(500);

/// True when a typed value is a local file path and must go through
/// file-input injection instead of key synthesis.
pub fn is_file_path(value: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Za-z]:\\|\\\\|/)").unwrap()
    });
    pattern.is_match(value)
}

/// True when a typed value needs the debug channel for part of its input.
pub fn needs_native_typing(value: &str) -> bool {
    value.contains(ENTER_KEY_MARKER)
}

/// Debug-channel operations scoped to the current playing tab and frame.
pub struct DebugBridge {
    connector: Arc<dyn DebugConnector>,
    dispatcher: Arc<Dispatcher>,
    session: Arc<WindowSession>,
}

impl DebugBridge {
    pub fn new(
        connector: Arc<dyn DebugConnector>,
        dispatcher: Arc<Dispatcher>,
        session: Arc<WindowSession>,
    ) -> Self {
        Self {
            connector,
            dispatcher,
            session,
        }
    }

    /// Move the native cursor to the center of the located element.
    ///
    /// The element rectangle comes from the page itself; a missing element
    /// degrades to a reported payload rather than a failed step, since
    /// hover targets routinely disappear between record and replay.
    pub async fn mouse_over(&self, locator: &str) -> Result<Value, ReplayError> {
        let prepared = self
            .dispatcher
            .send_payload(
                json!({ "command": "prepareToInteract", "target": locator }),
                false,
            )
            .await?;
        let Some(rect) = prepared.get("rect").filter(|rect| rect.is_object()) else {
            debug!(target: "debug-bridge", locator, "no rectangle, skipping native hover");
            return Ok(json!({ "result": format!("Element {locator} not found") }));
        };

        let x = rect["x"].as_f64().unwrap_or(0.0) + rect["width"].as_f64().unwrap_or(0.0) / 2.0;
        let y = rect["y"].as_f64().unwrap_or(0.0) + rect["height"].as_f64().unwrap_or(0.0) / 2.0;

        let tab = self.session.assert_alive()?;
        let debugger = self.connector.attach(tab).await.map_err(ReplayError::from)?;
        let moved = debugger
            .command(
                "Input.dispatchMouseEvent",
                json!({ "type": "mouseMoved", "x": x, "y": y }),
            )
            .await;
        debugger.detach().await;
        moved.map_err(ReplayError::from)?;
        Ok(json!({ "result": "success" }))
    }

    /// Inject local file paths into the located file input. Multiple paths
    /// are separated by `;`.
    pub async fn upload_files(&self, locator: &str, value: &str) -> Result<Value, ReplayError> {
        let tab = self.session.assert_alive()?;
        let debugger = self.connector.attach(tab).await.map_err(ReplayError::from)?;
        let uploaded = self.upload_inner(debugger.as_ref(), locator, value).await;
        debugger.detach().await;
        match uploaded {
            Err(err) if err.is_frame_not_found() => Err(ReplayError::frame_not_found(
                "file input lives in a frame the debugging channel cannot reach (cross-origin)",
            )),
            other => other,
        }
    }

    async fn upload_inner(
        &self,
        debugger: &dyn DebugSession,
        locator: &str,
        value: &str,
    ) -> Result<Value, ReplayError> {
        let selector = locator_to_css(locator)?;
        let document = debugger.get_document().await.map_err(ReplayError::from)?;
        let frame_doc = frame_document(&document, &self.session.current_frame())?;
        let node = debugger
            .query_selector(&selector, frame_doc.node_id)
            .await
            .map_err(ReplayError::from)?;

        let files: Vec<&str> = value
            .split(';')
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .collect();
        debug!(target: "debug-bridge", locator, count = files.len(), "injecting file paths");
        debugger
            .command(
                "DOM.setFileInputFiles",
                json!({ "files": files, "nodeId": node.0 }),
            )
            .await
            .map_err(ReplayError::from)?;
        Ok(json!({ "result": "success" }))
    }

    /// Type a value containing [`ENTER_KEY_MARKER`] occurrences: text
    /// segments go through the content script, each marker becomes a native
    /// Enter keystroke on the focused element.
    ///
    /// When the frame is unreachable over the debug channel the whole value
    /// falls back to content-script typing, marker included.
    pub async fn type_with_enter(&self, locator: &str, value: &str) -> Result<Value, ReplayError> {
        let tab = self.session.assert_alive()?;
        let debugger = self.connector.attach(tab).await.map_err(ReplayError::from)?;
        let typed = self.type_inner(debugger.as_ref(), locator, value).await;
        debugger.detach().await;
        match typed {
            Err(err) if err.is_frame_not_found() => {
                debug!(target: "debug-bridge", locator, "frame unreachable, typing via content script");
                self.dispatcher.send("sendKeys", locator, value, false).await
            }
            other => other,
        }
    }

    async fn type_inner(
        &self,
        debugger: &dyn DebugSession,
        locator: &str,
        value: &str,
    ) -> Result<Value, ReplayError> {
        let selector = locator_to_css(locator)?;
        let document = debugger.get_document().await.map_err(ReplayError::from)?;
        let frame_doc = frame_document(&document, &self.session.current_frame())?;
        let node = debugger
            .query_selector(&selector, frame_doc.node_id)
            .await
            .map_err(ReplayError::from)?;

        let segments: Vec<&str> = value.split(ENTER_KEY_MARKER).collect();
        for (position, segment) in segments.iter().enumerate() {
            if !segment.is_empty() {
                self.dispatcher
                    .send("sendKeys", locator, segment, false)
                    .await?;
            }
            if position + 1 < segments.len() {
                debugger
                    .command("DOM.focus", json!({ "nodeId": node.0 }))
                    .await
                    .map_err(ReplayError::from)?;
                press_enter(debugger).await?;
                sleep(ENTER_SETTLE).await;
            }
        }
        Ok(json!({ "result": "success" }))
    }
}

async fn press_enter(debugger: &dyn DebugSession) -> Result<(), ReplayError> {
    debugger
        .command(
            "Input.dispatchKeyEvent",
            json!({ "type": "rawKeyDown", "windowsVirtualKeyCode": 13 }),
        )
        .await
        .map_err(ReplayError::from)?;
    debugger
        .command(
            "Input.dispatchKeyEvent",
            json!({ "type": "char", "text": "\r" }),
        )
        .await
        .map_err(ReplayError::from)?;
    debugger
        .command(
            "Input.dispatchKeyEvent",
            json!({ "type": "keyUp", "windowsVirtualKeyCode": 13 }),
        )
        .await
        .map_err(ReplayError::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use replaykit_core_types::{FramePath, NativeFrameId, TabId, WindowId};
    use replaykit_session::FrameMap;
    use replaykit_surface::debug::DocNode;
    use replaykit_surface::stub::{StubDebugConnector, StubDebugSession, StubSurface};
    use replaykit_surface::BrowserSurface;
    use replaykit_waits::PlaybackFlags;

    struct Fixture {
        surface: Arc<StubSurface>,
        session: Arc<WindowSession>,
        frames: Arc<FrameMap>,
        debug_session: Arc<StubDebugSession>,
        connector: Arc<StubDebugConnector>,
        bridge: DebugBridge,
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

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&surface) as Arc<dyn BrowserSurface>,
            Arc::clone(&session),
            Arc::clone(&frames),
            flags,
        ));
        let debug_session = Arc::new(StubDebugSession::new());
        let connector = Arc::new(StubDebugConnector::new(Arc::clone(&debug_session)));
        let bridge = DebugBridge::new(
            Arc::clone(&connector) as Arc<dyn DebugConnector>,
            dispatcher,
            Arc::clone(&session),
        );
        Fixture {
            surface,
            session,
            frames,
            debug_session,
            connector,
            bridge,
            tab,
        }
    }

    #[test]
    fn file_path_detection() {
        assert!(is_file_path("C:\\data\\avatar.png"));
        assert!(is_file_path("\\\\share\\avatar.png"));
        assert!(is_file_path("/home/user/avatar.png"));
        assert!(!is_file_path("hello world"));
        assert!(!is_file_path("price: 10/20"));
    }

    #[tokio::test]
    async fn mouse_over_dispatches_at_element_center() {
        let fx = fixture();
        fx.surface.push_response(Ok(json!({
            "rect": { "x": 10.0, "y": 20.0, "width": 40.0, "height": 10.0 }
        })));

        let response = fx.bridge.mouse_over("id=menu").await.unwrap();
        assert_eq!(response["result"], "success");

        let commands = fx.debug_session.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].0, "Input.dispatchMouseEvent");
        assert_eq!(commands[0].1["x"], 30.0);
        assert_eq!(commands[0].1["y"], 25.0);
        assert_eq!(fx.debug_session.detach_count(), 1);
    }

    #[tokio::test]
    async fn mouse_over_degrades_when_element_is_missing() {
        let fx = fixture();
        fx.surface.push_response(Ok(json!({ "result": "not here" })));

        let response = fx.bridge.mouse_over("id=gone").await.unwrap();
        assert_eq!(response["result"], "Element id=gone not found");
        assert_eq!(fx.connector.attach_count(), 0);
    }

    #[tokio::test]
    async fn upload_injects_files_into_the_located_input() {
        let fx = fixture();
        let document = DocNode::new(replaykit_core_types::NodeId(1), "#document");
        fx.debug_session.set_document(document);
        fx.debug_session.map_selector(
            "#file",
            replaykit_core_types::NodeId(1),
            replaykit_core_types::NodeId(9),
        );

        let response = fx
            .bridge
            .upload_files("id=file", "C:\\data\\a.txt; C:\\data\\b.txt")
            .await
            .unwrap();
        assert_eq!(response["result"], "success");

        let commands = fx.debug_session.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].0, "DOM.setFileInputFiles");
        assert_eq!(
            commands[0].1["files"],
            json!(["C:\\data\\a.txt", "C:\\data\\b.txt"])
        );
        assert_eq!(commands[0].1["nodeId"], 9);
        assert_eq!(fx.debug_session.detach_count(), 1);
    }

    #[tokio::test]
    async fn upload_into_cross_origin_frame_reports_frame_not_found() {
        let fx = fixture();
        let mut document = DocNode::new(replaykit_core_types::NodeId(1), "#document");
        let unreachable = DocNode::new(replaykit_core_types::NodeId(3), "IFRAME");
        document.children.push(unreachable);
        fx.debug_session.set_document(document);
        fx.session.set_current_frame(FramePath::root().child(0));

        let err = fx
            .bridge
            .upload_files("id=file", "/tmp/a.txt")
            .await
            .unwrap_err();
        assert!(err.is_frame_not_found());
        assert!(err.to_string().contains("cross-origin"));
        // detached despite the failure
        assert_eq!(fx.debug_session.detach_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn typing_with_enter_mixes_content_and_native_input() {
        let fx = fixture();
        let document = DocNode::new(replaykit_core_types::NodeId(1), "#document");
        fx.debug_session.set_document(document);
        fx.debug_session.map_selector(
            "#q",
            replaykit_core_types::NodeId(1),
            replaykit_core_types::NodeId(5),
        );

        let response = fx
            .bridge
            .type_with_enter("id=q", "rust${KEY_ENTER}")
            .await
            .unwrap();
        assert_eq!(response["result"], "success");

        // the text segment went through the content script
        let sent = fx.surface.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload["command"], "sendKeys");
        assert_eq!(sent[0].payload["value"], "rust");
        assert_eq!(sent[0].frame, NativeFrameId::TOP);

        // focus plus the three-part native keystroke
        let commands = fx.debug_session.commands();
        let names: Vec<&str> = commands.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "DOM.focus",
                "Input.dispatchKeyEvent",
                "Input.dispatchKeyEvent",
                "Input.dispatchKeyEvent"
            ]
        );
        assert_eq!(commands[1].1["windowsVirtualKeyCode"], 13);
        assert_eq!(commands[2].1["text"], "\r");
        assert_eq!(fx.debug_session.detach_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn typing_falls_back_to_content_script_when_frame_is_unreachable() {
        let fx = fixture();
        // debug channel sees no frame element at the selected path, but the
        // content-script channel knows the frame
        let document = DocNode::new(replaykit_core_types::NodeId(1), "#document");
        fx.debug_session.set_document(document);
        let path = FramePath::root().child(0);
        fx.frames.set_frame(fx.tab, path.clone(), NativeFrameId(6));
        fx.session.set_current_frame(path);

        let response = fx
            .bridge
            .type_with_enter("id=q", "rust${KEY_ENTER}")
            .await
            .unwrap();
        assert_eq!(response["result"], "success");

        // the full value, marker included, went through the content script
        let sent = fx.surface.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload["value"], "rust${KEY_ENTER}");
        assert_eq!(sent[0].frame, NativeFrameId(6));
        assert_eq!(fx.debug_session.detach_count(), 1);
    }
}
