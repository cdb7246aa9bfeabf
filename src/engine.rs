//! The playback engine facade: per-command entry points, playback window
//! acquisition and the pre/post-command hooks the controller drives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, info};
use url::Url;

use replaykit_core_types::{FramePath, ReplayError, TabId, WindowId};
use replaykit_debug_bridge::{is_file_path, needs_native_typing, DebugBridge};
use replaykit_dispatch::Dispatcher;
use replaykit_session::{FrameMap, VariableStore, WindowSession};
use replaykit_surface::debug::DebugConnector;
use replaykit_surface::{BrowserSurface, TabInfo, TabPatch, TabQuery, TabStatus, WindowPatch};
use replaykit_waits::{conditions, PlaybackFlags};

use crate::host::PlaybackHost;
use crate::lifecycle::{ListenerContext, Listeners};

/// Built-in command names handled by the engine itself; everything else is
/// forwarded to the content script.
const EXT_COMMANDS: [&str; 12] = [
    "pause",
    "debugger",
    "echo",
    "run",
    "setSpeed",
    "store",
    "open",
    "selectFrame",
    "selectWindow",
    "setWindowSize",
    "close",
    "storeWindowHandle",
];

/// Marker inside a `run` argument that disables assertions in the sub-test.
const DISABLE_ASSERTIONS_FLAG: &str = "--disable-assertions";

fn frame_locator_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^\s*(index|relative)\s*=\s*(.+?)\s*$").unwrap())
}

fn window_size_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d+)x(\d+)$").unwrap())
}

fn success() -> Value {
    json!({ "result": "success" })
}

/// Options for [`ReplayEngine::init`].
#[derive(Debug, Default)]
pub struct InitOptions {
    /// Keep the current window, tab and frame selection of a resumed run
    /// instead of re-acquiring a playback window.
    pub soft_init: bool,
    /// Variables seeded into the run's store before the first command.
    pub variables: Vec<(String, Value)>,
}

/// Declared by the controller before a command known to open a new window.
#[derive(Clone, Debug)]
pub struct NewWindowExpectation {
    /// Variable name the adopted tab's handle is stored under.
    pub name: String,
    /// Caller-chosen bound on how long the window may take to appear.
    pub timeout: Duration,
}

/// One playback run's command-execution engine.
///
/// The controller calls [`ReplayEngine::init`] once, then one command entry
/// point at a time, wrapped in [`ReplayEngine::before_command`] and
/// [`ReplayEngine::after_command`], and finally [`ReplayEngine::cleanup`].
pub struct ReplayEngine {
    surface: Arc<dyn BrowserSurface>,
    host: Arc<dyn PlaybackHost>,
    session: Arc<WindowSession>,
    frames: Arc<FrameMap>,
    variables: Arc<VariableStore>,
    flags: Arc<PlaybackFlags>,
    dispatcher: Arc<Dispatcher>,
    bridge: DebugBridge,
    listeners: Listeners,
    base_url: Mutex<Option<Url>>,
    attaching: Arc<AtomicBool>,
}

impl ReplayEngine {
    pub fn new(
        run_id: impl Into<String>,
        surface: Arc<dyn BrowserSurface>,
        connector: Arc<dyn DebugConnector>,
        host: Arc<dyn PlaybackHost>,
    ) -> Self {
        let session = Arc::new(WindowSession::new(run_id));
        let frames = Arc::new(FrameMap::new());
        let flags = Arc::new(PlaybackFlags::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&surface),
            Arc::clone(&session),
            Arc::clone(&frames),
            Arc::clone(&flags),
        ));
        let bridge = DebugBridge::new(connector, Arc::clone(&dispatcher), Arc::clone(&session));
        Self {
            surface,
            host,
            session,
            frames,
            variables: Arc::new(VariableStore::new()),
            flags,
            dispatcher,
            bridge,
            listeners: Listeners::new(),
            base_url: Mutex::new(None),
            attaching: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Prepare the run: record the base URL, seed variables, attach the
    /// lifecycle listeners and acquire a playback window. A soft init keeps
    /// the selection of a resumed run untouched.
    pub async fn init(&self, base_url: &str, options: InitOptions) -> Result<(), ReplayError> {
        if base_url.is_empty() {
            *self.base_url.lock() = None;
        } else {
            let parsed = Url::parse(base_url).map_err(|err| {
                ReplayError::validation(format!("invalid base url {base_url}: {err}"))
            })?;
            *self.base_url.lock() = Some(parsed);
        }
        for (name, value) in options.variables {
            self.variables.set(name, value);
        }

        self.listeners.attach(ListenerContext {
            surface: Arc::clone(&self.surface),
            session: Arc::clone(&self.session),
            frames: Arc::clone(&self.frames),
            variables: Arc::clone(&self.variables),
            host: Arc::clone(&self.host),
            attaching: Arc::clone(&self.attaching),
        });
        self.flags.resume();

        if options.soft_init && self.session.is_alive() {
            debug!(target: "engine", "soft init, keeping current selection");
            return Ok(());
        }
        self.session.set_current_frame(FramePath::root());
        self.acquire_playback_window().await
    }

    /// Tear the run down: stop in-flight waits, drop expectations and
    /// detach the listeners. Idempotent.
    pub fn cleanup(&self) {
        self.flags.stop();
        self.session.clear_pending_window();
        self.listeners.detach();
        info!(target: "engine", run = self.session.run_id(), "playback cleaned up");
    }

    /// Whether a command name is handled by this engine rather than the
    /// content script.
    pub fn is_ext_command(&self, command: &str) -> bool {
        EXT_COMMANDS.contains(&command)
    }

    /// Declare that the next command opens a new window; the adopted tab
    /// will be labeled with the expectation's variable name.
    pub fn before_command(&self, expectation: Option<NewWindowExpectation>) {
        if let Some(expectation) = expectation {
            self.session
                .set_pending_window(expectation.name, expectation.timeout);
        }
    }

    /// Wait for a declared new window to appear, bounded by the
    /// expectation's own timeout. No-op without a pending expectation.
    pub async fn after_command(&self) -> Result<(), ReplayError> {
        if self.session.pending_window().is_none() {
            return Ok(());
        }
        let waited = conditions::new_window(&self.session, &self.flags.cancel_token()).await;
        self.session.clear_pending_window();
        waited.map(|_| ())
    }

    /// Execute one command by name. Unknown names are forwarded to the
    /// content script in the current frame.
    pub async fn execute(
        &self,
        command: &str,
        target: &str,
        value: &str,
    ) -> Result<Value, ReplayError> {
        match command {
            "open" => self.open(target).await,
            "pause" => self.pause(target).await,
            "echo" => self.echo(target).await,
            "debugger" => self.debugger().await,
            "selectFrame" => self.select_frame(target).await,
            "selectWindow" => self.select_window(target).await,
            "setWindowSize" => self.set_window_size(target).await,
            "setSpeed" => self.set_speed(target).await,
            "store" => self.store(target, value).await,
            "storeWindowHandle" => self.store_window_handle(target).await,
            "close" => self.close().await,
            "run" => self.run(target, value).await,
            "mouseOver" => self.mouse_over(target).await,
            "type" => self.type_text(target, value).await,
            "sendKeys" => self.send_keys(target, value).await,
            _ => self.dispatcher.send(command, target, value, false).await,
        }
    }

    /// Navigate the current tab, resolving `url` against the run's base URL.
    pub async fn open(&self, url: &str) -> Result<Value, ReplayError> {
        let resolved = self.resolve_url(url)?;
        let tab = self.session.assert_alive()?;
        let info = self
            .surface
            .update_tab(
                tab,
                TabPatch {
                    url: Some(resolved.clone()),
                    active: None,
                },
            )
            .await?;
        // the status event may have fired before the listener could observe
        // it, so take the surface's own word for an in-flight navigation
        if info.status == TabStatus::Loading {
            self.frames.mark_loading(tab);
        }
        info!(target: "engine", %tab, url = %resolved, "navigated");
        Ok(success())
    }

    /// Wait until the current tab's navigation has completed.
    pub async fn wait_for_page_to_load(&self) -> Result<(), ReplayError> {
        let tab = self.session.assert_alive()?;
        conditions::tab_ready(&self.frames, tab, &self.flags.cancel_token())
            .await
            .map(|_| ())
    }

    pub async fn pause(&self, duration: &str) -> Result<Value, ReplayError> {
        let ms: u64 = duration.trim().parse().map_err(|_| {
            ReplayError::validation(format!("invalid pause duration: {duration}"))
        })?;
        let cancel = self.flags.cancel_token();
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
        }
        Ok(success())
    }

    pub async fn echo(&self, message: &str) -> Result<Value, ReplayError> {
        self.host.echo(message).await;
        Ok(success())
    }

    pub async fn debugger(&self) -> Result<Value, ReplayError> {
        self.host.break_point().await;
        Ok(success())
    }

    /// Change the current frame selection: `index=N` descends one child,
    /// `relative=parent` and `relative=top` ascend. Blocks until the chosen
    /// frame has announced itself.
    pub async fn select_frame(&self, locator: &str) -> Result<Value, ReplayError> {
        let tab = self.session.assert_alive()?;
        let captures = frame_locator_pattern().captures(locator).ok_or_else(|| {
            ReplayError::validation(format!(
                "invalid frame locator {locator}: expected index=N, relative=parent or relative=top"
            ))
        })?;
        let strategy = captures[1].to_ascii_lowercase();
        let argument = &captures[2];

        let current = self.session.current_frame();
        let next = match strategy.as_str() {
            "relative" => match argument.to_ascii_lowercase().as_str() {
                "top" => current.top(),
                "parent" => current.parent(),
                other => {
                    return Err(ReplayError::validation(format!(
                        "invalid relative frame target: {other}"
                    )))
                }
            },
            _ => {
                let index: usize = argument.parse().map_err(|_| {
                    ReplayError::validation(format!("invalid frame index: {argument}"))
                })?;
                current.child(index)
            }
        };

        debug!(target: "engine", from = %current, to = %next, "frame selected");
        self.session.set_current_frame(next.clone());
        conditions::frame_registered(&self.frames, tab, &next, &self.flags.cancel_token())
            .await
            .map(|_| success())
    }

    /// Switch to a previously adopted tab via a `handle=<tabId>` locator.
    pub async fn select_window(&self, locator: &str) -> Result<Value, ReplayError> {
        let handle = locator.strip_prefix("handle=").ok_or_else(|| {
            ReplayError::validation(format!("no such window locator: {locator}"))
        })?;
        let tab = handle
            .trim()
            .parse::<i64>()
            .map(TabId)
            .map_err(|_| ReplayError::validation(format!("no such window: {handle}")))?;
        if !self.session.tab_registered(tab) {
            return Err(ReplayError::validation(format!("no such window: {handle}")));
        }

        let info = self.surface.get_tab(tab).await?;
        self.surface
            .update_tab(
                tab,
                TabPatch {
                    url: None,
                    active: Some(true),
                },
            )
            .await?;
        self.surface
            .update_window(
                info.window_id,
                WindowPatch {
                    focused: Some(true),
                    ..WindowPatch::default()
                },
            )
            .await?;
        self.session.set_current_window(info.window_id);
        self.session.set_current_tab(tab);
        self.session.set_current_frame(FramePath::root());
        Ok(success())
    }

    /// Resize the current window. Only the strict `WxH` form is accepted.
    pub async fn set_window_size(&self, size: &str) -> Result<Value, ReplayError> {
        let captures = window_size_pattern().captures(size).ok_or_else(|| {
            ReplayError::validation(format!(
                "invalid resolution: {size} (expected WxH, e.g. 1280x800)"
            ))
        })?;
        let width: u32 = captures[1]
            .parse()
            .map_err(|_| ReplayError::validation(format!("window width out of range: {size}")))?;
        let height: u32 = captures[2]
            .parse()
            .map_err(|_| ReplayError::validation(format!("window height out of range: {size}")))?;

        let window = self.current_window().await?;
        self.surface
            .update_window(
                window,
                WindowPatch {
                    focused: None,
                    width: Some(width),
                    height: Some(height),
                },
            )
            .await?;
        Ok(success())
    }

    /// Set the inter-command delay, clamped silently to the allowed range.
    pub async fn set_speed(&self, delay: &str) -> Result<Value, ReplayError> {
        let ms: i64 = delay
            .trim()
            .parse()
            .map_err(|_| ReplayError::validation(format!("invalid speed value: {delay}")))?;
        self.flags.set_delay(ms);
        self.host.speed_changed(self.flags.delay_ms()).await;
        Ok(success())
    }

    pub async fn store(&self, value: &str, name: &str) -> Result<Value, ReplayError> {
        if name.is_empty() {
            return Err(ReplayError::validation("store requires a variable name"));
        }
        self.variables.set(name.to_string(), json!(value));
        Ok(success())
    }

    /// Name the current tab so later `handle=` locators can address it.
    pub async fn store_window_handle(&self, name: &str) -> Result<Value, ReplayError> {
        if name.is_empty() {
            return Err(ReplayError::validation(
                "storeWindowHandle requires a variable name",
            ));
        }
        let tab = self.session.assert_alive()?;
        self.session.register_tab(tab, name);
        self.variables.set(name.to_string(), json!(tab.0));
        Ok(success())
    }

    /// Close the current tab and invalidate the selection; every following
    /// command fails fast until a new window is selected.
    pub async fn close(&self) -> Result<Value, ReplayError> {
        let tab = self.session.assert_alive()?;
        self.session.remove_tab(tab);
        self.frames.remove_tab(tab);
        self.surface.remove_tab(tab).await?;
        self.session.invalidate_current_tab();
        info!(target: "engine", %tab, "tab closed");
        Ok(success())
    }

    /// Delegate to another test case.
    pub async fn run(&self, test_case: &str, flags: &str) -> Result<Value, ReplayError> {
        let assertions_disabled = flags.contains(DISABLE_ASSERTIONS_FLAG);
        self.host.call_test_case(test_case, assertions_disabled).await
    }

    pub async fn mouse_over(&self, locator: &str) -> Result<Value, ReplayError> {
        self.bridge.mouse_over(locator).await
    }

    /// Type into the located element; local file paths go through
    /// file-input injection instead of key events.
    pub async fn type_text(&self, locator: &str, value: &str) -> Result<Value, ReplayError> {
        if is_file_path(value) {
            self.bridge.upload_files(locator, value).await
        } else {
            self.dispatcher.send("type", locator, value, false).await
        }
    }

    /// Send key events to the located element; embedded Enter markers are
    /// synthesized natively.
    pub async fn send_keys(&self, locator: &str, value: &str) -> Result<Value, ReplayError> {
        if needs_native_typing(value) {
            self.bridge.type_with_enter(locator, value).await
        } else {
            self.dispatcher.send("sendKeys", locator, value, false).await
        }
    }

    pub fn session(&self) -> &Arc<WindowSession> {
        &self.session
    }

    pub fn frames(&self) -> &Arc<FrameMap> {
        &self.frames
    }

    pub fn variables(&self) -> &Arc<VariableStore> {
        &self.variables
    }

    pub fn flags(&self) -> &Arc<PlaybackFlags> {
        &self.flags
    }

    fn resolve_url(&self, url: &str) -> Result<String, ReplayError> {
        let base = self.base_url.lock();
        let resolved = match base.as_ref() {
            Some(base) => base.join(url).map_err(|err| {
                ReplayError::validation(format!("cannot resolve {url} against {base}: {err}"))
            })?,
            None => Url::parse(url)
                .map_err(|err| ReplayError::validation(format!("invalid url {url}: {err}")))?,
        };
        Ok(resolved.to_string())
    }

    async fn current_window(&self) -> Result<WindowId, ReplayError> {
        let tab = self.session.assert_alive()?;
        match self.session.current_window() {
            Some(window) => Ok(window),
            None => Ok(self.surface.get_tab(tab).await?.window_id),
        }
    }

    /// Re-attach to this run's recorded window, else reuse the shared
    /// general-use window, else create a fresh one. Secondary tabs left
    /// over from a previous run are closed.
    async fn acquire_playback_window(&self) -> Result<(), ReplayError> {
        self.attaching.store(true, Ordering::SeqCst);
        let acquired = self.acquire_inner().await;
        self.attaching.store(false, Ordering::SeqCst);
        acquired
    }

    async fn acquire_inner(&self) -> Result<(), ReplayError> {
        let run_window = self.session.window_for_run(self.session.run_id());
        for window in [run_window, self.session.general_window()].into_iter().flatten() {
            if self.attach_to_window(window).await? {
                self.close_secondary_tabs().await;
                return Ok(());
            }
        }
        self.create_playback_window().await
    }

    /// Select the active (else first) tab of an existing window. Returns
    /// false when the window has no tabs left to attach to.
    async fn attach_to_window(&self, window: WindowId) -> Result<bool, ReplayError> {
        let tabs = self
            .surface
            .query_tabs(TabQuery {
                window: Some(window),
                active: None,
            })
            .await?;
        let Some(tab) = tabs.first() else {
            debug!(target: "engine", %window, "recorded window has no tabs");
            return Ok(false);
        };
        self.set_first_tab(tab);
        Ok(true)
    }

    async fn create_playback_window(&self) -> Result<(), ReplayError> {
        let start_url = self
            .base_url
            .lock()
            .as_ref()
            .map(|url| url.to_string())
            .unwrap_or_else(|| "about:blank".to_string());
        let window = self.surface.create_window(&start_url).await?;
        let tab = window.tabs.first().ok_or_else(|| {
            ReplayError::validation(format!("window {} created without a tab", window.id))
        })?;
        self.set_first_tab(tab);
        Ok(())
    }

    /// Adopt a tab as the run's primary tab, labeled `root`.
    fn set_first_tab(&self, tab: &TabInfo) {
        self.session.set_current_window(tab.window_id);
        self.session.set_current_tab(tab.id);
        self.session.set_current_frame(FramePath::root());
        self.session.register_tab(tab.id, FramePath::ROOT_SEGMENT);
        self.frames.init_tab(tab.id);
        match tab.status {
            TabStatus::Complete => self.frames.mark_complete(tab.id),
            TabStatus::Loading => self.frames.mark_loading(tab.id),
        }
        info!(target: "engine", window = %tab.window_id, tab = %tab.id, "playback window acquired");
    }

    async fn close_secondary_tabs(&self) {
        let Some(keep) = self.session.current_tab() else {
            return;
        };
        for tab in self.session.secondary_tabs(keep) {
            self.session.remove_tab(tab);
            self.frames.remove_tab(tab);
            if let Err(err) = self.surface.remove_tab(tab).await {
                debug!(target: "engine", %tab, %err, "secondary tab already gone");
            }
        }
    }
}
