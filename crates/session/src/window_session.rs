use std::collections::HashMap;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use replaykit_core_types::{FramePath, ReplayError, SessionHandle, TabId, WindowId};

/// Declared expectation that the next adopted tab belongs to a command that
/// opens a new window. Cleared when that tab registers itself.
#[derive(Clone, Debug)]
pub struct PendingWindow {
    pub name: String,
    pub timeout: Duration,
}

#[derive(Debug, Default)]
struct TargetState {
    window: Option<WindowId>,
    tab: Option<TabId>,
    frame: FramePath,
    opened_tabs: HashMap<TabId, String>,
    serial: u64,
}

/// Current playback target and opened-tab registry, keyed by session handle.
///
/// Resolution rule: the run-specific handle is used once it has a current
/// window recorded, otherwise state falls back to the shared general-use
/// handle, so ad-hoc executions share one playback window while suite runs
/// get isolated ones.
pub struct WindowSession {
    run: String,
    targets: DashMap<SessionHandle, TargetState>,
    pending_window: Mutex<Option<PendingWindow>>,
}

impl WindowSession {
    pub fn new(run: impl Into<String>) -> Self {
        Self {
            run: run.into(),
            targets: DashMap::new(),
            pending_window: Mutex::new(None),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run
    }

    /// The handle all current-target reads and writes resolve through.
    pub fn handle(&self) -> SessionHandle {
        let run = SessionHandle::run(self.run.clone());
        let has_window = self
            .targets
            .get(&run)
            .map(|state| state.window.is_some())
            .unwrap_or(false);
        if has_window {
            run
        } else {
            SessionHandle::GeneralUse
        }
    }

    pub fn current_window(&self) -> Option<WindowId> {
        self.targets.get(&self.handle()).and_then(|s| s.window)
    }

    pub fn set_current_window(&self, window: WindowId) {
        self.targets.entry(self.handle()).or_default().window = Some(window);
    }

    pub fn current_tab(&self) -> Option<TabId> {
        self.targets.get(&self.handle()).and_then(|s| s.tab)
    }

    pub fn set_current_tab(&self, tab: TabId) {
        self.targets.entry(self.handle()).or_default().tab = Some(tab);
    }

    /// Marks the current tab invalid after an explicit close; every
    /// subsequent command fails fast until a new window is selected.
    pub fn invalidate_current_tab(&self) {
        self.targets.entry(self.handle()).or_default().tab = None;
    }

    pub fn current_frame(&self) -> FramePath {
        self.targets
            .get(&self.handle())
            .map(|s| s.frame.clone())
            .unwrap_or_default()
    }

    pub fn set_current_frame(&self, frame: FramePath) {
        self.targets.entry(self.handle()).or_default().frame = frame;
    }

    /// Window recorded for an isolated run, if any (used to re-attach).
    pub fn window_for_run(&self, run: &str) -> Option<WindowId> {
        self.targets
            .get(&SessionHandle::run(run))
            .and_then(|s| s.window)
    }

    /// The shared general-use playback window, if one was ever created.
    pub fn general_window(&self) -> Option<WindowId> {
        self.targets
            .get(&SessionHandle::GeneralUse)
            .and_then(|s| s.window)
    }

    pub fn is_alive(&self) -> bool {
        self.current_tab().is_some()
    }

    /// Fail-fast check run before every command.
    pub fn assert_alive(&self) -> Result<TabId, ReplayError> {
        match self.current_tab() {
            Some(tab) => Ok(tab),
            None => {
                if self.has_opened_tabs() {
                    Err(ReplayError::WindowNotSelected)
                } else {
                    Err(ReplayError::SessionClosed)
                }
            }
        }
    }

    pub fn register_tab(&self, tab: TabId, label: impl Into<String>) {
        let label = label.into();
        debug!(target: "window-session", %tab, %label, "tab adopted");
        self.targets
            .entry(self.handle())
            .or_default()
            .opened_tabs
            .insert(tab, label);
    }

    pub fn tab_registered(&self, tab: TabId) -> bool {
        self.targets
            .get(&self.handle())
            .map(|s| s.opened_tabs.contains_key(&tab))
            .unwrap_or(false)
    }

    pub fn tab_label(&self, tab: TabId) -> Option<String> {
        self.targets
            .get(&self.handle())
            .and_then(|s| s.opened_tabs.get(&tab).cloned())
    }

    pub fn remove_tab(&self, tab: TabId) {
        if let Some(mut state) = self.targets.get_mut(&self.handle()) {
            state.opened_tabs.remove(&tab);
        }
    }

    pub fn has_opened_tabs(&self) -> bool {
        self.targets
            .get(&self.handle())
            .map(|s| !s.opened_tabs.is_empty())
            .unwrap_or(false)
    }

    /// Tabs other than the given one, oldest first (secondary-tab cleanup).
    pub fn secondary_tabs(&self, keep: TabId) -> Vec<TabId> {
        let mut tabs: Vec<TabId> = self
            .targets
            .get(&self.handle())
            .map(|s| {
                s.opened_tabs
                    .keys()
                    .copied()
                    .filter(|id| *id != keep)
                    .collect()
            })
            .unwrap_or_default();
        tabs.sort_by_key(|tab| tab.0);
        tabs
    }

    /// Next auto-generated window handle label, `win_ser_0` onwards.
    pub fn next_serial_label(&self) -> String {
        let mut state = self.targets.entry(self.handle()).or_default();
        let label = format!("win_ser_{}", state.serial);
        state.serial += 1;
        label
    }

    pub fn set_pending_window(&self, name: impl Into<String>, timeout: Duration) {
        *self.pending_window.lock() = Some(PendingWindow {
            name: name.into(),
            timeout,
        });
    }

    /// Claims the pending expectation, if any; the claimer labels the new
    /// tab and stores the handle variable.
    pub fn claim_pending_window(&self) -> Option<PendingWindow> {
        self.pending_window.lock().take()
    }

    pub fn pending_window(&self) -> Option<PendingWindow> {
        self.pending_window.lock().clone()
    }

    pub fn clear_pending_window(&self) {
        *self.pending_window.lock() = None;
    }
}
