//! Lifecycle listener task: the only writer of session and frame state
//! outside direct command execution.
//!
//! One task per playback run consumes the surface's single-consumer event
//! stream and applies each event as an atomic, single-step state update, so
//! a navigation event landing mid-dispatch can never tear state a retry is
//! reading.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use replaykit_session::{FrameMap, VariableStore, WindowSession};
use replaykit_surface::{BrowserSurface, LogLevel, SurfaceEvent, TabStatus};

use crate::host::PlaybackHost;

/// Shared state the listener task mutates on behalf of the engine.
pub(crate) struct ListenerContext {
    pub surface: Arc<dyn BrowserSurface>,
    pub session: Arc<WindowSession>,
    pub frames: Arc<FrameMap>,
    pub variables: Arc<VariableStore>,
    pub host: Arc<dyn PlaybackHost>,
    /// Set while the engine is acquiring or cleaning up windows; tab
    /// removals observed in that phase are deliberate, not failures.
    pub attaching: Arc<AtomicBool>,
}

/// Flag-guarded attach/detach for the listener task. Attaching twice or
/// detaching without an attach are no-ops.
pub struct Listeners {
    attached: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self {
            attached: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Relaxed)
    }

    pub(crate) fn attach(&self, ctx: ListenerContext) {
        if self.attached.swap(true, Ordering::SeqCst) {
            debug!(target: "lifecycle", "listeners already attached");
            return;
        }
        let handle = tokio::spawn(run_loop(ctx));
        *self.task.lock() = Some(handle);
    }

    pub fn detach(&self) {
        if !self.attached.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        debug!(target: "lifecycle", "listeners detached");
    }
}

impl Default for Listeners {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Listeners {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

/// Suppresses a forwarded log line when it repeats the most recent one.
struct LogDedup(Option<String>);

impl LogDedup {
    fn new() -> Self {
        Self(None)
    }

    fn should_log(&mut self, message: &str) -> bool {
        if self.0.as_deref() == Some(message) {
            return false;
        }
        self.0 = Some(message.to_string());
        true
    }
}

async fn run_loop(ctx: ListenerContext) {
    let mut last_log = LogDedup::new();
    while let Some(event) = ctx.surface.next_event().await {
        handle_event(&ctx, event, &mut last_log).await;
    }
    debug!(target: "lifecycle", "event stream closed");
}

async fn handle_event(ctx: &ListenerContext, event: SurfaceEvent, last_log: &mut LogDedup) {
    match event {
        SurfaceEvent::TabStatusChanged { tab, status } => match status {
            TabStatus::Loading => ctx.frames.mark_loading(tab),
            TabStatus::Complete => ctx.frames.mark_complete(tab),
        },
        SurfaceEvent::TabRemoved { tab } => {
            if !ctx.session.tab_registered(tab) {
                return;
            }
            ctx.session.remove_tab(tab);
            ctx.frames.remove_tab(tab);
            if ctx.attaching.load(Ordering::Relaxed) {
                debug!(target: "lifecycle", %tab, "tab removed during window setup");
                return;
            }
            if ctx.session.current_tab() == Some(tab) {
                ctx.session.invalidate_current_tab();
            }
            ctx.host.abort("Playing window was closed prematurely").await;
        }
        SurfaceEvent::NavigationTargetCreated { source, tab } => {
            if !ctx.session.tab_registered(source) {
                return;
            }
            let label = match ctx.session.claim_pending_window() {
                Some(pending) => {
                    // the handle variable resolves handle locators later
                    ctx.variables.set(pending.name.clone(), json!(tab.0));
                    pending.name
                }
                None => ctx.session.next_serial_label(),
            };
            info!(target: "lifecycle", %source, %tab, %label, "new tab adopted");
            ctx.session.register_tab(tab, label);
            ctx.frames.init_tab(tab);
        }
        SurfaceEvent::FrameAnnounced {
            tab,
            frame,
            path,
            ack,
        } => {
            ctx.frames.set_frame(tab, path, frame);
            if let Some(ack) = ack {
                let _ = ack.send(true);
            }
        }
        SurfaceEvent::VariableRequested { name, reply } => {
            let _ = reply.send(ctx.variables.get(&name));
        }
        SurfaceEvent::VariableStored { name, value } => {
            ctx.variables.set(name, value);
        }
        SurfaceEvent::LogForwarded { level, message } => {
            if !last_log.should_log(&message) {
                return;
            }
            match level {
                LogLevel::Info => info!(target: "content", "{message}"),
                LogLevel::Warn => warn!(target: "content", "{message}"),
                LogLevel::Error => error!(target: "content", "{message}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_lines_are_suppressed_until_interrupted() {
        let mut dedup = LogDedup::new();
        assert!(dedup.should_log("loading"));
        assert!(!dedup.should_log("loading"));
        assert!(dedup.should_log("done"));
        assert!(dedup.should_log("loading"));
    }

    #[test]
    fn detach_without_attach_is_a_no_op() {
        let listeners = Listeners::new();
        assert!(!listeners.is_attached());
        listeners.detach();
        assert!(!listeners.is_attached());
    }
}
