//! Deterministic in-memory backends for tests and the demo binary.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use replaykit_core_types::{NativeFrameId, NodeId, TabId, WindowId};

use crate::debug::{DebugConnector, DebugSession, DocNode};
use crate::{
    BrowserSurface, SurfaceError, SurfaceEvent, TabInfo, TabPatch, TabQuery, TabStatus,
    WindowInfo, WindowPatch,
};

/// Record of one frame-targeted message sent through the stub.
#[derive(Clone, Debug)]
pub struct SentMessage {
    pub tab: TabId,
    pub frame: NativeFrameId,
    pub payload: Value,
}

/// In-memory [`BrowserSurface`]. Tests drive lifecycle events explicitly via
/// [`StubSurface::emit`] and script frame responses via
/// [`StubSurface::push_response`]; an empty response queue answers
/// `{"result": "success"}`.
pub struct StubSurface {
    tabs: DashMap<TabId, TabInfo>,
    windows: DashMap<WindowId, Vec<TabId>>,
    next_tab: AtomicI64,
    next_window: AtomicI64,
    events_tx: mpsc::Sender<SurfaceEvent>,
    events_rx: tokio::sync::Mutex<mpsc::Receiver<SurfaceEvent>>,
    responses: Mutex<VecDeque<Result<Value, SurfaceError>>>,
    sent: Mutex<Vec<SentMessage>>,
    window_patches: Mutex<Vec<(WindowId, WindowPatch)>>,
    /// When set, `update_tab` with a url reports the navigation as still
    /// in flight (`Loading`), covering the proactive not-ready race in
    /// `open`.
    navigation_pending: AtomicBool,
}

impl StubSurface {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        Self {
            tabs: DashMap::new(),
            windows: DashMap::new(),
            next_tab: AtomicI64::new(1),
            next_window: AtomicI64::new(1),
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
            responses: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            window_patches: Mutex::new(Vec::new()),
            navigation_pending: AtomicBool::new(false),
        }
    }

    pub fn set_navigation_pending(&self, pending: bool) {
        self.navigation_pending.store(pending, Ordering::Relaxed);
    }

    pub async fn emit(&self, event: SurfaceEvent) {
        if self.events_tx.send(event).await.is_err() {
            debug!(target: "stub-surface", "event receiver dropped");
        }
    }

    pub fn push_response(&self, response: Result<Value, SurfaceError>) {
        self.responses.lock().push_back(response);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    pub fn window_patches(&self) -> Vec<(WindowId, WindowPatch)> {
        self.window_patches.lock().clone()
    }

    /// Create a tab inside an existing window without going through
    /// `create_window`, for tests exercising adoption of opened tabs.
    pub fn add_tab(&self, window: WindowId, url: &str) -> TabInfo {
        let id = TabId(self.next_tab.fetch_add(1, Ordering::Relaxed));
        let info = TabInfo {
            id,
            window_id: window,
            url: Some(url.to_string()),
            status: TabStatus::Complete,
        };
        self.tabs.insert(id, info.clone());
        self.windows.entry(window).or_default().push(id);
        info
    }
}

impl Default for StubSurface {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserSurface for StubSurface {
    async fn create_window(&self, url: &str) -> Result<WindowInfo, SurfaceError> {
        let window = WindowId(self.next_window.fetch_add(1, Ordering::Relaxed));
        self.windows.insert(window, Vec::new());
        let tab = self.add_tab(window, url);
        Ok(WindowInfo {
            id: window,
            tabs: vec![tab],
        })
    }

    async fn query_tabs(&self, query: TabQuery) -> Result<Vec<TabInfo>, SurfaceError> {
        let mut tabs: Vec<TabInfo> = self
            .tabs
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|tab| query.window.map_or(true, |w| tab.window_id == w))
            .collect();
        tabs.sort_by_key(|tab| tab.id.0);
        Ok(tabs)
    }

    async fn get_tab(&self, tab: TabId) -> Result<TabInfo, SurfaceError> {
        self.tabs
            .get(&tab)
            .map(|entry| entry.value().clone())
            .ok_or(SurfaceError::NoSuchTab(tab))
    }

    async fn update_tab(&self, tab: TabId, patch: TabPatch) -> Result<TabInfo, SurfaceError> {
        let mut entry = self.tabs.get_mut(&tab).ok_or(SurfaceError::NoSuchTab(tab))?;
        if let Some(url) = patch.url {
            entry.url = Some(url);
            entry.status = if self.navigation_pending.load(Ordering::Relaxed) {
                TabStatus::Loading
            } else {
                TabStatus::Complete
            };
        }
        Ok(entry.value().clone())
    }

    async fn remove_tab(&self, tab: TabId) -> Result<(), SurfaceError> {
        let (_, info) = self.tabs.remove(&tab).ok_or(SurfaceError::NoSuchTab(tab))?;
        if let Some(mut tabs) = self.windows.get_mut(&info.window_id) {
            tabs.retain(|id| *id != tab);
        }
        self.emit(SurfaceEvent::TabRemoved { tab }).await;
        Ok(())
    }

    async fn update_window(
        &self,
        window: WindowId,
        patch: WindowPatch,
    ) -> Result<(), SurfaceError> {
        if !self.windows.contains_key(&window) {
            return Err(SurfaceError::NoSuchWindow(window));
        }
        self.window_patches.lock().push((window, patch));
        Ok(())
    }

    async fn send_to_frame(
        &self,
        tab: TabId,
        frame: NativeFrameId,
        payload: Value,
    ) -> Result<Value, SurfaceError> {
        self.sent.lock().push(SentMessage {
            tab,
            frame,
            payload,
        });
        match self.responses.lock().pop_front() {
            Some(response) => response,
            None => Ok(json!({ "result": "success" })),
        }
    }

    async fn next_event(&self) -> Option<SurfaceEvent> {
        let mut guard = self.events_rx.lock().await;
        guard.recv().await
    }
}

/// Scripted [`DebugSession`] recording every issued command.
pub struct StubDebugSession {
    commands: Mutex<Vec<(String, Value)>>,
    document: Mutex<Option<DocNode>>,
    selectors: Mutex<HashMap<(String, i64), NodeId>>,
    detach_count: AtomicUsize,
}

impl StubDebugSession {
    pub fn new() -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            document: Mutex::new(None),
            selectors: Mutex::new(HashMap::new()),
            detach_count: AtomicUsize::new(0),
        }
    }

    pub fn set_document(&self, document: DocNode) {
        *self.document.lock() = Some(document);
    }

    /// Map a (selector, root) pair to the node id `query_selector` returns.
    pub fn map_selector(&self, selector: &str, root: NodeId, node: NodeId) {
        self.selectors
            .lock()
            .insert((selector.to_string(), root.0), node);
    }

    pub fn commands(&self) -> Vec<(String, Value)> {
        self.commands.lock().clone()
    }

    pub fn detach_count(&self) -> usize {
        self.detach_count.load(Ordering::Relaxed)
    }
}

impl Default for StubDebugSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DebugSession for StubDebugSession {
    async fn command(&self, method: &str, params: Value) -> Result<Value, SurfaceError> {
        self.commands.lock().push((method.to_string(), params));
        Ok(json!({}))
    }

    async fn get_document(&self) -> Result<DocNode, SurfaceError> {
        self.document
            .lock()
            .clone()
            .ok_or_else(|| SurfaceError::Backend("no document configured".to_string()))
    }

    async fn query_selector(
        &self,
        selector: &str,
        root: NodeId,
    ) -> Result<NodeId, SurfaceError> {
        self.selectors
            .lock()
            .get(&(selector.to_string(), root.0))
            .copied()
            .ok_or_else(|| SurfaceError::Backend(format!("no node for selector {selector}")))
    }

    async fn detach(&self) {
        self.detach_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Connector handing out one shared stub session.
pub struct StubDebugConnector {
    session: Arc<StubDebugSession>,
    attach_count: AtomicUsize,
    fail_attach: AtomicBool,
}

impl StubDebugConnector {
    pub fn new(session: Arc<StubDebugSession>) -> Self {
        Self {
            session,
            attach_count: AtomicUsize::new(0),
            fail_attach: AtomicBool::new(false),
        }
    }

    pub fn set_fail_attach(&self, fail: bool) {
        self.fail_attach.store(fail, Ordering::Relaxed);
    }

    pub fn attach_count(&self) -> usize {
        self.attach_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DebugConnector for StubDebugConnector {
    async fn attach(&self, tab: TabId) -> Result<Arc<dyn DebugSession>, SurfaceError> {
        if self.fail_attach.load(Ordering::Relaxed) {
            return Err(SurfaceError::Backend(format!(
                "debugger attach refused for tab {tab}"
            )));
        }
        self.attach_count.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::clone(&self.session) as Arc<dyn DebugSession>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_window_seeds_one_tab() {
        let surface = StubSurface::new();
        let window = surface.create_window("about:blank").await.unwrap();
        assert_eq!(window.tabs.len(), 1);
        let tab = surface.get_tab(window.tabs[0].id).await.unwrap();
        assert_eq!(tab.status, TabStatus::Complete);
        assert_eq!(tab.url.as_deref(), Some("about:blank"));
    }

    #[tokio::test]
    async fn scripted_responses_drain_in_order() {
        let surface = StubSurface::new();
        surface.push_response(Err(SurfaceError::ChannelBroken {
            tab: TabId(1),
            frame: NativeFrameId(3),
        }));
        surface.push_response(Ok(json!({ "result": "done" })));

        let first = surface
            .send_to_frame(TabId(1), NativeFrameId(3), json!({}))
            .await;
        assert!(matches!(first, Err(SurfaceError::ChannelBroken { .. })));

        let second = surface
            .send_to_frame(TabId(1), NativeFrameId(3), json!({}))
            .await
            .unwrap();
        assert_eq!(second["result"], "done");

        // queue exhausted falls back to the default success payload
        let third = surface
            .send_to_frame(TabId(1), NativeFrameId(0), json!({}))
            .await
            .unwrap();
        assert_eq!(third["result"], "success");
        assert_eq!(surface.sent().len(), 3);
    }

    #[tokio::test]
    async fn remove_tab_emits_event() {
        let surface = StubSurface::new();
        let window = surface.create_window("about:blank").await.unwrap();
        let tab = window.tabs[0].id;
        surface.remove_tab(tab).await.unwrap();
        match surface.next_event().await {
            Some(SurfaceEvent::TabRemoved { tab: removed }) => assert_eq!(removed, tab),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(surface.get_tab(tab).await.is_err());
    }

    #[tokio::test]
    async fn stub_session_records_commands_and_detaches() {
        let session = Arc::new(StubDebugSession::new());
        let connector = StubDebugConnector::new(Arc::clone(&session));
        let attached = connector.attach(TabId(1)).await.unwrap();
        attached
            .command("Input.dispatchMouseEvent", json!({ "type": "mouseMoved" }))
            .await
            .unwrap();
        attached.detach().await;
        assert_eq!(connector.attach_count(), 1);
        assert_eq!(session.commands().len(), 1);
        assert_eq!(session.detach_count(), 1);
    }
}
