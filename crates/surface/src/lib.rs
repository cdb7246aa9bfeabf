//! Browser control surface consumed by the playback engine.
//!
//! The engine never talks to a real browser directly; it goes through the
//! [`BrowserSurface`] trait for tab/window management and frame-targeted
//! messaging, and through the [`debug`] traits for the low-level debugging
//! channel. [`stub`] provides deterministic in-memory backends used by tests
//! and the demo binary.

pub mod debug;
pub mod events;
pub mod stub;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use replaykit_core_types::{NativeFrameId, ReplayError, TabId, WindowId};

pub use events::{LogLevel, SurfaceEvent};

/// Last-navigation state of a tab as reported by the surface.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TabStatus {
    Loading,
    Complete,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: TabId,
    pub window_id: WindowId,
    pub url: Option<String>,
    pub status: TabStatus,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WindowInfo {
    pub id: WindowId,
    pub tabs: Vec<TabInfo>,
}

#[derive(Clone, Debug, Default)]
pub struct TabQuery {
    pub window: Option<WindowId>,
    pub active: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct TabPatch {
    pub url: Option<String>,
    pub active: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct WindowPatch {
    pub focused: Option<bool>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Failures reported by the control surface or debug channel.
///
/// `ChannelBroken` is the structured equivalent of the browser's
/// "receiving end does not exist" class; the dispatcher treats it as
/// retryable.
#[derive(Clone, Debug, Error)]
pub enum SurfaceError {
    #[error("could not establish connection to frame {frame} of tab {tab}")]
    ChannelBroken { tab: TabId, frame: NativeFrameId },
    #[error("no such tab: {0}")]
    NoSuchTab(TabId),
    #[error("no such window: {0}")]
    NoSuchWindow(WindowId),
    #[error("surface backend failure: {0}")]
    Backend(String),
}

impl From<SurfaceError> for ReplayError {
    fn from(err: SurfaceError) -> Self {
        match err {
            SurfaceError::ChannelBroken { .. } => ReplayError::channel_broken(err.to_string()),
            other => ReplayError::validation(other.to_string()),
        }
    }
}

/// Async interface to the browser control surface.
///
/// Events are a single-consumer stream: the engine's lifecycle listener task
/// owns `next_event` for the duration of a playback run.
#[async_trait]
pub trait BrowserSurface: Send + Sync {
    async fn create_window(&self, url: &str) -> Result<WindowInfo, SurfaceError>;
    async fn query_tabs(&self, query: TabQuery) -> Result<Vec<TabInfo>, SurfaceError>;
    async fn get_tab(&self, tab: TabId) -> Result<TabInfo, SurfaceError>;
    async fn update_tab(&self, tab: TabId, patch: TabPatch) -> Result<TabInfo, SurfaceError>;
    async fn remove_tab(&self, tab: TabId) -> Result<(), SurfaceError>;
    async fn update_window(&self, window: WindowId, patch: WindowPatch)
        -> Result<(), SurfaceError>;

    /// Send a structured message to one frame of one tab and wait for its
    /// structured response. A torn-down frame yields `ChannelBroken`.
    async fn send_to_frame(
        &self,
        tab: TabId,
        frame: NativeFrameId,
        payload: Value,
    ) -> Result<Value, SurfaceError>;

    /// Next lifecycle/content event, or `None` once the surface is closed.
    async fn next_event(&self) -> Option<SurfaceEvent>;
}
