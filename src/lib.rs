//! Replaykit: a playback command-execution engine for recorded browser
//! interaction scripts.
//!
//! The engine tracks which window, tab and frame are current, routes
//! commands to the right execution context with bounded recovery of broken
//! frame channels, waits for asynchronous page-lifecycle events, and drives
//! a low-level debugging channel for input that cannot be synthesized from
//! inside the page.
//!
//! The browser itself is abstracted behind [`BrowserSurface`] and
//! [`DebugConnector`]; the external playback controller is abstracted
//! behind [`PlaybackHost`].

pub mod engine;
pub mod host;
mod lifecycle;

pub use engine::{InitOptions, NewWindowExpectation, ReplayEngine};
pub use host::{NoopHost, PlaybackHost};
pub use lifecycle::Listeners;

pub use replaykit_core_types::{
    FramePath, NativeFrameId, NodeId, ReplayError, SessionHandle, TabId, WindowId,
};
pub use replaykit_debug_bridge::DebugBridge;
pub use replaykit_dispatch::Dispatcher;
pub use replaykit_session::{FrameMap, PendingWindow, VariableStore, WindowSession};
pub use replaykit_surface::debug::{DebugConnector, DebugSession};
pub use replaykit_surface::{BrowserSurface, SurfaceError, SurfaceEvent};
pub use replaykit_waits::{conditions, PlaybackFlags, WaitConfig, WaitOutcome};
