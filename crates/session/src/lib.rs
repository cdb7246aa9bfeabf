//! Per-run session state: the current window/tab/frame triple, the
//! opened-tab registry, per-tab frame tables and readiness flags, and the
//! playback variable store.
//!
//! All state lives in engine-scoped objects shared by `Arc`, never in
//! globals; lifecycle handlers mutate it through single-step updates.

mod frames;
mod variables;
mod window_session;

pub use frames::FrameMap;
pub use variables::VariableStore;
pub use window_session::{PendingWindow, WindowSession};
