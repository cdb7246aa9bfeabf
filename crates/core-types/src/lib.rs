//! Shared identifier types, frame paths and the error taxonomy used across
//! the replaykit engine crates.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Native browser window identifier, as reported by the control surface.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct WindowId(pub i64);

/// Native browser tab identifier.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TabId(pub i64);

/// Per-tab native frame identifier. The top frame of every tab is 0.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct NativeFrameId(pub i64);

impl NativeFrameId {
    pub const TOP: NativeFrameId = NativeFrameId(0);

    pub fn is_top(&self) -> bool {
        self.0 == 0
    }
}

/// Native DOM node identifier used by the debug channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub i64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NativeFrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical key distinguishing an isolated playback run from the shared
/// general-use fallback run. All per-run session state is keyed by this.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum SessionHandle {
    Run(String),
    GeneralUse,
}

impl SessionHandle {
    pub fn run(id: impl Into<String>) -> Self {
        Self::Run(id.into())
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionHandle::Run(id) => write!(f, "run:{id}"),
            SessionHandle::GeneralUse => write!(f, "general-use"),
        }
    }
}

/// Colon-delimited sequence of child-frame indices identifying a nested
/// browsing context within a tab, rooted at `root`. `root:0:2` is the third
/// child of the first child of the top frame.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct FramePath(String);

impl FramePath {
    pub const ROOT_SEGMENT: &'static str = "root";

    pub fn root() -> Self {
        Self(Self::ROOT_SEGMENT.to_string())
    }

    pub fn parse(raw: &str) -> Result<Self, ReplayError> {
        let mut segments = raw.split(':');
        if segments.next() != Some(Self::ROOT_SEGMENT) {
            return Err(ReplayError::validation(format!(
                "frame path must start at '{}': {raw}",
                Self::ROOT_SEGMENT
            )));
        }
        for segment in segments {
            if segment.is_empty() || segment.bytes().any(|b| !b.is_ascii_digit()) {
                return Err(ReplayError::validation(format!(
                    "invalid frame path segment '{segment}' in {raw}"
                )));
            }
        }
        Ok(Self(raw.to_string()))
    }

    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT_SEGMENT
    }

    /// Number of child-frame hops below the top frame.
    pub fn depth(&self) -> usize {
        self.0.split(':').count() - 1
    }

    /// Path with the last segment removed. The root path is its own parent.
    pub fn parent(&self) -> FramePath {
        match self.0.rfind(':') {
            Some(idx) => FramePath(self.0[..idx].to_string()),
            None => FramePath::root(),
        }
    }

    /// The top-frame path, regardless of current depth.
    pub fn top(&self) -> FramePath {
        FramePath::root()
    }

    /// Path extended by one child-frame index.
    pub fn child(&self, index: usize) -> FramePath {
        FramePath(format!("{}:{index}", self.0))
    }

    /// Child-frame indices from the top frame down, excluding the root
    /// segment. Empty for the root path.
    pub fn indices(&self) -> Vec<usize> {
        self.0
            .split(':')
            .skip(1)
            .filter_map(|segment| segment.parse().ok())
            .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for FramePath {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for FramePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error taxonomy shared by the engine crates.
///
/// `ChannelBroken` is the only locally retryable class: the dispatcher
/// recovers it by re-resolving the frame within its budget. Everything else
/// propagates to the playback controller as a failed step.
#[derive(Clone, Debug, Error)]
pub enum ReplayError {
    #[error("can't execute a command after session was closed")]
    SessionClosed,
    #[error("a window was not selected after closing the previous one, aborting playback")]
    WindowNotSelected,
    #[error("tab {0} is not tracked by this playback")]
    TabNotTracked(TabId),
    #[error("channel broken: {reason}")]
    ChannelBroken { reason: String },
    #[error("timed out after {budget_ms}ms waiting for {what}")]
    Timeout { what: String, budget_ms: u64 },
    #[error("frame not found: {0}")]
    FrameNotFound(String),
    #[error("{0}")]
    Validation(String),
}

impl ReplayError {
    pub fn channel_broken(reason: impl Into<String>) -> Self {
        Self::ChannelBroken {
            reason: reason.into(),
        }
    }

    pub fn timeout(what: impl Into<String>, budget_ms: u64) -> Self {
        Self::Timeout {
            what: what.into(),
            budget_ms,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn frame_not_found(detail: impl Into<String>) -> Self {
        Self::FrameNotFound(detail.into())
    }

    pub fn is_channel_broken(&self) -> bool {
        matches!(self, Self::ChannelBroken { .. })
    }

    pub fn is_frame_not_found(&self) -> bool {
        matches!(self, Self::FrameNotFound(_))
    }

    pub fn is_session_invalid(&self) -> bool {
        matches!(
            self,
            Self::SessionClosed | Self::WindowNotSelected | Self::TabNotTracked(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_removes_last_segment() {
        let path = FramePath::parse("root:0:2").unwrap();
        assert_eq!(path.parent().as_str(), "root:0");
        assert_eq!(path.parent().parent().as_str(), "root");
    }

    #[test]
    fn parent_of_depth_one_is_root() {
        let path = FramePath::root().child(4);
        assert_eq!(path.as_str(), "root:4");
        assert!(path.parent().is_root());
    }

    #[test]
    fn parent_of_root_stays_root() {
        assert!(FramePath::root().parent().is_root());
    }

    #[test]
    fn top_always_yields_root() {
        for raw in ["root:1", "root:0:0", "root:3:1:9"] {
            let path = FramePath::parse(raw).unwrap();
            assert!(path.top().is_root());
        }
    }

    #[test]
    fn indices_skip_root_segment() {
        let path = FramePath::parse("root:0:2").unwrap();
        assert_eq!(path.indices(), vec![0, 2]);
        assert!(FramePath::root().indices().is_empty());
        assert_eq!(path.depth(), 2);
    }

    #[test]
    fn parse_rejects_malformed_paths() {
        assert!(FramePath::parse("0:1").is_err());
        assert!(FramePath::parse("root:x").is_err());
        assert!(FramePath::parse("root::1").is_err());
        assert!(FramePath::parse("").is_err());
    }

    #[test]
    fn error_classes() {
        assert!(ReplayError::channel_broken("gone").is_channel_broken());
        assert!(ReplayError::SessionClosed.is_session_invalid());
        assert!(ReplayError::TabNotTracked(TabId(7)).is_session_invalid());
        assert!(!ReplayError::validation("bad").is_channel_broken());
    }
}
