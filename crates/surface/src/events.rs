use serde_json::Value;
use tokio::sync::oneshot;

use replaykit_core_types::{FramePath, NativeFrameId, TabId};

use crate::TabStatus;

/// Severity carried by content-script log forwarding requests.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Lifecycle and inbound content-script events emitted by the surface.
///
/// Reply-carrying variants use oneshot responders, mirroring the
/// command/responder pattern of the underlying transport; dropping the
/// responder is a valid "no answer" outcome.
#[derive(Debug)]
pub enum SurfaceEvent {
    /// A tab's navigation status changed.
    TabStatusChanged { tab: TabId, status: TabStatus },
    /// A tab was closed.
    TabRemoved { tab: TabId },
    /// A tracked tab opened a new navigation target (new tab/window).
    NavigationTargetCreated { source: TabId, tab: TabId },
    /// A frame's content context announced its own logical path.
    FrameAnnounced {
        tab: TabId,
        frame: NativeFrameId,
        path: FramePath,
        ack: Option<oneshot::Sender<bool>>,
    },
    /// Content script asked for a playback variable.
    VariableRequested {
        name: String,
        reply: oneshot::Sender<Option<Value>>,
    },
    /// Content script stored a playback variable.
    VariableStored { name: String, value: Value },
    /// Content script forwarded a log line.
    LogForwarded { level: LogLevel, message: String },
}
