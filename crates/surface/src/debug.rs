//! Remote debug channel traits: a short-lived low-level connection scoped to
//! one tab, used for native input synthesis and file-input injection.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use replaykit_core_types::{NodeId, TabId};

use crate::SurfaceError;

/// Node of the live document tree fetched over the debug channel.
///
/// Frame elements (`IFRAME`/`FRAME`) carry their child browsing context in
/// `content_document` when same-origin; cross-origin frames surface no
/// content document, which is what the bridge's frame-not-found class
/// reports.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocNode {
    pub node_id: NodeId,
    pub node_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_document: Option<Box<DocNode>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DocNode>,
}

impl DocNode {
    pub fn new(node_id: NodeId, node_name: impl Into<String>) -> Self {
        Self {
            node_id,
            node_name: node_name.into(),
            content_document: None,
            children: Vec::new(),
        }
    }

    pub fn is_frame_element(&self) -> bool {
        self.node_name.eq_ignore_ascii_case("iframe") || self.node_name.eq_ignore_ascii_case("frame")
    }
}

/// An attached debugging connection. Callers must `detach` on every path;
/// the bridge guarantees this for its operations.
#[async_trait]
pub trait DebugSession: Send + Sync {
    /// Issue a named low-level command with a structured argument payload.
    async fn command(&self, method: &str, params: Value) -> Result<Value, SurfaceError>;

    /// Fetch the live document tree of the attached tab.
    async fn get_document(&self) -> Result<DocNode, SurfaceError>;

    /// Resolve a structural selector to a node id within the given root.
    async fn query_selector(&self, selector: &str, root: NodeId)
        -> Result<NodeId, SurfaceError>;

    async fn detach(&self);
}

/// Factory for debug sessions, one attach per bridge operation.
#[async_trait]
pub trait DebugConnector: Send + Sync {
    async fn attach(&self, tab: TabId) -> Result<Arc<dyn DebugSession>, SurfaceError>;
}
