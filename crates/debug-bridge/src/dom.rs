//! Locator translation and frame-document resolution for the debug channel.

use replaykit_core_types::{FramePath, ReplayError};
use replaykit_surface::debug::DocNode;

/// Translate a playback locator into a structural CSS selector the debug
/// channel can query. Only strategies with a structural equivalent are
/// supported here; text-based strategies stay on the content-script path.
pub fn locator_to_css(locator: &str) -> Result<String, ReplayError> {
    match locator.split_once('=') {
        Some(("css", rest)) => Ok(rest.to_string()),
        Some(("id", rest)) => Ok(format!("#{rest}")),
        Some(("name", rest)) => Ok(format!("[name=\"{rest}\"]")),
        _ => Err(ReplayError::validation(format!(
            "locator strategy not usable on the debugging channel: {locator}"
        ))),
    }
}

/// Resolve the document node of the frame at `path`, walking child-frame
/// indices from the top document down.
///
/// A cross-origin frame surfaces no content document over the debug channel;
/// that and an out-of-range index both report the frame-not-found class so
/// callers can fall back to the content-script path.
pub fn frame_document<'a>(root: &'a DocNode, path: &FramePath) -> Result<&'a DocNode, ReplayError> {
    let mut doc = root;
    for index in path.indices() {
        let frames = frame_elements(doc);
        let element = frames.get(index).ok_or_else(|| {
            ReplayError::frame_not_found(format!("no frame element at index {index} for {path}"))
        })?;
        doc = element.content_document.as_deref().ok_or_else(|| {
            ReplayError::frame_not_found(format!(
                "frame {index} of {path} has no reachable content document"
            ))
        })?;
    }
    Ok(doc)
}

/// Frame elements of one document in document order, without descending
/// into nested browsing contexts.
fn frame_elements(doc: &DocNode) -> Vec<&DocNode> {
    let mut found = Vec::new();
    let mut stack: Vec<&DocNode> = doc.children.iter().rev().collect();
    while let Some(node) = stack.pop() {
        if node.is_frame_element() {
            found.push(node);
            continue;
        }
        stack.extend(node.children.iter().rev());
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use replaykit_core_types::NodeId;

    fn frame(node_id: i64, content: Option<DocNode>) -> DocNode {
        let mut node = DocNode::new(NodeId(node_id), "IFRAME");
        node.content_document = content.map(Box::new);
        node
    }

    #[test]
    fn locator_translation() {
        assert_eq!(locator_to_css("css=.menu > li").unwrap(), ".menu > li");
        assert_eq!(locator_to_css("id=upload").unwrap(), "#upload");
        assert_eq!(locator_to_css("name=avatar").unwrap(), "[name=\"avatar\"]");
        assert!(locator_to_css("xpath=//input").is_err());
        assert!(locator_to_css("link=Sign in").is_err());
    }

    #[test]
    fn walks_frame_indices_in_document_order() {
        let mut wrapper = DocNode::new(NodeId(2), "DIV");
        wrapper
            .children
            .push(frame(3, Some(DocNode::new(NodeId(30), "#document"))));

        let mut inner_doc = DocNode::new(NodeId(40), "#document");
        inner_doc
            .children
            .push(frame(5, Some(DocNode::new(NodeId(50), "#document"))));

        let mut root = DocNode::new(NodeId(1), "#document");
        root.children.push(wrapper);
        root.children.push(frame(4, Some(inner_doc)));

        // second frame of the top document, then its first child frame
        let path = FramePath::root().child(1).child(0);
        let doc = frame_document(&root, &path).unwrap();
        assert_eq!(doc.node_id, NodeId(50));

        assert_eq!(
            frame_document(&root, &FramePath::root()).unwrap().node_id,
            NodeId(1)
        );
    }

    #[test]
    fn cross_origin_frame_reports_frame_not_found() {
        let mut root = DocNode::new(NodeId(1), "#document");
        root.children.push(frame(3, None));

        let err = frame_document(&root, &FramePath::root().child(0)).unwrap_err();
        assert!(err.is_frame_not_found());

        let err = frame_document(&root, &FramePath::root().child(2)).unwrap_err();
        assert!(err.is_frame_not_found());
    }
}
