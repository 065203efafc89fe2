//! Recursive text walk that swaps matched text nodes for marked containers

use anyhow::Result;

use crate::constants::markers::{CONTAINER_STYLE, CONTAINER_TAG, ORIGINAL_ATTR, PROCESSED_ATTR};
use crate::constants::traversal::SKIP_TAGS;
use crate::convert::ConversionMode;
use crate::dom::{Document, NodeId, NodeType};

fn is_skipped_tag(tag: &str) -> bool {
    SKIP_TAGS.iter().any(|skip| *skip == tag)
}

/// Convert every eligible text node under `node`, counting conversions into `converted`.
/// Stops at the first DOM error; conversions already made stay in place.
pub fn walk(doc: &mut Document, node: NodeId, mode: ConversionMode, converted: &mut usize) -> Result<()> {
    match doc.node_type(node) {
        NodeType::Text => {
            if convert_text_node(doc, node, mode)? {
                *converted += 1;
            }
        }
        NodeType::Element => {
            if doc.tag_name(node).is_some_and(is_skipped_tag) {
                return Ok(());
            }
            // Snapshot: conversions replace children while we iterate
            let children = doc.children(node).to_vec();
            for child in children {
                walk(doc, child, mode, converted)?;
            }
        }
        NodeType::Comment => {}
    }
    Ok(())
}

fn convert_text_node(doc: &mut Document, node: NodeId, mode: ConversionMode) -> Result<bool> {
    let Some(parent) = doc.parent_element(node) else {
        return Ok(false);
    };
    if doc.has_attribute(parent, PROCESSED_ATTR) || doc.tag_name(parent).is_some_and(is_skipped_tag) {
        return Ok(false);
    }

    let Some(text) = doc.text(node) else {
        return Ok(false);
    };
    if text.trim().is_empty() {
        return Ok(false);
    }

    let converted = mode.convert(text);
    if converted == text {
        return Ok(false);
    }
    let (original, converted) = (text.to_string(), converted.into_owned());

    let container = doc.create_element(CONTAINER_TAG);
    doc.set_text_content(container, &converted)?;
    doc.set_attribute(container, PROCESSED_ATTR, "true")?;
    doc.set_attribute(container, ORIGINAL_ATTR, &original)?;
    doc.set_attribute(container, "style", CONTAINER_STYLE)?;
    doc.replace_with(node, container)?;
    Ok(true)
}
