//! XML helpers shared by the XAdES builder.

pub mod c14n;

pub use c14n::{canonicalize, canonicalize_document, canonicalize_element_by_id, canonicalize_node, C14nMode};

use roxmltree::{Document, Node};

const ID_ATTRIBUTES: [&str; 3] = ["Id", "ID", "id"];

/// First element whose `Id` (or `ID`/`id`) attribute equals `id`.
#[must_use]
pub fn find_by_id<'a, 'i>(doc: &'a Document<'i>, id: &str) -> Option<Node<'a, 'i>> {
    doc.descendants().find(|node| {
        node.is_element()
            && ID_ATTRIBUTES
                .iter()
                .any(|name| node.attribute(*name) == Some(id))
    })
}

/// First descendant element with the given namespace and local name.
#[must_use]
pub fn find_element<'a, 'i>(doc: &'a Document<'i>, ns: &str, local: &str) -> Option<Node<'a, 'i>> {
    doc.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == local && n.tag_name().namespace() == Some(ns))
}
