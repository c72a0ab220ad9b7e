//! Canonical XML 1.0 and Exclusive XML Canonicalization 1.0 (both without
//! comments) over a `roxmltree` element subtree.
//!
//! The subtree apex carries the namespace context of its ancestors: in
//! inclusive mode every in-scope namespace (and inherited `xml:*`
//! attributes) is rendered on the apex, in exclusive mode only the
//! visibly utilized prefixes are.

use crate::domain::constants::{C14N_EXCLUSIVE_URI, C14N_INCLUSIVE_URI, XML_NS};
use crate::infra::error::{SigningError, SigningResult};
use roxmltree::{Document, Node, NodeType};
use std::collections::BTreeMap;

/// Canonicalization algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum C14nMode {
    Inclusive,
    Exclusive,
}

impl C14nMode {
    #[must_use]
    pub fn uri(self) -> &'static str {
        match self {
            C14nMode::Inclusive => C14N_INCLUSIVE_URI,
            C14nMode::Exclusive => C14N_EXCLUSIVE_URI,
        }
    }

    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            C14N_INCLUSIVE_URI => Some(C14nMode::Inclusive),
            C14N_EXCLUSIVE_URI => Some(C14nMode::Exclusive),
            _ => None,
        }
    }
}

/// Canonicalize a complete XML document.
pub fn canonicalize(xml: &str, mode: C14nMode) -> SigningResult<String> {
    let doc = Document::parse(xml)?;
    Ok(canonicalize_document(&doc, mode))
}

/// Canonicalize the element carrying `Id="{id}"` and its descendants.
pub fn canonicalize_element_by_id(xml: &str, id: &str, mode: C14nMode) -> SigningResult<String> {
    let doc = Document::parse(xml)?;
    let node = super::find_by_id(&doc, id)
        .ok_or_else(|| SigningError::XmlError(format!("no element with Id '{id}'")))?;
    Ok(canonicalize_node(node, mode))
}

/// Canonicalize a parsed document: root element plus top-level processing
/// instructions, separated by line feeds.
#[must_use]
pub fn canonicalize_document(doc: &Document<'_>, mode: C14nMode) -> String {
    let mut c = Canonicalizer::new(doc.input_text(), mode);
    let mut after_root = false;
    for child in doc.root().children() {
        match child.node_type() {
            NodeType::Element => {
                c.element(child, &BTreeMap::new(), true);
                after_root = true;
            }
            NodeType::PI => {
                if after_root {
                    c.out.push('\n');
                }
                c.processing_instruction(child);
                if !after_root {
                    c.out.push('\n');
                }
            }
            _ => {}
        }
    }
    c.out
}

/// Canonicalize one element subtree.
#[must_use]
pub fn canonicalize_node(node: Node<'_, '_>, mode: C14nMode) -> String {
    let mut c = Canonicalizer::new(node.document().input_text(), mode);
    if node.is_element() {
        c.element(node, &BTreeMap::new(), true);
    }
    c.out
}

struct Canonicalizer<'i> {
    input: &'i str,
    mode: C14nMode,
    out: String,
}

struct RenderedAttr {
    ns: String,
    local: String,
    qname: String,
    value: String,
}

impl<'i> Canonicalizer<'i> {
    fn new(input: &'i str, mode: C14nMode) -> Self {
        Self {
            input,
            mode,
            out: String::with_capacity(input.len()),
        }
    }

    /// `rendered` holds the namespace declarations already emitted by
    /// output ancestors (prefix "" is the default namespace).
    fn element(&mut self, node: Node<'_, '_>, rendered: &BTreeMap<String, String>, apex: bool) {
        let (elem_qname, attr_qnames) = start_tag_qnames(self.start_tag(node));
        let elem_prefix = prefix_of(&elem_qname).to_string();
        let in_scope = in_scope_namespaces(node);

        let mut attrs: Vec<RenderedAttr> = node
            .attributes()
            .enumerate()
            .map(|(i, attr)| {
                let ns = attr.namespace().unwrap_or("").to_string();
                let qname = match attr_qnames.get(i) {
                    Some(q) if local_of(q) == attr.name() => q.clone(),
                    _ => qualified_attr_name(node, &ns, attr.name()),
                };
                RenderedAttr {
                    ns,
                    local: attr.name().to_string(),
                    qname,
                    value: attr.value().to_string(),
                }
            })
            .collect();

        if apex && self.mode == C14nMode::Inclusive {
            inherit_xml_attributes(node, &mut attrs);
        }
        attrs.sort_by(|a, b| (&a.ns, &a.local).cmp(&(&b.ns, &b.local)));

        let declarations = match self.mode {
            C14nMode::Inclusive => inclusive_declarations(&in_scope, rendered),
            C14nMode::Exclusive => {
                let mut utilized = vec![elem_prefix.clone()];
                utilized.extend(
                    attrs
                        .iter()
                        .map(|a| prefix_of(&a.qname).to_string())
                        .filter(|p| !p.is_empty() && p != "xml"),
                );
                exclusive_declarations(&in_scope, rendered, &utilized)
            }
        };

        self.out.push('<');
        self.out.push_str(&elem_qname);
        for (prefix, uri) in &declarations {
            if prefix.is_empty() {
                self.out.push_str(" xmlns=\"");
            } else {
                self.out.push_str(" xmlns:");
                self.out.push_str(prefix);
                self.out.push_str("=\"");
            }
            escape_attr(uri, &mut self.out);
            self.out.push('"');
        }
        for attr in &attrs {
            self.out.push(' ');
            self.out.push_str(&attr.qname);
            self.out.push_str("=\"");
            escape_attr(&attr.value, &mut self.out);
            self.out.push('"');
        }
        self.out.push('>');

        let mut next_rendered = rendered.clone();
        next_rendered.extend(declarations);

        for child in node.children() {
            match child.node_type() {
                NodeType::Element => self.element(child, &next_rendered, false),
                NodeType::Text => {
                    if let Some(text) = child.text() {
                        escape_text(text, &mut self.out);
                    }
                }
                NodeType::PI => self.processing_instruction(child),
                _ => {}
            }
        }

        self.out.push_str("</");
        self.out.push_str(&elem_qname);
        self.out.push('>');
    }

    fn processing_instruction(&mut self, node: Node<'_, '_>) {
        if let Some(pi) = node.pi() {
            self.out.push_str("<?");
            self.out.push_str(pi.target);
            if let Some(value) = pi.value.filter(|v| !v.is_empty()) {
                self.out.push(' ');
                self.out.push_str(value);
            }
            self.out.push_str("?>");
        }
    }

    fn start_tag(&self, node: Node<'_, '_>) -> &'i str {
        let range = node.range();
        self.input.get(range.start..range.end).unwrap_or("")
    }
}

fn inclusive_declarations(
    in_scope: &BTreeMap<String, String>,
    rendered: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (prefix, uri) in in_scope {
        if rendered.get(prefix) != Some(uri) {
            out.insert(prefix.clone(), uri.clone());
        }
    }
    if !in_scope.contains_key("") && rendered.get("").is_some_and(|u| !u.is_empty()) {
        out.insert(String::new(), String::new());
    }
    out
}

fn exclusive_declarations(
    in_scope: &BTreeMap<String, String>,
    rendered: &BTreeMap<String, String>,
    utilized: &[String],
) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for prefix in utilized {
        match in_scope.get(prefix) {
            Some(uri) if rendered.get(prefix) != Some(uri) => {
                out.insert(prefix.clone(), uri.clone());
            }
            None if prefix.is_empty() && rendered.get("").is_some_and(|u| !u.is_empty()) => {
                out.insert(String::new(), String::new());
            }
            _ => {}
        }
    }
    out
}

fn in_scope_namespaces(node: Node<'_, '_>) -> BTreeMap<String, String> {
    node.namespaces()
        .filter(|ns| ns.name() != Some("xml"))
        .map(|ns| (ns.name().unwrap_or("").to_string(), ns.uri().to_string()))
        .filter(|(prefix, uri)| !(prefix.is_empty() && uri.is_empty()))
        .collect()
}

fn inherit_xml_attributes(node: Node<'_, '_>, attrs: &mut Vec<RenderedAttr>) {
    for ancestor in node.ancestors().skip(1).filter(Node::is_element) {
        for attr in ancestor.attributes() {
            if attr.namespace() != Some(XML_NS) {
                continue;
            }
            if attrs.iter().any(|a| a.ns == XML_NS && a.local == attr.name()) {
                continue;
            }
            attrs.push(RenderedAttr {
                ns: XML_NS.to_string(),
                local: attr.name().to_string(),
                qname: format!("xml:{}", attr.name()),
                value: attr.value().to_string(),
            });
        }
    }
}

fn qualified_attr_name(node: Node<'_, '_>, ns: &str, local: &str) -> String {
    if ns.is_empty() {
        return local.to_string();
    }
    if ns == XML_NS {
        return format!("xml:{local}");
    }
    match node.lookup_prefix(ns) {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}:{local}"),
        _ => local.to_string(),
    }
}

fn prefix_of(qname: &str) -> &str {
    qname.split_once(':').map_or("", |(p, _)| p)
}

fn local_of(qname: &str) -> &str {
    qname.split_once(':').map_or(qname, |(_, l)| l)
}

/// Element and attribute qualified names as written in the start tag, with
/// namespace declarations left out. `roxmltree` resolves namespaces but does
/// not keep the prefixes, and C14N renders them verbatim.
fn start_tag_qnames(raw: &str) -> (String, Vec<String>) {
    let bytes = raw.as_bytes();
    let mut i = usize::from(bytes.first() == Some(&b'<'));
    let name_end = |mut j: usize| {
        while j < bytes.len() && !matches!(bytes[j], b' ' | b'\t' | b'\r' | b'\n' | b'/' | b'>' | b'=') {
            j += 1;
        }
        j
    };

    let end = name_end(i);
    let elem = raw[i..end].to_string();
    i = end;

    let mut attrs = Vec::new();
    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] == b'>' || bytes[i] == b'/' {
            break;
        }
        let end = name_end(i);
        let name = &raw[i..end];
        i = end;
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b'=') {
            i += 1;
        }
        let Some(&quote) = bytes.get(i).filter(|q| **q == b'"' || **q == b'\'') else {
            break;
        };
        i += 1;
        while i < bytes.len() && bytes[i] != quote {
            i += 1;
        }
        i += 1;
        if name != "xmlns" && !name.starts_with("xmlns:") {
            attrs.push(name.to_string());
        }
    }
    (elem, attrs)
}

fn escape_text(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
}

fn escape_attr(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
}
