//! Parse Module
//!
//! HTML5-compliant markup parsing on top of html5ever. Markup is parsed as a
//! fragment and converted into the mutable [`crate::dom`] tree the compiler
//! works on.

use html5ever::tendril::TendrilSink;
use html5ever::{parse_fragment, LocalName, Namespace, ParseOpts, QualName};
use lazy_static::lazy_static;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use regex::Regex;
use std::collections::HashMap;

use crate::dom::{NodeList, NodeRef};
use crate::error::{Error, Result};

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

// ═══════════════════════════════════════════════════════════════════════════════
// FRAGMENT CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    /// Parsing context for markup whose first element only parses inside a
    /// specific parent (table sections, options). Without it the HTML parser
    /// drops the root tag.
    static ref FRAGMENT_CONTEXT: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("option", "select");
        m.insert("optgroup", "select");
        m.insert("thead", "table");
        m.insert("tbody", "table");
        m.insert("tfoot", "table");
        m.insert("caption", "table");
        m.insert("colgroup", "table");
        m.insert("col", "colgroup");
        m.insert("tr", "tbody");
        m.insert("td", "tr");
        m.insert("th", "tr");
        m
    };

    static ref FIRST_TAG_RE: Regex = Regex::new(r"^\s*<([\w:-]+)").unwrap();
}

fn context_for(markup: &str) -> &'static str {
    FIRST_TAG_RE
        .captures(markup)
        .and_then(|caps| {
            let tag = caps[1].to_ascii_lowercase();
            FRAGMENT_CONTEXT.get(tag.as_str()).copied()
        })
        .unwrap_or("body")
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONVERSION
// ═══════════════════════════════════════════════════════════════════════════════

fn convert_node(handle: &Handle) -> Option<NodeRef> {
    match &handle.data {
        NodeData::Element { name, attrs, .. } => {
            let element = NodeRef::element(&name.local);
            for attr in attrs.borrow().iter() {
                element.set_attr(&attr.name.local, &attr.value);
            }
            for child in handle.children.borrow().iter() {
                if let Some(node) = convert_node(child) {
                    element.append_child(&node);
                }
            }
            Some(element)
        }
        NodeData::Text { contents } => Some(NodeRef::text(&contents.borrow())),
        NodeData::Comment { contents } => Some(NodeRef::comment(contents)),
        NodeData::Document
        | NodeData::Doctype { .. }
        | NodeData::ProcessingInstruction { .. } => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MAIN PARSING FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Parses markup into detached top-level nodes.
pub fn parse_html(markup: &str) -> Result<Vec<NodeRef>> {
    let context = context_for(markup);
    let context_name = QualName::new(
        None,
        Namespace::from(HTML_NAMESPACE),
        LocalName::from(context),
    );

    let dom: RcDom =
        parse_fragment(RcDom::default(), ParseOpts::default(), context_name, Vec::new())
            .one(markup);

    // Fragment parsing yields document > html > fragment children.
    let document_children = dom.document.children.borrow();
    let root = document_children.first().ok_or_else(|| Error::Parse {
        expression: markup.to_string(),
        message: "markup produced no document root".to_string(),
    })?;

    let nodes = root
        .children
        .borrow()
        .iter()
        .filter_map(convert_node)
        .collect::<Vec<_>>();
    for node in &nodes {
        node.remove();
    }

    tracing::trace!(context, count = nodes.len(), "parsed markup fragment");
    Ok(nodes)
}

/// Parses markup into a [`NodeList`] ready to be compiled.
pub fn parse_node_list(markup: &str) -> Result<NodeList> {
    Ok(NodeList::new(parse_html(markup)?))
}
