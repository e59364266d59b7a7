//! Mutable Element Tree
//!
//! A small DOM-like tree: elements, text, comments and fragments with weak
//! parent links. Directives mutate it freely during compile and link, so every
//! accessor hands out snapshots rather than borrowed views.

use lazy_static::lazy_static;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::Result;
use crate::value::Value;

lazy_static! {
    static ref VOID_ELEMENTS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        for tag in [
            "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta",
            "param", "source", "track", "wbr",
        ] {
            s.insert(tag);
        }
        s
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Element,
    Text,
    Comment,
    Fragment,
}

pub struct Node {
    kind: NodeKind,
    tag: String,
    attrs: RefCell<Vec<(String, String)>>,
    value: RefCell<String>,
    parent: RefCell<Weak<Node>>,
    children: RefCell<Vec<NodeRef>>,
    data: RefCell<HashMap<String, Value>>,
}

/// Shared handle to a tree node. Equality is identity.
#[derive(Clone)]
pub struct NodeRef(Rc<Node>);

impl NodeRef {
    fn new(kind: NodeKind, tag: &str, value: &str) -> Self {
        NodeRef(Rc::new(Node {
            kind,
            tag: tag.to_ascii_lowercase(),
            attrs: RefCell::new(Vec::new()),
            value: RefCell::new(value.to_string()),
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
            data: RefCell::new(HashMap::new()),
        }))
    }

    pub fn element(tag: &str) -> Self {
        Self::new(NodeKind::Element, tag, "")
    }

    pub fn text(value: &str) -> Self {
        Self::new(NodeKind::Text, "", value)
    }

    pub fn comment(value: &str) -> Self {
        Self::new(NodeKind::Comment, "", value)
    }

    pub fn fragment() -> Self {
        Self::new(NodeKind::Fragment, "", "")
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // IDENTITY & KIND
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn ptr_eq(&self, other: &NodeRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn kind(&self) -> NodeKind {
        self.0.kind
    }

    pub fn is_element(&self) -> bool {
        self.0.kind == NodeKind::Element
    }

    pub fn is_text(&self) -> bool {
        self.0.kind == NodeKind::Text
    }

    pub fn is_comment(&self) -> bool {
        self.0.kind == NodeKind::Comment
    }

    /// Lowercase tag name, empty for non-elements.
    pub fn tag_name(&self) -> &str {
        &self.0.tag
    }

    pub fn node_name(&self) -> &str {
        match self.0.kind {
            NodeKind::Element => &self.0.tag,
            NodeKind::Text => "#text",
            NodeKind::Comment => "#comment",
            NodeKind::Fragment => "#document-fragment",
        }
    }

    /// Text or comment contents.
    pub fn value(&self) -> String {
        self.0.value.borrow().clone()
    }

    pub fn set_value(&self, value: &str) {
        *self.0.value.borrow_mut() = value.to_string();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ATTRIBUTES
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn attributes(&self) -> Vec<(String, String)> {
        self.0.attrs.borrow().clone()
    }

    pub fn attr(&self, name: &str) -> Option<String> {
        let name = name.to_ascii_lowercase();
        self.0
            .attrs
            .borrow()
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.clone())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    pub fn set_attr(&self, name: &str, value: &str) {
        if !self.is_element() {
            return;
        }
        let name = name.to_ascii_lowercase();
        let mut attrs = self.0.attrs.borrow_mut();
        match attrs.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value.to_string(),
            None => attrs.push((name, value.to_string())),
        }
    }

    pub fn remove_attr(&self, name: &str) {
        let name = name.to_ascii_lowercase();
        self.0.attrs.borrow_mut().retain(|(n, _)| *n != name);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CLASSES
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn class_list(&self) -> Vec<String> {
        self.attr("class")
            .map(|c| c.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.class_list().iter().any(|c| c == class)
    }

    pub fn add_class(&self, classes: &str) {
        if !self.is_element() {
            return;
        }
        let mut list = self.class_list();
        for class in classes.split_whitespace() {
            if !list.iter().any(|c| c == class) {
                list.push(class.to_string());
            }
        }
        self.set_attr("class", &list.join(" "));
    }

    pub fn remove_class(&self, classes: &str) {
        if !self.is_element() || !self.has_attr("class") {
            return;
        }
        let remove: Vec<&str> = classes.split_whitespace().collect();
        let list: Vec<String> = self
            .class_list()
            .into_iter()
            .filter(|c| !remove.contains(&c.as_str()))
            .collect();
        self.set_attr("class", &list.join(" "));
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TREE STRUCTURE
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn parent(&self) -> Option<NodeRef> {
        self.0.parent.borrow().upgrade().map(NodeRef)
    }

    pub fn children(&self) -> Vec<NodeRef> {
        self.0.children.borrow().clone()
    }

    pub fn has_children(&self) -> bool {
        !self.0.children.borrow().is_empty()
    }

    pub fn index_in_parent(&self) -> Option<usize> {
        let parent = self.parent()?;
        let children = parent.0.children.borrow();
        children.iter().position(|c| c.ptr_eq(self))
    }

    /// Detaches the node from its parent, if any.
    pub fn remove(&self) {
        if let Some(parent) = self.parent() {
            parent.0.children.borrow_mut().retain(|c| !c.ptr_eq(self));
        }
        *self.0.parent.borrow_mut() = Weak::new();
    }

    pub fn append_child(&self, child: &NodeRef) {
        if child.0.kind == NodeKind::Fragment {
            for grandchild in child.children() {
                self.append_child(&grandchild);
            }
            return;
        }
        child.remove();
        *child.0.parent.borrow_mut() = Rc::downgrade(&self.0);
        self.0.children.borrow_mut().push(child.clone());
    }

    pub fn insert_at(&self, index: usize, child: &NodeRef) {
        child.remove();
        *child.0.parent.borrow_mut() = Rc::downgrade(&self.0);
        let mut children = self.0.children.borrow_mut();
        let index = index.min(children.len());
        children.insert(index, child.clone());
    }

    /// Inserts `node` right after `self` in the parent's child list.
    pub fn insert_after(&self, node: &NodeRef) {
        if let Some(parent) = self.parent() {
            node.remove();
            let index = self.index_in_parent().map(|i| i + 1).unwrap_or(0);
            parent.insert_at(index, node);
        }
    }

    /// Puts `node` where `self` is, detaching `self`.
    pub fn replace_with(&self, node: &NodeRef) {
        if self.ptr_eq(node) {
            return;
        }
        if let (Some(parent), Some(index)) = (self.parent(), self.index_in_parent()) {
            self.remove();
            parent.insert_at(index, node);
        }
    }

    /// Removes every child.
    pub fn empty(&self) {
        for child in self.children() {
            child.remove();
        }
    }

    /// Copies the node and its subtree. Node data is not copied.
    pub fn deep_clone(&self) -> NodeRef {
        let copy = NodeRef::new(self.0.kind, &self.0.tag, &self.0.value.borrow());
        *copy.0.attrs.borrow_mut() = self.0.attrs.borrow().clone();
        for child in self.children() {
            copy.append_child(&child.deep_clone());
        }
        copy
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // NODE DATA
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn data(&self, key: &str) -> Option<Value> {
        self.0.data.borrow().get(key).cloned()
    }

    pub fn set_data(&self, key: &str, value: Value) {
        self.0.data.borrow_mut().insert(key.to_string(), value);
    }

    /// Looks up `key` on this node, then on each ancestor.
    pub fn inherited_data(&self, key: &str) -> Option<Value> {
        let mut current = Some(self.clone());
        while let Some(node) = current {
            if let Some(value) = node.data(key) {
                return Some(value);
            }
            current = node.parent();
        }
        None
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CONTENT & SERIALIZATION
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn text_content(&self) -> String {
        match self.0.kind {
            NodeKind::Text => self.value(),
            NodeKind::Comment => String::new(),
            _ => self.children().iter().map(NodeRef::text_content).collect(),
        }
    }

    /// Replaces the children with parsed `html`.
    pub fn set_inner_html(&self, html: &str) -> Result<()> {
        self.empty();
        for node in crate::parse::parse_html(html)? {
            self.append_child(&node);
        }
        Ok(())
    }

    pub fn inner_html(&self) -> String {
        let mut out = String::new();
        for child in self.children() {
            child.write_html(&mut out);
        }
        out
    }

    pub fn outer_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    /// Opening tag only, used as context in error reports.
    pub fn starting_tag(&self) -> String {
        match self.0.kind {
            NodeKind::Element => {
                let mut out = String::new();
                self.write_open_tag(&mut out);
                out
            }
            NodeKind::Text => self.value(),
            NodeKind::Comment => format!("<!--{}-->", self.value()),
            NodeKind::Fragment => String::new(),
        }
    }

    fn write_open_tag(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.0.tag);
        for (name, value) in self.0.attrs.borrow().iter() {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&escape_attr(value));
            out.push('"');
        }
        out.push('>');
    }

    fn write_html(&self, out: &mut String) {
        match self.0.kind {
            NodeKind::Element => {
                self.write_open_tag(out);
                if VOID_ELEMENTS.contains(self.0.tag.as_str()) {
                    return;
                }
                for child in self.children() {
                    child.write_html(out);
                }
                out.push_str("</");
                out.push_str(&self.0.tag);
                out.push('>');
            }
            NodeKind::Text => out.push_str(&escape_text(&self.0.value.borrow())),
            NodeKind::Comment => {
                out.push_str("<!--");
                out.push_str(&self.0.value.borrow());
                out.push_str("-->");
            }
            NodeKind::Fragment => {
                for child in self.children() {
                    child.write_html(out);
                }
            }
        }
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.outer_html())
    }
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;").replace('"', "&quot;")
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODE LIST
// ═══════════════════════════════════════════════════════════════════════════════

/// Shared, mutable list of sibling roots. Root replacement during compile
/// (`replace: true`, element transclusion) is written back into the list so
/// callers observe the final nodes.
#[derive(Clone, Default)]
pub struct NodeList(Rc<RefCell<Vec<NodeRef>>>);

impl NodeList {
    pub fn new(nodes: Vec<NodeRef>) -> Self {
        NodeList(Rc::new(RefCell::new(nodes)))
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<NodeRef> {
        self.0.borrow().get(index).cloned()
    }

    pub fn first(&self) -> Option<NodeRef> {
        self.get(0)
    }

    pub fn to_vec(&self) -> Vec<NodeRef> {
        self.0.borrow().clone()
    }

    pub fn set(&self, index: usize, node: NodeRef) {
        if let Some(slot) = self.0.borrow_mut().get_mut(index) {
            *slot = node;
        }
    }

    /// Swaps every occurrence of `old` for `new`.
    pub fn replace(&self, old: &NodeRef, new: &NodeRef) {
        for slot in self.0.borrow_mut().iter_mut() {
            if slot.ptr_eq(old) {
                *slot = new.clone();
            }
        }
    }

    pub fn deep_clone(&self) -> NodeList {
        NodeList::new(self.0.borrow().iter().map(NodeRef::deep_clone).collect())
    }

    pub fn text(&self) -> String {
        self.0.borrow().iter().map(NodeRef::text_content).collect()
    }

    pub fn outer_html(&self) -> String {
        self.0.borrow().iter().map(NodeRef::outer_html).collect()
    }
}

impl fmt::Debug for NodeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.borrow().iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_serialize() {
        let div = NodeRef::element("DIV");
        div.set_attr("id", "a\"b");
        div.append_child(&NodeRef::text("x < y"));
        div.append_child(&NodeRef::comment(" note "));
        assert_eq!(div.outer_html(), "<div id=\"a&quot;b\">x &lt; y<!-- note --></div>");
    }

    #[test]
    fn test_replace_keeps_position() {
        let parent = NodeRef::element("div");
        let (a, b, c) = (
            NodeRef::element("a"),
            NodeRef::element("b"),
            NodeRef::element("i"),
        );
        parent.append_child(&a);
        parent.append_child(&b);
        a.replace_with(&c);
        assert_eq!(parent.inner_html(), "<i></i><b></b>");
        assert!(a.parent().is_none());
    }

    #[test]
    fn test_clone_is_independent() {
        let div = NodeRef::element("div");
        div.append_child(&NodeRef::text("Hello"));
        div.set_data("$scope", Value::from(1));
        let copy = div.deep_clone();
        copy.add_class("extra");
        assert_eq!(div.outer_html(), "<div>Hello</div>");
        assert!(copy.data("$scope").is_none());
    }

    #[test]
    fn test_inherited_data_walks_ancestors() {
        let outer = NodeRef::element("div");
        let inner = NodeRef::element("span");
        outer.append_child(&inner);
        outer.set_data("$fooController", Value::from("ctrl"));
        assert_eq!(inner.inherited_data("$fooController"), Some(Value::from("ctrl")));
        assert_eq!(inner.data("$fooController"), None);
    }

    #[test]
    fn test_class_helpers() {
        let div = NodeRef::element("div");
        div.add_class("a b");
        div.add_class("b c");
        div.remove_class("a");
        assert_eq!(div.attr("class").as_deref(), Some("b c"));
    }
}
