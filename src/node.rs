//! Node view
//!
//! A node view pairs a shared silo with one record offset and projects
//! the silo's primitive navigation as a traversal API. Views are cheap,
//! ephemeral cursors: every traversal or query materialises a fresh
//! instance, and two views over the same record are independent (notably
//! their data maps). A view keeps its silo alive through the `Arc`.

use std::collections::HashMap;
use std::num::IntErrorKind;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::export::{self, ExportFlags};
use crate::silo::Silo;

/// A navigable handle onto one element of a silo.
pub struct Node {
    silo: Arc<Silo>,
    offset: u32,
    data: HashMap<String, Arc<[u8]>>,
}

impl Node {
    /// Wrap a record offset. No validation; offsets come from the silo
    /// itself or from the evaluator.
    pub(crate) fn new(silo: Arc<Silo>, offset: u32) -> Node {
        Node {
            silo,
            offset,
            data: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn offset(&self) -> u32 {
        self.offset
    }

    // === Traversal ===

    /// The silo's root node.
    pub fn root(&self) -> Option<Node> {
        self.silo.root()
    }

    /// The parent node, or `None` at a root.
    pub fn parent(&self) -> Option<Node> {
        self.silo
            .snode_parent(self.offset)
            .map(|off| Node::new(Arc::clone(&self.silo), off))
    }

    /// The next sibling under the same parent, or `None` if last.
    pub fn next(&self) -> Option<Node> {
        self.silo
            .snode_next(self.offset)
            .map(|off| Node::new(Arc::clone(&self.silo), off))
    }

    /// The first child, or `None` for a leaf.
    pub fn child(&self) -> Option<Node> {
        self.silo
            .snode_child(self.offset)
            .map(|off| Node::new(Arc::clone(&self.silo), off))
    }

    /// All direct children in document order.
    pub fn children(&self) -> Vec<Node> {
        let mut children = Vec::new();
        let mut cursor = self.child();
        while let Some(node) = cursor {
            cursor = node.next();
            children.push(node);
        }
        children
    }

    // === Projection ===

    /// The element's local name.
    pub fn element(&self) -> Option<&str> {
        self.silo.snode_element(self.offset)
    }

    /// The element's immediate text content, or `None` if empty.
    pub fn text(&self) -> Option<&str> {
        self.silo.snode_text(self.offset)
    }

    /// The text of the named attribute, or `None` if missing. Lookup is
    /// case-sensitive and linear in the attribute count.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.silo.snode_attr(self.offset, name)
    }

    /// Depth below the silo root; the root itself is 0.
    pub fn depth(&self) -> u32 {
        self.silo.snode_depth(self.offset)
    }

    // === Node data ===

    /// Data previously attached with [`Node::set_data`].
    pub fn get_data(&self, key: &str) -> Option<&[u8]> {
        self.data.get(key).map(|buf| buf.as_ref())
    }

    /// Attach data to this view. The buffer is shared; the view holds a
    /// strong reference until it is dropped or the key is replaced.
    pub fn set_data(&mut self, key: impl Into<String>, data: Arc<[u8]>) {
        self.data.insert(key.into(), data);
    }

    // === Export ===

    /// Serialise the subtree rooted at this node back to XML.
    pub fn export(&self, flags: ExportFlags) -> Result<String> {
        export::export_node(&self.silo, self.offset, flags)
    }

    // === Queries ===

    /// Run a query rooted at this node, returning up to `limit` matches
    /// (0 means unlimited) in document order.
    ///
    /// The node's own element name is implied: `query_text("b")` on the
    /// root of `<a><b>hi</b></a>` returns `"hi"`.
    pub fn query(&self, xpath: &str, limit: usize) -> Result<Vec<Node>> {
        let element = self
            .element()
            .ok_or_else(|| Error::invalid_argument("anchor node has no element name"))?;
        let rooted = format!("{element}/{xpath}");
        self.silo.query_with_anchor(self.offset, &rooted, limit)
    }

    /// Run a query, returning the first match.
    pub fn query_first(&self, xpath: &str) -> Result<Node> {
        let mut results = self.query(xpath, 1)?;
        Ok(results.swap_remove(0))
    }

    /// Run a query, returning the first match's text.
    pub fn query_text(&self, xpath: &str) -> Result<&str> {
        let node = self.query_first(xpath)?;
        self.silo
            .snode_text(node.offset)
            .ok_or_else(|| Error::not_found("no text data"))
    }

    /// Run a query, parsing the first match's text as an unsigned
    /// integer: base 16 with a `0x` prefix, base 10 otherwise. Overflow
    /// saturates to `u64::MAX`.
    pub fn query_text_as_uint(&self, xpath: &str) -> Result<u64> {
        let text = self.query_text(xpath)?;
        parse_uint(text).ok_or_else(|| Error::not_found(format!("cannot parse {text:?}")))
    }

    /// Run a query, exporting the first match as XML with default flags.
    pub fn query_export(&self, xpath: &str) -> Result<String> {
        self.query_first(xpath)?.export(ExportFlags::NONE)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("offset", &self.offset)
            .field("element", &self.element())
            .finish()
    }
}

fn parse_uint(text: &str) -> Option<u64> {
    let (digits, radix) = match text.strip_prefix("0x") {
        Some(rest) => (rest, 16),
        None => (text, 10),
    };
    match u64::from_str_radix(digits, radix) {
        Ok(value) => Some(value),
        // Overflow saturates rather than failing the query
        Err(err) if matches!(err.kind(), IntErrorKind::PosOverflow) => Some(u64::MAX),
        Err(_) => None,
    }
}
