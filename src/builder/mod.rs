//! XML to silo compiler
//!
//! The builder imports one or more XML sources into an in-memory tree,
//! then serialises the merged forest to the packed silo format: records
//! in pre-order with parent/next links resolved to byte offsets, and an
//! append-only pool of interned strings.

mod entities;
mod tokenizer;

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::silo::format::{self, Header, NONE};

use tokenizer::{Token, Tokenizer};

/// Flags controlling compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompileFlags(u32);

impl CompileFlags {
    /// Trim surrounding whitespace from text content
    pub const NONE: CompileFlags = CompileFlags(0);
    /// Keep text content verbatim
    pub const LITERAL_TEXT: CompileFlags = CompileFlags(1 << 0);

    pub const fn contains(self, other: CompileFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for CompileFlags {
    type Output = CompileFlags;

    fn bitor(self, rhs: CompileFlags) -> CompileFlags {
        CompileFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Default)]
struct ImportNode {
    name: String,
    /// Concatenation of this element's text runs, entities decoded
    text: String,
    attrs: Vec<(String, String)>,
    children: Vec<ImportNode>,
}

/// Compiles XML sources into a silo blob.
///
/// Each imported source contributes its top-level elements as additional
/// roots; the compiled silo is a forest in import order.
#[derive(Default)]
pub struct Builder {
    roots: Vec<ImportNode>,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Import an XML document from a string.
    pub fn import_xml(&mut self, xml: &str) -> Result<()> {
        let mut tokenizer = Tokenizer::new(xml.as_bytes());
        let mut stack: Vec<ImportNode> = Vec::new();
        let roots_before = self.roots.len();

        loop {
            match tokenizer.next_token()? {
                Token::Start { name, attrs, empty } => {
                    let node = ImportNode {
                        name: name_string(name)?,
                        attrs: attrs
                            .into_iter()
                            .map(|(attr_name, attr_value)| {
                                Ok((name_string(attr_name)?, entities::decode(attr_value)?))
                            })
                            .collect::<Result<_>>()?,
                        ..ImportNode::default()
                    };
                    if empty {
                        self.attach(&mut stack, node);
                    } else {
                        stack.push(node);
                    }
                }
                Token::End { name } => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| Error::io("malformed XML: unmatched closing tag"))?;
                    if node.name.as_bytes() != name {
                        return Err(Error::io(format!(
                            "malformed XML: expected </{}>",
                            node.name
                        )));
                    }
                    self.attach(&mut stack, node);
                }
                Token::Text { content, cdata } => {
                    match stack.last_mut() {
                        Some(parent) => {
                            if cdata {
                                parent.text.push_str(text_string(content)?);
                            } else {
                                parent.text.push_str(&entities::decode(content)?);
                            }
                        }
                        // Only whitespace may appear between top-level elements
                        None if content.iter().all(u8::is_ascii_whitespace) => {}
                        None => {
                            return Err(Error::io("malformed XML: text outside the root element"))
                        }
                    }
                }
                Token::Eof => break,
            }
        }

        if let Some(open) = stack.last() {
            return Err(Error::io(format!(
                "malformed XML: <{}> is never closed",
                open.name
            )));
        }
        if self.roots.len() == roots_before {
            return Err(Error::io("malformed XML: no root element"));
        }
        debug!(roots = self.roots.len() - roots_before, "imported source");
        Ok(())
    }

    /// Import an XML document from a file.
    pub fn import_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let xml = std::fs::read_to_string(path).map_err(|err| {
            Error::io(format!("failed to read {}", path.display())).set_source(err)
        })?;
        debug!(path = %path.display(), "importing");
        self.import_xml(&xml)
    }

    fn attach(&mut self, stack: &mut [ImportNode], node: ImportNode) {
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => self.roots.push(node),
        }
    }

    /// Serialise the imported forest to a silo blob.
    pub fn compile(&self, flags: CompileFlags) -> Result<Vec<u8>> {
        let mut flat = Vec::new();
        flatten(&self.roots, None, 0, &mut flat)?;

        // First pass: assign record offsets
        let mut offsets = Vec::with_capacity(flat.len());
        let mut cursor = 0u64;
        for entry in &flat {
            offsets.push(cursor as u32);
            let attr_count = u16::try_from(entry.node.attrs.len())
                .map_err(|_| Error::io("too many attributes on one element"))?;
            cursor += format::node_len(attr_count) as u64;
            if cursor >= NONE as u64 {
                return Err(Error::io("silo node table exceeds 4 GiB"));
            }
        }

        // Second pass: write records, interning strings as they appear
        let mut pool = StringPool::default();
        let mut nodetab = Vec::with_capacity(cursor as usize);
        for (idx, entry) in flat.iter().enumerate() {
            let name = pool.intern(&entry.node.name)?;
            let text = match node_text(entry.node, flags) {
                Some(text) => pool.intern(&text)?,
                None => NONE,
            };
            let parent = entry.parent.map(|p| offsets[p]).unwrap_or(NONE);
            let next = entry.next.map(|n| offsets[n]).unwrap_or(NONE);
            debug_assert_eq!(offsets[idx] as usize, nodetab.len());

            nodetab.extend_from_slice(&name.to_le_bytes());
            nodetab.extend_from_slice(&parent.to_le_bytes());
            nodetab.extend_from_slice(&next.to_le_bytes());
            nodetab.extend_from_slice(&text.to_le_bytes());
            nodetab.extend_from_slice(&entry.depth.to_le_bytes());
            nodetab.extend_from_slice(&(entry.node.attrs.len() as u16).to_le_bytes());
            for (attr_name, attr_value) in &entry.node.attrs {
                nodetab.extend_from_slice(&pool.intern(attr_name)?.to_le_bytes());
                nodetab.extend_from_slice(&pool.intern(attr_value)?.to_le_bytes());
            }
        }

        let header = Header {
            node_count: flat.len() as u32,
            nodetab_len: nodetab.len() as u32,
            strtab_len: pool.buf.len() as u32,
        };
        let mut blob = Vec::with_capacity(format::HEADER_LEN + nodetab.len() + pool.buf.len());
        blob.extend_from_slice(&header.encode());
        blob.extend_from_slice(&nodetab);
        blob.extend_from_slice(&pool.buf);
        debug!(
            nodes = header.node_count,
            bytes = blob.len(),
            "compiled silo"
        );
        Ok(blob)
    }
}

struct FlatNode<'a> {
    node: &'a ImportNode,
    parent: Option<usize>,
    next: Option<usize>,
    depth: u16,
}

/// Flatten sibling chains depth-first so records land in pre-order.
fn flatten<'a>(
    nodes: &'a [ImportNode],
    parent: Option<usize>,
    depth: u16,
    flat: &mut Vec<FlatNode<'a>>,
) -> Result<()> {
    let mut prev: Option<usize> = None;
    for node in nodes {
        let idx = flat.len();
        flat.push(FlatNode {
            node,
            parent,
            next: None,
            depth,
        });
        if let Some(prev_idx) = prev {
            flat[prev_idx].next = Some(idx);
        }
        prev = Some(idx);
        let child_depth = depth
            .checked_add(1)
            .ok_or_else(|| Error::io("document nesting is too deep"))?;
        flatten(&node.children, Some(idx), child_depth, flat)?;
    }
    Ok(())
}

/// Apply the text policy: whitespace-only text is dropped, and unless
/// `LITERAL_TEXT` is set the remaining text is trimmed at both ends.
fn node_text(node: &ImportNode, flags: CompileFlags) -> Option<Cow<'_, str>> {
    if node.text.trim().is_empty() {
        return None;
    }
    if flags.contains(CompileFlags::LITERAL_TEXT) {
        Some(Cow::Borrowed(node.text.as_str()))
    } else {
        Some(Cow::Borrowed(node.text.trim()))
    }
}

#[derive(Default)]
struct StringPool {
    buf: Vec<u8>,
    interned: HashMap<String, u32>,
}

impl StringPool {
    /// Intern a string, returning its pool offset. The pool only ever
    /// grows; equal strings share one entry.
    fn intern(&mut self, value: &str) -> Result<u32> {
        if let Some(&offset) = self.interned.get(value) {
            return Ok(offset);
        }
        if value.as_bytes().contains(&0) {
            return Err(Error::io("string contains a NUL byte"));
        }
        let offset = u32::try_from(self.buf.len())
            .map_err(|_| Error::io("silo string pool exceeds 4 GiB"))?;
        if offset == NONE {
            return Err(Error::io("silo string pool exceeds 4 GiB"));
        }
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(0);
        self.interned.insert(value.to_string(), offset);
        Ok(offset)
    }
}

fn name_string(bytes: &[u8]) -> Result<String> {
    Ok(text_string(bytes)?.to_string())
}

fn text_string(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes)
        .map_err(|err| Error::io("XML source is not valid UTF-8").set_source(err))
}
