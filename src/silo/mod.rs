//! Silo - the loaded binary XML container
//!
//! A silo owns the packed blob (a memory-mapped file or a byte vector)
//! and resolves all navigation by offset arithmetic inside it. The blob
//! and its string pool are immutable once loaded, so a silo can be shared
//! freely behind an `Arc`; node views keep it alive.

pub(crate) mod format;

use std::fmt::Write as _;
use std::fs::File;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use lru::LruCache;
use memmap2::Mmap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::export::{self, ExportFlags};
use crate::node::Node;
use crate::query::{self, Program};
use format::{Header, RawNode, HEADER_LEN, NONE};

/// Parsed query programs cached per silo.
const QUERY_CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(64) {
    Some(size) => size,
    None => unreachable!(),
};

/// Flags controlling silo loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadFlags(u32);

impl LoadFlags {
    pub const NONE: LoadFlags = LoadFlags(0);
    /// Skip the magic/version check (CLI `--force`)
    pub const NO_MAGIC: LoadFlags = LoadFlags(1 << 0);

    pub const fn contains(self, other: LoadFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for LoadFlags {
    type Output = LoadFlags;

    fn bitor(self, rhs: LoadFlags) -> LoadFlags {
        LoadFlags(self.0 | rhs.0)
    }
}

#[derive(Debug)]
enum Blob {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl Blob {
    #[inline]
    fn bytes(&self) -> &[u8] {
        match self {
            Blob::Owned(bytes) => bytes,
            Blob::Mapped(map) => map,
        }
    }
}

/// An immutable, loaded silo.
#[derive(Debug)]
pub struct Silo {
    blob: Blob,
    header: Header,
    programs: Mutex<LruCache<String, Arc<Program>>>,
}

impl Silo {
    /// Load a silo from an in-memory byte vector.
    pub fn from_bytes(bytes: Vec<u8>, flags: LoadFlags) -> Result<Silo> {
        Silo::new(Blob::Owned(bytes), flags)
    }

    /// Load a silo by memory-mapping a file.
    pub fn load_from_file(path: impl AsRef<Path>, flags: LoadFlags) -> Result<Silo> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| {
            Error::io(format!("failed to open {}", path.display())).set_source(err)
        })?;
        // Safety: the mapping is read-only and the silo format is
        // bounds-checked on every access
        let map = unsafe { Mmap::map(&file) }.map_err(|err| {
            Error::io(format!("failed to map {}", path.display())).set_source(err)
        })?;
        let silo = Silo::new(Blob::Mapped(map), flags)?;
        debug!(
            path = %path.display(),
            nodes = silo.header.node_count,
            "loaded silo"
        );
        Ok(silo)
    }

    fn new(blob: Blob, flags: LoadFlags) -> Result<Silo> {
        let bytes = blob.bytes();
        let Some((header, magic_ok)) = Header::decode(bytes) else {
            return Err(Error::io("silo is truncated: no header"));
        };
        if !magic_ok && !flags.contains(LoadFlags::NO_MAGIC) {
            return Err(Error::io("not a silo file (bad magic or version)"));
        }
        let needed = HEADER_LEN as u64 + header.nodetab_len as u64 + header.strtab_len as u64;
        if (bytes.len() as u64) < needed {
            return Err(Error::io(format!(
                "silo is truncated: need {needed} bytes, have {}",
                bytes.len()
            )));
        }
        Ok(Silo {
            blob,
            header,
            programs: Mutex::new(LruCache::new(QUERY_CACHE_SIZE)),
        })
    }

    /// Number of node records in the silo.
    pub fn node_count(&self) -> u32 {
        self.header.node_count
    }

    #[inline]
    fn nodetab(&self) -> &[u8] {
        let start = HEADER_LEN;
        &self.blob.bytes()[start..start + self.header.nodetab_len as usize]
    }

    #[inline]
    fn strtab(&self) -> &[u8] {
        let start = HEADER_LEN + self.header.nodetab_len as usize;
        &self.blob.bytes()[start..start + self.header.strtab_len as usize]
    }

    // === Primitive navigation over record offsets ===

    #[inline]
    pub(crate) fn snode(&self, off: u32) -> Option<RawNode> {
        format::read_node(self.nodetab(), off)
    }

    /// Offset of the first root record, `None` for an empty silo.
    pub(crate) fn sroot(&self) -> Option<u32> {
        (self.header.node_count > 0).then_some(0)
    }

    pub(crate) fn snode_parent(&self, off: u32) -> Option<u32> {
        let node = self.snode(off)?;
        (node.parent != NONE).then_some(node.parent)
    }

    pub(crate) fn snode_next(&self, off: u32) -> Option<u32> {
        let node = self.snode(off)?;
        (node.next != NONE).then_some(node.next)
    }

    /// First child, found by pre-order adjacency: the record immediately
    /// after `off` is its first child iff its depth is one greater.
    pub(crate) fn snode_child(&self, off: u32) -> Option<u32> {
        let node = self.snode(off)?;
        let child_off = off.checked_add(node.len())?;
        let child = self.snode(child_off)?;
        (child.depth == node.depth.checked_add(1)?).then_some(child_off)
    }

    pub(crate) fn snode_depth(&self, off: u32) -> u32 {
        self.snode(off).map(|node| node.depth as u32).unwrap_or(0)
    }

    pub(crate) fn snode_element(&self, off: u32) -> Option<&str> {
        let node = self.snode(off)?;
        format::pool_str(self.strtab(), node.name)
    }

    pub(crate) fn snode_text(&self, off: u32) -> Option<&str> {
        let node = self.snode(off)?;
        format::pool_str(self.strtab(), node.text)
    }

    pub(crate) fn snode_attr_count(&self, off: u32) -> u16 {
        self.snode(off).map(|node| node.attr_count).unwrap_or(0)
    }

    /// The `idx`-th attribute as a resolved (name, value) pair.
    pub(crate) fn snode_attr_at(&self, off: u32, idx: u16) -> Option<(&str, &str)> {
        if idx >= self.snode_attr_count(off) {
            return None;
        }
        let (name_off, value_off) = format::read_attr(self.nodetab(), off, idx)?;
        let name = format::pool_str(self.strtab(), name_off)?;
        let value = format::pool_str(self.strtab(), value_off)?;
        Some((name, value))
    }

    /// Linear attribute lookup; the first occurrence of a duplicated
    /// name wins.
    pub(crate) fn snode_attr(&self, off: u32, name: &str) -> Option<&str> {
        let node = self.snode(off)?;
        for idx in 0..node.attr_count {
            let (name_off, value_off) = format::read_attr(self.nodetab(), off, idx)?;
            if format::pool_str(self.strtab(), name_off) == Some(name) {
                return format::pool_str(self.strtab(), value_off);
            }
        }
        None
    }

    // === Public surface ===

    /// Root node view, or `None` for an empty silo.
    pub fn root(self: &Arc<Self>) -> Option<Node> {
        self.sroot().map(|off| Node::new(Arc::clone(self), off))
    }

    /// Run a query from the silo root chain, returning up to `limit`
    /// matches (0 means unlimited) in document order.
    pub fn query(self: &Arc<Self>, xpath: &str, limit: usize) -> Result<Vec<Node>> {
        self.query_internal(None, xpath, limit)
    }

    /// Run a query, returning the first match.
    pub fn query_first(self: &Arc<Self>, xpath: &str) -> Result<Node> {
        let mut results = self.query(xpath, 1)?;
        Ok(results.swap_remove(0))
    }

    pub(crate) fn query_with_anchor(
        self: &Arc<Self>,
        anchor: u32,
        xpath: &str,
        limit: usize,
    ) -> Result<Vec<Node>> {
        self.query_internal(Some(anchor), xpath, limit)
    }

    fn query_internal(
        self: &Arc<Self>,
        anchor: Option<u32>,
        xpath: &str,
        limit: usize,
    ) -> Result<Vec<Node>> {
        let program = self.program(xpath)?;
        let offsets = query::eval::run(self, &program, anchor, limit);
        if offsets.is_empty() {
            return Err(Error::not_found(format!("no results for {xpath:?}")));
        }
        Ok(offsets
            .into_iter()
            .map(|off| Node::new(Arc::clone(self), off))
            .collect())
    }

    /// Parse `xpath`, going through the per-silo program cache.
    fn program(&self, xpath: &str) -> Result<Arc<Program>> {
        let mut cache = self.lock_programs();
        if let Some(program) = cache.get(xpath) {
            return Ok(Arc::clone(program));
        }
        let program = Arc::new(query::parser::parse(xpath)?);
        cache.put(xpath.to_string(), Arc::clone(&program));
        Ok(program)
    }

    fn lock_programs(&self) -> MutexGuard<'_, LruCache<String, Arc<Program>>> {
        // A poisoned lock only ever loses cached programs; recover
        match self.programs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Serialise the whole silo back to XML starting from the root.
    pub fn export(&self, flags: ExportFlags) -> Result<String> {
        let root = self
            .sroot()
            .ok_or_else(|| Error::not_found("silo has no root node"))?;
        export::export_node(self, root, flags)
    }

    /// Human-readable dump of every record, for debugging and the CLI.
    pub fn dump(&self) -> String {
        let mut out = format!(
            "silo: {} nodes, {} node-table bytes, {} pool bytes\n",
            self.header.node_count, self.header.nodetab_len, self.header.strtab_len
        );
        let mut off = 0u32;
        for _ in 0..self.header.node_count {
            let Some(node) = self.snode(off) else { break };
            let _ = write!(
                out,
                "[{off:#010x}] {:indent$}{}",
                "",
                self.snode_element(off).unwrap_or("?"),
                indent = node.depth as usize * 2
            );
            for idx in 0..node.attr_count {
                if let Some((name_off, value_off)) = format::read_attr(self.nodetab(), off, idx) {
                    let _ = write!(
                        out,
                        " {}='{}'",
                        format::pool_str(self.strtab(), name_off).unwrap_or("?"),
                        format::pool_str(self.strtab(), value_off).unwrap_or("?")
                    );
                }
            }
            if let Some(text) = self.snode_text(off) {
                let _ = write!(out, " text='{text}'");
            }
            out.push('\n');
            off += node.len();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{Builder, CompileFlags};

    fn compile(xml: &str) -> Arc<Silo> {
        let mut builder = Builder::new();
        builder.import_xml(xml).unwrap();
        let blob = builder.compile(CompileFlags::NONE).unwrap();
        Arc::new(Silo::from_bytes(blob, LoadFlags::NONE).unwrap())
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut builder = Builder::new();
        builder.import_xml("<a/>").unwrap();
        let mut blob = builder.compile(CompileFlags::NONE).unwrap();
        blob[0] = b'!';
        let err = Silo::from_bytes(blob.clone(), LoadFlags::NONE).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
        // --force path
        assert!(Silo::from_bytes(blob, LoadFlags::NO_MAGIC).is_ok());
    }

    #[test]
    fn test_truncated_rejected() {
        let err = Silo::from_bytes(vec![0u8; 3], LoadFlags::NONE).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);

        let mut builder = Builder::new();
        builder.import_xml("<a><b/></a>").unwrap();
        let mut blob = builder.compile(CompileFlags::NONE).unwrap();
        blob.truncate(blob.len() - 4);
        assert!(Silo::from_bytes(blob, LoadFlags::NONE).is_err());
    }

    #[test]
    fn test_primitive_navigation() {
        let silo = compile("<a><b>hi</b><c/></a>");
        let root = silo.sroot().unwrap();
        assert_eq!(silo.snode_element(root), Some("a"));
        assert_eq!(silo.snode_depth(root), 0);
        assert_eq!(silo.snode_parent(root), None);

        let b = silo.snode_child(root).unwrap();
        assert_eq!(silo.snode_element(b), Some("b"));
        assert_eq!(silo.snode_text(b), Some("hi"));
        assert_eq!(silo.snode_depth(b), 1);
        assert_eq!(silo.snode_parent(b), Some(root));

        let c = silo.snode_next(b).unwrap();
        assert_eq!(silo.snode_element(c), Some("c"));
        assert_eq!(silo.snode_next(c), None);
        assert_eq!(silo.snode_child(c), None);
    }

    #[test]
    fn test_attr_lookup_first_occurrence_wins() {
        let silo = compile("<a><b k=\"1\" k=\"2\" other=\"x\"/></a>");
        let b = silo.snode_child(silo.sroot().unwrap()).unwrap();
        assert_eq!(silo.snode_attr(b, "k"), Some("1"));
        assert_eq!(silo.snode_attr(b, "other"), Some("x"));
        assert_eq!(silo.snode_attr(b, "K"), None, "lookup is case-sensitive");
        assert_eq!(silo.snode_attr(b, "missing"), None);
    }

    #[test]
    fn test_load_from_file_roundtrip() {
        let mut builder = Builder::new();
        builder.import_xml("<a><b>42</b></a>").unwrap();
        let blob = builder.compile(CompileFlags::NONE).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.silo");
        std::fs::write(&path, &blob).unwrap();

        let silo = Arc::new(Silo::load_from_file(&path, LoadFlags::NONE).unwrap());
        assert_eq!(silo.node_count(), 2);
        assert_eq!(silo.root().unwrap().query_text("b").unwrap(), "42");
    }

    #[test]
    fn test_load_missing_file() {
        let err = Silo::load_from_file("/does/not/exist.silo", LoadFlags::NONE).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
    }

    #[test]
    fn test_dump_lists_records() {
        let silo = compile("<a><b type=\"x\">hi</b></a>");
        let dump = silo.dump();
        assert!(dump.contains("2 nodes"));
        assert!(dump.contains("a"));
        assert!(dump.contains("  b type='x' text='hi'"));
    }

    #[test]
    fn test_query_cache_reuse() {
        let silo = compile("<a><b>1</b></a>");
        // Same expression twice: second round trips through the cache
        assert_eq!(silo.query("a/b", 0).unwrap().len(), 1);
        assert_eq!(silo.query("a/b", 0).unwrap().len(), 1);
    }

    #[test]
    fn test_query_first_from_silo() {
        let silo = compile("<a><b>first</b><b>second</b></a>");
        let node = silo.query_first("a/b").unwrap();
        assert_eq!(node.text(), Some("first"));
    }
}
