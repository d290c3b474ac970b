//! XML export
//!
//! Serialises a subtree of the silo back to XML text. The exporter walks
//! record offsets directly; formatting is controlled by a small bitmask.

use crate::error::{Error, Result};
use crate::silo::Silo;

const XML_HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>";

/// Formatting flags for [`export_node`], combined with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExportFlags(u32);

impl ExportFlags {
    /// Minimal single-line output
    pub const NONE: ExportFlags = ExportFlags(0);
    /// Prepend the XML declaration
    pub const ADD_HEADER: ExportFlags = ExportFlags(1 << 0);
    /// One element per line
    pub const FORMAT_MULTILINE: ExportFlags = ExportFlags(1 << 1);
    /// Two-space indentation per depth level
    pub const FORMAT_INDENT: ExportFlags = ExportFlags(1 << 2);
    /// Include the anchor's following siblings, not just its subtree
    pub const INCLUDE_SIBLINGS: ExportFlags = ExportFlags(1 << 3);

    pub const fn contains(self, other: ExportFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ExportFlags {
    type Output = ExportFlags;

    fn bitor(self, rhs: ExportFlags) -> ExportFlags {
        ExportFlags(self.0 | rhs.0)
    }
}

/// Serialise the subtree rooted at `off`.
pub(crate) fn export_node(silo: &Silo, off: u32, flags: ExportFlags) -> Result<String> {
    let mut out = String::new();
    if flags.contains(ExportFlags::ADD_HEADER) {
        out.push_str(XML_HEADER);
        if flags.contains(ExportFlags::FORMAT_MULTILINE) {
            out.push('\n');
        }
    }
    // Indentation is relative to the anchor, not the silo root
    let base_depth = silo.snode_depth(off);
    let mut cursor = Some(off);
    while let Some(node) = cursor {
        write_element(silo, node, base_depth, flags, &mut out)?;
        cursor = if flags.contains(ExportFlags::INCLUDE_SIBLINGS) {
            silo.snode_next(node)
        } else {
            None
        };
    }
    Ok(out)
}

fn write_element(
    silo: &Silo,
    off: u32,
    base_depth: u32,
    flags: ExportFlags,
    out: &mut String,
) -> Result<()> {
    let name = silo
        .snode_element(off)
        .ok_or_else(|| Error::io("corrupt silo: unresolvable element name"))?;
    let rel_depth = silo.snode_depth(off).saturating_sub(base_depth);

    push_indent(flags, rel_depth, out);
    out.push('<');
    out.push_str(name);
    for idx in 0..silo.snode_attr_count(off) {
        if let Some((attr_name, attr_value)) = silo.snode_attr_at(off, idx) {
            out.push(' ');
            out.push_str(attr_name);
            out.push_str("=\"");
            escape_into(attr_value, true, out);
            out.push('"');
        }
    }

    let text = silo.snode_text(off);
    let child = silo.snode_child(off);
    if text.is_none() && child.is_none() {
        out.push_str("/>");
        push_newline(flags, out);
        return Ok(());
    }

    out.push('>');
    if let Some(text) = text {
        escape_into(text, false, out);
    }
    if child.is_some() {
        push_newline(flags, out);
        let mut cursor = child;
        while let Some(child_off) = cursor {
            write_element(silo, child_off, base_depth, flags, out)?;
            cursor = silo.snode_next(child_off);
        }
        push_indent(flags, rel_depth, out);
    }
    out.push_str("</");
    out.push_str(name);
    out.push('>');
    push_newline(flags, out);
    Ok(())
}

fn push_indent(flags: ExportFlags, depth: u32, out: &mut String) {
    if flags.contains(ExportFlags::FORMAT_INDENT) {
        for _ in 0..depth {
            out.push_str("  ");
        }
    }
}

fn push_newline(flags: ExportFlags, out: &mut String) {
    if flags.contains(ExportFlags::FORMAT_MULTILINE) {
        out.push('\n');
    }
}

/// Escape markup characters; `attr` additionally escapes double quotes
/// because attribute values are always emitted in double quotes.
fn escape_into(text: &str, attr: bool, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attr => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{Builder, CompileFlags};
    use crate::silo::LoadFlags;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn compile(xml: &str) -> Arc<Silo> {
        let mut builder = Builder::new();
        builder.import_xml(xml).unwrap();
        let blob = builder.compile(CompileFlags::NONE).unwrap();
        Arc::new(Silo::from_bytes(blob, LoadFlags::NONE).unwrap())
    }

    #[test]
    fn test_export_single_line() {
        let silo = compile("<a><b>hi</b><c/></a>");
        let out = silo.root().unwrap().export(ExportFlags::NONE).unwrap();
        assert_eq!(out, "<a><b>hi</b><c/></a>");
    }

    #[test]
    fn test_export_empty_element() {
        let silo = compile("<a><b/></a>");
        let b = silo.root().unwrap().child().unwrap();
        assert_eq!(b.export(ExportFlags::NONE).unwrap(), "<b/>");
    }

    #[test]
    fn test_export_attributes() {
        let silo = compile("<a><b type=\"x\" id=\"1\">v</b></a>");
        let b = silo.root().unwrap().child().unwrap();
        assert_eq!(
            b.export(ExportFlags::NONE).unwrap(),
            "<b type=\"x\" id=\"1\">v</b>"
        );
    }

    #[test]
    fn test_export_escapes_markup() {
        let silo = compile("<a attr=\"x &quot;y&quot; &amp; z\">a&amp;b &lt;tag&gt;</a>");
        let out = silo.root().unwrap().export(ExportFlags::NONE).unwrap();
        assert_eq!(
            out,
            "<a attr=\"x &quot;y&quot; &amp; z\">a&amp;b &lt;tag&gt;</a>"
        );
    }

    #[test]
    fn test_export_canonical_roundtrip() {
        let xml = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
                   <a>\n\
                   \x20\x20<b type=\"x\">hi</b>\n\
                   \x20\x20<c/>\n\
                   </a>\n";
        let silo = compile(xml);
        let out = silo
            .export(
                ExportFlags::ADD_HEADER
                    | ExportFlags::FORMAT_MULTILINE
                    | ExportFlags::FORMAT_INDENT
                    | ExportFlags::INCLUDE_SIBLINGS,
            )
            .unwrap();
        assert_eq!(out, xml);
    }

    #[test]
    fn test_export_multiline_without_indent() {
        let silo = compile("<a><b>hi</b></a>");
        let out = silo
            .root()
            .unwrap()
            .export(ExportFlags::FORMAT_MULTILINE)
            .unwrap();
        assert_eq!(out, "<a>\n<b>hi</b>\n</a>\n");
    }

    #[test]
    fn test_export_include_siblings() {
        let silo = compile("<a><b>1</b><c>2</c></a>");
        let b = silo.root().unwrap().child().unwrap();
        assert_eq!(b.export(ExportFlags::NONE).unwrap(), "<b>1</b>");
        assert_eq!(
            b.export(ExportFlags::INCLUDE_SIBLINGS).unwrap(),
            "<b>1</b><c>2</c>"
        );
    }

    #[test]
    fn test_export_indentation_is_anchor_relative() {
        let silo = compile("<a><b><c>deep</c></b></a>");
        let b = silo.root().unwrap().child().unwrap();
        let out = b
            .export(ExportFlags::FORMAT_MULTILINE | ExportFlags::FORMAT_INDENT)
            .unwrap();
        assert_eq!(out, "<b>\n  <c>deep</c>\n</b>\n");
    }

    #[test]
    fn test_query_export_equals_plain_export() {
        let silo = compile("<a><b type=\"x\">hi</b></a>");
        let root = silo.root().unwrap();
        let b = root.child().unwrap();
        assert_eq!(
            root.query_export("b").unwrap(),
            b.export(ExportFlags::NONE).unwrap()
        );
    }

    #[test]
    fn test_export_mixed_text_and_children() {
        let silo = compile("<a>note<b/></a>");
        let out = silo.root().unwrap().export(ExportFlags::NONE).unwrap();
        assert_eq!(out, "<a>note<b/></a>");
    }

    #[test]
    fn test_flags_contains() {
        let flags = ExportFlags::ADD_HEADER | ExportFlags::FORMAT_INDENT;
        assert!(flags.contains(ExportFlags::ADD_HEADER));
        assert!(flags.contains(ExportFlags::FORMAT_INDENT));
        assert!(!flags.contains(ExportFlags::FORMAT_MULTILINE));
        assert!(flags.contains(ExportFlags::NONE));
    }
}
