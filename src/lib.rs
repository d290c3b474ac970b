//! xmlsilo - binary XML containers with XPath-subset queries
//!
//! An XML document is compiled once into a packed, mmap-friendly blob
//! (a "silo") and then navigated by offset arithmetic without reparsing:
//!
//! - [`Builder`] compiles XML sources into the binary format
//! - [`Silo`] loads a blob (from a file via mmap, or from bytes) and owns
//!   the string pool
//! - [`Node`] is a lightweight view over one element, with traversal,
//!   projection and rooted query operations
//!
//! ```
//! use std::sync::Arc;
//! use xmlsilo::{Builder, CompileFlags, LoadFlags, Silo};
//!
//! let mut builder = Builder::new();
//! builder.import_xml("<a><b type=\"x\">42</b></a>")?;
//! let blob = builder.compile(CompileFlags::NONE)?;
//! let silo = Arc::new(Silo::from_bytes(blob, LoadFlags::NONE)?);
//!
//! let root = silo.root().unwrap();
//! assert_eq!(root.query_text("b[@type='x']")?, "42");
//! # Ok::<(), xmlsilo::Error>(())
//! ```

pub mod builder;
pub mod error;
pub mod export;
pub mod node;
mod query;
pub mod silo;

pub use builder::{Builder, CompileFlags};
pub use error::{Error, ErrorKind, Result};
pub use export::ExportFlags;
pub use node::Node;
pub use silo::{LoadFlags, Silo};
