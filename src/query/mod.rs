//! XPath-subset query engine
//!
//! A tiny fragment of XPath 1.0: child steps separated by `/`, the
//! attribute axis, and one optional predicate per step. Expressions are
//! parsed into a step program and evaluated directly over packed record
//! offsets.

pub mod eval;
pub mod parser;

pub use parser::{Predicate, Program, Step};
