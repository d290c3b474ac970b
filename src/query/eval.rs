//! Query evaluation
//!
//! Walks the packed node records directly by offset; node views are only
//! materialised by the caller for the final results. Results come out in
//! document order because each sibling chain is walked front to back and
//! every match's subtree is exhausted before its next sibling.

use tracing::trace;

use super::parser::{Predicate, Program, Step};
use crate::silo::Silo;

/// Evaluate `program` against `silo`, collecting up to `limit` matching
/// record offsets (0 means unlimited).
///
/// `anchor` is the record offset the expression was rooted at, or `None`
/// for silo-level evaluation. Rooted evaluation starts at the anchor's
/// sibling chain; absolute expressions and silo-level evaluation start at
/// the root chain.
pub fn run(silo: &Silo, program: &Program, anchor: Option<u32>, limit: usize) -> Vec<u32> {
    let chain = if program.absolute {
        silo.sroot()
    } else {
        match anchor {
            Some(off) => match silo.snode_parent(off) {
                Some(parent) => silo.snode_child(parent),
                None => silo.sroot(),
            },
            None => silo.sroot(),
        }
    };

    let mut out = Vec::new();
    eval_chain(silo, chain, &program.steps, limit, &mut out);
    trace!(matches = out.len(), limit, "query evaluated");
    out
}

/// Evaluate the step sequence against a sibling chain starting at
/// `chain`. Returns true when the limit has been reached.
fn eval_chain(
    silo: &Silo,
    chain: Option<u32>,
    steps: &[Step],
    limit: usize,
    out: &mut Vec<u32>,
) -> bool {
    let Some((step, rest)) = steps.split_first() else {
        return false;
    };
    trace!(?step, chain, "evaluating step");

    let mut position = 0usize;
    let mut cursor = chain;
    while let Some(off) = cursor {
        match step {
            Step::Child { name, predicate } => {
                if silo.snode_element(off) == Some(name.as_str()) {
                    position += 1;
                    if predicate_matches(silo, off, position, predicate.as_ref())
                        && continue_from(silo, off, rest, limit, out)
                    {
                        return true;
                    }
                }
            }
            Step::Attribute(name) => {
                if silo.snode_attr(off, name).is_some()
                    && continue_from(silo, off, rest, limit, out)
                {
                    return true;
                }
            }
        }
        cursor = silo.snode_next(off);
    }
    false
}

/// `off` has matched every step so far; emit it or keep matching.
fn continue_from(silo: &Silo, off: u32, rest: &[Step], limit: usize, out: &mut Vec<u32>) -> bool {
    match rest.first() {
        None => {
            out.push(off);
            limit != 0 && out.len() >= limit
        }
        // The attribute axis applies to the node itself, not its children
        Some(Step::Attribute(name)) => {
            silo.snode_attr(off, name).is_some()
                && continue_from(silo, off, &rest[1..], limit, out)
        }
        Some(Step::Child { .. }) => eval_chain(silo, silo.snode_child(off), rest, limit, out),
    }
}

fn predicate_matches(silo: &Silo, off: u32, position: usize, predicate: Option<&Predicate>) -> bool {
    match predicate {
        None => true,
        Some(Predicate::Position(n)) => position == *n,
        Some(Predicate::AttrEq { name, value }) => {
            silo.snode_attr(off, name) == Some(value.as_str())
        }
        Some(Predicate::TextEq(value)) => silo.snode_text(off) == Some(value.as_str()),
        Some(Predicate::NameEq(value)) => silo.snode_element(off) == Some(value.as_str()),
    }
}
