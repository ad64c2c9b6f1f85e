//! B+-tree page layouts and split helpers, backing unique indexes.
//!
//! Inner and leaf pages share a page-type byte at offset 0. Keys are
//! opaque serialized tuples, stored length-prefixed; this crate never
//! interprets them, it only keeps them in the positions the tree
//! invariants require. The split helpers move a run of pointers (or leaf
//! entries) to a sibling page and hand back the separating key that must
//! be promoted into the parent.

pub mod inner;
pub mod leaf;

#[cfg(test)]
mod tests;

use common::{DbError, DbResult};

/// Page-type byte values at offset 0 of every index page.
pub const INNER_PAGE_TYPE: u8 = 1;
pub const LEAF_PAGE_TYPE: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BTreePageKind {
    Inner,
    Leaf,
}

/// Reads the shared page-type byte.
pub fn page_kind(data: &[u8]) -> DbResult<BTreePageKind> {
    match data.first() {
        Some(&INNER_PAGE_TYPE) => Ok(BTreePageKind::Inner),
        Some(&LEAF_PAGE_TYPE) => Ok(BTreePageKind::Leaf),
        Some(&other) => Err(DbError::Corruption(format!(
            "unknown B+-tree page type {other}"
        ))),
        None => Err(DbError::Corruption("empty B+-tree page".into())),
    }
}
