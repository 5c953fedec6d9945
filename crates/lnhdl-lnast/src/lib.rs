//! LNHDL LNAST - Language-Neutral Abstract Syntax Tree
//!
//! This crate provides the uniform tree every front-end lowers into:
//! - Closed node tag set (tree-structural, primitive ops, leaves)
//! - Append-only arena tree with stable integer node ids
//! - Per-tree interned string pool
//! - Cursor-style construction and traversal API

pub mod node;
pub mod tree;

pub use node::{LnastNode, LnastNodeType, LnastToken};
pub use tree::{Lnast, LnastIndex, StringId};
