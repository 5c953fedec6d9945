//! LNHDL passes - correctness and analysis passes over LNAST
//!
//! This crate handles:
//! - The numeric interval lattice used by bitwidth inference
//! - Structural semantic validation of lowered trees

pub mod bitwidth_range;
pub mod semantic;

pub use bitwidth_range::{Bound, BitwidthRange, BITS_MAX};
pub use semantic::{semantic_check, SemanticError, SemanticReport};
