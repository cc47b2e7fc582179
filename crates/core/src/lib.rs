//! Core types shared across the ASR runtime crates:
//! - Recognition hypotheses and word-level timing
//! - Symbol table (unit dictionary) and token-to-text assembly

pub mod hypothesis;
pub mod symbols;

pub use hypothesis::{Hypothesis, WordPiece};
pub use symbols::{SymbolTable, SymbolTableError};
