//! fjord_core: Core utilities for the Fjord compiler.
//!
//! Provides string interning, text positions, and the hash collections
//! used throughout the compiler pipeline.

pub mod collections;
pub mod intern;
pub mod text;

// Re-export commonly used types
pub use intern::{Interner, Symbol};
pub use text::{TextPos, TextRange};
