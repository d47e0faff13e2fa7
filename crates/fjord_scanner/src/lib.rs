//! fjord_scanner: Lexical scanner for the Fjord language.
//!
//! Converts source text into a token stream with layout-driven statement
//! separators already inserted. The parser drives the scanner as a
//! single-lookahead cursor with save/restore snapshots.

mod scanner;
pub mod token;

pub use scanner::{Scanner, ScannerState};
pub use token::{TokenData, TokenKind};
