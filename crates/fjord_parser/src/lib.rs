//! fjord_parser: Recursive descent parser for the Fjord language.
//!
//! Consumes the scanner's token stream and builds an arena-allocated AST.
//! Parsing, desugaring, and tree construction are interleaved: pattern
//! definitions, for-comprehensions, placeholder lambdas, string
//! interpolation, and early-init templates are rewritten to canonical tree
//! forms during the parse.

mod parser;
mod precedence;
mod treebuilder;

pub use parser::Parser;
pub use treebuilder::{Enumerator, ForBody, TreeBuilder};

/// Feature toggles, set from the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParserOptions {
    /// Emit deprecation warnings for view bounds, procedure syntax, and
    /// `val` in for-comprehensions.
    pub future: bool,
    /// Allow omitting the parameter type annotation on method parameters.
    pub method_type_infer: bool,
    /// Permit `trait T <: ...` to mark the trait deferred.
    pub virtual_classes: bool,
}
