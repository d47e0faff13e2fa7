//! fjord_ast: AST definitions for the Fjord compiler.
//!
//! The parser produces arena-allocated `Tree` nodes. Names are interned
//! handles with a term/type namespace; modifier sets are bitflags.

pub mod modifiers;
pub mod name;
pub mod tree;

pub use modifiers::{ModFlags, Modifiers};
pub use name::{Name, NameSpace, Names};
pub use tree::{Constant, ImportSelector, Tree, TreeKind};
