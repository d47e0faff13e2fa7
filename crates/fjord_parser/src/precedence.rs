//! The operator-info stack used by infix expression and pattern parsing.
//!
//! The parser pushes one `OpInfo` per pending infix operator and reduces
//! the stack whenever an incoming operator binds no tighter than the top.
//! Precedence and associativity are derived from the operator spelling in
//! `fjord_ast::name`; both expression and pattern parsing share this stack,
//! distinguished only by which binop shape the reduction builds.

use fjord_ast::name::Name;
use fjord_ast::tree::Tree;

/// A pending infix application: the left operand, the operator, its type
/// arguments (expressions only), and the operator's source offset.
pub struct OpInfo<'a> {
    pub operand: Tree<'a>,
    pub operator: Name,
    pub targs: Vec<Tree<'a>>,
    pub offset: u32,
}

impl<'a> OpInfo<'a> {
    pub fn new(operand: Tree<'a>, operator: Name, targs: Vec<Tree<'a>>, offset: u32) -> Self {
        Self {
            operand,
            operator,
            targs,
            offset,
        }
    }
}
