//! Names: interned identifiers with a term/type namespace distinction.
//!
//! The same spelling can name a term and a type; the two never compare
//! equal. The `Names` table owns the interner, the pre-interned standard
//! names, and the fresh-name counters used by the parser's desugarings.
//!
//! Operator precedence and associativity are derived from the spelling
//! here, since they are a property of the name alone.

use fjord_core::intern::{Interner, Symbol};
use std::cell::Cell;
use std::fmt;

/// Which namespace a name lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameSpace {
    Term,
    Type,
}

/// An interned name. Lightweight, O(1) comparison; term and type names
/// with the same spelling are distinct.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Name {
    pub text: Symbol,
    pub space: NameSpace,
}

impl Name {
    #[inline]
    pub fn is_term(&self) -> bool {
        self.space == NameSpace::Term
    }

    #[inline]
    pub fn is_type(&self) -> bool {
        self.space == NameSpace::Type
    }

    /// The same spelling in the term namespace.
    #[inline]
    pub fn to_term(self) -> Name {
        Name { text: self.text, space: NameSpace::Term }
    }

    /// The same spelling in the type namespace.
    #[inline]
    pub fn to_type(self) -> Name {
        Name { text: self.text, space: NameSpace::Type }
    }

    /// Spelling equality, ignoring the namespace.
    #[inline]
    pub fn same_spelling(&self, other: Name) -> bool {
        self.text == other.text
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.space {
            NameSpace::Term => write!(f, "Term({:?})", self.text),
            NameSpace::Type => write!(f, "Type({:?})", self.text),
        }
    }
}

/// Operator precedence level derived from an operator's spelling.
///
/// Levels, lowest to highest: assignment-family operators, `|`, `^`, `&`,
/// `=`/`!`, `<`/`>`, `:`, `+`/`-`, `*`/`/`/`%`, any other symbolic
/// operator, and a maximum level for alphanumeric operators.
pub fn precedence_of(op: &str) -> u8 {
    if is_op_assignment(op) {
        return 0;
    }
    let first = match op.chars().next() {
        Some(c) => c,
        None => return 0,
    };
    if first.is_alphanumeric() || first == '_' {
        return 10;
    }
    match first {
        '|' => 1,
        '^' => 2,
        '&' => 3,
        '=' | '!' => 4,
        '<' | '>' => 5,
        ':' => 6,
        '+' | '-' => 7,
        '*' | '/' | '%' => 8,
        _ => 9,
    }
}

/// An operator is right-associative iff its name ends with `:`.
#[inline]
pub fn is_right_assoc(op: &str) -> bool {
    op.ends_with(':')
}

/// Assignment-family operator: longer than one character, ends in `=`,
/// and does not start with `=`, `<`, `>`, or `!` (so `<=`, `>=`, `!=`,
/// `==` keep their comparison precedence).
pub fn is_op_assignment(op: &str) -> bool {
    op.len() > 1
        && op.ends_with('=')
        && !matches!(op.chars().next(), Some('=' | '<' | '>' | '!'))
}

/// Pre-interned standard names the parser depends on.
pub struct StdNames {
    pub wildcard: Symbol,
    pub wildcard_star: Symbol,
    pub error: Symbol,
    pub empty: Symbol,
    pub empty_package: Symbol,
    pub root_pkg: Symbol,
    pub constructor: Symbol,
    pub this_: Symbol,
    pub any: Symbol,
    pub any_val: Symbol,
    pub unit_type: Symbol,
    pub map: Symbol,
    pub flat_map: Symbol,
    pub foreach: Symbol,
    pub with_filter: Symbol,
    pub package_obj: Symbol,
    pub fjord_pkg: Symbol,
    pub apply: Symbol,
    pub any_ref: Symbol,
    pub product: Symbol,
    pub serializable: Symbol,
    pub string_context: Symbol,
    pub throwable: Symbol,
    pub byname: Symbol,
    pub repeated: Symbol,
    pub anon_class: Symbol,
    pub minus: Symbol,
    pub plus: Symbol,
    pub tilde: Symbol,
    pub bang: Symbol,
    pub star: Symbol,
    pub bar: Symbol,
}

/// The name table: interner, standard names, fresh-name counters, and
/// the primitive value-class spellings of the root language package.
pub struct Names {
    interner: Interner,
    pub std: StdNames,
    fresh_term: Cell<u32>,
    fresh_type: Cell<u32>,
    value_classes: Vec<Symbol>,
}

impl Names {
    pub fn new() -> Self {
        let interner = Interner::new();
        let std = StdNames {
            wildcard: interner.intern_static("_"),
            wildcard_star: interner.intern_static("_*"),
            error: interner.intern_static("<error>"),
            empty: interner.intern_static(""),
            empty_package: interner.intern_static("<empty>"),
            root_pkg: interner.intern_static("_root_"),
            constructor: interner.intern_static("<init>"),
            this_: interner.intern_static("this"),
            any: interner.intern_static("Any"),
            any_val: interner.intern_static("AnyVal"),
            unit_type: interner.intern_static("Unit"),
            map: interner.intern_static("map"),
            flat_map: interner.intern_static("flatMap"),
            foreach: interner.intern_static("foreach"),
            with_filter: interner.intern_static("withFilter"),
            package_obj: interner.intern_static("package"),
            fjord_pkg: interner.intern_static("fjord"),
            apply: interner.intern_static("apply"),
            any_ref: interner.intern_static("AnyRef"),
            product: interner.intern_static("Product"),
            serializable: interner.intern_static("Serializable"),
            string_context: interner.intern_static("StringContext"),
            throwable: interner.intern_static("Throwable"),
            byname: interner.intern_static("<byname>"),
            repeated: interner.intern_static("<repeated>"),
            anon_class: interner.intern_static("$anon"),
            minus: interner.intern_static("-"),
            plus: interner.intern_static("+"),
            tilde: interner.intern_static("~"),
            bang: interner.intern_static("!"),
            star: interner.intern_static("*"),
            bar: interner.intern_static("|"),
        };
        let value_classes = [
            "Byte", "Short", "Char", "Int", "Long", "Float", "Double", "Boolean", "Unit",
        ]
        .iter()
        .map(|s| interner.intern(s))
        .collect();
        Self {
            interner,
            std,
            fresh_term: Cell::new(0),
            fresh_type: Cell::new(0),
            value_classes,
        }
    }

    /// Intern a spelling as a term name.
    #[inline]
    pub fn term(&self, s: &str) -> Name {
        Name { text: self.interner.intern(s), space: NameSpace::Term }
    }

    /// Intern a spelling as a type name.
    #[inline]
    pub fn type_name(&self, s: &str) -> Name {
        Name { text: self.interner.intern(s), space: NameSpace::Type }
    }

    /// A term name from a pre-interned handle.
    #[inline]
    pub fn term_of(&self, text: Symbol) -> Name {
        Name { text, space: NameSpace::Term }
    }

    /// A type name from a pre-interned handle.
    #[inline]
    pub fn type_of(&self, text: Symbol) -> Name {
        Name { text, space: NameSpace::Type }
    }

    /// Read a name's spelling without copying it out of the table. The
    /// closure must not intern.
    #[inline]
    pub fn with_spelling<R>(&self, name: Name, f: impl FnOnce(&str) -> R) -> R {
        self.interner.with_str(name.text, f)
    }

    /// A name's spelling as an owned string, for messages and tests.
    pub fn display(&self, name: Name) -> String {
        self.interner.lookup_string(name.text)
    }

    /// The wildcard term name `_`.
    #[inline]
    pub fn wildcard(&self) -> Name {
        self.term_of(self.std.wildcard)
    }

    /// Whether `name` is the wildcard in either namespace.
    #[inline]
    pub fn is_wildcard(&self, name: Name) -> bool {
        name.text == self.std.wildcard
    }

    /// Fresh term name `prefix$N`. Deterministic per `Names` instance,
    /// collision-free within a compilation unit.
    pub fn fresh_term_name(&self, prefix: &str) -> Name {
        let n = self.fresh_term.get();
        self.fresh_term.set(n + 1);
        self.term(&format!("{}{}", prefix, n))
    }

    /// Fresh type name `prefix$N`.
    pub fn fresh_type_name(&self, prefix: &str) -> Name {
        let n = self.fresh_type.get();
        self.fresh_type.set(n + 1);
        self.type_name(&format!("{}{}", prefix, n))
    }

    /// Tuple accessor name `_1`, `_2`, ...
    pub fn tuple_field(&self, index: usize) -> Name {
        self.term(&format!("_{}", index))
    }

    /// `TupleN` type name.
    pub fn tuple_type(&self, arity: usize) -> Name {
        self.type_name(&format!("Tuple{}", arity))
    }

    /// `FunctionN` type name.
    pub fn function_type(&self, arity: usize) -> Name {
        self.type_name(&format!("Function{}", arity))
    }

    /// The `unary_<op>` selection name for a prefix operator.
    pub fn unary_op(&self, op: Name) -> Name {
        let spelled = self.display(op);
        self.term(&format!("unary_{}", spelled))
    }

    /// Whether `name` spells one of the root package's primitive value
    /// classes or the top value type.
    pub fn is_primitive_value_class(&self, name: Name) -> bool {
        name.text == self.std.any_val || self.value_classes.contains(&name.text)
    }

    /// Precedence of an infix operator name.
    #[inline]
    pub fn precedence(&self, name: Name) -> u8 {
        self.with_spelling(name, precedence_of)
    }

    /// Associativity of an infix operator name.
    #[inline]
    pub fn is_right_assoc(&self, name: Name) -> bool {
        self.with_spelling(name, is_right_assoc)
    }

    /// Whether the spelling starts with a lower-case letter or is a
    /// symbolic name (both count as pattern variables).
    pub fn starts_with_lower(&self, name: Name) -> bool {
        self.with_spelling(name, |s| match s.chars().next() {
            Some(c) => c.is_lowercase() || c == '_',
            None => false,
        })
    }

    /// Whether the spelling consists of operator characters.
    pub fn is_operator_name(&self, name: Name) -> bool {
        self.with_spelling(name, |s| match s.chars().next() {
            Some(c) => !(c.is_alphanumeric() || c == '_' || c == '`'),
            None => false,
        })
    }
}

impl Default for Names {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_type_distinct() {
        let names = Names::new();
        let t = names.term("List");
        let ty = names.type_name("List");
        assert_ne!(t, ty);
        assert!(t.same_spelling(ty));
        assert_eq!(t.to_type(), ty);
    }

    #[test]
    fn test_precedence_table() {
        assert!(precedence_of("*") > precedence_of("+"));
        assert!(precedence_of("+") > precedence_of("::"));
        assert!(precedence_of("::") > precedence_of("<"));
        assert!(precedence_of("<") > precedence_of("=="));
        assert!(precedence_of("==") > precedence_of("&"));
        assert!(precedence_of("&") > precedence_of("^"));
        assert!(precedence_of("^") > precedence_of("|"));
        // alphanumeric operators bind tightest
        assert!(precedence_of("max") > precedence_of("*"));
        // assignment family binds loosest
        assert_eq!(precedence_of("+="), 0);
        assert!(precedence_of("|") > precedence_of("+="));
    }

    #[test]
    fn test_assoc() {
        assert!(is_right_assoc("::"));
        assert!(is_right_assoc("+:"));
        assert!(!is_right_assoc("+"));
        assert!(!is_right_assoc("max"));
    }

    #[test]
    fn test_op_assignment() {
        assert!(is_op_assignment("+="));
        assert!(is_op_assignment("*="));
        assert!(!is_op_assignment("=="));
        assert!(!is_op_assignment("<="));
        assert!(!is_op_assignment(">="));
        assert!(!is_op_assignment("!="));
        assert!(!is_op_assignment("="));
    }

    #[test]
    fn test_fresh_names() {
        let names = Names::new();
        let a = names.fresh_term_name("x$");
        let b = names.fresh_term_name("x$");
        assert_ne!(a, b);
        assert_eq!(names.display(a), "x$0");
        assert_eq!(names.display(b), "x$1");
    }

    #[test]
    fn test_primitive_value_classes() {
        let names = Names::new();
        assert!(names.is_primitive_value_class(names.type_name("Int")));
        assert!(names.is_primitive_value_class(names.type_name("AnyVal")));
        assert!(!names.is_primitive_value_class(names.type_name("String")));
    }

    #[test]
    fn test_lowercase_classification() {
        let names = Names::new();
        assert!(names.starts_with_lower(names.term("x")));
        assert!(!names.starts_with_lower(names.term("X")));
        assert!(names.is_operator_name(names.term("::")));
        assert!(!names.is_operator_name(names.term("cons")));
    }
}
