//! String interning for the compiler.
//!
//! Identifiers and keywords are interned once and handled as `Symbol`
//! keys afterwards, so name comparison is an integer compare.
//!
//! A parse is strictly sequential, so the table is a plain
//! `lasso::Rodeo` with no synchronization. Interning needs `&mut`
//! access to the table, but the scanner and parser share the table
//! through `&` references; a `RefCell` bridges the two. Because the
//! table is borrowed for the duration of a lookup, spellings are read
//! through a closure (`with_str`) or copied out (`lookup_string`)
//! rather than returned as bare `&str`.

use lasso::{Rodeo, Spur};
use std::cell::RefCell;
use std::fmt;

/// An interned string key. Two `Symbol`s are equal iff their spellings
/// are equal.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Symbol(Spur);

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({:?})", self.0)
    }
}

/// The interning table.
pub struct Interner {
    table: RefCell<Rodeo>,
}

impl Interner {
    pub fn new() -> Self {
        Self {
            table: RefCell::new(Rodeo::default()),
        }
    }

    /// Intern a spelling, returning its key. Repeated calls with the
    /// same spelling return the same key.
    pub fn intern(&self, spelling: &str) -> Symbol {
        Symbol(self.table.borrow_mut().get_or_intern(spelling))
    }

    /// Intern a `'static` spelling without copying it into the table.
    pub fn intern_static(&self, spelling: &'static str) -> Symbol {
        Symbol(self.table.borrow_mut().get_or_intern_static(spelling))
    }

    /// Read a symbol's spelling. The closure must not intern (the table
    /// is borrowed while it runs).
    pub fn with_str<R>(&self, symbol: Symbol, f: impl FnOnce(&str) -> R) -> R {
        f(self.table.borrow().resolve(&symbol.0))
    }

    /// A symbol's spelling as an owned string, for error messages and
    /// debug output.
    pub fn lookup_string(&self, symbol: Symbol) -> String {
        self.table.borrow().resolve(&symbol.0).to_string()
    }

    /// Number of distinct spellings interned so far.
    pub fn len(&self) -> usize {
        self.table.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.borrow().is_empty()
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Interner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interner").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_spelling_same_symbol() {
        let interner = Interner::new();
        let a = interner.intern("withFilter");
        let b = interner.intern("withFilter");
        let c = interner.intern_static("flatMap");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn test_with_str_reads_spelling() {
        let interner = Interner::new();
        let sym = interner.intern("::");
        assert!(interner.with_str(sym, |s| s.ends_with(':')));
        assert_eq!(interner.lookup_string(sym), "::");
    }

    #[test]
    fn test_interning_through_shared_reference() {
        // The scanner interns through `&Interner` while the parser holds
        // the same reference.
        let interner = Interner::new();
        let shared: &Interner = &interner;
        let a = shared.intern("x");
        let b = shared.intern("x");
        assert_eq!(a, b);
    }
}
