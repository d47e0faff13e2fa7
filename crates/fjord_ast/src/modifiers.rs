//! Modifier flag sets for definitions.

use crate::name::Name;
use crate::tree::Tree;

bitflags::bitflags! {
    /// Flags carried by `Modifiers`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModFlags: u32 {
        const NONE          = 0;
        const ABSTRACT      = 1 << 0;
        const FINAL         = 1 << 1;
        const SEALED        = 1 << 2;
        const PRIVATE       = 1 << 3;
        const PROTECTED     = 1 << 4;
        const OVERRIDE      = 1 << 5;
        const IMPLICIT      = 1 << 6;
        const LAZY          = 1 << 7;
        const CASE          = 1 << 8;
        const MACRO         = 1 << 9;
        /// `var` rather than `val`.
        const MUTABLE       = 1 << 10;
        /// Declared but not defined (no right-hand side / no body).
        const DEFERRED      = 1 << 11;
        const TRAIT         = 1 << 12;
        /// Early definition, declared before the parent list.
        const PRESUPER      = 1 << 13;
        const PARAM         = 1 << 14;
        const PARAMACCESSOR = 1 << 15;
        const CASEACCESSOR  = 1 << 16;
        const SYNTHETIC     = 1 << 17;
        const BYNAMEPARAM   = 1 << 18;
        const DEFAULTINIT   = 1 << 19;
        /// Type parameter variance markers.
        const COVARIANT     = 1 << 20;
        const CONTRAVARIANT = 1 << 21;
        /// Parameter with a default argument.
        const DEFAULTPARAM  = 1 << 22;

        const ACCESS = Self::PRIVATE.bits() | Self::PROTECTED.bits();
    }
}

/// A modifier set: flags, an optional access qualifier (`private[pkg]`),
/// and the annotations that preceded the definition.
#[derive(Debug, Clone, Copy)]
pub struct Modifiers<'a> {
    pub flags: ModFlags,
    pub priv_within: Option<Name>,
    pub annotations: &'a [Tree<'a>],
}

impl<'a> Modifiers<'a> {
    pub const fn empty() -> Self {
        Self {
            flags: ModFlags::NONE,
            priv_within: None,
            annotations: &[],
        }
    }

    pub fn with_flags(flags: ModFlags) -> Self {
        Self { flags, ..Self::empty() }
    }

    #[inline]
    pub fn has(&self, flag: ModFlags) -> bool {
        self.flags.contains(flag)
    }

    #[inline]
    pub fn and(mut self, flag: ModFlags) -> Self {
        self.flags |= flag;
        self
    }

    #[inline]
    pub fn is_deferred(&self) -> bool {
        self.has(ModFlags::DEFERRED)
    }

    #[inline]
    pub fn is_mutable(&self) -> bool {
        self.has(ModFlags::MUTABLE)
    }

    #[inline]
    pub fn is_lazy(&self) -> bool {
        self.has(ModFlags::LAZY)
    }

    #[inline]
    pub fn is_implicit(&self) -> bool {
        self.has(ModFlags::IMPLICIT)
    }

    #[inline]
    pub fn is_trait(&self) -> bool {
        self.has(ModFlags::TRAIT)
    }

    #[inline]
    pub fn is_case(&self) -> bool {
        self.has(ModFlags::CASE)
    }
}

impl<'a> Default for Modifiers<'a> {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_ops() {
        let mods = Modifiers::empty().and(ModFlags::LAZY).and(ModFlags::PRIVATE);
        assert!(mods.is_lazy());
        assert!(mods.has(ModFlags::ACCESS));
        assert!(!mods.is_mutable());
    }
}
