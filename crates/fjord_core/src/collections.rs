//! Hash collections used throughout the compiler.
//!
//! FxHash is used everywhere DoS resistance is not needed, which for a
//! batch compiler is everywhere.

/// A set that uses FxHash for fast hashing.
pub type FxHashSet<T> = rustc_hash::FxHashSet<T>;

/// A map that uses FxHash for fast hashing.
pub type FxHashMap<K, V> = rustc_hash::FxHashMap<K, V>;
