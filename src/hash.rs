//! Deterministic 128-bit structural hashing.
//!
//! Graph and pipeline caches are keyed by the *content* of step, feature and
//! layout descriptors rather than by pointer identity. [`Hash128`] wraps an
//! xxh3-128 digest fed through the standard [`Hash`] trait, so any descriptor
//! deriving (or hand-implementing) `Hash` can produce a cache key.

use std::fmt;
use std::hash::{Hash, Hasher};

use xxhash_rust::xxh3::Xxh3;

/// A 128-bit structural hash.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash128(pub u128);

impl Hash128 {
    /// Hashes any `Hash` value with xxh3-128.
    pub fn of<T: Hash + ?Sized>(value: &T) -> Self {
        let mut hasher = Xxh3::new();
        value.hash(&mut hasher);
        Self(hasher.digest128())
    }

    /// Lower 64 bits, handy for log output.
    pub fn short(self) -> u64 {
        self.0 as u64
    }
}

impl fmt::Display for Hash128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Feeds an `f32` into a hasher by bit pattern.
///
/// `-0.0` and `0.0` hash differently, and so do distinct NaN payloads. That is
/// the behavior wanted for cache keys: bitwise-equal descriptors share a key.
pub(crate) fn hash_f32<H: Hasher>(value: f32, state: &mut H) {
    value.to_bits().hash(state);
}

pub(crate) fn hash_f32_slice<H: Hasher>(values: &[f32], state: &mut H) {
    values.len().hash(state);
    for v in values {
        hash_f32(*v, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_values_hash_equal() {
        assert_eq!(Hash128::of("color"), Hash128::of("color"));
        assert_ne!(Hash128::of("color"), Hash128::of("depth"));
    }

    #[test]
    fn short_keeps_the_low_bits() {
        assert_eq!(Hash128(0xdead_beef_0000_0000_0000_0000_0000_0042).short(), 0x42);
    }

    #[test]
    fn display_is_fixed_width_hex() {
        assert_eq!(Hash128(0xab).to_string().len(), 32);
    }
}
