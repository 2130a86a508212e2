//! 64-bit hash token.

use crate::token::traits::Token;
use std::fmt;

/// Position on a ring whose token space is the full `u64` range.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct HashToken(pub u64);

impl Token for HashToken {
    fn zero() -> Self {
        HashToken(0)
    }

    fn max() -> Self {
        HashToken(u64::MAX)
    }

    fn is_zero(&self) -> bool {
        self.0 == 0
    }

    fn is_max(&self) -> bool {
        self.0 == u64::MAX
    }

    fn distance_to(&self, other: &Self) -> Self {
        HashToken(other.0.wrapping_sub(self.0))
    }
}

impl fmt::Display for HashToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
