//! SipHash partitioner implementation.

use crate::partitioner::traits::Partitioner;
use crate::token::HashToken;
use siphasher::sip::SipHasher13;
use std::hash::Hasher;

/// SipHash-1-3 with fixed (zero) keys.
#[derive(Clone, Debug, Default)]
pub struct SipPartitioner;

impl Partitioner for SipPartitioner {
    fn partition(&self, key: &[u8]) -> HashToken {
        let mut hasher = SipHasher13::new();
        hasher.write(key);
        HashToken(hasher.finish())
    }

    fn name(&self) -> &'static str {
        "SipPartitioner"
    }
}
