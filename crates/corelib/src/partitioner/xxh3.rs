//! XXH3 partitioner implementation.

use crate::partitioner::traits::Partitioner;
use crate::token::HashToken;
use xxhash_rust::xxh3::xxh3_64;

/// Default partitioner: XXH3-64 over the raw key bytes.
#[derive(Clone, Debug, Default)]
pub struct Xxh3Partitioner;

impl Partitioner for Xxh3Partitioner {
    fn partition(&self, key: &[u8]) -> HashToken {
        HashToken(xxh3_64(key))
    }

    fn name(&self) -> &'static str {
        "Xxh3Partitioner"
    }
}
