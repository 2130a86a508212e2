//! Core partitioner trait definitions.

use crate::token::HashToken;

/// A partitioner converts keys into tokens for placement on the hash ring.
///
/// Partitioners are stateless and thread-safe, allowing concurrent
/// token generation without synchronization overhead. They must also be
/// stable across processes: the same key has to land on the same token after
/// a restart, so randomly seeded hashers are not allowed here.
pub trait Partitioner: Send + Sync + 'static {
    /// Converts a key into a token.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to partition
    ///
    /// # Returns
    ///
    /// A token representing the position on the ring
    fn partition(&self, key: &[u8]) -> HashToken;

    /// Returns the name of this partitioner.
    fn name(&self) -> &'static str;
}
