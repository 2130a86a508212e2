//! Consistent hash ring implementation.
//!
//! The ring manages virtual node positions and provides efficient lookup
//! operations for finding the node responsible for a key.

pub mod ring;

pub use ring::{HashRing, RingBuilder, DEFAULT_VNODES};
