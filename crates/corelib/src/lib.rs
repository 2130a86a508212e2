//! Core library for the shardcache consistent-hashing ring.
//!
//! This crate provides the pure, I/O-free routing primitives:
//! - Token type and partitioners (key -> token)
//! - Node and virtual node abstractions
//! - The hash ring itself and its builder

pub mod error;
pub mod node;
pub mod partitioner;
pub mod ring;
pub mod token;
pub mod vnode;

pub use error::{Error, Result};
pub use node::{Node, NodeId};
pub use partitioner::Partitioner;
pub use ring::{HashRing, RingBuilder};
pub use token::{HashToken, Token};
pub use vnode::VirtualNode;
