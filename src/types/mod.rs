//! Value types shared across the node: digests, addresses, byte buffers and
//! the binary codec they are all serialized with.

pub mod address;
pub mod bytes;
pub mod encoding;
pub mod hash;
pub mod merkle_tree;
