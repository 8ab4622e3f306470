//! Cryptography module - BLAKE3 hashing and merkle roots

mod hash;
mod merkle;

pub use hash::*;
pub use merkle::*;
