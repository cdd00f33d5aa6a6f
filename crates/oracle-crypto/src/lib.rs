// oracle-crypto/src/lib.rs

//! Cryptographic primitives for the stake-weighted oracle
//!
//! This crate provides:
//! - Hashing functions (Keccak-256, Blake3)
//! - Merkle trees with index-based inclusion proofs
//! - 20-byte staker addresses

pub mod address;
pub mod hash;
pub mod merkle;

pub use address::Address;
pub use hash::{keccak_concat, Hash, HashAlgorithm, Hashable, HASH_SIZE};
pub use merkle::{MerkleProof, MerkleTree};

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur during cryptographic operations
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid hash")]
    InvalidHash,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Merkle tree error: {0}")]
    MerkleError(String),
}
