//! 32-byte hash type with incremental SHA-256 and Keccak-256 builders.

use sha2::digest::Digest;
use sha2::Sha256;
use sha3::Keccak256;
use std::fmt;

/// Hash length in bytes.
pub const HASH_LEN: usize = 32;

/// Fixed-size 32-byte hash.
///
/// Storage-slot keys are SHA-256 digests of contract-supplied key bytes;
/// contract addresses and code hashes use Keccak-256. The type is `Copy`
/// so hashes live on the stack during lookups.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Hash, Ord, PartialOrd)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    /// Creates a zero-valued hash (all bytes 0x00).
    ///
    /// Used as the code hash of accounts that hold no contract.
    pub const fn zero() -> Hash {
        Hash([0u8; HASH_LEN])
    }

    /// Returns the hash as a byte slice.
    pub const fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Returns the hash as a byte Vec.
    pub fn to_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Creates a hash from a byte slice.
    ///
    /// Returns `None` if the slice length is not exactly [`HASH_LEN`] bytes.
    pub fn from_slice(slice: &[u8]) -> Option<Hash> {
        if slice.len() != HASH_LEN {
            return None;
        }
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(slice);
        Some(Hash(bytes))
    }

    /// Parses a hash from a lowercase hex string of exactly 64 digits.
    pub fn from_hex(hex: &str) -> Option<Hash> {
        let hex = hex.as_bytes();
        if hex.len() != HASH_LEN * 2 {
            return None;
        }
        let mut bytes = [0u8; HASH_LEN];
        for (i, chunk) in hex.chunks(2).enumerate() {
            let hi = (chunk[0] as char).to_digit(16)?;
            let lo = (chunk[1] as char).to_digit(16)?;
            bytes[i] = (hi * 16 + lo) as u8;
        }
        Some(Hash(bytes))
    }

    /// Creates a new SHA-256 hash builder for incremental hashing.
    pub fn sha256() -> HashBuilder<Sha256> {
        HashBuilder::new()
    }

    /// Creates a new Keccak-256 hash builder for incremental hashing.
    pub fn keccak256() -> HashBuilder<Keccak256> {
        HashBuilder::new()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Incremental hash builder over a 256-bit digest.
///
/// Allows feeding data in chunks and finalizing to produce a [`Hash`]
/// without intermediate allocations.
pub struct HashBuilder<D: Digest> {
    hasher: D,
}

impl<D: Digest> HashBuilder<D> {
    fn new() -> Self {
        Self { hasher: D::new() }
    }

    /// Feeds data into the hash computation.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Feeds data and returns the builder for chaining.
    pub fn chain(mut self, data: &[u8]) -> Self {
        self.hasher.update(data);
        self
    }

    /// Consumes the builder and returns the final hash.
    pub fn finalize(self) -> Hash {
        let digest = self.hasher.finalize();
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(&digest);
        Hash(bytes)
    }
}
