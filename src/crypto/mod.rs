//! Contract-address derivation and code hashing.

use crate::types::address::{Address, ADDRESS_LEN};
use crate::types::hash::Hash;

/// Keccak-256 digest of arbitrary bytes.
pub fn keccak256(data: &[u8]) -> Hash {
    Hash::keccak256().chain(data).finalize()
}

/// Keccak-256 digest of the empty byte string.
///
/// Accounts created without code carry either this hash or the zero hash;
/// both mean "no contract deployed here".
pub fn empty_code_hash() -> Hash {
    Hash::keccak256().finalize()
}

/// Derives the address of a contract created by `caller` at `nonce`.
///
/// The address is the last 20 bytes of the Keccak-256 digest of the RLP
/// list `[caller, nonce]`.
pub fn create_address(caller: Address, nonce: u64) -> Address {
    // RLP: 20-byte string, then the nonce as a minimal big-endian integer.
    let mut payload = Vec::with_capacity(ADDRESS_LEN + 10);
    payload.push(0x80 + ADDRESS_LEN as u8);
    payload.extend_from_slice(caller.as_slice());
    rlp_append_uint(&mut payload, nonce);

    // Payload stays under 56 bytes, so the list header is a single byte.
    let mut encoded = Vec::with_capacity(payload.len() + 1);
    encoded.push(0xc0 + payload.len() as u8);
    encoded.extend_from_slice(&payload);

    let hash = keccak256(&encoded);
    let mut bytes = [0u8; ADDRESS_LEN];
    bytes.copy_from_slice(&hash.as_slice()[12..]);
    Address(bytes)
}

/// Appends the RLP encoding of an unsigned integer: the empty string for
/// zero, the byte itself below 0x80, a length-prefixed minimal big-endian
/// byte string otherwise.
fn rlp_append_uint(out: &mut Vec<u8>, value: u64) {
    if value == 0 {
        out.push(0x80);
    } else if value < 0x80 {
        out.push(value as u8);
    } else {
        let bytes = value.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 + (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_address_zero_caller_nonce_zero() {
        let addr = create_address(Address::zero(), 0);
        assert_eq!(
            addr.to_string(),
            "0xbd770416a3345f91e4b34576cb804a576fa48eb1"
        );
    }

    #[test]
    fn create_address_changes_with_nonce() {
        let caller = Address::zero();
        assert_ne!(create_address(caller, 0), create_address(caller, 1));
    }

    #[test]
    fn create_address_changes_with_caller() {
        let mut other = [0u8; ADDRESS_LEN];
        other[19] = 1;
        assert_ne!(
            create_address(Address::zero(), 0),
            create_address(Address(other), 0)
        );
    }

    #[test]
    fn rlp_uint_encodings() {
        let mut out = Vec::new();
        rlp_append_uint(&mut out, 0);
        assert_eq!(out, [0x80]);

        out.clear();
        rlp_append_uint(&mut out, 0x7f);
        assert_eq!(out, [0x7f]);

        out.clear();
        rlp_append_uint(&mut out, 0x80);
        assert_eq!(out, [0x81, 0x80]);

        out.clear();
        rlp_append_uint(&mut out, 0x1234);
        assert_eq!(out, [0x82, 0x12, 0x34]);
    }

    #[test]
    fn empty_code_hash_is_keccak_of_nothing() {
        assert_eq!(empty_code_hash(), keccak256(&[]));
        assert_ne!(empty_code_hash(), Hash::zero());
    }
}
