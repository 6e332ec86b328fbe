//! Chain-state interface and the in-memory repository backing it.
//!
//! The [`ChainState`] trait is the storage surface the contract drivers
//! and host functions run against: account bookkeeping plus per-address
//! storage slots keyed by 32-byte hashes. [`Repository`] is the in-memory
//! implementation used by the drivers and throughout the tests; durable
//! backends implement the same trait.

use crate::crypto::keccak256;
use crate::storage::account::Account;
use crate::types::address::Address;
use crate::types::hash::Hash;
use std::collections::BTreeMap;

/// Key-value chain state consumed by contract execution.
///
/// Storage-slot keys are always hashes so slots are uniformly distributed
/// and fixed-size. Missing values read as their zero equivalents: nonce 0,
/// balance 0, empty code, empty slot value.
pub trait ChainState {
    /// Returns the nonce of an account, 0 if the account does not exist.
    fn nonce(&self, addr: Address) -> u64;
    /// Sets the nonce of an account, creating it if needed.
    fn set_nonce(&mut self, addr: Address, nonce: u64);
    /// Returns the balance of an account, 0 if the account does not exist.
    fn balance(&self, addr: Address) -> u128;
    /// Credits an account, creating it if needed.
    fn add_balance(&mut self, addr: Address, amount: u128);
    /// Debits an account, saturating at zero.
    fn sub_balance(&mut self, addr: Address, amount: u128);
    /// Returns the contract code stored at an address, empty if none.
    fn code(&self, addr: Address) -> Vec<u8>;
    /// Stores contract code at an address and updates its code hash.
    fn set_code(&mut self, addr: Address, code: Vec<u8>);
    /// Returns the code hash of an account, `Hash::zero()` if the account
    /// does not exist or holds no code.
    fn code_hash(&self, addr: Address) -> Hash;
    /// Creates an empty account at the address, replacing any existing one.
    fn create_account(&mut self, addr: Address);
    /// Reads a storage slot, empty if never written.
    fn state(&self, addr: Address, key: Hash) -> Vec<u8>;
    /// Writes a storage slot, overwriting any existing value.
    fn set_state(&mut self, addr: Address, key: Hash, value: Vec<u8>);
}

/// In-memory chain state.
#[derive(Default)]
pub struct Repository {
    accounts: BTreeMap<Address, Account>,
    code: BTreeMap<Address, Vec<u8>>,
    storage: BTreeMap<(Address, Hash), Vec<u8>>,
}

impl Repository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a repository with a single funded account.
    pub fn with_balance(addr: Address, balance: u128) -> Self {
        let mut repo = Self::new();
        repo.accounts.insert(addr, Account::new(balance));
        repo
    }

    fn account_mut(&mut self, addr: Address) -> &mut Account {
        self.accounts.entry(addr).or_default()
    }
}

impl ChainState for Repository {
    fn nonce(&self, addr: Address) -> u64 {
        self.accounts.get(&addr).map(Account::nonce).unwrap_or(0)
    }

    fn set_nonce(&mut self, addr: Address, nonce: u64) {
        self.account_mut(addr).nonce = nonce;
    }

    fn balance(&self, addr: Address) -> u128 {
        self.accounts.get(&addr).map(Account::balance).unwrap_or(0)
    }

    fn add_balance(&mut self, addr: Address, amount: u128) {
        let account = self.account_mut(addr);
        account.balance = account.balance.saturating_add(amount);
    }

    fn sub_balance(&mut self, addr: Address, amount: u128) {
        let account = self.account_mut(addr);
        account.balance = account.balance.saturating_sub(amount);
    }

    fn code(&self, addr: Address) -> Vec<u8> {
        self.code.get(&addr).cloned().unwrap_or_default()
    }

    fn set_code(&mut self, addr: Address, code: Vec<u8>) {
        self.account_mut(addr).code_hash = keccak256(&code);
        self.code.insert(addr, code);
    }

    fn code_hash(&self, addr: Address) -> Hash {
        self.accounts
            .get(&addr)
            .map(Account::code_hash)
            .unwrap_or(Hash::zero())
    }

    fn create_account(&mut self, addr: Address) {
        self.accounts.insert(addr, Account::default());
    }

    fn state(&self, addr: Address, key: Hash) -> Vec<u8> {
        self.storage.get(&(addr, key)).cloned().unwrap_or_default()
    }

    fn set_state(&mut self, addr: Address, key: Hash, value: Vec<u8>) {
        self.storage.insert((addr, key), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::empty_code_hash;

    fn addr(seed: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[0] = seed;
        Address(bytes)
    }

    #[test]
    fn missing_account_reads_as_zero() {
        let repo = Repository::new();
        assert_eq!(repo.nonce(addr(1)), 0);
        assert_eq!(repo.balance(addr(1)), 0);
        assert_eq!(repo.code(addr(1)), Vec::<u8>::new());
        assert_eq!(repo.code_hash(addr(1)), Hash::zero());
    }

    #[test]
    fn balance_bookkeeping() {
        let mut repo = Repository::with_balance(addr(1), 100);
        repo.sub_balance(addr(1), 40);
        repo.add_balance(addr(2), 40);
        assert_eq!(repo.balance(addr(1)), 60);
        assert_eq!(repo.balance(addr(2)), 40);
    }

    #[test]
    fn sub_balance_saturates() {
        let mut repo = Repository::with_balance(addr(1), 10);
        repo.sub_balance(addr(1), 100);
        assert_eq!(repo.balance(addr(1)), 0);
    }

    #[test]
    fn set_code_updates_code_hash() {
        let mut repo = Repository::new();
        repo.set_code(addr(1), b"\0asm".to_vec());
        assert_eq!(repo.code(addr(1)), b"\0asm".to_vec());
        assert_eq!(repo.code_hash(addr(1)), keccak256(b"\0asm"));
    }

    #[test]
    fn empty_code_hashes_to_empty_keccak() {
        let mut repo = Repository::new();
        repo.set_code(addr(1), Vec::new());
        assert_eq!(repo.code_hash(addr(1)), empty_code_hash());
    }

    #[test]
    fn storage_slots_are_per_address() {
        let mut repo = Repository::new();
        let key = Hash::sha256().chain(b"slot").finalize();
        repo.set_state(addr(1), key, b"one".to_vec());
        repo.set_state(addr(2), key, b"two".to_vec());
        assert_eq!(repo.state(addr(1), key), b"one".to_vec());
        assert_eq!(repo.state(addr(2), key), b"two".to_vec());
        assert_eq!(repo.state(addr(3), key), Vec::<u8>::new());
    }

    #[test]
    fn create_account_resets_state() {
        let mut repo = Repository::with_balance(addr(1), 55);
        repo.set_nonce(addr(1), 9);
        repo.create_account(addr(1));
        assert_eq!(repo.nonce(addr(1)), 0);
        assert_eq!(repo.balance(addr(1)), 0);
    }
}
