use crate::types::hash::Hash;

/// Account state tracked by the chain: transaction counter, spendable
/// balance, and the hash of any deployed contract code.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Account {
    /// Monotonic counter of successful transactions from this account.
    pub(crate) nonce: u64,
    /// Spendable balance denominated in the native currency.
    pub(crate) balance: u128,
    /// Keccak-256 hash of the deployed contract code, or `Hash::zero()`
    /// for accounts without code.
    pub(crate) code_hash: Hash,
}

impl Account {
    /// Creates a new externally owned account with the given balance.
    pub fn new(balance: u128) -> Self {
        Self {
            nonce: 0,
            balance,
            code_hash: Hash::zero(),
        }
    }

    /// Returns the account's current nonce.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Returns the account's current balance.
    pub fn balance(&self) -> u128 {
        self.balance
    }

    /// Returns the hash of the account's contract code.
    pub fn code_hash(&self) -> Hash {
        self.code_hash
    }

    /// Returns true if this account holds contract code.
    pub fn is_contract(&self) -> bool {
        self.code_hash != Hash::zero()
    }
}
