//! External collaborators: the user's wallet and address derivation.
//!
//! Both are implemented outside this crate (browser wallet adapter, the
//! cluster's program-address rules). The data-access layer only depends on
//! these traits.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Address;

/// A connected (or not yet connected) wallet.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// `None` until the user connects a wallet.
    fn public_key(&self) -> Option<Address>;

    /// Sign a serialized transaction, returning the signed bytes.
    async fn sign_transaction(&self, transaction: Vec<u8>) -> Result<Vec<u8>>;
}

/// Deterministic program-address derivation.
pub trait AddressDeriver: Send + Sync {
    /// Returns the derived address and its bump seed.
    fn find_program_address(&self, seeds: &[&[u8]], program: &Address) -> (Address, u8);
}

/// Seed prefix of expense manager addresses.
pub const EXPENSE_MANAGER_SEED: &[u8] = b"expense_manager";

/// Address of the expense manager named `name`.
pub fn expense_manager_address(deriver: &dyn AddressDeriver, program: &Address, name: &str) -> (Address, u8) {
    deriver.find_program_address(&[EXPENSE_MANAGER_SEED, name.as_bytes()], program)
}
