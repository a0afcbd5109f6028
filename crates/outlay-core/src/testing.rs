//! In-memory collaborators for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::api::{Account, AccountFilter, Connection};
use crate::models::Address;
use crate::wallet::AddressDeriver;

/// Cluster fake: accounts live in a map, program queries are recorded.
#[derive(Default)]
pub struct FakeConnection {
    accounts: Mutex<HashMap<Address, Account>>,
    program_queries: Mutex<Vec<Address>>,
}

impl FakeConnection {
    pub fn insert(&self, address: Address, owner: Address, data: Vec<u8>) {
        self.accounts.lock().unwrap().insert(
            address,
            Account {
                owner,
                lamports: 1_000_000,
                data,
            },
        );
    }

    /// Programs passed to `get_program_accounts`, in call order.
    pub fn program_queries(&self) -> Vec<Address> {
        self.program_queries.lock().unwrap().clone()
    }
}

fn matches(account: &Account, filter: &AccountFilter) -> bool {
    match filter {
        AccountFilter::DataSize(size) => account.data.len() as u64 == *size,
        AccountFilter::Memcmp { offset, bytes } => account
            .data
            .get(*offset..offset + bytes.len())
            .map(|slice| slice == bytes.as_slice())
            .unwrap_or(false),
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn get_account(&self, address: &Address) -> Result<Option<Account>> {
        Ok(self.accounts.lock().unwrap().get(address).cloned())
    }

    async fn get_multiple_accounts(&self, addresses: &[Address]) -> Result<Vec<Option<Account>>> {
        let accounts = self.accounts.lock().unwrap();
        Ok(addresses.iter().map(|a| accounts.get(a).cloned()).collect())
    }

    async fn get_program_accounts(
        &self,
        program: &Address,
        filters: &[AccountFilter],
    ) -> Result<Vec<(Address, Account)>> {
        self.program_queries.lock().unwrap().push(*program);
        let accounts = self.accounts.lock().unwrap();
        Ok(accounts
            .iter()
            .filter(|(_, account)| account.owner == *program)
            .filter(|(_, account)| filters.iter().all(|f| matches(account, f)))
            .map(|(address, account)| (*address, account.clone()))
            .collect())
    }

    async fn send_and_confirm_raw_transaction(&self, _transaction: &[u8]) -> Result<String> {
        anyhow::bail!("FakeConnection does not submit transactions")
    }
}

/// Hashes seeds and program together; good enough to be deterministic.
pub struct HashDeriver;

impl AddressDeriver for HashDeriver {
    fn find_program_address(&self, seeds: &[&[u8]], program: &Address) -> (Address, u8) {
        let mut hasher = Sha256::new();
        for seed in seeds {
            hasher.update(seed);
        }
        hasher.update(program.as_bytes());
        let digest = hasher.finalize();
        (Address::from_slice(&digest).expect("sha256 digest is 32 bytes"), 255)
    }
}
