//! Queries against the expense program's own accounts.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::api::decode::{
    account_discriminator, decode_expense_manager, decode_expense_package, PACKAGE_MANAGER_OFFSET,
    PACKAGE_OWNER_OFFSET,
};
use crate::api::{Account, AccountFilter};
use crate::cache::{CacheKey, Fetcher, KeyInput};
use crate::cache_key;
use crate::models::{Address, ExpenseManager, ExpensePackage};
use crate::wallet::{expense_manager_address, WalletSigner};

use super::{address_arg, str_arg, ProgramClient};

fn discriminator_filter(name: &str) -> AccountFilter {
    AccountFilter::Memcmp {
        offset: 0,
        bytes: account_discriminator(name).to_vec(),
    }
}

/// Decode every account, skipping (and logging) the ones that don't parse.
fn decode_all<T>(
    query: &str,
    accounts: Vec<(Address, Account)>,
    decode: impl Fn(Address, &[u8]) -> Result<T, crate::api::DecodeError>,
) -> Vec<T> {
    accounts
        .into_iter()
        .filter_map(|(address, account)| match decode(address, &account.data) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(query, address = %address, error = %e, "Skipping undecodable account");
                None
            }
        })
        .collect()
}

async fn load_manager(client: &ProgramClient, address: &Address) -> Result<Option<ExpenseManager>> {
    let Some(account) = client
        .connection
        .get_account(address)
        .await
        .with_context(|| format!("Failed to load expense manager {}", address))?
    else {
        return Ok(None);
    };
    let manager = decode_expense_manager(*address, &account.data)
        .with_context(|| format!("Account {} is not an expense manager", address))?;
    Ok(Some(manager))
}

// ============================================================================
// Expense managers
// ============================================================================

/// `getExpenseManager [address]`: a single manager, `None` if the account
/// does not exist.
pub struct GetExpenseManager;

#[async_trait]
impl Fetcher for GetExpenseManager {
    type Handle = ProgramClient;
    type Output = Option<ExpenseManager>;
    const NAME: &'static str = "getExpenseManager";

    async fn fetch(&self, client: &ProgramClient, key: &CacheKey) -> Result<Self::Output> {
        let address = address_arg(Self::NAME, key, 0)?;
        load_manager(client, &address).await
    }
}

impl GetExpenseManager {
    pub fn key(address: Address) -> CacheKey {
        cache_key![address]
    }
}

/// `getExpenseManagers []`: every manager of the program, sorted by name.
pub struct GetExpenseManagers;

#[async_trait]
impl Fetcher for GetExpenseManagers {
    type Handle = ProgramClient;
    type Output = Vec<ExpenseManager>;
    const NAME: &'static str = "getExpenseManagers";

    async fn fetch(&self, client: &ProgramClient, _key: &CacheKey) -> Result<Self::Output> {
        let accounts = client
            .connection
            .get_program_accounts(&client.program_id, &[discriminator_filter("ExpenseManager")])
            .await
            .context("Failed to list expense managers")?;
        let mut managers = decode_all(Self::NAME, accounts, decode_expense_manager);
        managers.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = managers.len(), "Loaded expense managers");
        Ok(managers)
    }
}

/// `getExpenseManagerByName [name]`: resolves the manager's derived address
/// first.
pub struct GetExpenseManagerByName;

#[async_trait]
impl Fetcher for GetExpenseManagerByName {
    type Handle = ProgramClient;
    type Output = Option<ExpenseManager>;
    const NAME: &'static str = "getExpenseManagerByName";

    async fn fetch(&self, client: &ProgramClient, key: &CacheKey) -> Result<Self::Output> {
        let name = str_arg(Self::NAME, key, 0)?;
        let (address, _bump) = expense_manager_address(client.deriver.as_ref(), &client.program_id, name);
        debug!(name, address = %address, "Resolved expense manager address");
        load_manager(client, &address).await
    }
}

impl GetExpenseManagerByName {
    pub fn key(name: &str) -> CacheKey {
        cache_key![name]
    }
}

// ============================================================================
// Expense packages
// ============================================================================

/// `getExpensePackage [address]`
pub struct GetExpensePackage;

#[async_trait]
impl Fetcher for GetExpensePackage {
    type Handle = ProgramClient;
    type Output = Option<ExpensePackage>;
    const NAME: &'static str = "getExpensePackage";

    async fn fetch(&self, client: &ProgramClient, key: &CacheKey) -> Result<Self::Output> {
        let address = address_arg(Self::NAME, key, 0)?;
        let Some(account) = client
            .connection
            .get_account(&address)
            .await
            .with_context(|| format!("Failed to load expense package {}", address))?
        else {
            return Ok(None);
        };
        let package = decode_expense_package(address, &account.data)
            .with_context(|| format!("Account {} is not an expense package", address))?;
        Ok(Some(package))
    }
}

impl GetExpensePackage {
    pub fn key(address: Address) -> CacheKey {
        cache_key![address]
    }
}

/// `getExpensePackages [manager]`: every package filed under a manager.
pub struct GetExpensePackages;

#[async_trait]
impl Fetcher for GetExpensePackages {
    type Handle = ProgramClient;
    type Output = Vec<ExpensePackage>;
    const NAME: &'static str = "getExpensePackages";

    async fn fetch(&self, client: &ProgramClient, key: &CacheKey) -> Result<Self::Output> {
        let manager = address_arg(Self::NAME, key, 0)?;
        let filters = [
            discriminator_filter("ExpensePackage"),
            AccountFilter::memcmp_address(PACKAGE_MANAGER_OFFSET, &manager),
        ];
        let accounts = client
            .connection
            .get_program_accounts(&client.program_id, &filters)
            .await
            .with_context(|| format!("Failed to list expense packages of {}", manager))?;
        let mut packages = decode_all(Self::NAME, accounts, decode_expense_package);
        packages.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(packages)
    }
}

impl GetExpensePackages {
    pub fn key(manager: Address) -> CacheKey {
        cache_key![manager]
    }
}

/// `getExpensePackagesByOwner [manager, owner]`
pub struct GetExpensePackagesByOwner;

#[async_trait]
impl Fetcher for GetExpensePackagesByOwner {
    type Handle = ProgramClient;
    type Output = Vec<ExpensePackage>;
    const NAME: &'static str = "getExpensePackagesByOwner";

    async fn fetch(&self, client: &ProgramClient, key: &CacheKey) -> Result<Self::Output> {
        let manager = address_arg(Self::NAME, key, 0)?;
        let owner = address_arg(Self::NAME, key, 1)?;
        let filters = [
            discriminator_filter("ExpensePackage"),
            AccountFilter::memcmp_address(PACKAGE_MANAGER_OFFSET, &manager),
            AccountFilter::memcmp_address(PACKAGE_OWNER_OFFSET, &owner),
        ];
        let accounts = client
            .connection
            .get_program_accounts(&client.program_id, &filters)
            .await
            .with_context(|| format!("Failed to list expense packages of {} for {}", manager, owner))?;
        let mut packages = decode_all(Self::NAME, accounts, decode_expense_package);
        packages.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(packages)
    }
}

impl GetExpensePackagesByOwner {
    /// Keyed on the connected wallet; stays disabled until one connects.
    pub fn key(manager: Address, wallet: Arc<dyn WalletSigner>) -> KeyInput {
        KeyInput::lazy(move || wallet.public_key().map(|owner| cache_key![manager, owner]))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::api::decode::AccountWriter;
    use crate::cache::QueryCache;
    use crate::models::ExpensePackageState;
    use crate::testing::{FakeConnection, HashDeriver};

    const PROGRAM: Address = Address::new([9; 32]);

    fn addr(byte: u8) -> Address {
        Address::new([byte; 32])
    }

    fn manager(address: Address, name: &str) -> ExpenseManager {
        ExpenseManager {
            address,
            name: name.to_string(),
            bump: 255,
            expense_package_nonce: 0,
            governance_authority: None,
            membership_token_mint: addr(50),
            realm: None,
            squad: Some(addr(60)),
        }
    }

    fn package(address: Address, manager: Address, owner: Address, name: &str) -> ExpensePackage {
        ExpensePackage {
            address,
            expense_manager: manager,
            owner,
            name: name.to_string(),
            description: "travel".to_string(),
            quantity: 1_500_000,
            state: ExpensePackageState::Pending,
            bump: 254,
        }
    }

    fn client(connection: Arc<FakeConnection>) -> ProgramClient {
        ProgramClient::new(connection, PROGRAM, Arc::new(HashDeriver))
    }

    /// Wallet that can be connected after the fact.
    #[derive(Default)]
    struct TestWallet(Mutex<Option<Address>>);

    #[async_trait]
    impl WalletSigner for TestWallet {
        fn public_key(&self) -> Option<Address> {
            *self.0.lock().unwrap()
        }

        async fn sign_transaction(&self, transaction: Vec<u8>) -> Result<Vec<u8>> {
            Ok(transaction)
        }
    }

    #[tokio::test]
    async fn test_get_expense_manager() {
        let connection = Arc::new(FakeConnection::default());
        let m = manager(addr(1), "Grants");
        connection.insert(m.address, PROGRAM, AccountWriter::expense_manager(&m));

        let found = GetExpenseManager
            .fetch(&client(connection.clone()), &GetExpenseManager::key(addr(1)))
            .await
            .unwrap();
        assert_eq!(found, Some(m));

        let missing = GetExpenseManager
            .fetch(&client(connection), &GetExpenseManager::key(addr(2)))
            .await
            .unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn test_get_expense_manager_rejects_foreign_account() {
        let connection = Arc::new(FakeConnection::default());
        connection.insert(addr(1), PROGRAM, vec![0; 16]);

        let err = GetExpenseManager
            .fetch(&client(connection), &GetExpenseManager::key(addr(1)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("is not an expense manager"));
    }

    #[tokio::test]
    async fn test_get_expense_managers_sorted_and_filtered() {
        let connection = Arc::new(FakeConnection::default());
        for (byte, name) in [(1, "Operations"), (2, "Events"), (3, "Grants")] {
            let m = manager(addr(byte), name);
            connection.insert(m.address, PROGRAM, AccountWriter::expense_manager(&m));
        }
        let p = package(addr(4), addr(1), addr(5), "Flights");
        connection.insert(p.address, PROGRAM, AccountWriter::expense_package(&p));

        let managers = GetExpenseManagers
            .fetch(&client(connection), &CacheKey::default())
            .await
            .unwrap();
        let names: Vec<&str> = managers.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Events", "Grants", "Operations"]);
    }

    #[tokio::test]
    async fn test_get_expense_manager_by_name_uses_derived_address() {
        let connection = Arc::new(FakeConnection::default());
        let (address, _) = expense_manager_address(&HashDeriver, &PROGRAM, "Grants");
        let m = manager(address, "Grants");
        connection.insert(address, PROGRAM, AccountWriter::expense_manager(&m));

        let found = GetExpenseManagerByName
            .fetch(&client(connection), &GetExpenseManagerByName::key("Grants"))
            .await
            .unwrap();
        assert_eq!(found.map(|m| m.address), Some(address));
    }

    #[tokio::test]
    async fn test_get_expense_packages_by_manager_and_owner() {
        let connection = Arc::new(FakeConnection::default());
        let alice = addr(20);
        let bob = addr(21);
        for p in [
            package(addr(10), addr(1), alice, "Hotel"),
            package(addr(11), addr(1), bob, "Flights"),
            package(addr(12), addr(2), alice, "Catering"),
        ] {
            connection.insert(p.address, PROGRAM, AccountWriter::expense_package(&p));
        }
        let client = client(connection);

        let all = GetExpensePackages
            .fetch(&client, &GetExpensePackages::key(addr(1)))
            .await
            .unwrap();
        let names: Vec<&str> = all.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Flights", "Hotel"]);

        let owned = GetExpensePackagesByOwner
            .fetch(&client, &cache_key![addr(1), alice])
            .await
            .unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].name, "Hotel");

        let single = GetExpensePackage
            .fetch(&client, &GetExpensePackage::key(addr(12)))
            .await
            .unwrap();
        assert_eq!(single.map(|p| p.name), Some("Catering".to_string()));
    }

    #[tokio::test]
    async fn test_owner_query_waits_for_wallet() {
        let connection = Arc::new(FakeConnection::default());
        let alice = addr(20);
        let p = package(addr(10), addr(1), alice, "Hotel");
        connection.insert(p.address, PROGRAM, AccountWriter::expense_package(&p));

        let wallet = Arc::new(TestWallet::default());
        let cache = QueryCache::new();
        let sub = cache.query_with(
            Some(client(connection.clone())),
            Arc::new(GetExpensePackagesByOwner),
            GetExpensePackagesByOwner::key(addr(1), wallet.clone()),
        );

        assert!(!sub.is_enabled());
        let state = sub.load().await;
        assert!(state.data.is_none());
        assert!(connection.program_queries().is_empty());

        *wallet.0.lock().unwrap() = Some(alice);
        let state = sub.load().await;
        assert_eq!(state.data.unwrap().len(), 1);
        assert_eq!(connection.program_queries(), vec![PROGRAM]);
    }

    #[tokio::test]
    async fn test_missing_key_argument_is_an_error() {
        let connection = Arc::new(FakeConnection::default());
        let err = GetExpensePackages
            .fetch(&client(connection), &cache_key!["not-an-address"])
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "getExpensePackages expects an address at key position 0"
        );
    }
}
