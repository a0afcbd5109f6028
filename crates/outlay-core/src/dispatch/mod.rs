//! Backend dispatch table.
//!
//! Every logical query is a `Fetcher` with a stable name, grouped by backend
//! family:
//!
//! - `program`: the expense program's own accounts (`ProgramClient` handle)
//! - `governance`: token-voting governance proposals (`GovernanceHandle`)
//! - `squads`: multisig proposals (`GovernanceHandle`)
//!
//! Typed callers use the fetchers directly. Callers that only have a query
//! name (for example a refresh request coming from the UI) go through
//! [`DispatchTable::resolve`], which treats an unknown name as a bug.

use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::api::Connection;
use crate::cache::{key, CacheKey, QueryCache};
use crate::models::Address;
use crate::wallet::AddressDeriver;

pub mod governance;
pub mod program;
pub mod squads;

pub use governance::GetRealmProposals;
pub use program::{
    GetExpenseManager, GetExpenseManagerByName, GetExpenseManagers, GetExpensePackage,
    GetExpensePackages, GetExpensePackagesByOwner,
};
pub use squads::GetSquadProposals;

// ============================================================================
// Backend handles
// ============================================================================

/// Handle for queries against the expense program.
#[derive(Clone)]
pub struct ProgramClient {
    pub connection: Arc<dyn Connection>,
    pub program_id: Address,
    pub deriver: Arc<dyn AddressDeriver>,
}

impl ProgramClient {
    pub fn new(connection: Arc<dyn Connection>, program_id: Address, deriver: Arc<dyn AddressDeriver>) -> Self {
        Self {
            connection,
            program_id,
            deriver,
        }
    }
}

/// Handle for queries against an external governance program.
#[derive(Clone)]
pub struct GovernanceHandle {
    pub connection: Arc<dyn Connection>,
    pub program_id: Address,
}

impl GovernanceHandle {
    pub fn new(connection: Arc<dyn Connection>, program_id: Address) -> Self {
        Self { connection, program_id }
    }
}

/// Result of a backend query that depends on how the manager is configured.
///
/// `Unconfigured` carries a message meant for the user; it is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendOutcome<T> {
    Records(T),
    Unconfigured(String),
}

// ============================================================================
// Query names
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Program,
    Governance,
    Squads,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Program => write!(f, "program"),
            Backend::Governance => write!(f, "governance"),
            Backend::Squads => write!(f, "squads"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramQuery {
    ExpenseManager,
    ExpenseManagers,
    ExpenseManagerByName,
    ExpensePackage,
    ExpensePackages,
    ExpensePackagesByOwner,
}

impl ProgramQuery {
    pub const ALL: [ProgramQuery; 6] = [
        ProgramQuery::ExpenseManager,
        ProgramQuery::ExpenseManagers,
        ProgramQuery::ExpenseManagerByName,
        ProgramQuery::ExpensePackage,
        ProgramQuery::ExpensePackages,
        ProgramQuery::ExpensePackagesByOwner,
    ];

    pub fn name(self) -> &'static str {
        use crate::cache::Fetcher;
        match self {
            ProgramQuery::ExpenseManager => GetExpenseManager::NAME,
            ProgramQuery::ExpenseManagers => GetExpenseManagers::NAME,
            ProgramQuery::ExpenseManagerByName => GetExpenseManagerByName::NAME,
            ProgramQuery::ExpensePackage => GetExpensePackage::NAME,
            ProgramQuery::ExpensePackages => GetExpensePackages::NAME,
            ProgramQuery::ExpensePackagesByOwner => GetExpensePackagesByOwner::NAME,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GovernanceQuery {
    RealmProposals,
}

impl GovernanceQuery {
    pub const ALL: [GovernanceQuery; 1] = [GovernanceQuery::RealmProposals];

    pub fn name(self) -> &'static str {
        use crate::cache::Fetcher;
        match self {
            GovernanceQuery::RealmProposals => GetRealmProposals::NAME,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SquadsQuery {
    SquadProposals,
}

impl SquadsQuery {
    pub const ALL: [SquadsQuery; 1] = [SquadsQuery::SquadProposals];

    pub fn name(self) -> &'static str {
        use crate::cache::Fetcher;
        match self {
            SquadsQuery::SquadProposals => GetSquadProposals::NAME,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryId {
    Program(ProgramQuery),
    Governance(GovernanceQuery),
    Squads(SquadsQuery),
}

impl QueryId {
    pub fn backend(self) -> Backend {
        match self {
            QueryId::Program(_) => Backend::Program,
            QueryId::Governance(_) => Backend::Governance,
            QueryId::Squads(_) => Backend::Squads,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            QueryId::Program(q) => q.name(),
            QueryId::Governance(q) => q.name(),
            QueryId::Squads(q) => q.name(),
        }
    }
}

/// Name-based lookup over the three query families.
pub struct DispatchTable;

impl DispatchTable {
    /// Look up `name` in `backend`'s table.
    ///
    /// # Panics
    ///
    /// Panics if `backend` has no query called `name`. Query names are
    /// compile-time constants, so a miss is a programming error.
    pub fn resolve(backend: Backend, name: &str) -> QueryId {
        Self::try_resolve(backend, name)
            .unwrap_or_else(|| panic!("unknown {} query: {:?}", backend, name))
    }

    pub fn try_resolve(backend: Backend, name: &str) -> Option<QueryId> {
        match backend {
            Backend::Program => ProgramQuery::ALL
                .into_iter()
                .find(|q| q.name() == name)
                .map(QueryId::Program),
            Backend::Governance => GovernanceQuery::ALL
                .into_iter()
                .find(|q| q.name() == name)
                .map(QueryId::Governance),
            Backend::Squads => SquadsQuery::ALL
                .into_iter()
                .find(|q| q.name() == name)
                .map(QueryId::Squads),
        }
    }

    /// Invalidate the cache entry of query `name` for `args`.
    pub fn invalidate(cache: &QueryCache, backend: Backend, name: &str, args: &CacheKey) {
        let query = Self::resolve(backend, name);
        cache.invalidate(&key::serialize_key(args).with_prefix(query.name()));
    }
}

// ============================================================================
// Key argument helpers
// ============================================================================

pub(crate) fn address_arg(query: &str, key: &CacheKey, index: usize) -> Result<Address> {
    key.address(index)
        .ok_or_else(|| anyhow!("{} expects an address at key position {}", query, index))
}

pub(crate) fn str_arg<'k>(query: &str, key: &'k CacheKey, index: usize) -> Result<&'k str> {
    key.str(index)
        .ok_or_else(|| anyhow!("{} expects a string at key position {}", query, index))
}
