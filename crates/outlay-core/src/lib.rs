//! Outlay core - client data-access layer for the outlay expense manager.
//!
//! This crate sits between the user interface and the blockchain: it caches
//! on-chain records behind a stable key space, routes queries to the expense
//! program or to one of two governance backends, and relays signed
//! transactions with retry.

pub mod api;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod models;
pub mod proposals;
pub mod relay;
pub mod wallet;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{Connection, RpcConnection};
pub use cache::{CacheKey, KeyInput, QueryCache, Subscription};
pub use config::Config;
pub use dispatch::{Backend, DispatchTable, GovernanceHandle, ProgramClient};
pub use models::{Address, ExpenseManager, ExpensePackage, ProposalInfo};
pub use proposals::{ProposalAggregator, ProposalsView};
pub use relay::{submit_with_backoff, RelayClient, RelayError, RetryPolicy, TransactionSubmitter};
pub use wallet::{AddressDeriver, WalletSigner};
