//! Data models for on-chain expense entities.
//!
//! This module contains the data structures used across the data-access
//! layer:
//!
//! - `Address`: 32-byte account address with a base58 canonical form
//! - `ExpenseManager`, `ExpensePackage`: the expense program's own accounts
//! - `GovernanceProposal`, `SquadProposal`: native backend proposal records
//! - `ProposalInfo`: the normalized proposal shape both backends project into

pub mod address;
pub mod expense;
pub mod proposal;

pub use address::{Address, AddressError, ADDRESS_BYTES};
pub use expense::{ExpenseManager, ExpensePackage, ExpensePackageState, ManagerBackend};
pub use proposal::{GovernanceProposal, ProposalInfo, ProposalState, SquadProposal, SquadStatus};
