//! Domain models for the expense program's own accounts.

use serde::{Deserialize, Serialize};

use super::Address;

/// Which governance backend an expense manager is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerBackend {
    /// Token-voting governance: proposals live under a realm.
    Governance {
        realm: Address,
        governance_authority: Address,
    },
    /// Realm set but no governance authority assigned yet. Proposals are
    /// still looked up so the user is told what is missing.
    RealmPending { realm: Address },
    /// Multisig squad.
    Squad { squad: Address },
    /// Neither or both markers populated.
    Unsupported,
}

/// Container for expense packages, bound to exactly one governance backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(rename_all = "camelCase")]
pub struct ExpenseManager {
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub address: Address,
    pub name: String,
    pub bump: u8,
    pub expense_package_nonce: u32,
    #[cfg_attr(feature = "ts", ts(type = "string | null"))]
    pub governance_authority: Option<Address>,
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub membership_token_mint: Address,
    #[cfg_attr(feature = "ts", ts(type = "string | null"))]
    pub realm: Option<Address>,
    #[cfg_attr(feature = "ts", ts(type = "string | null"))]
    pub squad: Option<Address>,
}

impl ExpenseManager {
    /// Classify the manager by its backend markers.
    ///
    /// A squad marker alone selects the multisig backend. A realm alone selects
    /// token governance, pending until a governance authority is set. Both or
    /// neither is unsupported.
    pub fn backend(&self) -> ManagerBackend {
        match (self.squad, self.realm, self.governance_authority) {
            (Some(squad), None, _) => ManagerBackend::Squad { squad },
            (None, Some(realm), Some(governance_authority)) => ManagerBackend::Governance {
                realm,
                governance_authority,
            },
            (None, Some(realm), None) => ManagerBackend::RealmPending { realm },
            _ => ManagerBackend::Unsupported,
        }
    }
}

/// Lifecycle of an expense package as recorded on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(rename_all = "camelCase")]
pub enum ExpensePackageState {
    Created,
    Pending,
    Approved,
    Denied,
    Paid,
}

impl ExpensePackageState {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Created),
            1 => Some(Self::Pending),
            2 => Some(Self::Approved),
            3 => Some(Self::Denied),
            4 => Some(Self::Paid),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExpensePackageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpensePackageState::Created => write!(f, "Created"),
            ExpensePackageState::Pending => write!(f, "Pending"),
            ExpensePackageState::Approved => write!(f, "Approved"),
            ExpensePackageState::Denied => write!(f, "Denied"),
            ExpensePackageState::Paid => write!(f, "Paid"),
        }
    }
}

/// A reimbursement request filed against an expense manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(rename_all = "camelCase")]
pub struct ExpensePackage {
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub address: Address,
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub expense_manager: Address,
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub owner: Address,
    pub name: String,
    pub description: String,
    /// Requested amount in lamports.
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub quantity: u64,
    pub state: ExpensePackageState,
    pub bump: u8,
}
