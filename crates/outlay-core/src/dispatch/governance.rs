//! Token-voting governance backend.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::api::decode::{
    decode_expense_manager, decode_governance_proposal, GOVERNANCE_PROPOSAL_GOVERNANCE_OFFSET,
    GOVERNANCE_PROPOSAL_V2,
};
use crate::api::AccountFilter;
use crate::cache::{CacheKey, Fetcher};
use crate::cache_key;
use crate::models::{Address, GovernanceProposal};

use super::{address_arg, BackendOutcome, GovernanceHandle};

/// `getRealmProposals [manager, realm]`: proposals of the governance that
/// controls the manager.
///
/// The manager is re-read on every fetch so a manager whose realm changed or
/// which never got a governance authority reports `Unconfigured` rather than
/// listing someone else's proposals.
pub struct GetRealmProposals;

#[async_trait]
impl Fetcher for GetRealmProposals {
    type Handle = GovernanceHandle;
    type Output = BackendOutcome<Vec<GovernanceProposal>>;
    const NAME: &'static str = "getRealmProposals";

    async fn fetch(&self, handle: &GovernanceHandle, key: &CacheKey) -> Result<Self::Output> {
        let manager_address = address_arg(Self::NAME, key, 0)?;
        let realm = address_arg(Self::NAME, key, 1)?;

        let account = handle
            .connection
            .get_account(&manager_address)
            .await
            .with_context(|| format!("Failed to load expense manager {}", manager_address))?
            .with_context(|| format!("Expense manager {} does not exist", manager_address))?;
        let manager = decode_expense_manager(manager_address, &account.data)
            .with_context(|| format!("Account {} is not an expense manager", manager_address))?;

        if manager.realm != Some(realm) {
            return Ok(BackendOutcome::Unconfigured(format!(
                "Expense manager {} is not bound to realm {}",
                manager.name, realm
            )));
        }
        let Some(governance) = manager.governance_authority else {
            return Ok(BackendOutcome::Unconfigured(format!(
                "Expense manager {} has no governance authority yet",
                manager.name
            )));
        };

        let filters = [
            AccountFilter::Memcmp {
                offset: 0,
                bytes: vec![GOVERNANCE_PROPOSAL_V2],
            },
            AccountFilter::memcmp_address(GOVERNANCE_PROPOSAL_GOVERNANCE_OFFSET, &governance),
        ];
        let accounts = handle
            .connection
            .get_program_accounts(&handle.program_id, &filters)
            .await
            .with_context(|| format!("Failed to list proposals of governance {}", governance))?;

        let mut proposals: Vec<GovernanceProposal> = accounts
            .into_iter()
            .filter_map(|(address, account)| match decode_governance_proposal(address, &account.data) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(address = %address, error = %e, "Skipping undecodable governance proposal");
                    None
                }
            })
            .collect();
        proposals.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(governance = %governance, count = proposals.len(), "Loaded governance proposals");
        Ok(BackendOutcome::Records(proposals))
    }
}

impl GetRealmProposals {
    pub fn key(manager: Address, realm: Address) -> CacheKey {
        cache_key![manager, realm]
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::api::decode::AccountWriter;
    use crate::models::{ExpenseManager, ProposalState};
    use crate::testing::FakeConnection;

    const PROGRAM: Address = Address::new([9; 32]);
    const GOVERNANCE_PROGRAM: Address = Address::new([8; 32]);

    fn addr(byte: u8) -> Address {
        Address::new([byte; 32])
    }

    fn governed_manager(authority: Option<Address>) -> ExpenseManager {
        ExpenseManager {
            address: addr(1),
            name: "Grants".to_string(),
            bump: 255,
            expense_package_nonce: 2,
            governance_authority: authority,
            membership_token_mint: addr(4),
            realm: Some(addr(2)),
            squad: None,
        }
    }

    fn setup(authority: Option<Address>) -> (Arc<FakeConnection>, GovernanceHandle) {
        let connection = Arc::new(FakeConnection::default());
        let m = governed_manager(authority);
        connection.insert(m.address, PROGRAM, AccountWriter::expense_manager(&m));
        let handle = GovernanceHandle::new(connection.clone(), GOVERNANCE_PROGRAM);
        (connection, handle)
    }

    #[tokio::test]
    async fn test_lists_proposals_of_the_managers_governance() {
        let (connection, handle) = setup(Some(addr(3)));
        connection.insert(
            addr(10),
            GOVERNANCE_PROGRAM,
            AccountWriter::governance_proposal(addr(3), 5, "Pay venue", "https://example.org/venue", Some(1_700_000_000)),
        );
        connection.insert(
            addr(11),
            GOVERNANCE_PROGRAM,
            AccountWriter::governance_proposal(addr(3), 2, "Buy snacks", "", None),
        );
        // Same program, different governance.
        connection.insert(
            addr(12),
            GOVERNANCE_PROGRAM,
            AccountWriter::governance_proposal(addr(30), 2, "Other", "", None),
        );

        let outcome = GetRealmProposals
            .fetch(&handle, &GetRealmProposals::key(addr(1), addr(2)))
            .await
            .unwrap();
        let BackendOutcome::Records(proposals) = outcome else {
            panic!("expected records, got {:?}", outcome);
        };
        let names: Vec<&str> = proposals.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Buy snacks", "Pay venue"]);
        assert_eq!(proposals[1].state, ProposalState::Completed);
        assert_eq!(proposals[1].executing_at, Some(1_700_000_000));
        assert_eq!(connection.program_queries(), vec![GOVERNANCE_PROGRAM]);
    }

    #[tokio::test]
    async fn test_missing_authority_is_unconfigured() {
        let (connection, handle) = setup(None);
        let outcome = GetRealmProposals
            .fetch(&handle, &GetRealmProposals::key(addr(1), addr(2)))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            BackendOutcome::Unconfigured("Expense manager Grants has no governance authority yet".to_string())
        );
        assert!(connection.program_queries().is_empty());
    }

    #[tokio::test]
    async fn test_realm_mismatch_is_unconfigured() {
        let (_, handle) = setup(Some(addr(3)));
        let outcome = GetRealmProposals
            .fetch(&handle, &GetRealmProposals::key(addr(1), addr(7)))
            .await
            .unwrap();
        assert!(matches!(outcome, BackendOutcome::Unconfigured(_)));
    }

    #[tokio::test]
    async fn test_skips_undecodable_proposals() {
        let (connection, handle) = setup(Some(addr(3)));
        let mut truncated = vec![GOVERNANCE_PROPOSAL_V2];
        truncated.extend_from_slice(addr(3).as_bytes());
        connection.insert(addr(10), GOVERNANCE_PROGRAM, truncated);

        let outcome = GetRealmProposals
            .fetch(&handle, &GetRealmProposals::key(addr(1), addr(2)))
            .await
            .unwrap();
        assert_eq!(outcome, BackendOutcome::Records(vec![]));
    }

    #[tokio::test]
    async fn test_missing_manager_is_an_error() {
        let handle = GovernanceHandle::new(Arc::new(FakeConnection::default()), GOVERNANCE_PROGRAM);
        let err = GetRealmProposals
            .fetch(&handle, &GetRealmProposals::key(addr(1), addr(2)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
