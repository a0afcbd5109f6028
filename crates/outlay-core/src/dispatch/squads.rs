//! Multisig squad backend.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::api::decode::{
    account_discriminator, decode_expense_manager, decode_squad_proposal, SQUAD_PROPOSAL_MULTISIG_OFFSET,
};
use crate::api::AccountFilter;
use crate::cache::{CacheKey, Fetcher};
use crate::cache_key;
use crate::models::{Address, SquadProposal};

use super::{address_arg, BackendOutcome, GovernanceHandle};

/// `getSquadProposals [squads program, manager, squad]`, newest first.
///
/// The squads program address is part of the key so managers on different
/// multisig deployments never share entries.
pub struct GetSquadProposals;

#[async_trait]
impl Fetcher for GetSquadProposals {
    type Handle = GovernanceHandle;
    type Output = BackendOutcome<Vec<SquadProposal>>;
    const NAME: &'static str = "getSquadProposals";

    async fn fetch(&self, handle: &GovernanceHandle, key: &CacheKey) -> Result<Self::Output> {
        let program = address_arg(Self::NAME, key, 0)?;
        let manager_address = address_arg(Self::NAME, key, 1)?;
        let squad = address_arg(Self::NAME, key, 2)?;

        if program != handle.program_id {
            anyhow::bail!(
                "{} keyed for squads program {} but handle targets {}",
                Self::NAME,
                program,
                handle.program_id
            );
        }

        let account = handle
            .connection
            .get_account(&manager_address)
            .await
            .with_context(|| format!("Failed to load expense manager {}", manager_address))?
            .with_context(|| format!("Expense manager {} does not exist", manager_address))?;
        let manager = decode_expense_manager(manager_address, &account.data)
            .with_context(|| format!("Account {} is not an expense manager", manager_address))?;
        if manager.squad != Some(squad) {
            return Ok(BackendOutcome::Unconfigured(format!(
                "Expense manager {} is not controlled by squad {}",
                manager.name, squad
            )));
        }

        let filters = [
            AccountFilter::Memcmp {
                offset: 0,
                bytes: account_discriminator("Proposal").to_vec(),
            },
            AccountFilter::memcmp_address(SQUAD_PROPOSAL_MULTISIG_OFFSET, &squad),
        ];
        let accounts = handle
            .connection
            .get_program_accounts(&handle.program_id, &filters)
            .await
            .with_context(|| format!("Failed to list proposals of squad {}", squad))?;

        let mut proposals: Vec<SquadProposal> = accounts
            .into_iter()
            .filter_map(|(address, account)| match decode_squad_proposal(address, &account.data) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(address = %address, error = %e, "Skipping undecodable squad proposal");
                    None
                }
            })
            .collect();
        proposals.sort_by(|a, b| b.transaction_index.cmp(&a.transaction_index));
        debug!(squad = %squad, count = proposals.len(), "Loaded squad proposals");
        Ok(BackendOutcome::Records(proposals))
    }
}

impl GetSquadProposals {
    pub fn key(program: Address, manager: Address, squad: Address) -> CacheKey {
        cache_key![program, manager, squad]
    }
}
