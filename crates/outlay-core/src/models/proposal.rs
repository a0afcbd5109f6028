//! Proposal records.
//!
//! The two governance backends describe proposals differently. Each native
//! record has a pure projection into [`ProposalInfo`], the only shape the rest
//! of the application sees.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Address;

/// Backend-neutral view of a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(rename_all = "camelCase")]
pub struct ProposalInfo {
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub address: Address,
    pub title: String,
    pub description: String,
    pub ready_to_execute: bool,
    pub executed: bool,
    #[cfg_attr(feature = "ts", ts(type = "string | null"))]
    pub executed_at: Option<DateTime<Utc>>,
}

fn timestamp(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

// ============================================================================
// Token-voting governance
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalState {
    Draft,
    SigningOff,
    Voting,
    Succeeded,
    Executing,
    Completed,
    Cancelled,
    Defeated,
    ExecutingWithErrors,
    Vetoed,
}

impl ProposalState {
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::Draft,
            1 => Self::SigningOff,
            2 => Self::Voting,
            3 => Self::Succeeded,
            4 => Self::Executing,
            5 => Self::Completed,
            6 => Self::Cancelled,
            7 => Self::Defeated,
            8 => Self::ExecutingWithErrors,
            9 => Self::Vetoed,
            _ => return None,
        })
    }
}

/// Proposal as stored by the token-voting governance program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceProposal {
    pub address: Address,
    pub governance: Address,
    pub state: ProposalState,
    pub name: String,
    pub description_link: String,
    pub executing_at: Option<i64>,
}

impl From<&GovernanceProposal> for ProposalInfo {
    fn from(p: &GovernanceProposal) -> Self {
        let completed = p.state == ProposalState::Completed;
        ProposalInfo {
            address: p.address,
            title: p.name.clone(),
            description: p.description_link.clone(),
            ready_to_execute: completed,
            executed: completed,
            executed_at: timestamp(p.executing_at),
        }
    }
}

// ============================================================================
// Multisig squads
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SquadStatus {
    Draft { timestamp: i64 },
    Active { timestamp: i64 },
    Rejected { timestamp: i64 },
    Approved { timestamp: i64 },
    Executing,
    Executed { timestamp: i64 },
    Cancelled { timestamp: i64 },
}

impl SquadStatus {
    /// Time the proposal left the voting flow, if it has.
    pub fn closed_at(&self) -> Option<i64> {
        match *self {
            SquadStatus::Rejected { timestamp }
            | SquadStatus::Executed { timestamp }
            | SquadStatus::Cancelled { timestamp } => Some(timestamp),
            _ => None,
        }
    }
}

/// Proposal as stored by the multisig program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquadProposal {
    pub address: Address,
    pub multisig: Address,
    pub transaction_index: u64,
    pub status: SquadStatus,
    pub title: String,
    pub description: String,
    pub execute_ready: bool,
    pub close_timestamp: Option<i64>,
}

impl From<&SquadProposal> for ProposalInfo {
    /// The close timestamp stands in for the execution time. It is
    /// informational only: rejected and cancelled proposals carry one too.
    fn from(p: &SquadProposal) -> Self {
        ProposalInfo {
            address: p.address,
            title: p.title.clone(),
            description: p.description.clone(),
            ready_to_execute: p.execute_ready,
            executed: matches!(p.status, SquadStatus::Executed { .. }),
            executed_at: timestamp(p.close_timestamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governance(state: ProposalState) -> GovernanceProposal {
        GovernanceProposal {
            address: Address::new([1; 32]),
            governance: Address::new([2; 32]),
            state,
            name: "Buy laptops".to_string(),
            description_link: "https://example.org/p/1".to_string(),
            executing_at: Some(1_700_000_000),
        }
    }

    #[test]
    fn test_governance_projection_completed() {
        let info = ProposalInfo::from(&governance(ProposalState::Completed));
        assert_eq!(info.title, "Buy laptops");
        assert_eq!(info.description, "https://example.org/p/1");
        assert!(info.ready_to_execute);
        assert!(info.executed);
        assert_eq!(info.executed_at.map(|t| t.timestamp()), Some(1_700_000_000));
    }

    #[test]
    fn test_governance_projection_voting() {
        let info = ProposalInfo::from(&governance(ProposalState::Voting));
        assert!(!info.ready_to_execute);
        assert!(!info.executed);
    }

    #[test]
    fn test_squad_projection_uses_close_timestamp() {
        let p = SquadProposal {
            address: Address::new([4; 32]),
            multisig: Address::new([5; 32]),
            transaction_index: 3,
            status: SquadStatus::Executed { timestamp: 1_650_000_000 },
            title: "Reimburse travel".to_string(),
            description: "Conference trip".to_string(),
            execute_ready: false,
            close_timestamp: Some(1_650_000_000),
        };
        let info = ProposalInfo::from(&p);
        assert_eq!(info.address, p.address);
        assert_eq!(info.title, "Reimburse travel");
        assert_eq!(info.description, "Conference trip");
        assert!(!info.ready_to_execute);
        assert!(info.executed);
        assert_eq!(info.executed_at.map(|t| t.timestamp()), Some(1_650_000_000));
    }

    #[test]
    fn test_squad_status_closed_at() {
        assert_eq!(SquadStatus::Approved { timestamp: 5 }.closed_at(), None);
        assert_eq!(SquadStatus::Cancelled { timestamp: 7 }.closed_at(), Some(7));
        assert_eq!(SquadStatus::Executing.closed_at(), None);
    }

    #[test]
    fn test_proposal_state_tags() {
        assert_eq!(ProposalState::from_tag(5), Some(ProposalState::Completed));
        assert_eq!(ProposalState::from_tag(10), None);
    }
}
