//! Account data decoders.
//!
//! All three programs store records as little-endian, length-prefixed
//! binary: integers are fixed width, strings and vectors carry a `u32`
//! length, options carry a one-byte tag. Anchor accounts (the expense program
//! and the multisig program) start with an 8-byte discriminator derived from
//! the account type name.
//!
//! Expense manager:
//! `disc | name: string | bump: u8 | expense_package_nonce: u32 |
//!  realm: option<address> | governance_authority: option<address> |
//!  squad: option<address> | membership_token_mint: address`
//!
//! Expense package:
//! `disc | expense_manager: address | owner: address | name: string |
//!  description: string | quantity: u64 | state: u8 | bump: u8`
//!
//! Governance proposal (account type 14) and multisig proposal layouts are
//! documented on their decoders.

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::{
    Address, ExpenseManager, ExpensePackage, ExpensePackageState, GovernanceProposal,
    ProposalState, SquadProposal, SquadStatus, ADDRESS_BYTES,
};

/// Offset of the `expense_manager` field in an expense package.
pub const PACKAGE_MANAGER_OFFSET: usize = 8;

/// Offset of the `owner` field in an expense package.
pub const PACKAGE_OWNER_OFFSET: usize = PACKAGE_MANAGER_OFFSET + ADDRESS_BYTES;

/// Account type tag of a v2 governance proposal.
pub const GOVERNANCE_PROPOSAL_V2: u8 = 14;

/// Offset of the owning governance in a governance proposal.
pub const GOVERNANCE_PROPOSAL_GOVERNANCE_OFFSET: usize = 1;

/// Offset of the multisig address in a multisig proposal.
pub const SQUAD_PROPOSAL_MULTISIG_OFFSET: usize = 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Account data too short: needed {needed} bytes at offset {offset}, have {len}")]
    UnexpectedEnd {
        needed: usize,
        offset: usize,
        len: usize,
    },

    #[error("Account is not a {0}")]
    WrongAccountType(&'static str),

    #[error("Invalid {field} tag: {tag}")]
    InvalidTag { field: &'static str, tag: u8 },

    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
}

/// Anchor account discriminator: first 8 bytes of `sha256("account:<Name>")`.
pub fn account_discriminator(name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("account:{}", name).as_bytes());
    let mut disc = [0u8; 8];
    disc.copy_from_slice(&digest[..8]);
    disc
}

/// Cursor over raw account bytes.
pub struct AccountReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> AccountReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::UnexpectedEnd {
                needed: n,
                offset: self.offset,
                len: self.data.len(),
            });
        }
        let slice = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        self.take(n).map(|_| ())
    }

    pub fn expect_discriminator(&mut self, name: &'static str) -> Result<(), DecodeError> {
        if self.take_array::<8>()? != account_discriminator(name) {
            return Err(DecodeError::WrongAccountType(name));
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn read_address(&mut self) -> Result<Address, DecodeError> {
        Ok(Address::new(self.take_array()?))
    }

    pub fn read_string(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8(field))
    }

    pub fn read_option<T>(
        &mut self,
        field: &'static str,
        read: impl FnOnce(&mut Self) -> Result<T, DecodeError>,
    ) -> Result<Option<T>, DecodeError> {
        match self.read_u8()? {
            0 => Ok(None),
            1 => read(self).map(Some),
            tag => Err(DecodeError::InvalidTag { field, tag }),
        }
    }

    pub fn read_vec<T>(
        &mut self,
        mut read: impl FnMut(&mut Self) -> Result<T, DecodeError>,
    ) -> Result<Vec<T>, DecodeError> {
        let len = self.read_u32()? as usize;
        // Never trust the length prefix for the allocation size.
        let mut items = Vec::with_capacity(len.min(self.remaining()));
        for _ in 0..len {
            items.push(read(self)?);
        }
        Ok(items)
    }
}

// ============================================================================
// Expense program
// ============================================================================

pub fn decode_expense_manager(address: Address, data: &[u8]) -> Result<ExpenseManager, DecodeError> {
    let mut r = AccountReader::new(data);
    r.expect_discriminator("ExpenseManager")?;
    let name = r.read_string("name")?;
    let bump = r.read_u8()?;
    let expense_package_nonce = r.read_u32()?;
    let realm = r.read_option("realm", AccountReader::read_address)?;
    let governance_authority = r.read_option("governance_authority", AccountReader::read_address)?;
    let squad = r.read_option("squad", AccountReader::read_address)?;
    let membership_token_mint = r.read_address()?;
    Ok(ExpenseManager {
        address,
        name,
        bump,
        expense_package_nonce,
        governance_authority,
        membership_token_mint,
        realm,
        squad,
    })
}

pub fn decode_expense_package(address: Address, data: &[u8]) -> Result<ExpensePackage, DecodeError> {
    let mut r = AccountReader::new(data);
    r.expect_discriminator("ExpensePackage")?;
    let expense_manager = r.read_address()?;
    let owner = r.read_address()?;
    let name = r.read_string("name")?;
    let description = r.read_string("description")?;
    let quantity = r.read_u64()?;
    let tag = r.read_u8()?;
    let state = ExpensePackageState::from_tag(tag)
        .ok_or(DecodeError::InvalidTag { field: "state", tag })?;
    let bump = r.read_u8()?;
    Ok(ExpensePackage {
        address,
        expense_manager,
        owner,
        name,
        description,
        quantity,
        state,
        bump,
    })
}

// ============================================================================
// Token-voting governance
// ============================================================================

fn skip_vote_type(r: &mut AccountReader<'_>) -> Result<(), DecodeError> {
    match r.read_u8()? {
        0 => Ok(()),
        // choice type, min options, max options, max winning options
        1 => r.skip(4),
        tag => Err(DecodeError::InvalidTag { field: "vote_type", tag }),
    }
}

fn skip_proposal_option(r: &mut AccountReader<'_>) -> Result<(), DecodeError> {
    r.read_string("option label")?;
    // vote weight, vote result, executed count, transaction count, next index
    r.skip(8 + 1 + 2 + 2 + 2)
}

fn skip_vote_threshold(r: &mut AccountReader<'_>) -> Result<(), DecodeError> {
    match r.read_u8()? {
        0 | 1 => r.skip(1),
        2 => Ok(()),
        tag => Err(DecodeError::InvalidTag { field: "vote_threshold", tag }),
    }
}

/// Decode a v2 governance proposal.
///
/// `account_type: u8 | governance | governing_token_mint | state: u8 |
///  token_owner_record | signatories: u8 | signed_off: u8 | vote_type |
///  options: vec | deny_weight: option<u64> | reserved: u8 |
///  abstain_weight: option<u64> | start_voting_at: option<i64> |
///  draft_at: i64 | signing_off_at, voting_at: option<i64> |
///  voting_at_slot: option<u64> | voting_completed_at, executing_at,
///  closed_at: option<i64> | execution_flags: u8 |
///  max_vote_weight: option<u64> | max_voting_time: option<u32> |
///  vote_threshold: option | reserved: [u8; 64] | name: string |
///  description_link: string`
pub fn decode_governance_proposal(address: Address, data: &[u8]) -> Result<GovernanceProposal, DecodeError> {
    let mut r = AccountReader::new(data);
    if r.read_u8()? != GOVERNANCE_PROPOSAL_V2 {
        return Err(DecodeError::WrongAccountType("ProposalV2"));
    }
    let governance = r.read_address()?;
    r.read_address()?;
    let tag = r.read_u8()?;
    let state = ProposalState::from_tag(tag).ok_or(DecodeError::InvalidTag { field: "state", tag })?;
    r.read_address()?;
    r.skip(2)?;
    skip_vote_type(&mut r)?;
    r.read_vec(skip_proposal_option)?;
    r.read_option("deny_vote_weight", AccountReader::read_u64)?;
    r.skip(1)?;
    r.read_option("abstain_vote_weight", AccountReader::read_u64)?;
    r.read_option("start_voting_at", AccountReader::read_i64)?;
    r.read_i64()?;
    r.read_option("signing_off_at", AccountReader::read_i64)?;
    r.read_option("voting_at", AccountReader::read_i64)?;
    r.read_option("voting_at_slot", AccountReader::read_u64)?;
    r.read_option("voting_completed_at", AccountReader::read_i64)?;
    let executing_at = r.read_option("executing_at", AccountReader::read_i64)?;
    r.read_option("closed_at", AccountReader::read_i64)?;
    r.skip(1)?;
    r.read_option("max_vote_weight", AccountReader::read_u64)?;
    r.read_option("max_voting_time", AccountReader::read_u32)?;
    r.read_option("vote_threshold", skip_vote_threshold)?;
    r.skip(64)?;
    let name = r.read_string("name")?;
    let description_link = r.read_string("description_link")?;
    Ok(GovernanceProposal {
        address,
        governance,
        state,
        name,
        description_link,
        executing_at,
    })
}

// ============================================================================
// Multisig squads
// ============================================================================

fn read_squad_status(r: &mut AccountReader<'_>) -> Result<SquadStatus, DecodeError> {
    let tag = r.read_u8()?;
    Ok(match tag {
        0 => SquadStatus::Draft { timestamp: r.read_i64()? },
        1 => SquadStatus::Active { timestamp: r.read_i64()? },
        2 => SquadStatus::Rejected { timestamp: r.read_i64()? },
        3 => SquadStatus::Approved { timestamp: r.read_i64()? },
        4 => SquadStatus::Executing,
        5 => SquadStatus::Executed { timestamp: r.read_i64()? },
        6 => SquadStatus::Cancelled { timestamp: r.read_i64()? },
        _ => return Err(DecodeError::InvalidTag { field: "status", tag }),
    })
}

/// Decode a multisig proposal.
///
/// `disc | multisig | transaction_index: u64 | status | bump: u8 |
///  approved, rejected, cancelled: vec<address> | [title: string |
///  description: string]`
///
/// Proposals created through the expense program carry the trailing title
/// and description; others get a title derived from the transaction index.
pub fn decode_squad_proposal(address: Address, data: &[u8]) -> Result<SquadProposal, DecodeError> {
    let mut r = AccountReader::new(data);
    r.expect_discriminator("Proposal")?;
    let multisig = r.read_address()?;
    let transaction_index = r.read_u64()?;
    let status = read_squad_status(&mut r)?;
    r.read_u8()?;
    for _ in 0..3 {
        r.read_vec(AccountReader::read_address)?;
    }
    let (title, description) = if r.remaining() > 0 {
        (r.read_string("title")?, r.read_string("description")?)
    } else {
        (format!("Transaction #{}", transaction_index), String::new())
    };
    Ok(SquadProposal {
        address,
        multisig,
        transaction_index,
        status,
        title,
        description,
        execute_ready: matches!(status, SquadStatus::Approved { .. }),
        close_timestamp: status.closed_at(),
    })
}

// ============================================================================
// Test support
// ============================================================================

/// Builds account bytes in the layouts above.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct AccountWriter(Vec<u8>);

#[cfg(test)]
impl AccountWriter {
    pub fn discriminator(mut self, name: &str) -> Self {
        self.0.extend_from_slice(&account_discriminator(name));
        self
    }

    pub fn u8(mut self, v: u8) -> Self {
        self.0.push(v);
        self
    }

    pub fn u32(mut self, v: u32) -> Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u64(mut self, v: u64) -> Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i64(mut self, v: i64) -> Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn address(mut self, a: Address) -> Self {
        self.0.extend_from_slice(a.as_bytes());
        self
    }

    pub fn string(self, s: &str) -> Self {
        let mut w = self.u32(s.len() as u32);
        w.0.extend_from_slice(s.as_bytes());
        w
    }

    pub fn option_address(self, a: Option<Address>) -> Self {
        match a {
            Some(a) => self.u8(1).address(a),
            None => self.u8(0),
        }
    }

    pub fn zeros(mut self, n: usize) -> Self {
        self.0.extend(std::iter::repeat(0).take(n));
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.0
    }

    pub fn expense_manager(m: &ExpenseManager) -> Vec<u8> {
        Self::default()
            .discriminator("ExpenseManager")
            .string(&m.name)
            .u8(m.bump)
            .u32(m.expense_package_nonce)
            .option_address(m.realm)
            .option_address(m.governance_authority)
            .option_address(m.squad)
            .address(m.membership_token_mint)
            .finish()
    }

    pub fn expense_package(p: &ExpensePackage) -> Vec<u8> {
        let state = match p.state {
            ExpensePackageState::Created => 0,
            ExpensePackageState::Pending => 1,
            ExpensePackageState::Approved => 2,
            ExpensePackageState::Denied => 3,
            ExpensePackageState::Paid => 4,
        };
        Self::default()
            .discriminator("ExpensePackage")
            .address(p.expense_manager)
            .address(p.owner)
            .string(&p.name)
            .string(&p.description)
            .u64(p.quantity)
            .u8(state)
            .u8(p.bump)
            .finish()
    }

    /// Single-choice governance proposal with one option and no optional
    /// timestamps except `executing_at`.
    pub fn governance_proposal(
        governance: Address,
        state: u8,
        name: &str,
        description_link: &str,
        executing_at: Option<i64>,
    ) -> Vec<u8> {
        let w = Self::default()
            .u8(GOVERNANCE_PROPOSAL_V2)
            .address(governance)
            .address(Address::new([0xAA; 32]))
            .u8(state)
            .address(Address::new([0xBB; 32]))
            .u8(1)
            .u8(1)
            .u8(0)
            .u32(1)
            .string("Approve")
            .u64(100)
            .u8(0)
            .zeros(6)
            .u8(1)
            .u64(3)
            .u8(0)
            .u8(0)
            .u8(0)
            .i64(1_600_000_000)
            .u8(0)
            .u8(0)
            .u8(0)
            .u8(0);
        let w = match executing_at {
            Some(t) => w.u8(1).i64(t),
            None => w.u8(0),
        };
        w.u8(0)
            .u8(0)
            .u8(0)
            .u8(0)
            .u8(1)
            .u8(0)
            .u8(60)
            .zeros(64)
            .string(name)
            .string(description_link)
            .u64(0)
            .finish()
    }

    pub fn squad_proposal(
        multisig: Address,
        transaction_index: u64,
        status_tag: u8,
        timestamp: i64,
        metadata: Option<(&str, &str)>,
    ) -> Vec<u8> {
        let mut w = Self::default()
            .discriminator("Proposal")
            .address(multisig)
            .u64(transaction_index)
            .u8(status_tag);
        if status_tag != 4 {
            w = w.i64(timestamp);
        }
        w = w
            .u8(254)
            .u32(1)
            .address(Address::new([0xCC; 32]))
            .u32(0)
            .u32(0);
        if let Some((title, description)) = metadata {
            w = w.string(title).string(description);
        }
        w.finish()
    }
}
