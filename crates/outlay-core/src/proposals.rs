//! Backend-neutral proposal listing for an expense manager.
//!
//! A manager is controlled either by a multisig squad or by a token-voting
//! realm. `ProposalAggregator` picks the matching backend query, runs it
//! through the shared `QueryCache` and projects the native records into
//! [`ProposalInfo`], so callers never branch on the backend.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::cache::{CanonicalKey, FetchError, QueryCache, QueryState, Subscription};
use crate::dispatch::{
    BackendOutcome, GetRealmProposals, GetSquadProposals, GovernanceHandle, ProgramClient,
};
use crate::models::{ExpenseManager, GovernanceProposal, ManagerBackend, ProposalInfo, SquadProposal};

/// Proposals of one manager plus the state of the query behind them.
#[derive(Clone)]
pub struct ProposalsView {
    pub proposals: Vec<ProposalInfo>,
    pub error: Option<FetchError>,
    /// Set when the manager is not configured for its backend. Not an error.
    pub notice: Option<String>,
    pub is_loading: bool,
    pub is_validating: bool,
    cache: QueryCache,
    active_key: Option<CanonicalKey>,
}

impl ProposalsView {
    fn empty(cache: &QueryCache) -> Self {
        Self {
            proposals: Vec::new(),
            error: None,
            notice: None,
            is_loading: false,
            is_validating: false,
            cache: cache.clone(),
            active_key: None,
        }
    }

    fn from_state<T, F>(
        cache: &QueryCache,
        key: Option<CanonicalKey>,
        state: QueryState<BackendOutcome<Vec<T>>>,
        project: F,
    ) -> Self
    where
        F: Fn(&T) -> ProposalInfo,
    {
        let (proposals, notice) = match state.data.as_deref() {
            Some(BackendOutcome::Records(records)) => (records.iter().map(project).collect(), None),
            Some(BackendOutcome::Unconfigured(message)) => (Vec::new(), Some(message.clone())),
            None => (Vec::new(), None),
        };
        Self {
            proposals,
            error: state.error,
            notice,
            is_loading: state.is_loading,
            is_validating: state.is_validating,
            cache: cache.clone(),
            active_key: key,
        }
    }

    /// Canonical key of the backend query behind this view, if any.
    pub fn active_key(&self) -> Option<&CanonicalKey> {
        self.active_key.as_ref()
    }

    /// Invalidate the active backend query. The next load refetches it; other
    /// entries are untouched.
    pub fn mutate(&self) {
        if let Some(key) = &self.active_key {
            debug!(key = %key, "Revalidating proposals");
            self.cache.invalidate(key);
        }
    }
}

impl fmt::Debug for ProposalsView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProposalsView")
            .field("proposals", &self.proposals)
            .field("error", &self.error)
            .field("notice", &self.notice)
            .field("is_loading", &self.is_loading)
            .field("is_validating", &self.is_validating)
            .field("active_key", &self.active_key)
            .finish()
    }
}

enum Active {
    Squad(Subscription<GetSquadProposals>),
    Governance(Subscription<GetRealmProposals>),
    None,
}

/// Selects and runs the proposal query for a manager.
///
/// Each backend handle is optional: a missing handle behaves like a query
/// that is not ready yet.
#[derive(Clone)]
pub struct ProposalAggregator {
    cache: QueryCache,
    program: Option<ProgramClient>,
    governance: Option<GovernanceHandle>,
    squads: Option<GovernanceHandle>,
}

impl ProposalAggregator {
    pub fn new(
        cache: QueryCache,
        program: Option<ProgramClient>,
        governance: Option<GovernanceHandle>,
        squads: Option<GovernanceHandle>,
    ) -> Self {
        Self {
            cache,
            program,
            governance,
            squads,
        }
    }

    fn active(&self, manager: Option<&ExpenseManager>) -> Active {
        let (Some(manager), Some(_)) = (manager, self.program.as_ref()) else {
            return Active::None;
        };
        match manager.backend() {
            ManagerBackend::Squad { squad } => {
                // Keyed on the squads program; with no handle the key stays
                // disabled and nothing is fetched.
                let key = self
                    .squads
                    .as_ref()
                    .map(|h| GetSquadProposals::key(h.program_id, manager.address, squad));
                Active::Squad(self.cache.query_with(self.squads.clone(), Arc::new(GetSquadProposals), key))
            }
            ManagerBackend::Governance { realm, .. } | ManagerBackend::RealmPending { realm } => {
                Active::Governance(self.cache.query_with(
                    self.governance.clone(),
                    Arc::new(GetRealmProposals),
                    GetRealmProposals::key(manager.address, realm),
                ))
            }
            ManagerBackend::Unsupported => Active::None,
        }
    }

    fn squad_view(
        &self,
        sub: &Subscription<GetSquadProposals>,
        state: QueryState<BackendOutcome<Vec<SquadProposal>>>,
    ) -> ProposalsView {
        ProposalsView::from_state(&self.cache, sub.key(), state, |p: &SquadProposal| ProposalInfo::from(p))
    }

    fn realm_view(
        &self,
        sub: &Subscription<GetRealmProposals>,
        state: QueryState<BackendOutcome<Vec<GovernanceProposal>>>,
    ) -> ProposalsView {
        ProposalsView::from_state(&self.cache, sub.key(), state, |p: &GovernanceProposal| ProposalInfo::from(p))
    }

    /// Current proposals without fetching.
    pub fn snapshot(&self, manager: Option<&ExpenseManager>) -> ProposalsView {
        match self.active(manager) {
            Active::Squad(sub) => self.squad_view(&sub, sub.state()),
            Active::Governance(sub) => self.realm_view(&sub, sub.state()),
            Active::None => ProposalsView::empty(&self.cache),
        }
    }

    /// Proposals of `manager`, fetching them if they are missing or stale.
    pub async fn proposals(&self, manager: Option<&ExpenseManager>) -> ProposalsView {
        match self.active(manager) {
            Active::Squad(sub) => {
                let state = sub.load().await;
                self.squad_view(&sub, state)
            }
            Active::Governance(sub) => {
                let state = sub.load().await;
                self.realm_view(&sub, state)
            }
            Active::None => ProposalsView::empty(&self.cache),
        }
    }
}
