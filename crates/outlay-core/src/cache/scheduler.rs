//! Conditional fetch scheduler.
//!
//! `QueryCache` holds one entry per canonical key. A `Subscription` binds a
//! fetcher, an optional backend handle and a key description to the cache.
//! Disabled keys and unset handles never reach the fetcher, concurrent loads
//! of the same key share one spawned fetch, and results stay cached until the
//! key is invalidated.

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, error, warn};

use super::key::{self, CacheKey, CanonicalKey, KeyError, KeyInput, SerializedKey};

type AnyData = Arc<dyn Any + Send + Sync>;
type InFlight = Shared<BoxFuture<'static, ()>>;

/// A named async query.
///
/// `NAME` is the logical query name. It prefixes every canonical key the
/// fetcher is used with, so two queries with similar arguments never share an
/// entry.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    /// Backend handle passed alongside the key. Never part of the key.
    type Handle: Clone + Send + Sync + 'static;
    type Output: Send + Sync + 'static;

    const NAME: &'static str;

    async fn fetch(&self, handle: &Self::Handle, key: &CacheKey) -> anyhow::Result<Self::Output>;
}

/// Cloneable fetch failure stored alongside a cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError(Arc<str>);

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(Arc::from(message.into()))
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for FetchError {}

impl From<anyhow::Error> for FetchError {
    fn from(e: anyhow::Error) -> Self {
        Self::new(format!("{:#}", e))
    }
}

impl From<KeyError> for FetchError {
    fn from(e: KeyError) -> Self {
        Self::new(e.to_string())
    }
}

#[derive(Default)]
struct Entry {
    data: Option<AnyData>,
    error: Option<FetchError>,
    stale: bool,
    /// Bumped by every invalidation; a fetch only clears `stale` if no
    /// invalidation happened while it ran.
    generation: u64,
    in_flight: Option<InFlight>,
}

impl Entry {
    fn is_settled(&self) -> bool {
        !self.stale && (self.data.is_some() || self.error.is_some())
    }
}

/// Process-scoped query cache. Clone is cheap and shares the same entries.
#[derive(Clone, Default)]
pub struct QueryCache {
    entries: Arc<Mutex<HashMap<CanonicalKey, Entry>>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CanonicalKey, Entry>> {
        // Entries stay consistent even if a holder panicked: every write is a
        // single field assignment.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Subscribe to a query that needs no backend handle.
    pub fn query<F>(&self, fetcher: Arc<F>, key: impl Into<KeyInput>) -> Subscription<F>
    where
        F: Fetcher<Handle = ()>,
    {
        self.query_with(Some(()), fetcher, key)
    }

    /// Subscribe to a query against a backend. An unset handle disables the
    /// subscription just like a not-ready key.
    pub fn query_with<F: Fetcher>(
        &self,
        handle: Option<F::Handle>,
        fetcher: Arc<F>,
        key: impl Into<KeyInput>,
    ) -> Subscription<F> {
        Subscription {
            cache: self.clone(),
            fetcher,
            handle,
            key: key.into(),
            prefix: Cow::Borrowed(F::NAME),
        }
    }

    /// Mark `key` stale. The next load refetches it exactly once; repeated
    /// calls before that load have the same effect as one.
    pub fn invalidate(&self, key: &CanonicalKey) {
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.generation += 1;
            entry.stale = true;
            debug!(key = %key, generation = entry.generation, "Invalidated cache entry");
        }
    }

    /// Drop every settled entry. In-flight fetches still land when they finish.
    pub fn clear(&self) {
        let mut entries = self.lock();
        entries.retain(|_, entry| entry.in_flight.is_some());
        for entry in entries.values_mut() {
            entry.data = None;
            entry.error = None;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().values().filter(|e| e.data.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &CanonicalKey) -> bool {
        self.lock().get(key).map(|e| e.data.is_some()).unwrap_or(false)
    }

    /// Returns the in-flight fetch for `key`, starting one if the entry is
    /// missing or stale. `None` means the cached value is current.
    fn fetch_if_needed<F: Fetcher>(
        &self,
        key: &CanonicalKey,
        handle: &F::Handle,
        fetcher: &Arc<F>,
    ) -> Option<InFlight> {
        let mut entries = self.lock();
        let entry = entries.entry(key.clone()).or_default();

        if let Some(in_flight) = &entry.in_flight {
            return Some(in_flight.clone());
        }
        if entry.is_settled() {
            return None;
        }

        debug!(key = %key, "Starting fetch");
        let generation = entry.generation;
        let task = tokio::spawn(Self::run_fetch(
            self.clone(),
            key.clone(),
            generation,
            handle.clone(),
            Arc::clone(fetcher),
        ));
        let cache = self.clone();
        let task_key = key.clone();
        let in_flight = async move {
            // A panicking fetcher never reaches `complete`; settle the entry
            // here so waiters stop looping on a finished future.
            if let Err(e) = task.await {
                error!(key = %task_key, error = %e, "Fetch task failed");
                let failure = FetchError::new(format!("Fetch task failed: {}", e));
                cache.complete(&task_key, generation, Err(failure));
            }
        }
        .boxed()
        .shared();

        entry.in_flight = Some(in_flight.clone());
        Some(in_flight)
    }

    async fn run_fetch<F: Fetcher>(
        cache: QueryCache,
        key: CanonicalKey,
        generation: u64,
        handle: F::Handle,
        fetcher: Arc<F>,
    ) {
        let result = match key::deserialize(&key.without_prefix()) {
            Ok(args) => fetcher
                .fetch(&handle, &args)
                .await
                .map(|data| Arc::new(data) as AnyData)
                .map_err(FetchError::from),
            Err(e) => Err(FetchError::from(e)),
        };
        cache.complete(&key, generation, result);
    }

    fn complete(&self, key: &CanonicalKey, generation: u64, result: Result<AnyData, FetchError>) {
        let mut entries = self.lock();
        let entry = entries.entry(key.clone()).or_default();
        match result {
            Ok(data) => {
                debug!(key = %key, "Fetch complete");
                entry.data = Some(data);
                entry.error = None;
            }
            Err(e) => {
                // Keep the last good data; the error is reported next to it.
                warn!(key = %key, error = %e, "Fetch failed");
                entry.error = Some(e);
            }
        }
        entry.stale = entry.generation != generation;
        entry.in_flight = None;
    }
}

/// Snapshot of a subscription.
pub struct QueryState<T> {
    pub data: Option<Arc<T>>,
    pub error: Option<FetchError>,
    pub is_loading: bool,
    pub is_validating: bool,
}

impl<T> QueryState<T> {
    pub fn idle() -> Self {
        Self {
            data: None,
            error: None,
            is_loading: false,
            is_validating: false,
        }
    }
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self::idle()
    }
}

impl<T> Clone for QueryState<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            error: self.error.clone(),
            is_loading: self.is_loading,
            is_validating: self.is_validating,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for QueryState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryState")
            .field("data", &self.data)
            .field("error", &self.error)
            .field("is_loading", &self.is_loading)
            .field("is_validating", &self.is_validating)
            .finish()
    }
}

/// A managed query bound to one cache.
pub struct Subscription<F: Fetcher> {
    cache: QueryCache,
    fetcher: Arc<F>,
    handle: Option<F::Handle>,
    key: KeyInput,
    prefix: Cow<'static, str>,
}

impl<F: Fetcher> Subscription<F> {
    /// Override the fetcher name used as the key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Cow::Owned(prefix.into());
        self
    }

    /// Canonical key of this subscription, or `None` while disabled.
    pub fn key(&self) -> Option<CanonicalKey> {
        self.handle.as_ref()?;
        match key::serialize(&self.key) {
            SerializedKey::Disabled => None,
            SerializedKey::Empty => Some(key::serialize_key(&CacheKey::default()).with_prefix(&self.prefix)),
            SerializedKey::Canonical(canonical) => Some(canonical.with_prefix(&self.prefix)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.key().is_some()
    }

    /// Current state without triggering a fetch.
    pub fn state(&self) -> QueryState<F::Output> {
        let Some(key) = self.key() else {
            return QueryState::idle();
        };
        let entries = self.cache.lock();
        let Some(entry) = entries.get(&key) else {
            return QueryState::idle();
        };
        let data = entry
            .data
            .clone()
            .and_then(|d| d.downcast::<F::Output>().ok());
        let in_flight = entry.in_flight.is_some();
        QueryState {
            is_loading: in_flight && data.is_none(),
            is_validating: in_flight,
            data,
            error: entry.error.clone(),
        }
    }

    pub fn data(&self) -> Option<Arc<F::Output>> {
        self.state().data
    }

    pub fn error(&self) -> Option<FetchError> {
        self.state().error
    }

    pub fn is_loading(&self) -> bool {
        self.state().is_loading
    }

    pub fn is_validating(&self) -> bool {
        self.state().is_validating
    }

    /// Wait until the entry is settled, fetching it if missing or stale.
    pub async fn load(&self) -> QueryState<F::Output> {
        let (Some(key), Some(handle)) = (self.key(), self.handle.as_ref()) else {
            return QueryState::idle();
        };
        while let Some(in_flight) = self.cache.fetch_if_needed(&key, handle, &self.fetcher) {
            in_flight.await;
        }
        self.state()
    }

    /// Mark this subscription's key stale without waiting for a refetch.
    pub fn invalidate(&self) {
        if let Some(key) = self.key() {
            self.cache.invalidate(&key);
        }
    }

    /// Invalidate and reload.
    pub async fn revalidate(&self) -> QueryState<F::Output> {
        self.invalidate();
        self.load().await
    }
}

// ============================================================================
// Tests
// ============================================================================
