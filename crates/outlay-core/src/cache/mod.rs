//! In-memory query cache for on-chain data.
//!
//! This module provides the `QueryCache` that deduplicates and caches
//! backend queries for the lifetime of the process. Entries are created on
//! the first successful fetch and only refreshed by explicit invalidation;
//! there is no expiry.
//!
//! - `key`: cache-key codec (addresses in, canonical strings out, and back)
//! - `scheduler`: subscriptions, in-flight sharing, revalidation

pub mod key;
pub mod scheduler;

pub use key::{CacheKey, CanonicalKey, KeyError, KeyInput, KeyPart, SerializedKey, ADDRESS_TAG};
pub use scheduler::{FetchError, Fetcher, QueryCache, QueryState, Subscription};
