//! Cache-key codec.
//!
//! Cache keys may contain addresses, which are compared by their canonical
//! base58 form. `serialize` turns a key into a [`CanonicalKey`] of plain
//! strings and integers; `deserialize` restores the addresses so fetchers
//! always receive real `Address` values.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::models::Address;

/// Prefix marking a canonical string as an encoded address.
///
/// The tag is not escaped. A string part that itself starts with `pubkey:`
/// comes back from [`deserialize`] as an address, or fails with
/// [`KeyError::MalformedAddress`], so keys must not carry user-supplied
/// strings with this prefix.
pub const ADDRESS_TAG: &str = "pubkey:";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Malformed address in cache key: {0}")]
    MalformedAddress(String),
}

/// One element of a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    Str(String),
    Int(i64),
    Address(Address),
    List(Vec<KeyPart>),
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        KeyPart::Str(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        KeyPart::Str(s)
    }
}

impl From<i64> for KeyPart {
    fn from(n: i64) -> Self {
        KeyPart::Int(n)
    }
}

impl From<u32> for KeyPart {
    fn from(n: u32) -> Self {
        KeyPart::Int(n.into())
    }
}

impl From<Address> for KeyPart {
    fn from(a: Address) -> Self {
        KeyPart::Address(a)
    }
}

impl From<Vec<KeyPart>> for KeyPart {
    fn from(parts: Vec<KeyPart>) -> Self {
        KeyPart::List(parts)
    }
}

/// An ordered cache key as callers build it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CacheKey(Vec<KeyPart>);

impl CacheKey {
    pub fn new(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Address at `index`, if that part is one.
    pub fn address(&self, index: usize) -> Option<Address> {
        match self.0.get(index) {
            Some(KeyPart::Address(a)) => Some(*a),
            _ => None,
        }
    }

    pub fn str(&self, index: usize) -> Option<&str> {
        match self.0.get(index) {
            Some(KeyPart::Str(s)) => Some(s),
            _ => None,
        }
    }
}

/// Build a [`CacheKey`] from anything convertible into [`KeyPart`].
#[macro_export]
macro_rules! cache_key {
    () => { $crate::cache::CacheKey::default() };
    ($($part:expr),+ $(,)?) => {
        $crate::cache::CacheKey::new(vec![$($crate::cache::KeyPart::from($part)),+])
    };
}

type KeyFn = dyn Fn() -> Option<CacheKey> + Send + Sync;

/// Key description handed to the scheduler.
///
/// `Lazy` is evaluated on every resolution; returning `None` means a
/// dependency (wallet, parent record) is not available yet and the query
/// stays disabled.
#[derive(Clone)]
pub enum KeyInput {
    Key(CacheKey),
    Lazy(Arc<KeyFn>),
    Disabled,
}

impl KeyInput {
    pub fn lazy<F>(f: F) -> Self
    where
        F: Fn() -> Option<CacheKey> + Send + Sync + 'static,
    {
        KeyInput::Lazy(Arc::new(f))
    }

    pub fn resolve(&self) -> Option<CacheKey> {
        match self {
            KeyInput::Key(key) => Some(key.clone()),
            KeyInput::Lazy(f) => f(),
            KeyInput::Disabled => None,
        }
    }
}

impl fmt::Debug for KeyInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyInput::Key(key) => f.debug_tuple("Key").field(key).finish(),
            KeyInput::Lazy(_) => f.write_str("Lazy(..)"),
            KeyInput::Disabled => f.write_str("Disabled"),
        }
    }
}

impl From<CacheKey> for KeyInput {
    fn from(key: CacheKey) -> Self {
        KeyInput::Key(key)
    }
}

impl From<Option<CacheKey>> for KeyInput {
    fn from(key: Option<CacheKey>) -> Self {
        key.map(KeyInput::Key).unwrap_or(KeyInput::Disabled)
    }
}

// ============================================================================
// Canonical form
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum CanonicalPart {
    Str(String),
    Int(i64),
    List(Vec<CanonicalPart>),
}

/// Comparable, hashable form of a cache key. Addresses appear as
/// `"pubkey:<base58>"` strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CanonicalKey(Vec<CanonicalPart>);

impl CanonicalKey {
    pub fn parts(&self) -> &[CanonicalPart] {
        &self.0
    }

    /// Same key with `prefix` as its first element.
    pub fn with_prefix(&self, prefix: &str) -> Self {
        let mut parts = Vec::with_capacity(self.0.len() + 1);
        parts.push(CanonicalPart::Str(prefix.to_string()));
        parts.extend(self.0.iter().cloned());
        Self(parts)
    }

    /// Drop the leading prefix element added by [`with_prefix`](Self::with_prefix).
    pub fn without_prefix(&self) -> Self {
        Self(self.0.iter().skip(1).cloned().collect())
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.0) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "{:?}", self.0),
        }
    }
}

/// Outcome of serializing a key description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerializedKey {
    /// Not ready: no fetch may happen.
    Disabled,
    /// Empty sequence: fall back to the wrapping context's default key.
    Empty,
    Canonical(CanonicalKey),
}

fn canonical_part(part: &KeyPart) -> CanonicalPart {
    match part {
        KeyPart::Str(s) => CanonicalPart::Str(s.clone()),
        KeyPart::Int(n) => CanonicalPart::Int(*n),
        KeyPart::Address(a) => CanonicalPart::Str(format!("{}{}", ADDRESS_TAG, a)),
        KeyPart::List(parts) => CanonicalPart::List(parts.iter().map(canonical_part).collect()),
    }
}

fn original_part(part: &CanonicalPart) -> Result<KeyPart, KeyError> {
    match part {
        CanonicalPart::Str(s) => match s.strip_prefix(ADDRESS_TAG) {
            Some(encoded) => encoded
                .parse()
                .map(KeyPart::Address)
                .map_err(|_| KeyError::MalformedAddress(s.clone())),
            None => Ok(KeyPart::Str(s.clone())),
        },
        CanonicalPart::Int(n) => Ok(KeyPart::Int(*n)),
        CanonicalPart::List(parts) => parts
            .iter()
            .map(original_part)
            .collect::<Result<Vec<_>, _>>()
            .map(KeyPart::List),
    }
}

pub fn serialize_key(key: &CacheKey) -> CanonicalKey {
    CanonicalKey(key.0.iter().map(canonical_part).collect())
}

/// Resolve and canonicalize a key description.
pub fn serialize(input: &KeyInput) -> SerializedKey {
    match input.resolve() {
        None => SerializedKey::Disabled,
        Some(key) if key.is_empty() => SerializedKey::Empty,
        Some(key) => SerializedKey::Canonical(serialize_key(&key)),
    }
}

/// Inverse of [`serialize_key`].
pub fn deserialize(key: &CanonicalKey) -> Result<CacheKey, KeyError> {
    key.0
        .iter()
        .map(original_part)
        .collect::<Result<Vec<_>, _>>()
        .map(CacheKey)
}
