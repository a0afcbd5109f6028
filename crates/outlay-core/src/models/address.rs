use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Length of an on-chain address in bytes.
pub const ADDRESS_BYTES: usize = 32;

/// Longest base58 rendering of 32 bytes.
const MAX_BASE58_ADDRESS: usize = 44;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid base58 address: {0}")]
    InvalidBase58(String),

    #[error("Address must be 32 bytes, got {0}")]
    WrongLength(usize),
}

/// An on-chain account address.
///
/// The canonical string form is base58, which is what cache keys and JSON
/// payloads carry. Two addresses built independently from the same bytes are
/// equal and hash the same.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_BYTES]);

impl Address {
    pub const fn new(bytes: [u8; ADDRESS_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, AddressError> {
        let array: [u8; ADDRESS_BYTES] = bytes
            .try_into()
            .map_err(|_| AddressError::WrongLength(bytes.len()))?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_BYTES] {
        &self.0
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > MAX_BASE58_ADDRESS {
            return Err(AddressError::InvalidBase58(s.to_string()));
        }
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|_| AddressError::InvalidBase58(s.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_base58())
    }
}

impl From<[u8; ADDRESS_BYTES]> for Address {
    fn from(bytes: [u8; ADDRESS_BYTES]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_base58_roundtrip() {
        let address = Address::new([7u8; ADDRESS_BYTES]);
        let parsed: Address = address.to_base58().parse().unwrap();
        assert_eq!(parsed, address);
    }

    #[test]
    fn test_default_address_is_system_program() {
        assert_eq!(Address::default().to_string(), "11111111111111111111111111111111");
    }

    #[test]
    fn test_address_rejects_wrong_length() {
        let short = bs58::encode([1u8; 8]).into_string();
        assert_eq!(short.parse::<Address>(), Err(AddressError::WrongLength(8)));
    }

    #[test]
    fn test_address_rejects_invalid_characters() {
        // '0' and 'l' are not in the base58 alphabet
        assert!("0l0l".parse::<Address>().is_err());
        assert!("".parse::<Address>().is_err());
    }

    #[test]
    fn test_address_serde_as_string() {
        let address = Address::new([3u8; ADDRESS_BYTES]);
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, format!("\"{}\"", address));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }
}
