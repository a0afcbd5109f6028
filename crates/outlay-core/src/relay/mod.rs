//! Transaction relay.
//!
//! Signed transactions travel from the browser to a relay endpoint, which
//! submits them to the cluster and waits for confirmation, retrying with
//! exponential backoff.
//!
//! - `retry`: the backoff loop shared by every submitter
//! - `client`: the browser-side forwarder that signs and POSTs to the relay
//!
//! The request and response bodies below are the wire contract between the
//! two sides.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod client;
pub mod retry;

pub use client::RelayClient;
pub use retry::{submit_with_backoff, RetryPolicy, TransactionSubmitter};

pub const METHOD_NOT_ALLOWED: &str = "Method not allowed";
pub const JSON_BODY_REQUIRED: &str = "Request must have JSON body";
pub const MISSING_TRANSACTION: &str = "Missing transaction";

#[derive(Error, Debug)]
pub enum RelayError {
    /// The request was malformed; retrying it cannot help.
    #[error("{0}")]
    Validation(String),

    /// Every attempt failed. Carries the last failure message.
    #[error("{0}")]
    Exhausted(String),

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Wallet not connected")]
    WalletNotConnected,

    #[error("Signing failed: {0}")]
    Signing(String),
}

impl RelayError {
    /// HTTP status the relay endpoint answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            RelayError::Validation(_) | RelayError::WalletNotConnected | RelayError::Signing(_) => 400,
            RelayError::Exhausted(_) | RelayError::Transport(_) => 500,
        }
    }
}

/// Serialized transaction as accepted by the relay: a JSON byte array, or a
/// base64 string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransactionPayload {
    Bytes(Vec<u8>),
    Base64(String),
}

impl TransactionPayload {
    pub fn into_bytes(self) -> Result<Vec<u8>, RelayError> {
        match self {
            TransactionPayload::Bytes(bytes) => Ok(bytes),
            TransactionPayload::Base64(encoded) => BASE64
                .decode(encoded.trim())
                .map_err(|e| RelayError::Validation(format!("Invalid transaction encoding: {}", e))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayRequest {
    pub transaction: TransactionPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayResponse {
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_accepts_array_and_base64() {
        let array: RelayRequest = serde_json::from_str(r#"{"transaction":[65,66,67]}"#).unwrap();
        assert_eq!(array.transaction.into_bytes().unwrap(), b"ABC".to_vec());

        let encoded: RelayRequest = serde_json::from_str(r#"{"transaction":"QUJD"}"#).unwrap();
        assert_eq!(encoded.transaction.into_bytes().unwrap(), b"ABC".to_vec());
    }

    #[test]
    fn test_payload_rejects_bad_base64() {
        let err = TransactionPayload::Base64("not base64!".to_string())
            .into_bytes()
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_exhausted_displays_last_message() {
        let err = RelayError::Exhausted("Blockhash not found".to_string());
        assert_eq!(err.to_string(), "Blockhash not found");
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_bodies_serialize_to_contract() {
        let ok = serde_json::to_string(&RelayResponse {
            signature: "SIG123".to_string(),
        })
        .unwrap();
        assert_eq!(ok, r#"{"signature":"SIG123"}"#);

        let err = serde_json::to_string(&RelayErrorBody {
            error: MISSING_TRANSACTION.to_string(),
        })
        .unwrap();
        assert_eq!(err, r#"{"error":"Missing transaction"}"#);
    }
}
