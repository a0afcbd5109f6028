//! Browser-side forwarder: sign with the wallet, POST to the relay.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::api::RpcError;
use crate::config::Config;
use crate::wallet::WalletSigner;

use super::{RelayError, RelayErrorBody, RelayRequest, RelayResponse, TransactionPayload};

/// The relay itself retries for up to ~7.5s and then waits for confirmation,
/// so give it well over that.
const RELAY_TIMEOUT_SECS: u64 = 90;

#[derive(Clone)]
pub struct RelayClient {
    client: Client,
    url: String,
}

impl RelayClient {
    pub fn new(url: impl Into<String>) -> Result<Self, RelayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(RELAY_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, url: url.into() })
    }

    /// Client for the relay endpoint named by `config.relay_url`.
    pub fn from_config(config: &Config) -> Result<Self, RelayError> {
        Self::new(config.relay_url.clone())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sign `transaction` with `wallet` and relay it.
    pub async fn sign_and_send(&self, wallet: &dyn WalletSigner, transaction: Vec<u8>) -> Result<String, RelayError> {
        if wallet.public_key().is_none() {
            return Err(RelayError::WalletNotConnected);
        }
        let signed = wallet
            .sign_transaction(transaction)
            .await
            .map_err(|e| RelayError::Signing(format!("{:#}", e)))?;
        self.send(signed).await
    }

    /// Relay an already signed transaction.
    pub async fn send(&self, signed: Vec<u8>) -> Result<String, RelayError> {
        debug!(url = %self.url, bytes = signed.len(), "Relaying transaction");
        let response = self
            .client
            .post(&self.url)
            .json(&RelayRequest {
                transaction: TransactionPayload::Bytes(signed),
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            let parsed: RelayResponse = serde_json::from_str(&body).map_err(|e| {
                RelayError::Exhausted(format!("Unexpected relay response: {}", e))
            })?;
            return Ok(parsed.signature);
        }
        let err = error_from_response(status, &body);
        warn!(status = %status, error = %err, "Relay rejected transaction");
        Err(err)
    }
}

/// Map a non-success relay response onto `RelayError`.
fn error_from_response(status: StatusCode, body: &str) -> RelayError {
    let message = serde_json::from_str::<RelayErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| format!("Status {}: {}", status, RpcError::truncate_body(body)));
    if status.is_client_error() {
        RelayError::Validation(message)
    } else {
        RelayError::Exhausted(message)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use async_trait::async_trait;

    use super::*;
    use crate::models::Address;

    #[test]
    fn test_error_body_mapping() {
        let err = error_from_response(StatusCode::BAD_REQUEST, r#"{"error":"Missing transaction"}"#);
        assert!(matches!(&err, RelayError::Validation(m) if m == "Missing transaction"));

        let err = error_from_response(StatusCode::INTERNAL_SERVER_ERROR, r#"{"error":"Blockhash not found"}"#);
        assert!(matches!(&err, RelayError::Exhausted(m) if m == "Blockhash not found"));
    }

    #[test]
    fn test_unstructured_error_body() {
        let err = error_from_response(StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(err.to_string(), "Status 502 Bad Gateway: upstream down");
    }

    struct Disconnected;

    #[async_trait]
    impl WalletSigner for Disconnected {
        fn public_key(&self) -> Option<Address> {
            None
        }

        async fn sign_transaction(&self, _transaction: Vec<u8>) -> Result<Vec<u8>> {
            unreachable!("never asked to sign")
        }
    }

    #[test]
    fn test_from_config_uses_relay_url() {
        let mut config = Config::default();
        assert_eq!(RelayClient::from_config(&config).unwrap().url(), "http://127.0.0.1:8787/api/relay");

        config
            .apply_overrides(|name| (name == "OUTLAY_RELAY_URL").then(|| "https://outlay.example/api/relay".to_string()))
            .unwrap();
        assert_eq!(RelayClient::from_config(&config).unwrap().url(), "https://outlay.example/api/relay");
    }

    #[tokio::test]
    async fn test_requires_connected_wallet() {
        let client = RelayClient::new("http://127.0.0.1:9/api/relay").unwrap();
        let err = client.sign_and_send(&Disconnected, vec![1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, RelayError::WalletNotConnected));
    }
}
