//! JSON-RPC client for the blockchain cluster.
//!
//! `RpcConnection` implements the `Connection` trait the backend fetchers and
//! the transaction relay are written against, so tests can substitute an
//! in-memory fake.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::models::Address;

use super::RpcError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow RPC nodes while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
/// Public RPC nodes rate limit aggressively; 3 retries usually gets through.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// `getMultipleAccounts` accepts at most 100 addresses per call.
const MAX_ACCOUNTS_PER_REQUEST: usize = 100;

/// Interval between signature status polls while confirming.
const CONFIRM_POLL_MS: u64 = 500;

/// Give up confirming after this long; the relay's own retry takes over.
const CONFIRM_TIMEOUT_SECS: u64 = 30;

/// Raw account as returned by the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub owner: Address,
    pub lamports: u64,
    pub data: Vec<u8>,
}

/// `getProgramAccounts` filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountFilter {
    DataSize(u64),
    Memcmp { offset: usize, bytes: Vec<u8> },
}

impl AccountFilter {
    pub fn memcmp_address(offset: usize, address: &Address) -> Self {
        AccountFilter::Memcmp {
            offset,
            bytes: address.as_bytes().to_vec(),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            AccountFilter::DataSize(size) => json!({ "dataSize": size }),
            AccountFilter::Memcmp { offset, bytes } => json!({
                "memcmp": { "offset": offset, "bytes": bs58::encode(bytes).into_string() }
            }),
        }
    }
}

/// Operations the data-access layer needs from a cluster connection.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn get_account(&self, address: &Address) -> Result<Option<Account>>;

    async fn get_multiple_accounts(&self, addresses: &[Address]) -> Result<Vec<Option<Account>>>;

    async fn get_program_accounts(
        &self,
        program: &Address,
        filters: &[AccountFilter],
    ) -> Result<Vec<(Address, Account)>>;

    /// Submit a signed, serialized transaction and wait for confirmation.
    /// Returns the transaction signature.
    async fn send_and_confirm_raw_transaction(&self, transaction: &[u8]) -> Result<String>;
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct UiAccount {
    /// `[base64 data, "base64"]`
    data: (String, String),
    owner: String,
    lamports: u64,
}

impl UiAccount {
    fn into_account(self) -> Result<Account> {
        let data = BASE64
            .decode(&self.data.0)
            .context("Failed to decode account data")?;
        let owner: Address = self.owner.parse().context("Invalid account owner")?;
        Ok(Account {
            owner,
            lamports: self.lamports,
            data,
        })
    }
}

#[derive(Debug, Deserialize)]
struct KeyedUiAccount {
    pubkey: String,
    account: UiAccount,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureStatus {
    err: Option<Value>,
    confirmation_status: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

/// JSON-RPC connection to a cluster.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct RpcConnection {
    client: Client,
    url: String,
    commitment: String,
}

impl RpcConnection {
    pub fn new(url: impl Into<String>, commitment: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
            commitment: commitment.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: reqwest::Response) -> Result<Option<reqwest::Response>> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(RpcError::from_status(status, &body).into())
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .client
                .post(&self.url)
                .json(&body)
                .send()
                .await
                .with_context(|| format!("Failed to send {} request", method))?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    let parsed: RpcResponse<T> = response
                        .json()
                        .await
                        .with_context(|| format!("Failed to parse {} response", method))?;
                    if let Some(e) = parsed.error {
                        return Err(RpcError::Rpc {
                            code: e.code,
                            message: e.message,
                        }
                        .into());
                    }
                    return parsed.result.ok_or_else(|| {
                        RpcError::InvalidResponse(format!("{} returned no result", method)).into()
                    });
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(RpcError::RateLimited.into());
                    }
                    warn!(method = method, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    fn account_config(&self) -> Value {
        json!({ "encoding": "base64", "commitment": self.commitment })
    }

    async fn wait_for_confirmation(&self, signature: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(CONFIRM_TIMEOUT_SECS);
        loop {
            let statuses: WithContext<Vec<Option<SignatureStatus>>> = self
                .call("getSignatureStatuses", json!([[signature]]))
                .await?;

            if let Some(Some(status)) = statuses.value.into_iter().next() {
                if let Some(err) = status.err {
                    return Err(RpcError::TransactionFailed(err.to_string()).into());
                }
                let level = status.confirmation_status.as_deref();
                let confirmed = match self.commitment.as_str() {
                    "finalized" => level == Some("finalized"),
                    "processed" => level.is_some(),
                    _ => matches!(level, Some("confirmed") | Some("finalized")),
                };
                if confirmed {
                    debug!(signature = signature, status = ?level, "Transaction confirmed");
                    return Ok(());
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(RpcError::NotConfirmed(signature.to_string()).into());
            }
            tokio::time::sleep(Duration::from_millis(CONFIRM_POLL_MS)).await;
        }
    }
}

#[async_trait]
impl Connection for RpcConnection {
    async fn get_account(&self, address: &Address) -> Result<Option<Account>> {
        let response: WithContext<Option<UiAccount>> = self
            .call("getAccountInfo", json!([address.to_string(), self.account_config()]))
            .await?;
        response.value.map(UiAccount::into_account).transpose()
    }

    async fn get_multiple_accounts(&self, addresses: &[Address]) -> Result<Vec<Option<Account>>> {
        let mut accounts = Vec::with_capacity(addresses.len());
        for chunk in addresses.chunks(MAX_ACCOUNTS_PER_REQUEST) {
            let keys: Vec<String> = chunk.iter().map(Address::to_string).collect();
            let response: WithContext<Vec<Option<UiAccount>>> = self
                .call("getMultipleAccounts", json!([keys, self.account_config()]))
                .await?;
            for account in response.value {
                accounts.push(account.map(UiAccount::into_account).transpose()?);
            }
        }
        Ok(accounts)
    }

    async fn get_program_accounts(
        &self,
        program: &Address,
        filters: &[AccountFilter],
    ) -> Result<Vec<(Address, Account)>> {
        let mut config = self.account_config();
        config["filters"] = Value::Array(filters.iter().map(AccountFilter::to_json).collect());

        let keyed: Vec<KeyedUiAccount> = self
            .call("getProgramAccounts", json!([program.to_string(), config]))
            .await?;
        debug!(program = %program, count = keyed.len(), "Program accounts received");

        keyed
            .into_iter()
            .map(|k| {
                let address: Address = k.pubkey.parse().context("Invalid account address")?;
                Ok((address, k.account.into_account()?))
            })
            .collect()
    }

    async fn send_and_confirm_raw_transaction(&self, transaction: &[u8]) -> Result<String> {
        let encoded = BASE64.encode(transaction);
        let signature: String = self
            .call(
                "sendTransaction",
                json!([encoded, {
                    "encoding": "base64",
                    "preflightCommitment": self.commitment,
                }]),
            )
            .await?;
        debug!(signature = %signature, "Transaction submitted");
        self.wait_for_confirmation(&signature).await?;
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memcmp_filter_json() {
        let address = Address::new([2; 32]);
        let filter = AccountFilter::memcmp_address(8, &address);
        assert_eq!(
            filter.to_json(),
            json!({ "memcmp": { "offset": 8, "bytes": address.to_string() } })
        );
        assert_eq!(AccountFilter::DataSize(165).to_json(), json!({ "dataSize": 165 }));
    }

    #[test]
    fn test_ui_account_decodes_base64() {
        let raw = json!({
            "data": [BASE64.encode([1u8, 2, 3]), "base64"],
            "owner": Address::new([4; 32]).to_string(),
            "lamports": 42,
            "executable": false,
            "rentEpoch": 0
        });
        let ui: UiAccount = serde_json::from_value(raw).unwrap();
        let account = ui.into_account().unwrap();
        assert_eq!(account.data, vec![1, 2, 3]);
        assert_eq!(account.lamports, 42);
        assert_eq!(account.owner, Address::new([4; 32]));
    }

    #[test]
    fn test_rpc_error_object_parses() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32002,"message":"Blockhash not found"}}"#;
        let parsed: RpcResponse<String> = serde_json::from_str(raw).unwrap();
        let error = parsed.error.unwrap();
        assert_eq!(error.code, -32002);
        assert_eq!(error.message, "Blockhash not found");
        assert!(parsed.result.is_none());
    }

    #[test]
    fn test_signature_status_parses() {
        let raw = r#"{"context":{"slot":1},"value":[{"slot":1,"confirmations":null,"err":null,"confirmationStatus":"finalized"}]}"#;
        let parsed: WithContext<Vec<Option<SignatureStatus>>> = serde_json::from_str(raw).unwrap();
        let status = parsed.value[0].as_ref().unwrap();
        assert!(status.err.is_none());
        assert_eq!(status.confirmation_status.as_deref(), Some("finalized"));
    }
}
