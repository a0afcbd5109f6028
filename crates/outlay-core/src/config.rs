//! Application configuration management.
//!
//! Configuration is stored at `~/.config/outlay/config.json`. Every field has
//! a default, and `OUTLAY_*` environment variables (including ones from a
//! `.env` file loaded by the binary) override the file.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::Address;

/// Application name used for config directory paths
const APP_NAME: &str = "outlay";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";
const DEFAULT_COMMITMENT: &str = "confirmed";
const DEFAULT_RELAY_BIND: &str = "127.0.0.1:8787";
const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:8787/api/relay";

/// Token-voting governance program.
pub const GOVERNANCE_PROGRAM_ID: &str = "GovER5Lthms3bLBqWub97yVrMmEogzX7xNjdXpPPCVZw";

/// Multisig squads program.
pub const SQUADS_PROGRAM_ID: &str = "SQDS4ep65T869zMMBKyuUq6aD6EgTu8psMjkvj52pCf";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rpc_url: String,
    pub commitment: String,
    /// Where the browser-side client posts signed transactions.
    pub relay_url: String,
    /// Listen address of the relay endpoint.
    pub relay_bind: String,
    /// The expense program. Unset means program queries stay disabled.
    pub program_id: Option<Address>,
    pub governance_program_id: Option<Address>,
    pub squads_program_id: Option<Address>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            commitment: DEFAULT_COMMITMENT.to_string(),
            relay_url: DEFAULT_RELAY_URL.to_string(),
            relay_bind: DEFAULT_RELAY_BIND.to_string(),
            program_id: None,
            governance_program_id: Address::from_str(GOVERNANCE_PROGRAM_ID).ok(),
            squads_program_id: Address::from_str(SQUADS_PROGRAM_ID).ok(),
        }
    }
}

impl Config {
    /// Load the config file (or defaults) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file()?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    fn load_file() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents).with_context(|| format!("Invalid config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply `OUTLAY_*` overrides. `lookup` returns a variable's value.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("OUTLAY_RPC_URL") {
            self.rpc_url = v;
        }
        if let Some(v) = lookup("OUTLAY_COMMITMENT") {
            self.commitment = v;
        }
        if let Some(v) = lookup("OUTLAY_RELAY_URL") {
            self.relay_url = v;
        }
        if let Some(v) = lookup("OUTLAY_RELAY_BIND") {
            self.relay_bind = v;
        }
        for (name, slot) in [
            ("OUTLAY_PROGRAM_ID", &mut self.program_id),
            ("OUTLAY_GOVERNANCE_PROGRAM_ID", &mut self.governance_program_id),
            ("OUTLAY_SQUADS_PROGRAM_ID", &mut self.squads_program_id),
        ] {
            if let Some(v) = lookup(name) {
                *slot = Some(Address::from_str(v.trim()).with_context(|| format!("{} is not a valid address", name))?);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.rpc_url, DEFAULT_RPC_URL);
        assert_eq!(config.relay_bind, "127.0.0.1:8787");
        assert!(config.program_id.is_none());
        assert_eq!(
            config.squads_program_id.map(|a| a.to_string()).as_deref(),
            Some(SQUADS_PROGRAM_ID)
        );
        assert!(config.governance_program_id.is_some());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"rpc_url":"http://localhost:8899"}"#).unwrap();
        assert_eq!(config.rpc_url, "http://localhost:8899");
        assert_eq!(config.commitment, DEFAULT_COMMITMENT);
    }

    #[test]
    fn test_env_overrides() {
        let program = Address::new([3; 32]).to_string();
        let vars: HashMap<&str, String> = HashMap::from([
            ("OUTLAY_RPC_URL", "http://localhost:8899".to_string()),
            ("OUTLAY_RELAY_BIND", "0.0.0.0:9000".to_string()),
            ("OUTLAY_PROGRAM_ID", program.clone()),
        ]);
        let mut config = Config::default();
        config.apply_overrides(|name| vars.get(name).cloned()).unwrap();
        assert_eq!(config.rpc_url, "http://localhost:8899");
        assert_eq!(config.relay_bind, "0.0.0.0:9000");
        assert_eq!(config.program_id.map(|a| a.to_string()), Some(program));
    }

    #[test]
    fn test_invalid_program_override() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|name| (name == "OUTLAY_PROGRAM_ID").then(|| "nope".to_string()))
            .unwrap_err();
        assert_eq!(err.to_string(), "OUTLAY_PROGRAM_ID is not a valid address");
    }
}
