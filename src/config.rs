//! Keeper configuration loaded from a TOML file.

use std::fs;

use serde::{Deserialize, Serialize};

use crate::clarity::{is_valid_btc_address, is_valid_stacks_address};
use crate::error::{KeeperError, KeeperResult};

/// Which chain deployment the keeper runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Network {
    Mainnet,
    Testnet,
    NakamotoTestnet,
    Devnet,
}

impl Network {
    pub fn is_mainnet(self) -> bool {
        matches!(self, Network::Mainnet)
    }

    /// First reward cycle the pox-4 contract is live in.
    pub fn first_pox_cycle(self) -> u64 {
        match self {
            Network::Mainnet => 84,
            _ => 1,
        }
    }

    pub fn pox_contract_id(self) -> &'static str {
        match self {
            Network::Mainnet => "SP000000000000000000002Q6VF78.pox-4",
            _ => "ST000000000000000000002AMW42H.pox-4",
        }
    }

    fn default_api_base(self) -> &'static str {
        match self {
            Network::Mainnet => "https://api.mainnet.hiro.so",
            Network::Testnet => "https://api.testnet.hiro.so",
            Network::NakamotoTestnet => "https://api.nakamoto.testnet.hiro.so",
            Network::Devnet => "http://localhost:3999",
        }
    }

    fn default_database_file(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet-pox-events.sqlite",
            Network::Testnet => "testnet-pox-events.sqlite",
            Network::NakamotoTestnet => "nakamoto-testnet-pox-events.sqlite",
            Network::Devnet => "devnet-pox-events.sqlite",
        }
    }
}

/// Keeper configuration loaded from a TOML file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeeperConfig {
    /// Network the keeper operates on.
    pub network: Network,

    /// Override for the indexing API base URL (defaults per network).
    pub api_base: Option<String>,

    /// Pool operator principal; pool-relevant events mention it.
    pub pool_operator: String,

    /// The pool's own reward address, used when a delegation names none.
    pub pool_btc_address: String,

    /// Hex private key paying for pool transactions.
    pub pool_private_key: String,

    /// Hex private key of the pool's signer.
    pub signer_private_key: String,

    /// Planning horizon in reward cycles, bounded to [1, 12].
    pub max_cycles_for_operations: u64,

    /// Optional signing/broadcast sidecar; without it the keeper dry-runs.
    pub submit_url: Option<String>,

    /// Delay between reconciliation passes in seconds.
    #[serde(default = "default_loop_delay")]
    pub loop_delay_secs: u64,

    /// Page size for the event log endpoint.
    #[serde(default = "default_page_limit")]
    pub page_limit: u64,

    /// SQLite database path (defaults to a per-network file).
    pub database_path: Option<String>,

    /// Port for the read-only dashboard API.
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry policy for transient API failures.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Maximum number of retries for a single call.
    pub max_retries: u32,

    /// Fixed delay between retries in seconds.
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_secs: 10,
        }
    }
}

fn default_loop_delay() -> u64 {
    60
}

fn default_page_limit() -> u64 {
    100
}

fn default_server_port() -> u16 {
    8080
}

impl KeeperConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &str) -> KeeperResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| KeeperError::Config(format!("failed to read {path}: {e}")))?;
        let config: KeeperConfig = toml::from_str(&content)
            .map_err(|e| KeeperError::Config(format!("failed to parse {path}: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup invariants; violations are fatal before the loop begins.
    pub fn validate(&self) -> KeeperResult<()> {
        let mainnet = self.network.is_mainnet();
        if !is_valid_stacks_address(&self.pool_operator, mainnet) {
            return Err(KeeperError::Config(format!(
                "invalid pool operator address '{}'",
                self.pool_operator
            )));
        }
        if !is_valid_btc_address(&self.pool_btc_address, mainnet) {
            return Err(KeeperError::Config(format!(
                "invalid pool btc address '{}'",
                self.pool_btc_address
            )));
        }
        if !is_hex_key(&self.pool_private_key) {
            return Err(KeeperError::Config("invalid pool private key".into()));
        }
        if !is_hex_key(&self.signer_private_key) {
            return Err(KeeperError::Config("invalid signer private key".into()));
        }
        if self.max_cycles_for_operations < 1 || self.max_cycles_for_operations > 12 {
            return Err(KeeperError::Config(
                "max cycles for operations out of bounds (1 <= max cycles <= 12)".into(),
            ));
        }
        if self.page_limit == 0 {
            return Err(KeeperError::Config("page limit must be greater than 0".into()));
        }
        if self.loop_delay_secs == 0 {
            return Err(KeeperError::Config(
                "loop delay must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn api_base(&self) -> &str {
        self.api_base
            .as_deref()
            .unwrap_or_else(|| self.network.default_api_base())
    }

    pub fn events_url(&self) -> String {
        format!("{}/extended/v1/tx/events", self.api_base())
    }

    pub fn pox_info_url(&self) -> String {
        format!("{}/v2/pox", self.api_base())
    }

    pub fn reward_map_url(&self) -> String {
        let contract_id = self.network.pox_contract_id();
        let (address, name) = contract_id
            .split_once('.')
            .unwrap_or((contract_id, "pox-4"));
        format!(
            "{}/v2/map_entry/{address}/{name}/reward-cycle-pox-address-list",
            self.api_base()
        )
    }

    pub fn transaction_url(&self, txid: &str) -> String {
        format!("{}/extended/v1/tx/{txid}", self.api_base())
    }

    pub fn nonces_url(&self, principal: &str) -> String {
        format!("{}/extended/v1/address/{principal}/nonces", self.api_base())
    }

    pub fn database_path(&self) -> String {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.network.default_database_file().to_string())
    }
}

fn is_hex_key(key: &str) -> bool {
    // 32-byte keys, optionally with the compression flag byte appended.
    matches!(key.len(), 64 | 66) && key.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> KeeperConfig {
        KeeperConfig {
            network: Network::Mainnet,
            api_base: None,
            pool_operator: "SP000000000000000000002Q6VF78".to_string(),
            pool_btc_address: "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH".to_string(),
            pool_private_key: "aa".repeat(32),
            signer_private_key: format!("{}01", "bb".repeat(32)),
            max_cycles_for_operations: 6,
            submit_url: None,
            loop_delay_secs: 60,
            page_limit: 100,
            database_path: None,
            server_port: 8080,
            retry: RetryConfig::default(),
        }
    }

    #[test]
    fn validates_sample_config() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn rejects_bad_horizon() {
        let mut config = sample();
        config.max_cycles_for_operations = 0;
        assert!(config.validate().is_err());
        config.max_cycles_for_operations = 13;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_addresses() {
        let mut config = sample();
        config.pool_operator = "ST000000000000000000002AMW42H".to_string();
        assert!(config.validate().is_err());

        let mut config = sample();
        config.pool_btc_address = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_toml_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keeper.toml");
        std::fs::write(
            &path,
            format!(
                r#"
network = "mainnet"
pool_operator = "SP000000000000000000002Q6VF78"
pool_btc_address = "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH"
pool_private_key = "{}"
signer_private_key = "{}"
max_cycles_for_operations = 6
"#,
                "aa".repeat(32),
                "bb".repeat(32),
            ),
        )
        .unwrap();
        let config = KeeperConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.loop_delay_secs, 60);
        assert_eq!(config.page_limit, 100);
        assert_eq!(config.server_port, 8080);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.database_path(), "mainnet-pox-events.sqlite");
    }

    #[test]
    fn derives_network_urls() {
        let config = sample();
        assert_eq!(
            config.events_url(),
            "https://api.mainnet.hiro.so/extended/v1/tx/events"
        );
        assert_eq!(
            config.reward_map_url(),
            "https://api.mainnet.hiro.so/v2/map_entry/SP000000000000000000002Q6VF78/pox-4/reward-cycle-pox-address-list"
        );
        assert_eq!(config.network.first_pox_cycle(), 84);
    }
}
