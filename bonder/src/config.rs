//! Configuration for the bonder

use std::collections::BTreeMap;
use std::str::FromStr;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::types::ChainSlug;

/// Bridge contracts deployed on one chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChainContracts {
    /// Home chain bridge holding bonds, challenges and settlement
    Home { bridge: Address },
    /// Secondary chain bridge plus the AMM wrapper used for outbound sends
    Secondary { bridge: Address, amm_wrapper: Address },
}

impl ChainContracts {
    pub fn bridge(&self) -> Address {
        match self {
            ChainContracts::Home { bridge } | ChainContracts::Secondary { bridge, .. } => *bridge,
        }
    }
}

/// How the bridged token is paid on one chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", content = "address", rename_all = "lowercase")]
pub enum BridgedToken {
    /// The chain's own coin, sent as call value
    Native,
    /// An ERC20 the bridge pulls through an allowance; calls carry no value
    Erc20(Address),
}

impl BridgedToken {
    /// Whether a token symbol names the native coin rather than an ERC20
    pub fn is_native_symbol(symbol: &str) -> bool {
        symbol.trim().eq_ignore_ascii_case("ETH")
    }
}

/// Connection settings for one chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub slug: ChainSlug,
    pub chain_id: u64,
    pub rpc_url: String,
    pub contracts: ChainContracts,
    pub token: BridgedToken,
}

/// Bonder configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BonderConfig {
    /// Private key of the bonder identity (hex, with or without 0x)
    pub private_key: String,

    /// Token symbol the bridge moves, used in batch reporting
    #[serde(default = "default_token")]
    pub token: String,

    /// Per-chain settings, keyed by slug
    #[serde(skip)]
    pub chains: BTreeMap<ChainSlug, ChainConfig>,

    /// Gas price watcher interval in seconds
    #[serde(default = "default_gas_price_interval")]
    pub gas_price_interval_secs: u64,

    /// Interval of every other watcher in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Minimum pending transfers before a commit is attempted
    #[serde(default = "default_min_pending")]
    pub min_pending_to_commit: usize,

    /// Maximum number of blocks scanned per event query
    #[serde(default = "default_scan_window")]
    pub event_scan_window: u64,

    /// Whether committed roots are bonded by this node
    #[serde(default = "default_true")]
    pub bonder_enabled: bool,

    /// Whether unknown bonded roots are challenged by this node
    #[serde(default)]
    pub challenger_enabled: bool,

    /// Directory of the sled state database (in-memory if unset)
    #[serde(default)]
    pub state_db_path: Option<String>,

    /// Health server port
    #[serde(default = "default_health_port")]
    pub health_port: u16,

    /// Seconds added to the current block time for send deadlines
    #[serde(default = "default_send_deadline")]
    pub send_deadline_secs: u64,
}

fn default_token() -> String {
    "DAI".to_string()
}

fn default_chains() -> &'static str {
    "ethereum,optimism,arbitrum,polygon,xdai"
}

fn default_gas_price_interval() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    10
}

fn default_min_pending() -> usize {
    1
}

fn default_scan_window() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_health_port() -> u16 {
    9090
}

fn default_send_deadline() -> u64 {
    300
}

impl BonderConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let private_key = required("BONDER_PRIVATE_KEY")?;
        PrivateKeySigner::from_str(private_key.trim_start_matches("0x"))
            .map_err(|_| ConfigError::InvalidPrivateKey)?;

        let token = std::env::var("BRIDGE_TOKEN").unwrap_or_else(|_| default_token());
        let slugs = parse_chain_list(
            &std::env::var("CHAINS").unwrap_or_else(|_| default_chains().to_string()),
        )?;
        let mut chains = BTreeMap::new();
        for slug in slugs {
            chains.insert(slug, ChainConfig::from_env(slug, &token)?);
        }

        Ok(Self {
            private_key,
            token,
            chains,
            gas_price_interval_secs: parsed("GAS_PRICE_INTERVAL_SECS")?
                .unwrap_or_else(default_gas_price_interval),
            poll_interval_secs: parsed("POLL_INTERVAL_SECS")?.unwrap_or_else(default_poll_interval),
            min_pending_to_commit: parsed("MIN_PENDING_TO_COMMIT")?
                .unwrap_or_else(default_min_pending),
            event_scan_window: parsed("EVENT_SCAN_WINDOW")?.unwrap_or_else(default_scan_window),
            bonder_enabled: parsed("BONDER_ENABLED")?.unwrap_or_else(default_true),
            challenger_enabled: parsed("CHALLENGER_ENABLED")?.unwrap_or(false),
            state_db_path: std::env::var("STATE_DB_PATH").ok().filter(|p| !p.is_empty()),
            health_port: parsed("HEALTH_PORT")?.unwrap_or_else(default_health_port),
            send_deadline_secs: parsed("SEND_DEADLINE_SECS")?.unwrap_or_else(default_send_deadline),
        })
    }

    pub fn chain(&self, slug: ChainSlug) -> Result<&ChainConfig, ConfigError> {
        self.chains
            .get(&slug)
            .ok_or_else(|| ConfigError::ChainNotConfigured(slug.to_string()))
    }

    pub fn secondary_chains(&self) -> impl Iterator<Item = &ChainConfig> {
        self.chains.values().filter(|c| !c.slug.is_home())
    }
}

impl ChainConfig {
    /// Read `<SLUG>_RPC_URL`, `<SLUG>_BRIDGE_ADDRESS`, `<SLUG>_CHAIN_ID`,
    /// `<SLUG>_TOKEN_ADDRESS` unless `token` is native and, for secondary
    /// chains, `<SLUG>_AMM_WRAPPER_ADDRESS`.
    pub fn from_env(slug: ChainSlug, token: &str) -> Result<Self, ConfigError> {
        let prefix = slug.env_prefix();

        let rpc_url = required(&format!("{prefix}_RPC_URL"))?;
        if !(rpc_url.starts_with("http://") || rpc_url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(rpc_url));
        }

        let bridge = address(&format!("{prefix}_BRIDGE_ADDRESS"))?;
        let contracts = if slug.is_home() {
            ChainContracts::Home { bridge }
        } else {
            ChainContracts::Secondary {
                bridge,
                amm_wrapper: address(&format!("{prefix}_AMM_WRAPPER_ADDRESS"))?,
            }
        };

        let token = if BridgedToken::is_native_symbol(token) {
            BridgedToken::Native
        } else {
            BridgedToken::Erc20(address(&format!("{prefix}_TOKEN_ADDRESS"))?)
        };

        Ok(Self {
            slug,
            chain_id: parsed(&format!("{prefix}_CHAIN_ID"))?
                .unwrap_or_else(|| slug.default_chain_id()),
            rpc_url,
            contracts,
            token,
        })
    }
}

/// Parse a comma separated chain list. The home chain must be present.
pub fn parse_chain_list(raw: &str) -> Result<Vec<ChainSlug>, ConfigError> {
    let mut slugs = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let slug = ChainSlug::from_str(part)?;
        if !slugs.contains(&slug) {
            slugs.push(slug);
        }
    }
    if !slugs.iter().any(ChainSlug::is_home) {
        return Err(ConfigError::MissingHomeChain);
    }
    Ok(slugs)
}

fn required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn parsed<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                field: name.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn address(name: &str) -> Result<Address, ConfigError> {
    let raw = required(name)?;
    raw.parse().map_err(|_| ConfigError::InvalidAddress(raw))
}
