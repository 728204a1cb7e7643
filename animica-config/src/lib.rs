//! Node configuration: TOML file plus `ANIMICA`-prefixed environment
//! overrides, with devnet defaults. The data directory resolves through
//! `ANIMICA_DB_DIR` first, then the platform data dir.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use animica_consensus::{RetargetParams, SelectorPolicy, SlashPenalties, SlashThresholds};
use animica_core::{from_hex, Address, IssuanceParams};
use animica_mempool::{AdmissionConfig, BanPolicy, WatermarkConfig};

pub const DEVNET_CHAIN_ID: u64 = 1337;
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545/rpc";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    /// Used by adjacent tools (SDKs, explorers); the node itself does not
    /// serve RPC.
    pub rpc_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningConfig {
    /// Hex-rendered coinbase address receiving fees and issuance.
    pub coinbase: String,
    pub max_block_txs: usize,
    /// Devnet acceptance target Θ in micro units.
    pub theta_micro: u64,
    /// Share threshold ratio handed to pool miners.
    pub share_ratio: f64,
    /// Bound on the nonce search per block before giving up.
    pub max_nonce_window: u64,
    /// Seconds between auto-mined blocks in the run loop.
    pub auto_interval_s: u64,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            coinbase: format!("0x{}", "99".repeat(20)),
            max_block_txs: 500,
            theta_micro: 200_000,
            share_ratio: 0.5,
            max_nonce_window: 1_000_000,
            auto_interval_s: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolSettings {
    pub capacity: usize,
    pub admission: AdmissionConfig,
    pub watermark: WatermarkConfig,
    pub ban: BanPolicy,
}

impl Default for MempoolSettings {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            admission: AdmissionConfig::default(),
            watermark: WatermarkConfig::default(),
            ban: BanPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoiesSettings {
    pub selector: SelectorPolicy,
    pub retarget: RetargetParams,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlashingSettings {
    pub thresholds: SlashThresholds,
    pub penalties: SlashPenalties,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimicaConfig {
    pub chain: ChainConfig,
    /// Omitted in files; resolved from env/XDG when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    pub issuance: IssuanceParams,
    pub mempool: MempoolSettings,
    pub mining: MiningConfig,
    pub poies: PoiesSettings,
    pub slashing: SlashingSettings,
    /// Devnet genesis balances, hex address → nano-native amount.
    pub genesis_alloc: Vec<GenesisAccount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub address: String,
    pub balance: u128,
}

impl Default for AnimicaConfig {
    fn default() -> Self {
        Self {
            chain: ChainConfig { chain_id: DEVNET_CHAIN_ID, rpc_url: DEFAULT_RPC_URL.into() },
            data_dir: None,
            issuance: IssuanceParams::default(),
            mempool: MempoolSettings::default(),
            mining: MiningConfig::default(),
            poies: PoiesSettings {
                selector: SelectorPolicy { gamma_cap: Some(8.0), escort_q: Some(0.5), limit: Some(16), ..Default::default() },
                retarget: RetargetParams::default(),
            },
            slashing: SlashingSettings::default(),
            genesis_alloc: vec![
                GenesisAccount { address: format!("0x{}", "aa".repeat(20)), balance: 2_000_000_000_000_000_000 },
                GenesisAccount { address: format!("0x{}", "bb".repeat(20)), balance: 750_000_000_000_000_000 },
            ],
        }
    }
}

impl AnimicaConfig {
    /// Devnet profile, identical to `Default` but kept explicit so call
    /// sites read as intent.
    pub fn example() -> Self {
        Self::default()
    }

    /// Load from a TOML file layered under `ANIMICA__*` environment
    /// overrides (e.g. `ANIMICA__CHAIN__CHAIN_ID=7`), then apply the
    /// short-form env names.
    pub fn load(path: &Path) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("ANIMICA").separator("__"));
        let cfg: Self = builder
            .build()
            .with_context(|| format!("reading config {}", path.display()))?
            .try_deserialize()
            .context("deserializing config")?;
        Ok(cfg.with_env_overrides())
    }

    /// Devnet config with env overrides, used when no file is present.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(chain_id) = std::env::var("ANIMICA_CHAIN_ID") {
            if let Ok(parsed) = chain_id.parse() {
                self.chain.chain_id = parsed;
            }
        }
        if let Ok(rpc_url) = std::env::var("ANIMICA_RPC_URL") {
            self.chain.rpc_url = rpc_url;
        }
        if let Ok(db_dir) = std::env::var("ANIMICA_DB_DIR") {
            self.data_dir = Some(PathBuf::from(db_dir));
        }
        self
    }

    /// The resolved data directory: explicit setting, else the platform
    /// data dir, else a path under the temp dir.
    pub fn resolved_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        dirs::data_dir().unwrap_or_else(std::env::temp_dir).join("animica")
    }

    pub fn coinbase_address(&self) -> Result<Address> {
        parse_address(&self.mining.coinbase)
    }

    pub fn genesis_accounts(&self) -> Result<Vec<(Address, u128)>> {
        self.genesis_alloc
            .iter()
            .map(|g| Ok((parse_address(&g.address)?, g.balance)))
            .collect()
    }

    pub fn write_toml(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

pub fn parse_address(s: &str) -> Result<Address> {
    let bytes = from_hex(s).with_context(|| format!("bad address hex: {s}"))?;
    bytes.try_into().map_err(|b: Vec<u8>| anyhow::anyhow!("address must be 20 bytes, got {}", b.len()))
}
