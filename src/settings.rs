use crate::api::Address;
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

pub const ENV_PREFIX: &str = "P2POOL";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub chain: ChainSettings,
    pub issuers: IssuerSettings,
    pub store: StoreSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChainSettings {
    pub chain_id: u64,
    /// Batch pool contract, also the spender of the deposit token.
    pub pool_contract: Address,
    pub token_contract: Address,
    /// Approvals cover this many deposits so later joins skip the prompt.
    pub approval_multiplier: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IssuerSettings {
    /// Tried in this order.
    pub urls: Vec<String>,
    pub timeout_ms: u64,
    pub fan_out: FanOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanOut {
    #[default]
    Sequential,
    Concurrent,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreSettings {
    pub capacity: usize,
    /// sqlx connection string; in-memory when unset.
    pub database: Option<String>,
}

impl Settings {
    /// Defaults, then the optional file at `path`, then `P2POOL_*` variables
    /// (`P2POOL_ISSUERS__URLS=a,b`, `P2POOL_CHAIN__CHAIN_ID=8453`).
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Self::defaults()?;
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("issuers.urls"),
            )
            .build()?
            .try_deserialize()
    }
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        Self::defaults()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("chain.approval_multiplier", 10_i64)?
            .set_default("issuers.urls", Vec::<String>::new())?
            .set_default("issuers.timeout_ms", 10_000_i64)?
            .set_default("issuers.fan_out", "sequential")?
            .set_default("store.capacity", crate::store::DEFAULT_CAPACITY as i64)
    }
}

impl IssuerSettings {
    pub fn new(urls: Vec<String>, timeout_ms: u64) -> Self {
        Self {
            urls,
            timeout_ms,
            fan_out: FanOut::Sequential,
        }
    }
}
