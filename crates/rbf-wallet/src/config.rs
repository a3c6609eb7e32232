//! Wallet configuration and logging setup.
//!
//! [`WalletConfig`] is layered with the `config` crate: built-in defaults,
//! then an optional file, then environment variables carrying the `RBF_`
//! prefix (`RBF_PAY_TX_FEE=2500`).

use std::path::Path;

use serde::{Deserialize, Serialize};

use rbf_core::constants::{
    DEFAULT_DUST_THRESHOLD, DEFAULT_FALLBACK_FEE, DEFAULT_INCREMENTAL_RELAY_FEE,
    DEFAULT_MIN_CHANGE_VALUE, DEFAULT_MIN_RELAY_FEE,
};
use rbf_core::mempool::{DEFAULT_MAX_BYTES, DEFAULT_MAX_COUNT};

use crate::error::WalletError;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "RBF";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Signal BIP125 replaceability on transactions the wallet creates.
    pub wallet_rbf: bool,
    /// Explicit fee rate per 1000 bytes. `0` leaves it unset.
    pub pay_tx_fee: u64,
    /// Rate used when no explicit rate is set.
    pub fallback_fee: u64,
    /// Minimum rate accepted by the pool.
    pub min_relay_fee: u64,
    /// Minimum rate a replacement adds over the original.
    pub incremental_relay_fee: u64,
    pub dust_threshold: u64,
    /// Smallest change output a bump may leave behind.
    pub min_change_value: u64,
    pub max_pool_count: usize,
    pub max_pool_bytes: usize,
    /// Log level filter string (e.g. "info", "rbf_wallet=debug").
    pub log_level: String,
    /// `"text"` or `"json"`.
    pub log_format: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            wallet_rbf: true,
            pay_tx_fee: 0,
            fallback_fee: DEFAULT_FALLBACK_FEE,
            min_relay_fee: DEFAULT_MIN_RELAY_FEE,
            incremental_relay_fee: DEFAULT_INCREMENTAL_RELAY_FEE,
            dust_threshold: DEFAULT_DUST_THRESHOLD,
            min_change_value: DEFAULT_MIN_CHANGE_VALUE,
            max_pool_count: DEFAULT_MAX_COUNT,
            max_pool_bytes: DEFAULT_MAX_BYTES,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}

impl WalletConfig {
    /// Load defaults, then `path` if given and present, then `RBF_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, WalletError> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// Like [`WalletConfig::load`] with a custom environment prefix.
    pub fn load_with_prefix(path: Option<&Path>, env_prefix: &str) -> Result<Self, WalletError> {
        let defaults = config::Config::try_from(&Self::default()).map_err(config_err)?;
        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let cfg: Self = builder
            .add_source(config::Environment::with_prefix(env_prefix).try_parsing(true))
            .build()
            .map_err(config_err)?
            .try_deserialize()
            .map_err(config_err)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), WalletError> {
        if self.min_change_value < self.dust_threshold {
            return Err(WalletError::Config(format!(
                "min_change_value {} below dust_threshold {}",
                self.min_change_value, self.dust_threshold
            )));
        }
        if self.incremental_relay_fee == 0 {
            return Err(WalletError::Config("incremental_relay_fee must be positive".into()));
        }
        if self.max_pool_count == 0 || self.max_pool_bytes == 0 {
            return Err(WalletError::Config("pool limits must be positive".into()));
        }
        if !matches!(self.log_format.as_str(), "text" | "json") {
            return Err(WalletError::Config(format!(
                "unknown log format: {}",
                self.log_format
            )));
        }
        Ok(())
    }
}

fn config_err(e: config::ConfigError) -> WalletError {
    WalletError::Config(e.to_string())
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level_str`. `format` is `"json"` for
/// structured output, anything else for human-readable text. Calling this
/// twice is harmless: the second install is ignored.
pub fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    let result = if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
