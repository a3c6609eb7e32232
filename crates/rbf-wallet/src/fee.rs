//! Fee-rate policy with a settable override.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use rbf_core::fee::FeeRate;
use rbf_core::traits::FeePolicy;

use crate::config::WalletConfig;

/// Wallet fee policy.
///
/// An explicit rate set with [`FeeSettings::set_pay_tx_fee`] is honored
/// exactly; zero unsets it and the policy falls back to its estimate.
#[derive(Debug)]
pub struct FeeSettings {
    pay_tx_fee: AtomicU64,
    fallback_fee: FeeRate,
    min_relay_fee: FeeRate,
    incremental_relay_fee: FeeRate,
}

impl FeeSettings {
    pub fn new(
        fallback_fee: FeeRate,
        min_relay_fee: FeeRate,
        incremental_relay_fee: FeeRate,
    ) -> Self {
        Self {
            pay_tx_fee: AtomicU64::new(0),
            fallback_fee,
            min_relay_fee,
            incremental_relay_fee,
        }
    }

    pub fn from_config(config: &WalletConfig) -> Self {
        let settings = Self::new(
            FeeRate::per_kb(config.fallback_fee),
            FeeRate::per_kb(config.min_relay_fee),
            FeeRate::per_kb(config.incremental_relay_fee),
        );
        settings.set_pay_tx_fee(FeeRate::per_kb(config.pay_tx_fee));
        settings
    }

    /// Set the explicit rate. [`FeeRate::ZERO`] clears it.
    pub fn set_pay_tx_fee(&self, rate: FeeRate) {
        self.pay_tx_fee.store(rate.as_per_kb(), Ordering::SeqCst);
        info!(rate = rate.as_per_kb(), "pay_tx_fee updated");
    }

    /// The explicit rate, if one is set.
    pub fn pay_tx_fee(&self) -> Option<FeeRate> {
        match self.pay_tx_fee.load(Ordering::SeqCst) {
            0 => None,
            rate => Some(FeeRate::per_kb(rate)),
        }
    }

    /// Rate used without an override: the fallback, never below the relay minimum.
    pub fn estimate(&self) -> FeeRate {
        self.fallback_fee.max(self.min_relay_fee)
    }
}

impl FeePolicy for FeeSettings {
    fn fee_rate(&self) -> FeeRate {
        self.pay_tx_fee().unwrap_or_else(|| self.estimate())
    }

    fn incremental_relay_fee(&self) -> FeeRate {
        self.incremental_relay_fee
    }
}

impl Default for FeeSettings {
    fn default() -> Self {
        Self::from_config(&WalletConfig::default())
    }
}
