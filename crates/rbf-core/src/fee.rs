//! Fee rates.
//!
//! Rates are expressed in base units per 1000 bytes of serialized transaction.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::FEE_RATE_UNIT_BYTES;

/// Fee rate in base units per 1000 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct FeeRate(pub u64);

impl FeeRate {
    pub const ZERO: Self = Self(0);

    pub fn per_kb(rate: u64) -> Self {
        Self(rate)
    }

    /// Fee owed by a transaction of `size_bytes`.
    ///
    /// A non-zero rate never yields a zero fee: sizes that round down to
    /// nothing are charged the full per-kB rate.
    pub fn fee_for(&self, size_bytes: usize) -> u64 {
        let fee = self.0.saturating_mul(size_bytes as u64) / FEE_RATE_UNIT_BYTES;
        if fee == 0 && self.0 > 0 {
            self.0
        } else {
            fee
        }
    }

    pub fn as_per_kb(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/kB", self.0)
    }
}
