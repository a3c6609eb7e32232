//! Largest-first coin selection.
//!
//! Coins are spent biggest first so the fee, which grows with every input,
//! is covered with as few inputs as possible.

use rbf_core::types::{OutPoint, TxOutput};

use crate::error::WalletError;

/// A spendable wallet coin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletCoin {
    pub outpoint: OutPoint,
    pub output: TxOutput,
    /// Depth of the creating transaction. `0` while unconfirmed.
    pub confirmations: u64,
}

impl WalletCoin {
    pub fn value(&self) -> u64 {
        self.output.value
    }
}

/// Result of coin selection.
#[derive(Debug, Clone)]
pub struct CoinSelection {
    pub selected: Vec<WalletCoin>,
    pub total: u64,
    /// Fee for a transaction spending `selected`.
    pub fee: u64,
    /// `total - target - fee`. May be below dust; the builder decides.
    pub change: u64,
}

pub struct CoinSelector;

impl CoinSelector {
    /// Select coins covering `target` plus the fee.
    ///
    /// `fee_for_inputs(n)` returns the fee of a transaction with `n` inputs.
    pub fn select<F>(
        coins: &[WalletCoin],
        target: u64,
        fee_for_inputs: F,
    ) -> Result<CoinSelection, WalletError>
    where
        F: Fn(usize) -> u64,
    {
        if coins.is_empty() {
            return Err(WalletError::NoUtxos);
        }
        if target == 0 {
            return Err(WalletError::InvalidAmount("target must be non-zero".into()));
        }

        let mut sorted: Vec<&WalletCoin> = coins.iter().collect();
        sorted.sort_by(|a, b| {
            b.value()
                .cmp(&a.value())
                .then_with(|| b.confirmations.cmp(&a.confirmations))
                .then_with(|| a.outpoint.cmp(&b.outpoint))
        });

        let mut selected = Vec::new();
        let mut total: u64 = 0;
        for coin in sorted {
            selected.push(coin.clone());
            total = total.saturating_add(coin.value());

            let fee = fee_for_inputs(selected.len());
            let needed = target.saturating_add(fee);
            if total >= needed {
                return Ok(CoinSelection {
                    selected,
                    total,
                    fee,
                    change: total - needed,
                });
            }
        }

        Err(WalletError::InsufficientFunds {
            have: total,
            need: target.saturating_add(fee_for_inputs(selected.len())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rbf_core::types::Hash256;

    fn coin(seed: u8, value: u64, confirmations: u64) -> WalletCoin {
        WalletCoin {
            outpoint: OutPoint::new(Hash256([seed; 32]), 0),
            output: TxOutput { value, pubkey_hash: Hash256([0xEE; 32]) },
            confirmations,
        }
    }

    fn flat_fee(n: usize) -> u64 {
        1_000 + 500 * n as u64
    }

    #[test]
    fn empty_coins_is_error() {
        assert_eq!(
            CoinSelector::select(&[], 10, flat_fee).unwrap_err(),
            WalletError::NoUtxos
        );
    }

    #[test]
    fn zero_target_is_error() {
        let err = CoinSelector::select(&[coin(1, 10_000, 1)], 0, flat_fee).unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(_)));
    }

    #[test]
    fn picks_largest_first() {
        let coins = vec![coin(1, 5_000, 1), coin(2, 50_000, 1), coin(3, 20_000, 1)];
        let sel = CoinSelector::select(&coins, 30_000, flat_fee).unwrap();
        assert_eq!(sel.selected.len(), 1);
        assert_eq!(sel.selected[0].value(), 50_000);
        assert_eq!(sel.fee, 1_500);
        assert_eq!(sel.change, 50_000 - 30_000 - 1_500);
    }

    #[test]
    fn adds_inputs_until_fee_covered() {
        let coins = vec![coin(1, 30_000, 1), coin(2, 2_000, 1)];
        let sel = CoinSelector::select(&coins, 29_000, flat_fee).unwrap();
        assert_eq!(sel.selected.len(), 2);
        assert_eq!(sel.total, 32_000);
        assert_eq!(sel.fee, 2_000);
        assert_eq!(sel.change, 1_000);
    }

    #[test]
    fn insufficient_funds_reports_need() {
        let coins = vec![coin(1, 1_000, 1)];
        let err = CoinSelector::select(&coins, 5_000, flat_fee).unwrap_err();
        assert_eq!(err, WalletError::InsufficientFunds { have: 1_000, need: 6_500 });
    }

    #[test]
    fn ties_prefer_confirmed() {
        let coins = vec![coin(1, 10_000, 0), coin(2, 10_000, 6)];
        let sel = CoinSelector::select(&coins, 5_000, flat_fee).unwrap();
        assert_eq!(sel.selected[0].confirmations, 6);
    }
}
