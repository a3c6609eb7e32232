//! Property tests for the fee and change rules of a bump.
//!
//! Each case spends a 100_000 coin paying 90_000 away with a random change
//! output, then bumps it to a random absolute fee.

use proptest::prelude::*;

use rbf_tests::helpers::*;
use rbf_wallet::{BumpError, WalletConfig};

const DUST: u64 = 546;
const MIN_CHANGE: u64 = 1_000;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Every successful bump pays strictly more, keeps the payment, and
    /// leaves either no change or at least the minimum change value.
    #[test]
    fn bump_outcome_respects_change_rules(
        change in 0u64..9_500,
        total_fee in 1u64..20_000,
    ) {
        let w = wallet(1);
        let coin = fund(&[&w], &w);
        let txid = submit_exact(&w, &coin, change);
        let original_fee = FUNDING - PAYMENT - change;

        match w.bump_fee(&txid, Some(total_fee)) {
            Ok(result) => {
                prop_assert!(result.fee > original_fee);
                prop_assert!(result.fee >= total_fee);
                prop_assert!(!w.in_pool(&txid));
                prop_assert!(w.in_pool(&result.txid));

                let tx = wallet_tx(&w, &result.txid);
                prop_assert_eq!(tx.outputs[0].value, PAYMENT);
                match tx.outputs.get(1) {
                    Some(out) => {
                        prop_assert!(out.value >= MIN_CHANGE);
                        prop_assert_eq!(PAYMENT + out.value + result.fee, FUNDING);
                    }
                    None => prop_assert_eq!(result.fee, FUNDING - PAYMENT),
                }
            }
            Err(BumpError::ChangeTooSmall { change: c, fee_increase }) => {
                prop_assert_eq!(c, change);
                let remaining = change.checked_sub(fee_increase);
                prop_assert!(
                    remaining.is_none_or(|r| (DUST..MIN_CHANGE).contains(&r)),
                    "remaining {:?} should be negative or in the refused band", remaining
                );
                prop_assert!(w.in_pool(&txid));
            }
            Err(e) => prop_assert!(false, "unexpected error {e}"),
        }
    }

    /// A requested fee comfortably above the floor that leaves at least the
    /// minimum change is honored exactly.
    #[test]
    fn requested_fee_honored_when_change_allows(
        change in 3_000u64..9_000,
        extra in 500u64..2_000,
    ) {
        let w = wallet(2);
        let coin = fund(&[&w], &w);
        let txid = submit_exact(&w, &coin, change);
        let original_fee = FUNDING - PAYMENT - change;
        let requested = original_fee + extra;
        prop_assume!(change - extra >= MIN_CHANGE);

        let result = w.bump_fee(&txid, Some(requested)).unwrap();
        prop_assert_eq!(result.fee, requested);
        prop_assert_eq!(wallet_tx(&w, &result.txid).outputs[1].value, change - extra);
    }

    /// Default bumps under any configured rate only ever raise the fee,
    /// and rebumping the original is always refused.
    #[test]
    fn default_bump_then_rebump_refused(rate in 1_000u64..50_000) {
        let config = WalletConfig { pay_tx_fee: rate, ..WalletConfig::default() };
        let w = wallet_with(config, 3);
        let coin = fund(&[&w], &w);
        let txid = submit_exact(&w, &coin, 8_000);

        if let Ok(result) = w.bump_fee(&txid, None) {
            prop_assert!(result.fee > result.original_fee);
            let is_already_bumped = matches!(
                w.bump_fee(&txid, None),
                Err(BumpError::AlreadyBumped { .. })
            );
            prop_assert!(is_already_bumped);
        }
    }
}
