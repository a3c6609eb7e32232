//! Transaction builder: coin selection, fee estimation, change and signing.
//!
//! Provides a builder pattern for constructing transactions:
//! 1. Add recipients (pubkey hash + amount)
//! 2. Build an unsigned transaction (performs coin selection)
//! 3. Sign all inputs through a [`Signer`]
//!
//! Fees are the configured rate applied to an upper bound of the signed
//! size: signatures and keys are counted at full length and every
//! variable-width integer at its widest encoding.

use rbf_core::constants::{
    DEFAULT_DUST_THRESHOLD, DEFAULT_FALLBACK_FEE, MAX_BIP125_RBF_SEQUENCE, SEQUENCE_NO_RBF,
};
use rbf_core::fee::FeeRate;
use rbf_core::traits::Signer;
use rbf_core::types::{Hash256, OutPoint, Transaction, TxInput, TxOutput};

use crate::coin_selection::{CoinSelection, CoinSelector, WalletCoin};
use crate::error::WalletError;

const SIGNATURE_LEN: usize = 64;
const PUBLIC_KEY_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub pubkey_hash: Hash256,
    pub amount: u64,
}

/// An unsigned transaction ready for signing.
#[derive(Debug, Clone)]
pub struct UnsignedTransaction {
    pub tx: Transaction,
    pub selection: CoinSelection,
    /// Output spent by each input, in input order.
    pub prevouts: Vec<TxOutput>,
    /// Fee actually paid, including any change folded in as dust.
    pub fee: u64,
    /// Position of the change output, if one was created.
    pub change_index: Option<usize>,
}

pub struct TransactionBuilder {
    recipients: Vec<Recipient>,
    fee_rate: FeeRate,
    rbf: bool,
    dust_threshold: u64,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self {
            recipients: Vec::new(),
            fee_rate: FeeRate::per_kb(DEFAULT_FALLBACK_FEE),
            rbf: true,
            dust_threshold: DEFAULT_DUST_THRESHOLD,
        }
    }

    pub fn add_recipient(&mut self, pubkey_hash: Hash256, amount: u64) -> &mut Self {
        self.recipients.push(Recipient { pubkey_hash, amount });
        self
    }

    pub fn set_fee_rate(&mut self, rate: FeeRate) -> &mut Self {
        self.fee_rate = rate;
        self
    }

    /// Signal BIP125 replaceability on every input.
    pub fn set_rbf(&mut self, rbf: bool) -> &mut Self {
        self.rbf = rbf;
        self
    }

    /// Change below this value is added to the fee instead of being created.
    pub fn set_dust_threshold(&mut self, dust: u64) -> &mut Self {
        self.dust_threshold = dust;
        self
    }

    fn sequence(&self) -> u32 {
        if self.rbf {
            MAX_BIP125_RBF_SEQUENCE
        } else {
            SEQUENCE_NO_RBF
        }
    }

    /// Select coins from `coins` and build outputs, sending change to `change_pubkey_hash`.
    pub fn build(
        &self,
        coins: &[WalletCoin],
        change_pubkey_hash: Hash256,
    ) -> Result<UnsignedTransaction, WalletError> {
        if self.recipients.is_empty() {
            return Err(WalletError::BuildError("no recipients".into()));
        }

        let mut total_send: u64 = 0;
        for r in &self.recipients {
            if r.amount == 0 {
                return Err(WalletError::InvalidAmount("recipient amount is zero".into()));
            }
            total_send = total_send
                .checked_add(r.amount)
                .ok_or_else(|| WalletError::InvalidAmount("total amount overflow".into()))?;
        }

        let mut outputs: Vec<TxOutput> = self
            .recipients
            .iter()
            .map(|r| TxOutput {
                value: r.amount,
                pubkey_hash: r.pubkey_hash,
            })
            .collect();

        let template = |n_inputs: usize| Transaction {
            version: 1,
            inputs: vec![
                TxInput::unsigned(OutPoint::new(Hash256::ZERO, u64::MAX), u32::MAX);
                n_inputs
            ],
            outputs: outputs
                .iter()
                .cloned()
                .chain(std::iter::once(TxOutput {
                    value: u64::MAX,
                    pubkey_hash: change_pubkey_hash,
                }))
                .collect(),
            lock_time: 0,
        };
        let fee_rate = self.fee_rate;
        let selection = CoinSelector::select(coins, total_send, |n| {
            estimate_signed_size(&template(n))
                .map(|size| fee_rate.fee_for(size))
                .unwrap_or(u64::MAX)
        })?;

        let inputs = selection
            .selected
            .iter()
            .map(|coin| TxInput::unsigned(coin.outpoint.clone(), self.sequence()))
            .collect();
        let prevouts = selection.selected.iter().map(|c| c.output.clone()).collect();

        let (fee, change_index) = if selection.change >= self.dust_threshold {
            outputs.push(TxOutput {
                value: selection.change,
                pubkey_hash: change_pubkey_hash,
            });
            (selection.fee, Some(outputs.len() - 1))
        } else {
            (selection.fee + selection.change, None)
        };

        let tx = Transaction {
            version: 1,
            inputs,
            outputs,
            lock_time: 0,
        };

        Ok(UnsignedTransaction {
            tx,
            selection,
            prevouts,
            fee,
            change_index,
        })
    }

    /// Sign every input of `unsigned` through `signer`.
    pub fn sign(
        unsigned: UnsignedTransaction,
        signer: &dyn Signer,
    ) -> Result<Transaction, WalletError> {
        let mut tx = unsigned.tx;
        for (i, prevout) in unsigned.prevouts.iter().enumerate() {
            signer.sign_input(&mut tx, i, prevout)?;
        }
        Ok(tx)
    }
}

impl Default for TransactionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialized size of `tx` once every input carries a full signature and key.
pub fn estimate_signed_size(tx: &Transaction) -> Result<usize, WalletError> {
    let mut filled = tx.clone();
    for input in &mut filled.inputs {
        input.signature = vec![0u8; SIGNATURE_LEN];
        input.public_key = vec![0u8; PUBLIC_KEY_LEN];
    }
    Ok(filled.size()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{KeyChain, KeyChainSigner, KeyPurpose, Seed};
    use parking_lot::RwLock;
    use rbf_core::crypto::verify_transaction_input;
    use std::sync::Arc;

    fn setup() -> (Arc<RwLock<KeyChain>>, Vec<WalletCoin>, Hash256) {
        let keychain = Arc::new(RwLock::new(KeyChain::new(Seed::from_bytes([1u8; 32]))));
        let mut coins = Vec::new();
        for (i, value) in [100_000u64, 40_000].into_iter().enumerate() {
            let pkh = keychain.write().next_pubkey_hash(KeyPurpose::Receive);
            coins.push(WalletCoin {
                outpoint: OutPoint::new(Hash256([i as u8 + 1; 32]), 0),
                output: TxOutput { value, pubkey_hash: pkh },
                confirmations: 6,
            });
        }
        let change = keychain.write().next_pubkey_hash(KeyPurpose::Change);
        (keychain, coins, change)
    }

    fn dest() -> Hash256 {
        Hash256([0xDD; 32])
    }

    #[test]
    fn build_with_change() {
        let (_, coins, change) = setup();
        let mut b = TransactionBuilder::new();
        b.add_recipient(dest(), 60_000).set_fee_rate(FeeRate::per_kb(1_000));
        let unsigned = b.build(&coins, change).unwrap();

        assert_eq!(unsigned.tx.inputs.len(), 1);
        let idx = unsigned.change_index.unwrap();
        assert_eq!(unsigned.tx.outputs[idx].pubkey_hash, change);
        let out_total: u64 = unsigned.tx.outputs.iter().map(|o| o.value).sum();
        assert_eq!(out_total + unsigned.fee, 100_000);
    }

    #[test]
    fn fee_covers_signed_size() {
        let (keychain, coins, change) = setup();
        let mut b = TransactionBuilder::new();
        b.add_recipient(dest(), 60_000).set_fee_rate(FeeRate::per_kb(10_000));
        let unsigned = b.build(&coins, change).unwrap();
        let fee = unsigned.fee;
        let signed = TransactionBuilder::sign(unsigned, &KeyChainSigner::new(keychain)).unwrap();
        assert!(fee >= FeeRate::per_kb(10_000).fee_for(signed.size().unwrap()));
    }

    #[test]
    fn rbf_flag_sets_sequence() {
        let (_, coins, change) = setup();
        let mut b = TransactionBuilder::new();
        b.add_recipient(dest(), 10_000);
        assert!(b.build(&coins, change).unwrap().tx.signals_rbf());
        b.set_rbf(false);
        let tx = b.build(&coins, change).unwrap().tx;
        assert!(!tx.signals_rbf());
        assert!(tx.inputs.iter().all(|i| i.sequence == SEQUENCE_NO_RBF));
    }

    #[test]
    fn dust_change_folded_into_fee() {
        let (_, coins, change) = setup();
        let mut b = TransactionBuilder::new();
        b.set_fee_rate(FeeRate::per_kb(1_000)).set_dust_threshold(546);
        // Find the fee for a one-input spend, then leave 100 units of change.
        b.add_recipient(dest(), 1_000);
        let probe = b.build(&coins, change).unwrap();
        let amount = 100_000 - probe.selection.fee - 100;

        let mut b = TransactionBuilder::new();
        b.set_fee_rate(FeeRate::per_kb(1_000)).add_recipient(dest(), amount);
        let unsigned = b.build(&coins, change).unwrap();
        assert_eq!(unsigned.change_index, None);
        assert_eq!(unsigned.tx.outputs.len(), 1);
        assert_eq!(unsigned.fee, 100_000 - amount);
    }

    #[test]
    fn build_no_recipients_fails() {
        let (_, coins, change) = setup();
        let err = TransactionBuilder::new().build(&coins, change).unwrap_err();
        assert!(matches!(err, WalletError::BuildError(_)));
    }

    #[test]
    fn build_zero_amount_fails() {
        let (_, coins, change) = setup();
        let mut b = TransactionBuilder::new();
        b.add_recipient(dest(), 0);
        assert!(matches!(b.build(&coins, change), Err(WalletError::InvalidAmount(_))));
    }

    #[test]
    fn build_insufficient_funds() {
        let (_, coins, change) = setup();
        let mut b = TransactionBuilder::new();
        b.add_recipient(dest(), 200_000);
        assert!(matches!(
            b.build(&coins, change),
            Err(WalletError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn sign_all_inputs() {
        let (keychain, coins, change) = setup();
        let mut b = TransactionBuilder::new();
        b.add_recipient(dest(), 120_000).set_fee_rate(FeeRate::per_kb(1_000));
        let unsigned = b.build(&coins, change).unwrap();
        assert_eq!(unsigned.tx.inputs.len(), 2);
        let prevouts = unsigned.prevouts.clone();

        let signed = TransactionBuilder::sign(unsigned, &KeyChainSigner::new(keychain)).unwrap();
        for (i, prevout) in prevouts.iter().enumerate() {
            assert!(verify_transaction_input(&signed, i, &prevout.pubkey_hash).is_ok());
        }
    }

    #[test]
    fn sign_missing_key_fails() {
        let (_, coins, change) = setup();
        let stranger = Arc::new(RwLock::new(KeyChain::new(Seed::from_bytes([2u8; 32]))));
        let mut b = TransactionBuilder::new();
        b.add_recipient(dest(), 10_000);
        let unsigned = b.build(&coins, change).unwrap();
        let err = TransactionBuilder::sign(unsigned, &KeyChainSigner::new(stranger)).unwrap_err();
        assert!(matches!(err, WalletError::Crypto(_)));
    }
}
