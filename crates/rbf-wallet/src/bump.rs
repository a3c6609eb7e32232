//! Fee-bump planner.
//!
//! Builds a replacement for an unconfirmed, opt-in replaceable wallet
//! transaction. Inputs and non-change outputs are kept; only the change
//! output shrinks to pay the higher fee. Planning reads shared state and
//! produces a signed [`BumpPlan`]; [`commit`] applies it to the pool, the
//! replacement links and the ledger as one unit.

use tracing::{debug, info};

use rbf_core::traits::{FeePolicy, Signer};
use rbf_core::types::{Hash256, Transaction, TxOutput};

use crate::error::{BumpError, NotReplaceableReason};
use crate::ledger::{Ledger, StateView};
use crate::wallet::WalletState;

/// Change-output limits applied when shrinking change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangePolicy {
    /// Remaining change below this is dropped and added to the fee.
    pub dust_threshold: u64,
    /// Remaining change in `[dust_threshold, min_change_value)` is refused.
    pub min_change_value: u64,
}

/// A signed replacement, ready to commit.
#[derive(Debug, Clone)]
pub struct BumpPlan {
    pub original_txid: Hash256,
    pub original_fee: u64,
    pub tx: Transaction,
    pub txid: Hash256,
    pub fee: u64,
    /// The change output fell below dust and was removed.
    pub dropped_change: bool,
}

/// Outcome of a successful bump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BumpResult {
    pub txid: Hash256,
    pub original_txid: Hash256,
    pub original_fee: u64,
    pub fee: u64,
}

impl From<&BumpPlan> for BumpResult {
    fn from(plan: &BumpPlan) -> Self {
        Self {
            txid: plan.txid,
            original_txid: plan.original_txid,
            original_fee: plan.original_fee,
            fee: plan.fee,
        }
    }
}

pub struct FeeBumper<'a> {
    ledger: &'a Ledger,
    view: StateView<'a>,
    policy: &'a dyn FeePolicy,
    signer: &'a dyn Signer,
    change: ChangePolicy,
}

impl<'a> FeeBumper<'a> {
    pub fn new(
        ledger: &'a Ledger,
        view: StateView<'a>,
        policy: &'a dyn FeePolicy,
        signer: &'a dyn Signer,
        change: ChangePolicy,
    ) -> Self {
        Self {
            ledger,
            view,
            policy,
            signer,
            change,
        }
    }

    /// Check the bump preconditions for `txid`, in order.
    pub fn check(&self, txid: &Hash256) -> Result<&'a Transaction, BumpError> {
        let ledger: &'a Ledger = self.ledger;
        let wtx = ledger.get(txid).ok_or(BumpError::NotReplaceable {
            txid: *txid,
            reason: NotReplaceableReason::Unknown,
        })?;
        if self.view.chain.is_confirmed(txid) {
            return Err(BumpError::NotReplaceable {
                txid: *txid,
                reason: NotReplaceableReason::Confirmed,
            });
        }
        if !wtx.tx.signals_rbf() {
            return Err(BumpError::NotReplaceable {
                txid: *txid,
                reason: NotReplaceableReason::NotSignalling,
            });
        }

        if let Some(op) = wtx
            .tx
            .spent_outpoints()
            .find(|op| !ledger.owns_input(op, self.view.chain))
        {
            return Err(BumpError::ForeignInput {
                txid: *txid,
                outpoint: op.clone(),
            });
        }

        let count = self.view.pool.descendant_count(txid);
        if count > 0 {
            return Err(BumpError::HasDescendants { txid: *txid, count });
        }

        if let Some(replacement) = self.view.conflicts.replacement_of(txid) {
            return Err(BumpError::AlreadyBumped {
                txid: *txid,
                replacement,
            });
        }

        if !self.view.pool.contains(txid) {
            return Err(BumpError::BroadcastRejected(format!(
                "transaction {txid} is not in the pool"
            )));
        }
        Ok(&wtx.tx)
    }

    /// Build and sign a replacement for `txid`.
    ///
    /// `total_fee` is the absolute fee to pay; it is raised to the minimum
    /// replacement fee when lower. Without it the policy rate applies.
    pub fn plan(&self, txid: &Hash256, total_fee: Option<u64>) -> Result<BumpPlan, BumpError> {
        let original = self.check(txid)?;

        let change_indices: Vec<usize> = original
            .outputs
            .iter()
            .enumerate()
            .filter(|(_, out)| self.ledger.is_change(out))
            .map(|(i, _)| i)
            .collect();
        let change_index = match change_indices.as_slice() {
            [] => return Err(BumpError::NoChangeOutput(*txid)),
            [index] => *index,
            many => {
                return Err(BumpError::MultipleChangeOutputs {
                    txid: *txid,
                    count: many.len(),
                })
            }
        };

        let original_fee = match self.view.pool.get(txid) {
            Some(entry) => entry.fee,
            None => self
                .ledger
                .compute_fee(original, self.view.chain)
                .ok_or_else(|| BumpError::BroadcastRejected(format!("fee of {txid} unknown")))?,
        };
        let size = original.size()?;
        let increment = self.policy.incremental_relay_fee().fee_for(size).max(1);
        let min_fee = original_fee.saturating_add(increment);
        let new_fee = match total_fee {
            Some(0) => return Err(BumpError::InsufficientFee { requested: 0 }),
            Some(requested) => requested.max(min_fee),
            None => self.policy.fee_rate().fee_for(size).max(min_fee),
        };

        let fee_increase = new_fee - original_fee;
        let change_value = original.outputs[change_index].value;
        let remaining = change_value
            .checked_sub(fee_increase)
            .ok_or(BumpError::ChangeTooSmall {
                change: change_value,
                fee_increase,
            })?;

        let mut tx = original.clone();
        let (fee, dropped_change) = if remaining < self.change.dust_threshold {
            tx.outputs.remove(change_index);
            (original_fee + change_value, true)
        } else if remaining < self.change.min_change_value {
            return Err(BumpError::ChangeTooSmall {
                change: change_value,
                fee_increase,
            });
        } else {
            tx.outputs[change_index].value = remaining;
            (new_fee, false)
        };

        self.sign(txid, &mut tx)?;
        let new_txid = tx.txid()?;
        debug!(
            original = %txid,
            replacement = %new_txid,
            original_fee,
            fee,
            dropped_change,
            "planned bump"
        );

        Ok(BumpPlan {
            original_txid: *txid,
            original_fee,
            tx,
            txid: new_txid,
            fee,
            dropped_change,
        })
    }

    /// Re-sign every input. Signatures commit to the outputs, so all of
    /// them are stale once the change output moves.
    fn sign(&self, txid: &Hash256, tx: &mut Transaction) -> Result<(), BumpError> {
        let prevouts: Vec<TxOutput> = tx
            .inputs
            .iter()
            .map(|input| {
                self.ledger
                    .prevout(&input.previous_output, self.view.chain)
                    .ok_or_else(|| BumpError::ForeignInput {
                        txid: *txid,
                        outpoint: input.previous_output.clone(),
                    })
            })
            .collect::<Result<_, _>>()?;

        for input in &mut tx.inputs {
            input.signature.clear();
            input.public_key.clear();
        }
        for (index, prevout) in prevouts.iter().enumerate() {
            self.signer
                .sign_input(tx, index, prevout)
                .map_err(BumpError::SigningFailed)?;
        }
        Ok(())
    }
}

/// Apply `plan`: evict the original, insert the replacement, link them and
/// record the replacement in the ledger.
///
/// Every check runs before the first mutation, so a failure leaves the
/// state untouched.
pub fn commit(state: &mut WalletState, plan: &BumpPlan) -> Result<BumpResult, BumpError> {
    let original = plan.original_txid;
    if state.chain.is_confirmed(&original) {
        return Err(BumpError::NotReplaceable {
            txid: original,
            reason: NotReplaceableReason::Confirmed,
        });
    }
    if let Some(replacement) = state.conflicts.replacement_of(&original) {
        return Err(BumpError::AlreadyBumped {
            txid: original,
            replacement,
        });
    }
    if let Some(prior) = state.conflicts.original_of(&plan.txid) {
        return Err(BumpError::AlreadyBumped {
            txid: prior,
            replacement: plan.txid,
        });
    }
    let count = state.pool.descendant_count(&original);
    if count > 0 {
        return Err(BumpError::HasDescendants {
            txid: original,
            count,
        });
    }

    state
        .pool
        .evict_and_replace(&original, plan.tx.clone(), plan.fee)?;
    state.conflicts.link(original, plan.txid)?;
    state.ledger.add(plan.tx.clone(), Some(plan.fee))?;

    info!(
        original = %original,
        replacement = %plan.txid,
        original_fee = plan.original_fee,
        fee = plan.fee,
        "fee bump committed"
    );
    Ok(BumpResult::from(plan))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflicts::ConflictTracker;
    use crate::fee::FeeSettings;
    use crate::keys::{KeyChain, KeyChainSigner, KeyPurpose, Seed};
    use parking_lot::RwLock;
    use rbf_core::chain_state::ChainIndex;
    use rbf_core::constants::{MAX_BIP125_RBF_SEQUENCE, SEQUENCE_FINAL, SEQUENCE_NO_RBF};
    use rbf_core::crypto::verify_transaction_input;
    use rbf_core::fee::FeeRate;
    use rbf_core::mempool::Mempool;
    use rbf_core::types::{Block, OutPoint, TxInput};
    use std::sync::Arc;

    const CHANGE_POLICY: ChangePolicy = ChangePolicy {
        dust_threshold: 546,
        min_change_value: 1_000,
    };

    struct Fixture {
        state: WalletState,
        signer: KeyChainSigner,
        fees: FeeSettings,
        receive: Hash256,
        change: Hash256,
        funding: Hash256,
    }

    impl Fixture {
        fn new() -> Self {
            let keychain = Arc::new(RwLock::new(KeyChain::new(Seed::from_bytes([5u8; 32]))));
            let receive = keychain.write().next_pubkey_hash(KeyPurpose::Receive);
            let change = keychain.write().next_pubkey_hash(KeyPurpose::Change);

            let mut state = WalletState {
                chain: ChainIndex::new(),
                pool: Mempool::with_defaults(),
                ledger: Ledger::new(),
                conflicts: ConflictTracker::new(),
            };
            state.ledger.watch(receive, KeyPurpose::Receive);
            state.ledger.watch(change, KeyPurpose::Change);

            let coinbase = Transaction {
                version: 1,
                inputs: vec![TxInput::unsigned(OutPoint::null(), SEQUENCE_FINAL)],
                outputs: vec![TxOutput { value: 100_000, pubkey_hash: receive }],
                lock_time: 0,
            };
            let block = Block::new(Hash256::ZERO, 1, 0, vec![coinbase.clone()]).unwrap();
            state.chain.connect_block(&block).unwrap();
            let funding = state.ledger.add(coinbase, None).unwrap();

            let fees = FeeSettings::default();
            fees.set_pay_tx_fee(FeeRate::per_kb(1_000));
            Self {
                state,
                signer: KeyChainSigner::new(keychain),
                fees,
                receive,
                change,
                funding,
            }
        }

        /// Submit a signed spend of the funding coin paying 90_000 away.
        fn send(&mut self, change_value: u64, sequence: u32) -> Hash256 {
            let mut tx = Transaction {
                version: 1,
                inputs: vec![TxInput::unsigned(OutPoint::new(self.funding, 0), sequence)],
                outputs: vec![
                    TxOutput { value: 90_000, pubkey_hash: Hash256([0xEE; 32]) },
                    TxOutput { value: change_value, pubkey_hash: self.change },
                ],
                lock_time: 0,
            };
            let prevout = TxOutput { value: 100_000, pubkey_hash: self.receive };
            self.signer.sign_input(&mut tx, 0, &prevout).unwrap();
            let fee = 10_000 - change_value;
            self.state.pool.accept(tx.clone(), fee).unwrap();
            self.state.ledger.add(tx, Some(fee)).unwrap()
        }

        fn plan(&self, txid: &Hash256, total_fee: Option<u64>) -> Result<BumpPlan, BumpError> {
            FeeBumper::new(
                &self.state.ledger,
                self.state.view(),
                &self.fees,
                &self.signer,
                CHANGE_POLICY,
            )
            .plan(txid, total_fee)
        }
    }

    /// Pays nothing and asks for no increment.
    struct FreePolicy;

    impl FeePolicy for FreePolicy {
        fn fee_rate(&self) -> FeeRate {
            FeeRate::ZERO
        }

        fn incremental_relay_fee(&self) -> FeeRate {
            FeeRate::ZERO
        }
    }

    // --- Preconditions ---

    #[test]
    fn unknown_tx_not_replaceable() {
        let f = Fixture::new();
        let err = f.plan(&Hash256([1; 32]), None).unwrap_err();
        assert!(matches!(
            err,
            BumpError::NotReplaceable { reason: NotReplaceableReason::Unknown, .. }
        ));
    }

    #[test]
    fn non_signalling_tx_not_replaceable() {
        let mut f = Fixture::new();
        let txid = f.send(5_000, SEQUENCE_NO_RBF);
        let err = f.plan(&txid, None).unwrap_err();
        assert!(matches!(
            err,
            BumpError::NotReplaceable { reason: NotReplaceableReason::NotSignalling, .. }
        ));
    }

    #[test]
    fn descendant_blocks_bump() {
        let mut f = Fixture::new();
        let txid = f.send(5_000, MAX_BIP125_RBF_SEQUENCE);
        let child = Transaction {
            version: 1,
            inputs: vec![TxInput::unsigned(OutPoint::new(txid, 1), MAX_BIP125_RBF_SEQUENCE)],
            outputs: vec![TxOutput { value: 4_000, pubkey_hash: f.receive }],
            lock_time: 0,
        };
        f.state.pool.accept(child, 1_000).unwrap();
        let err = f.plan(&txid, None).unwrap_err();
        assert!(matches!(err, BumpError::HasDescendants { count: 1, .. }));
    }

    #[test]
    fn missing_change_output() {
        let mut f = Fixture::new();
        let mut tx = Transaction {
            version: 1,
            inputs: vec![TxInput::unsigned(OutPoint::new(f.funding, 0), MAX_BIP125_RBF_SEQUENCE)],
            outputs: vec![TxOutput { value: 95_000, pubkey_hash: Hash256([0xEE; 32]) }],
            lock_time: 0,
        };
        let prevout = TxOutput { value: 100_000, pubkey_hash: f.receive };
        f.signer.sign_input(&mut tx, 0, &prevout).unwrap();
        f.state.pool.accept(tx.clone(), 5_000).unwrap();
        let txid = f.state.ledger.add(tx, Some(5_000)).unwrap();

        assert_eq!(f.plan(&txid, None).unwrap_err(), BumpError::NoChangeOutput(txid));
    }

    // --- Fee computation ---

    #[test]
    fn default_bump_pays_at_least_increment() {
        let mut f = Fixture::new();
        let txid = f.send(5_000, MAX_BIP125_RBF_SEQUENCE);
        let size = f.state.ledger.get(&txid).unwrap().tx.size().unwrap();

        let plan = f.plan(&txid, None).unwrap();
        assert_eq!(plan.original_fee, 5_000);
        assert_eq!(plan.fee, 5_000 + FeeRate::per_kb(1_000).fee_for(size));
        assert_eq!(plan.tx.outputs[1].value, 10_000 - plan.fee);
        assert!(!plan.dropped_change);
    }

    #[test]
    fn explicit_fee_below_floor_is_raised() {
        let mut f = Fixture::new();
        let txid = f.send(5_000, MAX_BIP125_RBF_SEQUENCE);
        let plan = f.plan(&txid, Some(4_000)).unwrap();
        assert!(plan.fee > 5_000);
    }

    #[test]
    fn zero_total_fee_rejected() {
        let mut f = Fixture::new();
        let txid = f.send(5_000, MAX_BIP125_RBF_SEQUENCE);
        assert_eq!(
            f.plan(&txid, Some(0)).unwrap_err(),
            BumpError::InsufficientFee { requested: 0 }
        );
    }

    // --- Change rules ---

    #[test]
    fn dust_remainder_dropped_into_fee() {
        let mut f = Fixture::new();
        let txid = f.send(5_000, MAX_BIP125_RBF_SEQUENCE);
        let plan = f.plan(&txid, Some(9_900)).unwrap();
        assert!(plan.dropped_change);
        assert_eq!(plan.fee, 10_000);
        assert_eq!(plan.tx.outputs.len(), 1);
    }

    #[test]
    fn remainder_between_dust_and_minimum_rejected() {
        let mut f = Fixture::new();
        let txid = f.send(5_000, MAX_BIP125_RBF_SEQUENCE);
        // 10_000 - 9_400 = 600 left: above dust, below the minimum change.
        assert!(matches!(
            f.plan(&txid, Some(9_400)).unwrap_err(),
            BumpError::ChangeTooSmall { change: 5_000, fee_increase: 4_400 }
        ));
    }

    #[test]
    fn reduction_larger_than_change_rejected() {
        let mut f = Fixture::new();
        let txid = f.send(5_000, MAX_BIP125_RBF_SEQUENCE);
        assert!(matches!(
            f.plan(&txid, Some(10_001)).unwrap_err(),
            BumpError::ChangeTooSmall { .. }
        ));
    }

    #[test]
    fn replacement_inputs_are_resigned() {
        let mut f = Fixture::new();
        let txid = f.send(5_000, MAX_BIP125_RBF_SEQUENCE);
        let plan = f.plan(&txid, None).unwrap();
        assert!(verify_transaction_input(&plan.tx, 0, &f.receive).is_ok());
        assert_eq!(plan.tx.inputs[0].sequence, MAX_BIP125_RBF_SEQUENCE);
    }

    // --- Commit ---

    #[test]
    fn commit_swaps_pool_and_links() {
        let mut f = Fixture::new();
        let txid = f.send(5_000, MAX_BIP125_RBF_SEQUENCE);
        let plan = f.plan(&txid, None).unwrap();

        let result = commit(&mut f.state, &plan).unwrap();
        assert!(result.fee > result.original_fee);
        assert!(!f.state.pool.contains(&txid));
        assert!(f.state.pool.contains(&result.txid));
        assert_eq!(f.state.conflicts.replacement_of(&txid), Some(result.txid));
        assert!(f.state.ledger.contains(&result.txid));

        assert!(matches!(
            commit(&mut f.state, &plan).unwrap_err(),
            BumpError::AlreadyBumped { .. }
        ));
        assert!(matches!(
            f.plan(&txid, None).unwrap_err(),
            BumpError::AlreadyBumped { .. }
        ));
    }

    #[test]
    fn zero_increment_policy_still_raises_fee() {
        let mut f = Fixture::new();
        let txid = f.send(5_000, MAX_BIP125_RBF_SEQUENCE);
        let bumper = FeeBumper::new(
            &f.state.ledger,
            f.state.view(),
            &FreePolicy,
            &f.signer,
            CHANGE_POLICY,
        );
        let plan = bumper.plan(&txid, None).unwrap();
        assert_eq!(plan.fee, 5_001);
        assert_eq!(plan.tx.outputs[1].value, 4_999);

        let result = commit(&mut f.state, &plan).unwrap();
        assert!(f.state.pool.contains(&result.txid));
        assert!(!f.state.pool.contains(&txid));
    }
}
