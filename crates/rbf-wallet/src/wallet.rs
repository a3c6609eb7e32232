//! Wallet composition: keys, shared chain/pool state, funding and fee bumps.
//!
//! The [`Wallet`] owns one [`WalletState`] (chain index, pool, ledger and
//! replacement links) behind a single `RwLock`, so every read sees a
//! consistent snapshot and every mutation is applied as one unit. Fee bumps
//! additionally take a per-txid lock: two bumps of the same transaction run
//! one after the other, bumps of different transactions run side by side.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use rbf_core::chain_state::ChainIndex;
use rbf_core::error::{BroadcastError, ChainStateError, TransactionError};
use rbf_core::fee::FeeRate;
use rbf_core::mempool::Mempool;
use rbf_core::traits::{Broadcaster, FeePolicy, Signer};
use rbf_core::types::{Block, Hash256, OutPoint, Transaction, TxOutput};

use crate::builder::{Recipient, TransactionBuilder};
use crate::bump::{self, BumpResult, ChangePolicy, FeeBumper};
use crate::coin_selection::WalletCoin;
use crate::config::WalletConfig;
use crate::conflicts::ConflictTracker;
use crate::error::{BumpError, WalletError};
use crate::fee::FeeSettings;
use crate::keys::{KeyChain, KeyChainSigner, KeyPurpose, Seed};
use crate::ledger::{Balance, Ledger, StateView};
use crate::projector::{Projector, WalletTransaction};

/// Everything a bump reads or writes, guarded together.
pub struct WalletState {
    pub chain: ChainIndex,
    pub pool: Mempool,
    pub ledger: Ledger,
    pub conflicts: ConflictTracker,
}

impl WalletState {
    pub fn new(config: &WalletConfig) -> Self {
        Self {
            chain: ChainIndex::new(),
            pool: Mempool::new(config.max_pool_count, config.max_pool_bytes)
                .with_min_relay_fee(FeeRate::per_kb(config.min_relay_fee)),
            ledger: Ledger::new(),
            conflicts: ConflictTracker::new(),
        }
    }

    pub fn view(&self) -> StateView<'_> {
        StateView {
            chain: &self.chain,
            pool: &self.pool,
            conflicts: &self.conflicts,
        }
    }

    /// Output spent by `outpoint` if it is unspent in the chain or created
    /// by a pool transaction.
    fn available_output(&self, outpoint: &OutPoint) -> Option<TxOutput> {
        if let Some(utxo) = self.chain.get_utxo(outpoint) {
            return Some(utxo.output.clone());
        }
        self.pool
            .get(&outpoint.txid)
            .and_then(|entry| entry.tx.outputs.get(outpoint.index as usize))
            .cloned()
    }

    /// Fee of `tx` against currently available outputs.
    fn input_fee(&self, tx: &Transaction) -> Result<u64, WalletError> {
        let mut inputs: u64 = 0;
        for op in tx.spent_outpoints() {
            let prevout = self
                .available_output(op)
                .ok_or_else(|| WalletError::MissingInput(op.clone()))?;
            inputs = inputs
                .checked_add(prevout.value)
                .ok_or(TransactionError::ValueOverflow)?;
        }
        let outputs = tx
            .total_output_value()
            .ok_or(TransactionError::ValueOverflow)?;
        inputs
            .checked_sub(outputs)
            .ok_or_else(|| TransactionError::NegativeFee { inputs, outputs }.into())
    }
}

/// Broadcaster that accepts everything. Used until a real one is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBroadcaster;

impl Broadcaster for NoopBroadcaster {
    fn broadcast_transaction(&self, _tx: &Transaction) -> Result<(), BroadcastError> {
        Ok(())
    }
}

/// A funded and signed transaction not yet submitted.
#[derive(Debug, Clone)]
pub struct FundedTransaction {
    pub tx: Transaction,
    pub txid: Hash256,
    pub fee: u64,
    pub change_index: Option<usize>,
}

/// Result of [`Wallet::sign_transaction`].
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub tx: Transaction,
    /// Every input carries a signature.
    pub complete: bool,
}

/// Per-txid mutual exclusion for fee bumps.
#[derive(Default)]
struct TxLocks {
    locks: Mutex<HashMap<Hash256, Arc<Mutex<()>>>>,
}

impl TxLocks {
    fn lock_for(&self, txid: &Hash256) -> Arc<Mutex<()>> {
        self.locks.lock().entry(*txid).or_default().clone()
    }

    /// Give back a lock from [`Self::lock_for`], forgetting the txid once
    /// no other caller holds it.
    fn release(&self, txid: &Hash256, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock();
        drop(lock);
        if locks.get(txid).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(txid);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

pub struct Wallet {
    config: WalletConfig,
    state: RwLock<WalletState>,
    keychain: Arc<RwLock<KeyChain>>,
    signer: Arc<dyn Signer>,
    broadcaster: Arc<dyn Broadcaster>,
    fees: Arc<FeeSettings>,
    policy: Arc<dyn FeePolicy>,
    tx_locks: TxLocks,
}

impl Wallet {
    /// Create a wallet from `seed`, signing with its own keychain and
    /// paying rates from [`FeeSettings`] built out of `config`.
    pub fn new(config: WalletConfig, seed: Seed) -> Result<Self, WalletError> {
        config.validate()?;
        let keychain = Arc::new(RwLock::new(KeyChain::new(seed)));
        let fees = Arc::new(FeeSettings::from_config(&config));
        Ok(Self {
            state: RwLock::new(WalletState::new(&config)),
            signer: Arc::new(KeyChainSigner::new(keychain.clone())),
            broadcaster: Arc::new(NoopBroadcaster),
            policy: fees.clone(),
            fees,
            keychain,
            config,
            tx_locks: TxLocks::default(),
        })
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = signer;
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    /// Replace the fee policy. [`Wallet::set_pay_tx_fee`] only affects the
    /// built-in [`FeeSettings`].
    pub fn with_fee_policy(mut self, policy: Arc<dyn FeePolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn fee_settings(&self) -> &FeeSettings {
        &self.fees
    }

    /// Set the explicit fee rate. Zero unsets it.
    pub fn set_pay_tx_fee(&self, rate: FeeRate) {
        self.fees.set_pay_tx_fee(rate);
    }

    fn change_policy(&self) -> ChangePolicy {
        ChangePolicy {
            dust_threshold: self.config.dust_threshold,
            min_change_value: self.config.min_change_value,
        }
    }

    // --- Keys ---

    /// Derive the next receive key and start tracking outputs paying it.
    pub fn next_address(&self) -> Hash256 {
        self.derive(KeyPurpose::Receive)
    }

    pub fn next_change_address(&self) -> Hash256 {
        self.derive(KeyPurpose::Change)
    }

    fn derive(&self, purpose: KeyPurpose) -> Hash256 {
        let pkh = self.keychain.write().next_pubkey_hash(purpose);
        self.state.write().ledger.watch(pkh, purpose);
        pkh
    }

    // --- Funding ---

    /// Select coins, add change and sign. Nothing is submitted.
    pub fn create_transaction(
        &self,
        recipients: &[Recipient],
    ) -> Result<FundedTransaction, WalletError> {
        let coins = self.list_spendable(0);
        let change = self.next_change_address();

        let mut builder = TransactionBuilder::new();
        builder
            .set_fee_rate(self.policy.fee_rate())
            .set_rbf(self.config.wallet_rbf)
            .set_dust_threshold(self.config.dust_threshold);
        for r in recipients {
            builder.add_recipient(r.pubkey_hash, r.amount);
        }
        let unsigned = builder.build(&coins, change)?;
        let fee = unsigned.fee;
        let change_index = unsigned.change_index;
        let tx = TransactionBuilder::sign(unsigned, self.signer.as_ref())?;
        let txid = tx.txid()?;
        debug!(%txid, fee, "funded transaction");
        Ok(FundedTransaction {
            tx,
            txid,
            fee,
            change_index,
        })
    }

    /// Fund, sign and submit a payment.
    pub fn send(&self, recipients: &[Recipient]) -> Result<Hash256, WalletError> {
        let funded = self.create_transaction(recipients)?;
        self.submit_transaction(funded.tx)
    }

    // --- Raw transactions ---

    /// Sign every input whose prevout the signer holds a key for. Inputs
    /// spending other outputs are left as they are.
    pub fn sign_transaction(&self, mut tx: Transaction) -> Result<SignedTransaction, WalletError> {
        let prevouts: Vec<Option<TxOutput>> = {
            let state = self.state.read();
            tx.spent_outpoints()
                .map(|op| {
                    state
                        .ledger
                        .prevout(op, &state.chain)
                        .or_else(|| state.available_output(op))
                })
                .collect()
        };
        for (index, prevout) in prevouts.iter().enumerate() {
            if let Some(prevout) = prevout.as_ref().filter(|p| self.signer.can_sign(p)) {
                self.signer.sign_input(&mut tx, index, prevout)?;
            }
        }
        let complete = tx.inputs.iter().all(|i| !i.signature.is_empty());
        Ok(SignedTransaction { tx, complete })
    }

    /// Validate inputs against the chain and pool, accept into the pool and
    /// record the transaction if it concerns the wallet.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<Hash256, WalletError> {
        let txid = {
            let mut state = self.state.write();
            let fee = state.input_fee(&tx)?;
            let txid = state.pool.accept(tx.clone(), fee)?;
            if state.ledger.is_relevant(&tx, &state.chain) {
                state.ledger.add(tx.clone(), Some(fee))?;
            }
            info!(%txid, fee, "transaction accepted");
            txid
        };
        self.broadcast(&tx, &txid);
        Ok(txid)
    }

    fn broadcast(&self, tx: &Transaction, txid: &Hash256) {
        if let Err(e) = self.broadcaster.broadcast_transaction(tx) {
            warn!(%txid, error = %e, "broadcast failed");
        }
    }

    // --- Fee bumping ---

    /// Replace `txid` with a higher-fee version that pays from its change.
    ///
    /// `total_fee` is the absolute fee of the replacement; `None` uses the
    /// fee policy. The replacement is committed before it is broadcast, and
    /// a broadcast failure is only logged.
    pub fn bump_fee(
        &self,
        txid: &Hash256,
        total_fee: Option<u64>,
    ) -> Result<BumpResult, BumpError> {
        let lock = self.tx_locks.lock_for(txid);
        let result = {
            let _guard = lock.lock();
            self.bump_fee_locked(txid, total_fee)
        };
        self.tx_locks.release(txid, lock);
        result
    }

    fn bump_fee_locked(
        &self,
        txid: &Hash256,
        total_fee: Option<u64>,
    ) -> Result<BumpResult, BumpError> {
        let plan = {
            let state = self.state.read();
            FeeBumper::new(
                &state.ledger,
                state.view(),
                self.policy.as_ref(),
                self.signer.as_ref(),
                self.change_policy(),
            )
            .plan(txid, total_fee)?
        };
        let result = {
            let mut state = self.state.write();
            bump::commit(&mut state, &plan)?
        };
        self.broadcast(&plan.tx, &plan.txid);
        Ok(result)
    }

    // --- Views ---

    pub fn list_spendable(&self, min_conf: u64) -> Vec<WalletCoin> {
        let state = self.state.read();
        state.ledger.list_spendable(min_conf, state.view())
    }

    pub fn balance(&self) -> Balance {
        let state = self.state.read();
        state.ledger.balance(state.view())
    }

    pub fn get_transaction(&self, txid: &Hash256) -> Result<WalletTransaction, WalletError> {
        let state = self.state.read();
        Projector::new(&state.ledger, state.view())
            .transaction(txid)
            .ok_or(WalletError::UnknownTransaction(*txid))
    }

    pub fn list_transactions(&self) -> Vec<WalletTransaction> {
        let state = self.state.read();
        Projector::new(&state.ledger, state.view()).transactions()
    }

    pub fn in_pool(&self, txid: &Hash256) -> bool {
        self.state.read().pool.contains(txid)
    }

    pub fn pool_len(&self) -> usize {
        self.state.read().pool.len()
    }

    /// `(height, hash)` of the chain tip.
    pub fn tip(&self) -> (u64, Hash256) {
        self.state.read().chain.tip()
    }

    /// Run `f` against a consistent snapshot of the shared state.
    pub fn with_state<R>(&self, f: impl FnOnce(&WalletState) -> R) -> R {
        f(&self.state.read())
    }

    // --- Block notifications ---

    /// Connect `block`. Confirmed transactions and their conflicts leave the
    /// pool. A block already connected is ignored.
    pub fn block_connected(&self, block: &Block) -> Result<(), WalletError> {
        let mut state = self.state.write();
        let hash = block.hash();
        if state.chain.contains_block(&hash) {
            debug!(%hash, "block already connected");
            return Ok(());
        }

        state.chain.connect_block(block)?;
        let dropped = state.pool.remove_confirmed_block(block);
        for tx in &block.transactions {
            if state.ledger.is_relevant(tx, &state.chain) {
                let fee = state.ledger.compute_fee(tx, &state.chain);
                state.ledger.add(tx.clone(), fee)?;
            }
        }
        info!(
            %hash,
            height = block.header.height,
            txs = block.transactions.len(),
            conflicts_dropped = dropped.len(),
            "block connected"
        );
        Ok(())
    }

    /// Disconnect the tip block `hash` and return its transactions to the
    /// pool where they do not conflict. An unknown block is ignored.
    pub fn block_disconnected(&self, hash: &Hash256) -> Result<(), WalletError> {
        let mut state = self.state.write();
        if !state.chain.contains_block(hash) {
            debug!(%hash, "block not connected");
            return Ok(());
        }
        let (_, tip) = state.chain.tip();
        if tip != *hash {
            return Err(ChainStateError::NotTip {
                hash: hash.to_string(),
            }
            .into());
        }

        let block = state.chain.disconnect_tip()?;
        let mut restored = 0usize;
        for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
            if state.pool.has_conflict(tx) {
                continue;
            }
            let readded = state
                .input_fee(tx)
                .and_then(|fee| state.pool.accept(tx.clone(), fee).map_err(WalletError::from));
            match readded {
                Ok(_) => restored += 1,
                Err(e) => debug!(error = %e, "transaction not returned to pool"),
            }
        }
        info!(%hash, height = block.header.height, restored, "block disconnected");
        Ok(())
    }
}
