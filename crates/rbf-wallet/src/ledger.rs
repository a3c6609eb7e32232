//! Coin ledger: wallet-owned keys, wallet transactions and coin states.
//!
//! The ledger stores only facts that never change (which keys are ours,
//! which transactions touched them). Coin states are derived on demand from
//! the chain, the pool and the replacement links, so a reorg or a bump
//! never leaves a stale state behind.

use std::collections::HashMap;

use rbf_core::chain_state::ChainIndex;
use rbf_core::error::TransactionError;
use rbf_core::mempool::Mempool;
use rbf_core::types::{Hash256, OutPoint, Transaction, TxOutput};

use crate::coin_selection::WalletCoin;
use crate::conflicts::ConflictTracker;
use crate::keys::KeyPurpose;

/// Borrowed view of the shared state a ledger query needs.
#[derive(Clone, Copy)]
pub struct StateView<'a> {
    pub chain: &'a ChainIndex,
    pub pool: &'a Mempool,
    pub conflicts: &'a ConflictTracker,
}

/// Derived state of a wallet coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoinState {
    /// Created by a pool transaction that has not been replaced.
    Pending,
    /// Created by an unconfirmed transaction that was replaced or dropped
    /// from the pool.
    Superseded,
    Confirmed,
    /// Consumed by a pool or confirmed transaction.
    Spent,
}

/// A transaction that pays to or spends from the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletTx {
    pub tx: Transaction,
    pub txid: Hash256,
    /// Known when every input's prevout was known at insertion.
    pub fee: Option<u64>,
    /// Insertion order, for stable listing.
    pub order: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Balance {
    /// Confirmed, unspent.
    pub confirmed: u64,
    /// Unconfirmed but spendable at zero confirmations.
    pub pending: u64,
    /// Unconfirmed coins of superseded transactions and of replacements.
    pub excluded: u64,
}

impl Balance {
    /// Spendable total: confirmed plus pending.
    pub fn available(&self) -> u64 {
        self.confirmed.saturating_add(self.pending)
    }
}

#[derive(Debug, Default)]
pub struct Ledger {
    owned: HashMap<Hash256, KeyPurpose>,
    txs: HashMap<Hash256, WalletTx>,
    next_order: u64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark outputs paying `pubkey_hash` as the wallet's.
    pub fn watch(&mut self, pubkey_hash: Hash256, purpose: KeyPurpose) {
        self.owned.insert(pubkey_hash, purpose);
    }

    pub fn purpose_of(&self, pubkey_hash: &Hash256) -> Option<KeyPurpose> {
        self.owned.get(pubkey_hash).copied()
    }

    pub fn is_mine(&self, output: &TxOutput) -> bool {
        self.owned.contains_key(&output.pubkey_hash)
    }

    pub fn is_change(&self, output: &TxOutput) -> bool {
        self.purpose_of(&output.pubkey_hash) == Some(KeyPurpose::Change)
    }

    /// Output spent by `outpoint`, looked up in wallet transactions and then
    /// in the confirmed chain.
    pub fn prevout(&self, outpoint: &OutPoint, chain: &ChainIndex) -> Option<TxOutput> {
        self.txs
            .get(&outpoint.txid)
            .and_then(|w| w.tx.outputs.get(outpoint.index as usize))
            .or_else(|| chain.output(outpoint))
            .cloned()
    }

    /// Whether `outpoint` spends an output owned by the wallet.
    pub fn owns_input(&self, outpoint: &OutPoint, chain: &ChainIndex) -> bool {
        self.prevout(outpoint, chain)
            .is_some_and(|out| self.is_mine(&out))
    }

    /// Whether `tx` pays the wallet or spends one of its coins.
    pub fn is_relevant(&self, tx: &Transaction, chain: &ChainIndex) -> bool {
        tx.outputs.iter().any(|o| self.is_mine(o))
            || tx.spent_outpoints().any(|op| self.owns_input(op, chain))
    }

    /// `sum(prevouts) - sum(outputs)` when every prevout is known.
    pub fn compute_fee(&self, tx: &Transaction, chain: &ChainIndex) -> Option<u64> {
        if tx.is_coinbase() {
            return None;
        }
        let mut input_total: u64 = 0;
        for op in tx.spent_outpoints() {
            input_total = input_total.checked_add(self.prevout(op, chain)?.value)?;
        }
        input_total.checked_sub(tx.total_output_value()?)
    }

    /// Record `tx`. Re-adding a known transaction only fills in a missing fee.
    pub fn add(&mut self, tx: Transaction, fee: Option<u64>) -> Result<Hash256, TransactionError> {
        let txid = tx.txid()?;
        if let Some(existing) = self.txs.get_mut(&txid) {
            if existing.fee.is_none() {
                existing.fee = fee;
            }
            return Ok(txid);
        }
        let order = self.next_order;
        self.next_order += 1;
        self.txs.insert(txid, WalletTx { tx, txid, fee, order });
        Ok(txid)
    }

    pub fn get(&self, txid: &Hash256) -> Option<&WalletTx> {
        self.txs.get(txid)
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.txs.contains_key(txid)
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// Wallet transactions in insertion order.
    pub fn transactions(&self) -> Vec<&WalletTx> {
        let mut all: Vec<&WalletTx> = self.txs.values().collect();
        all.sort_by_key(|w| w.order);
        all
    }

    /// State of the coins created by `txid`, ignoring whether they were spent.
    pub fn tx_state(&self, txid: &Hash256, view: StateView<'_>) -> CoinState {
        if view.chain.is_confirmed(txid) {
            CoinState::Confirmed
        } else if view.conflicts.replacement_of(txid).is_some() || !view.pool.contains(txid) {
            CoinState::Superseded
        } else {
            CoinState::Pending
        }
    }

    /// State of a single coin. `None` if the output is unknown or not ours.
    pub fn coin_state(&self, outpoint: &OutPoint, view: StateView<'_>) -> Option<CoinState> {
        let wtx = self.txs.get(&outpoint.txid)?;
        let output = wtx.tx.outputs.get(outpoint.index as usize)?;
        if !self.is_mine(output) {
            return None;
        }
        if view.pool.spender_of(outpoint).is_some() || view.chain.spender_of(outpoint).is_some() {
            return Some(CoinState::Spent);
        }
        Some(self.tx_state(&outpoint.txid, view))
    }

    /// Every unspent wallet coin with its state.
    pub fn coins(&self, view: StateView<'_>) -> Vec<(WalletCoin, CoinState)> {
        let mut out = Vec::new();
        for wtx in self.transactions() {
            let confirmations = view.chain.confirmations(&wtx.txid).unwrap_or(0);
            for (index, output) in wtx.tx.outputs.iter().enumerate() {
                let outpoint = OutPoint::new(wtx.txid, index as u64);
                match self.coin_state(&outpoint, view) {
                    None | Some(CoinState::Spent) => {}
                    Some(state) => out.push((
                        WalletCoin {
                            outpoint,
                            output: output.clone(),
                            confirmations,
                        },
                        state,
                    )),
                }
            }
        }
        out
    }

    /// Whether an unspent coin in `state`, created by `txid`, may be spent.
    fn spendable(
        &self,
        txid: &Hash256,
        state: CoinState,
        confirmations: u64,
        min_conf: u64,
        view: StateView<'_>,
    ) -> bool {
        match state {
            CoinState::Confirmed => confirmations >= min_conf,
            CoinState::Pending => min_conf == 0 && view.conflicts.original_of(txid).is_none(),
            CoinState::Superseded | CoinState::Spent => false,
        }
    }

    /// Coins confirmed at least `min_conf` deep, plus (at `min_conf == 0`)
    /// pending coins of transactions that are not themselves replacements.
    pub fn list_spendable(&self, min_conf: u64, view: StateView<'_>) -> Vec<WalletCoin> {
        self.coins(view)
            .into_iter()
            .filter(|(coin, state)| {
                self.spendable(&coin.outpoint.txid, *state, coin.confirmations, min_conf, view)
            })
            .map(|(coin, _)| coin)
            .collect()
    }

    pub fn balance(&self, view: StateView<'_>) -> Balance {
        let mut balance = Balance::default();
        for (coin, state) in self.coins(view) {
            let value = coin.value();
            if self.spendable(&coin.outpoint.txid, state, coin.confirmations, 0, view) {
                match state {
                    CoinState::Confirmed => {
                        balance.confirmed = balance.confirmed.saturating_add(value)
                    }
                    _ => balance.pending = balance.pending.saturating_add(value),
                }
            } else {
                balance.excluded = balance.excluded.saturating_add(value);
            }
        }
        balance
    }
}
