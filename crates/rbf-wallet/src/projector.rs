//! Derived views of wallet transactions.
//!
//! Nothing here is stored: every view is recomputed from the ledger, the
//! chain, the pool and the replacement links each time it is asked for.

use std::collections::HashSet;

use rbf_core::types::{Hash256, OutPoint, Transaction};

use crate::ledger::{Ledger, StateView};

/// Externally visible metadata of one wallet transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletTransaction {
    pub txid: Hash256,
    /// Net effect on the wallet, excluding the fee when the fee is known.
    pub amount: i64,
    /// Present when every input spends a wallet coin.
    pub fee: Option<u64>,
    /// Depth in the chain. Negative when a conflicting transaction is
    /// confirmed instead, zero while pending.
    pub confirmations: i64,
    pub block_hash: Option<Hash256>,
    /// Transaction this one superseded through a fee bump.
    pub replaces_txid: Option<Hash256>,
    /// Replacement that superseded this one.
    pub replaced_by_txid: Option<Hash256>,
    /// Other pool or chain transactions spending one of the same inputs.
    pub walletconflicts: Vec<Hash256>,
    pub bip125_replaceable: bool,
    pub in_pool: bool,
}

pub struct Projector<'a> {
    ledger: &'a Ledger,
    view: StateView<'a>,
}

impl<'a> Projector<'a> {
    pub fn new(ledger: &'a Ledger, view: StateView<'a>) -> Self {
        Self { ledger, view }
    }

    pub fn transaction(&self, txid: &Hash256) -> Option<WalletTransaction> {
        let wtx = self.ledger.get(txid)?;
        let tx = &wtx.tx;
        let chain = self.view.chain;

        let all_inputs_mine = !tx.is_coinbase()
            && tx
                .spent_outpoints()
                .all(|op| self.ledger.owns_input(op, chain));
        let fee = if all_inputs_mine {
            wtx.fee.or_else(|| self.ledger.compute_fee(tx, chain))
        } else {
            None
        };

        let credit: u64 = tx
            .outputs
            .iter()
            .filter(|o| self.ledger.is_mine(o))
            .map(|o| o.value)
            .sum();
        let debit: u64 = tx
            .spent_outpoints()
            .filter_map(|op| self.ledger.prevout(op, chain))
            .filter(|o| self.ledger.is_mine(o))
            .map(|o| o.value)
            .sum();
        let amount = signed(credit)
            .saturating_sub(signed(debit))
            .saturating_add(signed(fee.unwrap_or(0)));

        let walletconflicts = self.conflicts_of(tx, txid);
        let confirmed = chain.get_transaction(txid);
        let confirmations = match chain.confirmations(txid) {
            Some(depth) => signed(depth),
            None => -signed(self.confirmed_conflict_depth(&walletconflicts)),
        };

        Some(WalletTransaction {
            txid: *txid,
            amount,
            fee,
            confirmations,
            block_hash: confirmed.map(|c| c.block_hash),
            replaces_txid: self.view.conflicts.original_of(txid),
            replaced_by_txid: self.view.conflicts.replacement_of(txid),
            walletconflicts,
            bip125_replaceable: confirmed.is_none()
                && confirmations == 0
                && tx.signals_rbf(),
            in_pool: self.view.pool.contains(txid),
        })
    }

    /// Every wallet transaction, oldest first.
    pub fn transactions(&self) -> Vec<WalletTransaction> {
        self.ledger
            .transactions()
            .into_iter()
            .filter_map(|w| self.transaction(&w.txid))
            .collect()
    }

    /// Pool entries and confirmed transactions sharing an input with `tx`.
    fn conflicts_of(&self, tx: &Transaction, txid: &Hash256) -> Vec<Hash256> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for op in tx.spent_outpoints() {
            for spender in self.spenders(op) {
                if spender != *txid && seen.insert(spender) {
                    out.push(spender);
                }
            }
        }
        out
    }

    fn spenders(&self, outpoint: &OutPoint) -> impl Iterator<Item = Hash256> {
        self.view
            .pool
            .spender_of(outpoint)
            .into_iter()
            .chain(self.view.chain.spender_of(outpoint))
    }

    fn confirmed_conflict_depth(&self, conflicts: &[Hash256]) -> u64 {
        conflicts
            .iter()
            .filter_map(|c| self.view.chain.confirmations(c))
            .max()
            .unwrap_or(0)
    }
}

fn signed(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
