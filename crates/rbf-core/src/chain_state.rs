//! In-memory index of the confirmed chain.
//!
//! [`ChainIndex`] tracks the UTXO set, the confirmed transactions and which
//! transaction spent each confirmed outpoint. Blocks are assumed valid; the
//! index only checks that each block extends the current tip and that every
//! spent output exists. Undo data is stored per block so the tip can be
//! disconnected during a reorg.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{ChainStateError, CoreError};
use crate::types::{Block, Hash256, OutPoint, Transaction, TxOutput, UtxoEntry};

/// Result of connecting a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectBlockResult {
    pub utxos_created: usize,
    pub utxos_spent: usize,
}

/// A transaction confirmed in the active chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmedTx {
    pub tx: Transaction,
    pub block_hash: Hash256,
    pub height: u64,
}

/// Spent UTXOs in consumption order, for reverting a block.
#[derive(Clone, Debug, Default)]
struct BlockUndo {
    spent_utxos: Vec<(OutPoint, UtxoEntry)>,
}

/// Confirmed chain state. Not thread-safe; wrap in a lock for shared use.
#[derive(Debug, Default)]
pub struct ChainIndex {
    utxos: HashMap<OutPoint, UtxoEntry>,
    blocks: HashMap<Hash256, Block>,
    undo_data: HashMap<Hash256, BlockUndo>,
    /// Confirmed txid → location.
    transactions: HashMap<Hash256, ConfirmedTx>,
    /// Confirmed outpoint → txid of the confirmed transaction spending it.
    spenders: HashMap<OutPoint, Hash256>,
    tip_height: u64,
    /// `Hash256::ZERO` means no blocks connected.
    tip_hash: Hash256,
}

impl ChainIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect `block` on top of the current tip.
    ///
    /// The first block may sit at any height but must have a zero parent.
    /// On error the index is left unchanged.
    pub fn connect_block(&mut self, block: &Block) -> Result<ConnectBlockResult, CoreError> {
        let block_hash = block.hash();
        let height = block.header.height;

        if block.header.prev_hash != self.tip_hash {
            return Err(ChainStateError::NotOnTip {
                expected: self.tip_hash.to_string(),
                got: block.header.prev_hash.to_string(),
            }
            .into());
        }
        if !self.is_empty() && height != self.tip_height + 1 {
            return Err(ChainStateError::NotOnTip {
                expected: format!("height {}", self.tip_height + 1),
                got: format!("height {height}"),
            }
            .into());
        }

        let txids = block.txids()?;
        let mut undo = BlockUndo::default();
        let mut created = Vec::new();

        if let Err(e) = self.apply_transactions(block, &txids, height, &mut undo, &mut created) {
            self.restore_spent(undo);
            self.revert_outputs(&created);
            return Err(e);
        }

        for (tx, txid) in block.transactions.iter().zip(&txids) {
            for op in tx.spent_outpoints() {
                self.spenders.insert(op.clone(), *txid);
            }
            self.transactions.insert(
                *txid,
                ConfirmedTx {
                    tx: tx.clone(),
                    block_hash,
                    height,
                },
            );
        }

        let result = ConnectBlockResult {
            utxos_created: created.len(),
            utxos_spent: undo.spent_utxos.len(),
        };
        self.blocks.insert(block_hash, block.clone());
        self.undo_data.insert(block_hash, undo);
        self.tip_height = height;
        self.tip_hash = block_hash;

        debug!(%block_hash, height, txs = txids.len(), "connected block");
        Ok(result)
    }

    fn apply_transactions(
        &mut self,
        block: &Block,
        txids: &[Hash256],
        height: u64,
        undo: &mut BlockUndo,
        created: &mut Vec<OutPoint>,
    ) -> Result<(), CoreError> {
        for (tx, txid) in block.transactions.iter().zip(txids) {
            for op in tx.spent_outpoints() {
                let entry = self
                    .utxos
                    .remove(op)
                    .ok_or_else(|| ChainStateError::MissingUtxo(op.to_string()))?;
                undo.spent_utxos.push((op.clone(), entry));
            }
            let is_coinbase = tx.is_coinbase();
            for (index, output) in tx.outputs.iter().enumerate() {
                let outpoint = OutPoint::new(*txid, index as u64);
                self.utxos.insert(
                    outpoint.clone(),
                    UtxoEntry {
                        output: output.clone(),
                        block_height: height,
                        is_coinbase,
                    },
                );
                created.push(outpoint);
            }
        }
        Ok(())
    }

    /// Must run after [`Self::restore_spent`] so outputs created and spent
    /// within the same block do not come back.
    fn revert_outputs(&mut self, created: &[OutPoint]) {
        for op in created {
            self.utxos.remove(op);
        }
    }

    fn restore_spent(&mut self, undo: BlockUndo) {
        for (outpoint, entry) in undo.spent_utxos {
            self.utxos.insert(outpoint, entry);
        }
    }

    /// Disconnect the tip block and return it.
    pub fn disconnect_tip(&mut self) -> Result<Block, CoreError> {
        if self.is_empty() {
            return Err(ChainStateError::BlockNotFound("empty chain".to_string()).into());
        }
        let tip_hash = self.tip_hash;
        let block = self
            .blocks
            .remove(&tip_hash)
            .ok_or_else(|| ChainStateError::BlockNotFound(tip_hash.to_string()))?;
        let undo = self.undo_data.remove(&tip_hash).unwrap_or_default();

        let txids = block.txids()?;
        let mut created = Vec::new();
        for (tx, txid) in block.transactions.iter().zip(&txids).rev() {
            for index in 0..tx.outputs.len() {
                created.push(OutPoint::new(*txid, index as u64));
            }
            for op in tx.spent_outpoints() {
                self.spenders.remove(op);
            }
            self.transactions.remove(txid);
        }
        self.restore_spent(undo);
        self.revert_outputs(&created);

        if block.header.prev_hash.is_zero() {
            self.tip_height = 0;
            self.tip_hash = Hash256::ZERO;
        } else {
            self.tip_height = block.header.height.saturating_sub(1);
            self.tip_hash = block.header.prev_hash;
        }

        debug!(block_hash = %tip_hash, height = block.header.height, "disconnected block");
        Ok(block)
    }

    /// `(height, hash)` of the tip. `(0, ZERO)` when empty.
    pub fn tip(&self) -> (u64, Hash256) {
        (self.tip_height, self.tip_hash)
    }

    pub fn is_empty(&self) -> bool {
        self.tip_hash.is_zero()
    }

    pub fn contains_block(&self, hash: &Hash256) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn get_utxo(&self, outpoint: &OutPoint) -> Option<&UtxoEntry> {
        self.utxos.get(outpoint)
    }

    pub fn utxo_count(&self) -> usize {
        self.utxos.len()
    }

    pub fn get_transaction(&self, txid: &Hash256) -> Option<&ConfirmedTx> {
        self.transactions.get(txid)
    }

    pub fn is_confirmed(&self, txid: &Hash256) -> bool {
        self.transactions.contains_key(txid)
    }

    /// Depth of `txid` below (and including) the tip. `None` if unconfirmed.
    pub fn confirmations(&self, txid: &Hash256) -> Option<u64> {
        self.transactions
            .get(txid)
            .map(|c| self.tip_height.saturating_sub(c.height) + 1)
    }

    /// The confirmed transaction spending `outpoint`, if any.
    pub fn spender_of(&self, outpoint: &OutPoint) -> Option<Hash256> {
        self.spenders.get(outpoint).copied()
    }

    /// Output referenced by `outpoint` if its transaction is confirmed,
    /// whether or not it has since been spent.
    pub fn output(&self, outpoint: &OutPoint) -> Option<&TxOutput> {
        self.transactions
            .get(&outpoint.txid)
            .and_then(|c| c.tx.outputs.get(outpoint.index as usize))
    }
}
