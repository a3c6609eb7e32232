//! In-memory pool of unconfirmed transactions with opt-in replacement.
//!
//! The pool provides:
//! - O(1) lookup by txid
//! - O(1) conflict detection via a spent-outpoint index
//! - descendant discovery through the same index
//! - fee-rate ordering for lowest-priority eviction when full
//! - BIP125-style replacement: a transaction conflicting with pool entries
//!   is accepted only if every entry it displaces signals replaceability and
//!   it pays strictly more than all of them together
//!
//! Signatures are assumed to be validated by the caller; the pool checks
//! structure, duplicates, conflicts, the minimum relay fee and its size
//! limits.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::constants::{DEFAULT_MIN_RELAY_FEE, MAX_INPUTS, MAX_OUTPUTS, MAX_TX_SIZE};
use crate::error::{MempoolError, TransactionError};
use crate::fee::FeeRate;
use crate::types::{Block, Hash256, OutPoint, Transaction};

pub const DEFAULT_MAX_COUNT: usize = 5_000;

/// Default maximum total serialized bytes (5 MiB).
pub const DEFAULT_MAX_BYTES: usize = 5 * 1024 * 1024;

/// Fee rate is stored as `fee * FEE_RATE_PRECISION / size` for ordering.
const FEE_RATE_PRECISION: u128 = 1_000;

fn compute_fee_rate(fee: u64, size: usize) -> u64 {
    if size == 0 {
        return u64::MAX;
    }
    let rate = (fee as u128) * FEE_RATE_PRECISION / (size as u128);
    rate.min(u64::MAX as u128) as u64
}

/// A transaction stored in the pool with precomputed metadata.
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub txid: Hash256,
    /// `sum(inputs) - sum(outputs)`.
    pub fee: u64,
    /// Serialized size in bytes.
    pub size: usize,
    fee_rate: u64,
}

impl MempoolEntry {
    /// Fee rate in milli-units per byte.
    pub fn fee_rate(&self) -> u64 {
        self.fee_rate
    }

    pub fn signals_rbf(&self) -> bool {
        self.tx.signals_rbf()
    }
}

/// Txid, encoding size and fee rate computed from a single serialization.
struct Prepared {
    txid: Hash256,
    size: usize,
    fee_rate: u64,
}

/// Pool of unconfirmed transactions.
///
/// Not thread-safe; callers wrap it in a lock.
pub struct Mempool {
    entries: HashMap<Hash256, MempoolEntry>,
    /// Spent outpoint → txid of the pool transaction spending it.
    by_outpoint: HashMap<OutPoint, Hash256>,
    /// `(fee_rate, txid)`, lowest first.
    by_fee_rate: BTreeSet<(u64, Hash256)>,
    max_count: usize,
    max_bytes: usize,
    total_bytes: usize,
    min_relay_fee: FeeRate,
}

impl Mempool {
    pub fn new(max_count: usize, max_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            by_outpoint: HashMap::new(),
            by_fee_rate: BTreeSet::new(),
            max_count,
            max_bytes,
            total_bytes: 0,
            min_relay_fee: FeeRate::per_kb(DEFAULT_MIN_RELAY_FEE),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_MAX_COUNT, DEFAULT_MAX_BYTES)
    }

    /// Set the minimum fee rate for admission.
    pub fn with_min_relay_fee(mut self, rate: FeeRate) -> Self {
        self.min_relay_fee = rate;
        self
    }

    fn prepare(&self, tx: &Transaction, fee: u64) -> Result<Prepared, MempoolError> {
        let encoded = tx
            .encode()
            .map_err(|e| MempoolError::Internal(e.to_string()))?;
        let txid = Hash256(blake3::hash(&encoded).into());
        let size = encoded.len();
        check_structure(tx, size)?;

        if self.entries.contains_key(&txid) {
            return Err(MempoolError::AlreadyExists(txid.to_string()));
        }
        let minimum = self.min_relay_fee.fee_for(size);
        if fee < minimum {
            return Err(MempoolError::FeeTooLow { fee, minimum });
        }
        Ok(Prepared {
            txid,
            size,
            fee_rate: compute_fee_rate(fee, size),
        })
    }

    /// Admit `tx` paying `fee`.
    ///
    /// Without conflicts this is a plain insert. If `tx` spends an outpoint
    /// already spent by pool entries, every such entry must signal
    /// replaceability and `fee` must strictly exceed the combined fee of
    /// those entries and their descendants, all of which are evicted.
    pub fn accept(&mut self, tx: Transaction, fee: u64) -> Result<Hash256, MempoolError> {
        let prepared = self.prepare(&tx, fee)?;
        let conflicts = self.conflicting_txids(&tx);
        if conflicts.is_empty() {
            return self.insert_prepared(tx, fee, prepared);
        }

        for existing in &conflicts {
            let entry = self.entry(existing)?;
            if !entry.signals_rbf() {
                let outpoint = tx
                    .inputs
                    .iter()
                    .find(|i| self.by_outpoint.get(&i.previous_output) == Some(existing))
                    .map(|i| i.previous_output.to_string())
                    .unwrap_or_default();
                return Err(MempoolError::NonReplaceableConflict {
                    new_txid: prepared.txid.to_string(),
                    existing_txid: existing.to_string(),
                    outpoint,
                });
            }
        }

        let replaced = self.with_descendants(&conflicts);
        self.check_replacement(&tx, fee, &prepared, &replaced)?;
        let evicted = self.remove_all(&replaced);
        debug!(txid = %prepared.txid, fee, evicted = evicted.len(), "replacement accepted");
        self.insert_prepared(tx, fee, prepared)
    }

    /// Atomically replace `original` and its in-pool descendants with `tx`.
    ///
    /// All checks run before any mutation: either the original set is gone
    /// and `tx` is present, or the pool is unchanged. Returns the evicted
    /// entries.
    pub fn evict_and_replace(
        &mut self,
        original: &Hash256,
        tx: Transaction,
        fee: u64,
    ) -> Result<Vec<MempoolEntry>, MempoolError> {
        let original_entry = self.entry(original)?;
        if !original_entry.signals_rbf() {
            return Err(MempoolError::NonReplaceableConflict {
                new_txid: String::new(),
                existing_txid: original.to_string(),
                outpoint: String::new(),
            });
        }

        let prepared = self.prepare(&tx, fee)?;
        let replaced = self.with_descendants(&[*original]);
        for conflict in self.conflicting_txids(&tx) {
            if !replaced.contains(&conflict) {
                return Err(MempoolError::UnrelatedConflict {
                    existing_txid: conflict.to_string(),
                });
            }
        }
        self.check_replacement(&tx, fee, &prepared, &replaced)?;

        let evicted = self.remove_all(&replaced);
        let txid = prepared.txid;
        self.insert_prepared(tx, fee, prepared)?;
        debug!(original = %original, replacement = %txid, fee, "evicted and replaced");
        Ok(evicted)
    }

    /// Fee and capacity checks for replacing `replaced` by `tx`. Does not mutate.
    fn check_replacement(
        &self,
        tx: &Transaction,
        fee: u64,
        prepared: &Prepared,
        replaced: &[Hash256],
    ) -> Result<(), MempoolError> {
        let replaced_set: HashSet<&Hash256> = replaced.iter().collect();
        if let Some(input) = tx
            .inputs
            .iter()
            .find(|i| replaced_set.contains(&i.previous_output.txid))
        {
            return Err(MempoolError::MissingInputs(input.previous_output.to_string()));
        }

        let mut replaced_fees = 0u64;
        let mut replaced_bytes = 0usize;
        for txid in replaced {
            let entry = self.entry(txid)?;
            replaced_fees = replaced_fees.saturating_add(entry.fee);
            replaced_bytes += entry.size;
        }
        if fee <= replaced_fees {
            return Err(MempoolError::InsufficientReplacementFee {
                fee,
                replaced: replaced_fees,
            });
        }

        let count_after = self.entries.len() - replaced.len() + 1;
        let bytes_after = self.total_bytes - replaced_bytes + prepared.size;
        if count_after > self.max_count || bytes_after > self.max_bytes {
            return Err(MempoolError::PoolFull);
        }
        Ok(())
    }

    fn insert_prepared(
        &mut self,
        tx: Transaction,
        fee: u64,
        prepared: Prepared,
    ) -> Result<Hash256, MempoolError> {
        let Prepared { txid, size, fee_rate } = prepared;

        if let Some(input) = tx
            .inputs
            .iter()
            .find(|i| self.by_outpoint.contains_key(&i.previous_output))
        {
            let existing = self
                .by_outpoint
                .get(&input.previous_output)
                .map(|t| t.to_string())
                .unwrap_or_default();
            return Err(MempoolError::NonReplaceableConflict {
                new_txid: txid.to_string(),
                existing_txid: existing,
                outpoint: input.previous_output.to_string(),
            });
        }

        // Evict lowest-fee-rate entries while full.
        while (self.entries.len() >= self.max_count || self.total_bytes + size > self.max_bytes)
            && !self.entries.is_empty()
        {
            match self.by_fee_rate.iter().next() {
                Some(&(lowest_rate, lowest_txid)) if lowest_rate < fee_rate => {
                    let doomed = self.with_descendants(&[lowest_txid]);
                    self.remove_all(&doomed);
                }
                _ => return Err(MempoolError::PoolFull),
            }
        }
        if self.entries.len() >= self.max_count || self.total_bytes + size > self.max_bytes {
            return Err(MempoolError::PoolFull);
        }

        for input in &tx.inputs {
            self.by_outpoint.insert(input.previous_output.clone(), txid);
        }
        self.by_fee_rate.insert((fee_rate, txid));
        self.total_bytes += size;
        self.entries.insert(
            txid,
            MempoolEntry {
                tx,
                txid,
                fee,
                size,
                fee_rate,
            },
        );
        Ok(txid)
    }

    fn entry(&self, txid: &Hash256) -> Result<&MempoolEntry, MempoolError> {
        self.entries
            .get(txid)
            .ok_or_else(|| MempoolError::NotFound(txid.to_string()))
    }

    fn remove_all(&mut self, txids: &[Hash256]) -> Vec<MempoolEntry> {
        txids.iter().filter_map(|t| self.remove_entry(*t)).collect()
    }

    /// Remove a single entry. Descendants stay; use [`Mempool::remove_with_descendants`]
    /// to drop them too.
    pub fn remove(&mut self, txid: &Hash256) -> Option<MempoolEntry> {
        self.remove_entry(*txid)
    }

    pub fn remove_with_descendants(&mut self, txid: &Hash256) -> Vec<MempoolEntry> {
        let doomed = self.with_descendants(&[*txid]);
        self.remove_all(&doomed)
    }

    fn remove_entry(&mut self, txid: Hash256) -> Option<MempoolEntry> {
        let entry = self.entries.remove(&txid)?;
        for input in &entry.tx.inputs {
            self.by_outpoint.remove(&input.previous_output);
        }
        self.by_fee_rate.remove(&(entry.fee_rate, txid));
        self.total_bytes -= entry.size;
        Some(entry)
    }

    /// Pool entries spending an output of `txid` directly.
    pub fn children(&self, txid: &Hash256) -> Vec<Hash256> {
        let Some(entry) = self.entries.get(txid) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        (0..entry.tx.outputs.len() as u64)
            .filter_map(|index| self.by_outpoint.get(&OutPoint::new(*txid, index)).copied())
            .filter(|child| seen.insert(*child))
            .collect()
    }

    /// Number of pool entries whose inputs reference outputs of `txid`.
    pub fn descendant_count(&self, txid: &Hash256) -> usize {
        self.children(txid).len()
    }

    /// All in-pool descendants of `txid`, transitively, excluding `txid`.
    pub fn descendants(&self, txid: &Hash256) -> Vec<Hash256> {
        let mut all = self.with_descendants(&[*txid]);
        all.retain(|t| t != txid);
        all
    }

    /// `roots` that are in the pool plus every in-pool descendant, parents first.
    fn with_descendants(&self, roots: &[Hash256]) -> Vec<Hash256> {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        let mut stack: Vec<Hash256> = roots
            .iter()
            .copied()
            .filter(|t| self.entries.contains_key(t))
            .collect();
        while let Some(txid) = stack.pop() {
            if !seen.insert(txid) {
                continue;
            }
            ordered.push(txid);
            stack.extend(self.children(&txid));
        }
        ordered
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn get(&self, txid: &Hash256) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    /// The pool transaction spending `outpoint`, if any.
    pub fn spender_of(&self, outpoint: &OutPoint) -> Option<Hash256> {
        self.by_outpoint.get(outpoint).copied()
    }

    pub fn has_conflict(&self, tx: &Transaction) -> bool {
        tx.inputs
            .iter()
            .any(|input| self.by_outpoint.contains_key(&input.previous_output))
    }

    /// Deduplicated txids of pool entries sharing an input with `tx`.
    pub fn conflicting_txids(&self, tx: &Transaction) -> Vec<Hash256> {
        let mut seen = HashSet::new();
        tx.inputs
            .iter()
            .filter_map(|input| self.by_outpoint.get(&input.previous_output).copied())
            .filter(|txid| seen.insert(*txid))
            .collect()
    }

    /// Remove transactions confirmed in `block`, plus pool entries (and their
    /// descendants) that spend outpoints the block spends.
    ///
    /// Returns the conflicting entries that were dropped.
    pub fn remove_confirmed_block(&mut self, block: &Block) -> Vec<MempoolEntry> {
        let mut spent = HashSet::new();
        for tx in &block.transactions {
            if let Ok(txid) = tx.txid() {
                self.remove_entry(txid);
            }
            spent.extend(tx.spent_outpoints().cloned());
        }

        let conflicting: Vec<Hash256> = spent
            .iter()
            .filter_map(|op| self.by_outpoint.get(op).copied())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let doomed = self.with_descendants(&conflicting);
        self.remove_all(&doomed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn min_relay_fee(&self) -> FeeRate {
        self.min_relay_fee
    }

    pub fn total_fees(&self) -> u64 {
        self.entries.values().map(|e| e.fee).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.entries.values()
    }

    pub fn txids(&self) -> Vec<Hash256> {
        self.entries.keys().copied().collect()
    }
}

/// Shape checks for a pool candidate of encoded `size`.
fn check_structure(tx: &Transaction, size: usize) -> Result<(), TransactionError> {
    if tx.inputs.is_empty() || tx.outputs.is_empty() {
        return Err(TransactionError::EmptyInputsOrOutputs);
    }
    if tx.inputs.len() > MAX_INPUTS {
        return Err(TransactionError::TooManyInputs {
            count: tx.inputs.len(),
            max: MAX_INPUTS,
        });
    }
    if tx.outputs.len() > MAX_OUTPUTS {
        return Err(TransactionError::TooManyOutputs {
            count: tx.outputs.len(),
            max: MAX_OUTPUTS,
        });
    }
    if size > MAX_TX_SIZE {
        return Err(TransactionError::OversizedTransaction {
            size,
            max: MAX_TX_SIZE,
        });
    }
    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for op in tx.spent_outpoints() {
        if !seen.insert(op) {
            return Err(TransactionError::DuplicateInput(op.to_string()));
        }
    }
    Ok(())
}
