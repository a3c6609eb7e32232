//! Error types shared across the workspace.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("duplicate input: {0}")] DuplicateInput(String),
    #[error("oversized: {size} > {max}")] OversizedTransaction { size: usize, max: usize },
    #[error("empty inputs or outputs")] EmptyInputsOrOutputs,
    #[error("too many inputs: {count} > {max}")] TooManyInputs { count: usize, max: usize },
    #[error("too many outputs: {count} > {max}")] TooManyOutputs { count: usize, max: usize },
    #[error("value overflow")] ValueOverflow,
    #[error("outputs exceed inputs: in {inputs}, out {outputs}")] NegativeFee { inputs: u64, outputs: u64 },
    #[error("serialization: {0}")] Serialization(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid signature bytes")] InvalidSignature,
    #[error("signature verification failed")] VerificationFailed,
    #[error("pubkey hash does not match expected")] PubkeyHashMismatch,
    #[error("input index out of bounds: {index} >= {len}")] InputIndexOutOfBounds { index: usize, len: usize },
    #[error("no key for pubkey hash {0}")] MissingKey(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("rejected by network: {0}")] Rejected(String),
    #[error("network unavailable: {0}")] Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction already in pool: {0}")] AlreadyExists(String),
    #[error("transaction not in pool: {0}")] NotFound(String),
    #[error("conflicts with non-replaceable pool tx {existing_txid} on outpoint {outpoint}")] NonReplaceableConflict { new_txid: String, existing_txid: String, outpoint: String },
    #[error("replacement conflicts with {existing_txid}, which is not being replaced")] UnrelatedConflict { existing_txid: String },
    #[error("replacement fee {fee} does not exceed replaced fees {replaced}")] InsufficientReplacementFee { fee: u64, replaced: u64 },
    #[error("fee {fee} below minimum {minimum}")] FeeTooLow { fee: u64, minimum: u64 },
    #[error("missing inputs: {0}")] MissingInputs(String),
    #[error("pool full")] PoolFull,
    #[error(transparent)] Invalid(#[from] TransactionError),
    #[error("internal: {0}")] Internal(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainStateError {
    #[error("block not found: {0}")] BlockNotFound(String),
    #[error("block {hash} is not the tip")] NotTip { hash: String },
    #[error("block does not extend tip: expected parent {expected}, got {got}")] NotOnTip { expected: String, got: String },
    #[error("missing UTXO: {0}")] MissingUtxo(String),
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)] Transaction(#[from] TransactionError),
    #[error(transparent)] Crypto(#[from] CryptoError),
    #[error(transparent)] Mempool(#[from] MempoolError),
    #[error(transparent)] ChainState(#[from] ChainStateError),
    #[error(transparent)] Broadcast(#[from] BroadcastError),
}
