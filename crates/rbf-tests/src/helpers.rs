//! Shared helpers for the scenario suites.

use rbf_core::constants::{MAX_BIP125_RBF_SEQUENCE, SEQUENCE_FINAL};
use rbf_core::types::{Block, Hash256, OutPoint, Transaction, TxInput, TxOutput};
use rbf_wallet::{Recipient, Seed, Wallet, WalletConfig};

/// Value of every funding coinbase created by [`fund`].
pub const FUNDING: u64 = 100_000;

/// Amount the exact-fee scenarios pay away from a [`FUNDING`] coin.
pub const PAYMENT: u64 = 90_000;

/// Simple pubkey hash from a seed byte. Never owned by a test wallet.
pub fn pkh(seed: u8) -> Hash256 {
    Hash256([seed; 32])
}

pub fn wallet(seed: u8) -> Wallet {
    wallet_with(WalletConfig::default(), seed)
}

pub fn wallet_with(config: WalletConfig, seed: u8) -> Wallet {
    Wallet::new(config, Seed::from_bytes([seed; 32])).unwrap()
}

/// Coinbase paying `value` to `pubkey_hash`. `lock_time` carries the
/// height so every coinbase has a distinct txid.
pub fn make_coinbase(value: u64, pubkey_hash: Hash256, height: u64) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxInput::unsigned(OutPoint::null(), SEQUENCE_FINAL)],
        outputs: vec![TxOutput { value, pubkey_hash }],
        lock_time: height,
    }
}

/// Build the next block on `wallets[0]`'s tip and connect it to every wallet.
pub fn mine(
    wallets: &[&Wallet],
    mut txs: Vec<Transaction>,
    coinbase_to: Hash256,
    value: u64,
) -> Block {
    let (height, tip) = wallets[0].tip();
    let next = height + 1;
    txs.insert(0, make_coinbase(value, coinbase_to, next));
    let block = Block::new(tip, next, next * 60, txs).unwrap();
    for w in wallets {
        w.block_connected(&block).unwrap();
    }
    block
}

/// Mine a block confirming `txs` with a coinbase paying no wallet.
pub fn mine_txs(wallets: &[&Wallet], txs: Vec<Transaction>) -> Block {
    let height = wallets[0].tip().0 + 1;
    mine(wallets, txs, pkh((height & 0xFF) as u8), 50_000)
}

/// Mine a [`FUNDING`] coinbase to a fresh receive key of `owner`.
pub fn fund(wallets: &[&Wallet], owner: &Wallet) -> OutPoint {
    let block = mine(wallets, vec![], owner.next_address(), FUNDING);
    OutPoint::new(block.transactions[0].txid().unwrap(), 0)
}

pub fn pay(pubkey_hash: Hash256, amount: u64) -> Vec<Recipient> {
    vec![Recipient { pubkey_hash, amount }]
}

/// Spend `coin` (worth [`FUNDING`]) paying [`PAYMENT`] away and `change` back
/// to a fresh change key, so the fee is `FUNDING - PAYMENT - change`.
pub fn exact_spend(w: &Wallet, coin: &OutPoint, change: u64, sequence: u32) -> Transaction {
    let tx = Transaction {
        version: 1,
        inputs: vec![TxInput::unsigned(coin.clone(), sequence)],
        outputs: vec![
            TxOutput { value: PAYMENT, pubkey_hash: pkh(0xEE) },
            TxOutput { value: change, pubkey_hash: w.next_change_address() },
        ],
        lock_time: 0,
    };
    let signed = w.sign_transaction(tx).unwrap();
    assert!(signed.complete);
    signed.tx
}

/// [`exact_spend`] with replaceability signalled, submitted to the pool.
pub fn submit_exact(w: &Wallet, coin: &OutPoint, change: u64) -> Hash256 {
    w.submit_transaction(exact_spend(w, coin, change, MAX_BIP125_RBF_SEQUENCE))
        .unwrap()
}

/// Transaction `txid` as recorded by `w`.
pub fn wallet_tx(w: &Wallet, txid: &Hash256) -> Transaction {
    w.with_state(|s| s.ledger.get(txid).map(|wtx| wtx.tx.clone()))
        .unwrap()
}
