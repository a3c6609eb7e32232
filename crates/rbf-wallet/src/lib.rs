//! # rbf-wallet — UTXO wallet with opt-in replace-by-fee bumping.
//!
//! Funds and signs payments that signal BIP125 replaceability, tracks the
//! wallet's coins against a chain index and a pool, and replaces stuck
//! transactions with higher-fee versions that pay from their change.
//!
//! # Modules
//!
//! - [`error`] — `WalletError` and `BumpError`
//! - [`keys`] — Seed, KeyChain, receive/change key derivation, signer
//! - [`config`] — Layered `WalletConfig` and logging setup
//! - [`fee`] — Fee-rate policy with a settable override
//! - [`coin_selection`] — Largest-first coin selection
//! - [`builder`] — Transaction builder with signing
//! - [`ledger`] — Wallet coins and their derived states
//! - [`conflicts`] — Original → replacement links
//! - [`bump`] — Fee-bump planner and commit
//! - [`projector`] — Per-transaction views
//! - [`wallet`] — High-level wallet composition

pub mod builder;
pub mod bump;
pub mod coin_selection;
pub mod config;
pub mod conflicts;
pub mod error;
pub mod fee;
pub mod keys;
pub mod ledger;
pub mod projector;
pub mod wallet;

// Re-exports for convenient access
pub use builder::{Recipient, TransactionBuilder, UnsignedTransaction};
pub use bump::{BumpPlan, BumpResult, ChangePolicy, FeeBumper};
pub use coin_selection::{CoinSelection, CoinSelector, WalletCoin};
pub use config::{WalletConfig, init_logging};
pub use conflicts::ConflictTracker;
pub use error::{BumpError, NotReplaceableReason, WalletError};
pub use fee::FeeSettings;
pub use keys::{KeyChain, KeyChainSigner, KeyPurpose, Seed};
pub use ledger::{Balance, CoinState, Ledger, StateView, WalletTx};
pub use projector::{Projector, WalletTransaction};
pub use wallet::{FundedTransaction, NoopBroadcaster, SignedTransaction, Wallet, WalletState};
