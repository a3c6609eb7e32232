//! Integration test suite for replace-by-fee bumping.
//!
//! Scenario tests drive one or more [`rbf_wallet::Wallet`]s through funding,
//! bumping, block connection and reorgs. Shared setup lives in [`helpers`].

pub mod helpers;
