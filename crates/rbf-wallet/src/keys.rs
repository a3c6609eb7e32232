//! Seed management and deterministic key derivation.
//!
//! Uses BLAKE3 keyed derivation to produce Ed25519 keypairs from a 32-byte
//! master seed. Receive and change keys come from separate derivation
//! branches, so an output can be classified as change just by looking up
//! the key that owns it.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

use rbf_core::crypto::{self, KeyPair};
use rbf_core::error::CryptoError;
use rbf_core::traits::Signer;
use rbf_core::types::{Hash256, Transaction, TxOutput};

const KDF_CONTEXT: &str = "rbf-wallet-key-derivation-v1";

/// A 32-byte master seed. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Seed {
    bytes: [u8; 32],
}

impl Seed {
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl Clone for Seed {
    fn clone(&self) -> Self {
        Self { bytes: self.bytes }
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seed").field("bytes", &"[REDACTED]").finish()
    }
}

/// Derivation branch of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPurpose {
    /// Handed out to payers.
    Receive,
    /// Used for the wallet's own change outputs.
    Change,
}

impl KeyPurpose {
    fn branch(self) -> u8 {
        match self {
            Self::Receive => 0,
            Self::Change => 1,
        }
    }
}

/// Deterministic keychain with separate receive and change branches.
pub struct KeyChain {
    seed: Seed,
    next_receive: u32,
    next_change: u32,
    keypairs: HashMap<(KeyPurpose, u32), KeyPair>,
    /// Reverse lookup: pubkey_hash -> (branch, index).
    pubkey_hash_to_index: HashMap<Hash256, (KeyPurpose, u32)>,
}

impl KeyChain {
    pub fn new(seed: Seed) -> Self {
        Self {
            seed,
            next_receive: 0,
            next_change: 0,
            keypairs: HashMap::new(),
            pubkey_hash_to_index: HashMap::new(),
        }
    }

    pub fn derive_keypair(&mut self, purpose: KeyPurpose, index: u32) -> &KeyPair {
        let key = (purpose, index);
        if !self.keypairs.contains_key(&key) {
            let kp = derive_child_keypair(&self.seed, purpose, index);
            self.pubkey_hash_to_index
                .insert(kp.public_key().pubkey_hash(), key);
            self.keypairs.insert(key, kp);
        }
        &self.keypairs[&key]
    }

    /// Derive the next key on `purpose`'s branch and return its pubkey hash.
    pub fn next_pubkey_hash(&mut self, purpose: KeyPurpose) -> Hash256 {
        let counter = match purpose {
            KeyPurpose::Receive => &mut self.next_receive,
            KeyPurpose::Change => &mut self.next_change,
        };
        let index = *counter;
        *counter = counter.saturating_add(1);
        self.derive_keypair(purpose, index).public_key().pubkey_hash()
    }

    pub fn keypair_for_pubkey_hash(&self, hash: &Hash256) -> Option<&KeyPair> {
        self.pubkey_hash_to_index
            .get(hash)
            .and_then(|key| self.keypairs.get(key))
    }

    /// Branch of the key owning `hash`, if it was derived by this keychain.
    pub fn purpose_of(&self, hash: &Hash256) -> Option<KeyPurpose> {
        self.pubkey_hash_to_index.get(hash).map(|(purpose, _)| *purpose)
    }

    pub fn next_index(&self, purpose: KeyPurpose) -> u32 {
        match purpose {
            KeyPurpose::Receive => self.next_receive,
            KeyPurpose::Change => self.next_change,
        }
    }
}

impl fmt::Debug for KeyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyChain")
            .field("next_receive", &self.next_receive)
            .field("next_change", &self.next_change)
            .field("cached_keys", &self.keypairs.len())
            .finish()
    }
}

fn derive_child_keypair(seed: &Seed, purpose: KeyPurpose, index: u32) -> KeyPair {
    let mut ikm = Vec::with_capacity(37);
    ikm.extend_from_slice(seed.as_bytes());
    ikm.push(purpose.branch());
    ikm.extend_from_slice(&index.to_le_bytes());
    let derived = blake3::derive_key(KDF_CONTEXT, &ikm);
    ikm.zeroize();
    KeyPair::from_secret_bytes(derived)
}

/// [`Signer`] backed by a shared keychain.
#[derive(Clone)]
pub struct KeyChainSigner {
    keychain: Arc<RwLock<KeyChain>>,
}

impl KeyChainSigner {
    pub fn new(keychain: Arc<RwLock<KeyChain>>) -> Self {
        Self { keychain }
    }
}

impl Signer for KeyChainSigner {
    fn sign_input(
        &self,
        tx: &mut Transaction,
        index: usize,
        prevout: &TxOutput,
    ) -> Result<(), CryptoError> {
        let keychain = self.keychain.read();
        let kp = keychain
            .keypair_for_pubkey_hash(&prevout.pubkey_hash)
            .ok_or_else(|| CryptoError::MissingKey(prevout.pubkey_hash.to_string()))?;
        crypto::sign_transaction_input(tx, index, kp)
    }

    fn can_sign(&self, prevout: &TxOutput) -> bool {
        self.keychain
            .read()
            .keypair_for_pubkey_hash(&prevout.pubkey_hash)
            .is_some()
    }
}
