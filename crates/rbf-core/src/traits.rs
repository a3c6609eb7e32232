//! Collaborator interfaces.
//!
//! The fee-bump engine talks to the outside world only through these traits:
//! a [`Signer`] holding keys, a [`Broadcaster`] relaying transactions and a
//! [`FeePolicy`] supplying rates. All are object-safe and `Send + Sync` so
//! a wallet can hold them as `Arc<dyn _>` across threads.

use crate::error::{BroadcastError, CryptoError};
use crate::fee::FeeRate;
use crate::types::{Transaction, TxOutput};

/// Signs transaction inputs.
pub trait Signer: Send + Sync {
    /// Sign input `index` of `tx`, which spends `prevout`.
    ///
    /// Writes the signature and public key into the input. Fails with
    /// [`CryptoError::MissingKey`] if the signer does not hold the key for
    /// `prevout.pubkey_hash`.
    fn sign_input(
        &self,
        tx: &mut Transaction,
        index: usize,
        prevout: &TxOutput,
    ) -> Result<(), CryptoError>;

    /// Whether this signer can produce signatures for `prevout`.
    fn can_sign(&self, prevout: &TxOutput) -> bool;
}

/// Relays signed transactions to the network.
///
/// Fire-and-forget relative to wallet state: a rejection is reported but
/// never rolls anything back.
pub trait Broadcaster: Send + Sync {
    fn broadcast_transaction(&self, tx: &Transaction) -> Result<(), BroadcastError>;
}

/// Source of fee rates.
pub trait FeePolicy: Send + Sync {
    /// Rate to pay for new transactions and default bumps.
    fn fee_rate(&self) -> FeeRate;

    /// Minimum rate increase a replacement must add over the original.
    fn incremental_relay_fee(&self) -> FeeRate;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{COIN, MAX_BIP125_RBF_SEQUENCE};
    use crate::crypto::{self, KeyPair};
    use crate::types::{Hash256, OutPoint, TxInput};
    use std::sync::Arc;
    use std::sync::Mutex;

    // ------------------------------------------------------------------
    // Mock: single-key signer
    // ------------------------------------------------------------------

    struct SingleKeySigner {
        keypair: KeyPair,
    }

    impl Signer for SingleKeySigner {
        fn sign_input(
            &self,
            tx: &mut Transaction,
            index: usize,
            prevout: &TxOutput,
        ) -> Result<(), CryptoError> {
            if !self.can_sign(prevout) {
                return Err(CryptoError::MissingKey(prevout.pubkey_hash.to_string()));
            }
            crypto::sign_transaction_input(tx, index, &self.keypair)
        }

        fn can_sign(&self, prevout: &TxOutput) -> bool {
            prevout.pubkey_hash == self.keypair.public_key().pubkey_hash()
        }
    }

    // ------------------------------------------------------------------
    // Mock: recording broadcaster
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct RecordingBroadcaster {
        sent: Mutex<Vec<Transaction>>,
    }

    impl Broadcaster for RecordingBroadcaster {
        fn broadcast_transaction(&self, tx: &Transaction) -> Result<(), BroadcastError> {
            self.sent
                .lock()
                .map_err(|e| BroadcastError::Unavailable(e.to_string()))?
                .push(tx.clone());
            Ok(())
        }
    }

    struct FixedPolicy;

    impl FeePolicy for FixedPolicy {
        fn fee_rate(&self) -> FeeRate {
            FeeRate::per_kb(20_000)
        }

        fn incremental_relay_fee(&self) -> FeeRate {
            FeeRate::per_kb(1_000)
        }
    }

    fn spend_of(prevout_owner: Hash256) -> (Transaction, TxOutput) {
        let prevout = TxOutput { value: COIN, pubkey_hash: prevout_owner };
        let tx = Transaction {
            version: 1,
            inputs: vec![TxInput::unsigned(
                OutPoint::new(Hash256([1; 32]), 0),
                MAX_BIP125_RBF_SEQUENCE,
            )],
            outputs: vec![TxOutput { value: COIN - 1_000, pubkey_hash: Hash256::ZERO }],
            lock_time: 0,
        };
        (tx, prevout)
    }

    #[test]
    fn signer_signs_owned_input() {
        let signer = SingleKeySigner { keypair: KeyPair::from_secret_bytes([4; 32]) };
        let owner = signer.keypair.public_key().pubkey_hash();
        let (mut tx, prevout) = spend_of(owner);

        signer.sign_input(&mut tx, 0, &prevout).unwrap();
        assert!(crypto::verify_transaction_input(&tx, 0, &owner).is_ok());
    }

    #[test]
    fn signer_refuses_foreign_input() {
        let signer = SingleKeySigner { keypair: KeyPair::from_secret_bytes([4; 32]) };
        let (mut tx, prevout) = spend_of(Hash256([9; 32]));
        let err = signer.sign_input(&mut tx, 0, &prevout).unwrap_err();
        assert!(matches!(err, CryptoError::MissingKey(_)));
        assert!(tx.inputs[0].signature.is_empty());
    }

    #[test]
    fn trait_objects_are_shareable() {
        let broadcaster: Arc<dyn Broadcaster> = Arc::new(RecordingBroadcaster::default());
        let policy: Arc<dyn FeePolicy> = Arc::new(FixedPolicy);
        let (tx, _) = spend_of(Hash256::ZERO);

        let handle = {
            let broadcaster = Arc::clone(&broadcaster);
            std::thread::spawn(move || broadcaster.broadcast_transaction(&tx))
        };
        assert!(handle.join().unwrap().is_ok());
        assert!(policy.fee_rate() > policy.incremental_relay_fee());
    }
}
