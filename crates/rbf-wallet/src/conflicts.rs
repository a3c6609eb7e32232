//! Replacement links between an original transaction and the one that
//! superseded it.
//!
//! Each transaction has at most one outgoing and one incoming link. Links are
//! permanent: a reorg that brings the original back does not remove them.

use std::collections::HashMap;

use rbf_core::types::Hash256;

use crate::error::BumpError;

#[derive(Debug, Default, Clone)]
pub struct ConflictTracker {
    replaced_by: HashMap<Hash256, Hash256>,
    replaces: HashMap<Hash256, Hash256>,
}

impl ConflictTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `original → replacement`.
    pub fn link(&mut self, original: Hash256, replacement: Hash256) -> Result<(), BumpError> {
        if let Some(existing) = self.replaced_by.get(&original) {
            return Err(BumpError::AlreadyBumped {
                txid: original,
                replacement: *existing,
            });
        }
        if let Some(prior) = self.replaces.get(&replacement) {
            return Err(BumpError::AlreadyBumped {
                txid: *prior,
                replacement,
            });
        }
        self.replaced_by.insert(original, replacement);
        self.replaces.insert(replacement, original);
        Ok(())
    }

    pub fn replacement_of(&self, txid: &Hash256) -> Option<Hash256> {
        self.replaced_by.get(txid).copied()
    }

    pub fn original_of(&self, txid: &Hash256) -> Option<Hash256> {
        self.replaces.get(txid).copied()
    }

    pub fn len(&self) -> usize {
        self.replaced_by.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replaced_by.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(b: u8) -> Hash256 {
        Hash256([b; 32])
    }

    #[test]
    fn link_is_bidirectional() {
        let mut t = ConflictTracker::new();
        t.link(h(1), h(2)).unwrap();
        assert_eq!(t.replacement_of(&h(1)), Some(h(2)));
        assert_eq!(t.original_of(&h(2)), Some(h(1)));
        assert_eq!(t.replacement_of(&h(2)), None);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn second_outgoing_link_rejected() {
        let mut t = ConflictTracker::new();
        t.link(h(1), h(2)).unwrap();
        let err = t.link(h(1), h(3)).unwrap_err();
        assert_eq!(err, BumpError::AlreadyBumped { txid: h(1), replacement: h(2) });
        assert_eq!(t.replacement_of(&h(1)), Some(h(2)));
    }

    #[test]
    fn chain_of_replacements_allowed() {
        let mut t = ConflictTracker::new();
        t.link(h(1), h(2)).unwrap();
        t.link(h(2), h(3)).unwrap();
        assert_eq!(t.original_of(&h(3)), Some(h(2)));
        assert_eq!(t.replacement_of(&h(2)), Some(h(3)));
    }

    #[test]
    fn second_incoming_link_rejected() {
        let mut t = ConflictTracker::new();
        t.link(h(1), h(3)).unwrap();
        assert!(t.link(h(2), h(3)).is_err());
        assert_eq!(t.replacement_of(&h(2)), None);
    }
}
