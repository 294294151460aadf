use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::RoundId;

pub type ClientId = String;

/// One client's encrypted update for a round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contribution<C> {
    pub round_id: RoundId,
    pub gradients: BTreeMap<String, C>,
}

impl<C> Contribution<C> {
    pub fn new(round_id: RoundId, gradients: BTreeMap<String, C>) -> Self { Self { round_id, gradients } }
}

/// Ciphertexts collected for the current round, grouped by parameter name.
///
/// Only the coordinator touches this, always under its lock. Ciphertexts are
/// never handed back out; the buffer is consumed by [`ContributionBuffer::drain`].
#[derive(Debug)]
pub struct ContributionBuffer<C> {
    per_parameter: BTreeMap<String, Vec<C>>,
    contributors: HashSet<ClientId>,
}

impl<C> Default for ContributionBuffer<C> {
    fn default() -> Self { Self { per_parameter: BTreeMap::new(), contributors: HashSet::new() } }
}

impl<C> ContributionBuffer<C> {
    pub fn contributor_count(&self) -> usize { self.contributors.len() }
    pub fn has_contributed(&self, client_id: &str) -> bool { self.contributors.contains(client_id) }
    pub fn is_empty(&self) -> bool { self.contributors.is_empty() }

    /// Ciphertexts held for `name`.
    pub fn depth(&self, name: &str) -> usize { self.per_parameter.get(name).map_or(0, Vec::len) }

    /// Caller has already validated the contribution against the schema.
    pub(crate) fn append(&mut self, client_id: ClientId, gradients: BTreeMap<String, C>) {
        for (name, ct) in gradients {
            self.per_parameter.entry(name).or_default().push(ct);
        }
        self.contributors.insert(client_id);
    }

    /// Takes every ciphertext list and the contributor count, leaving the buffer empty.
    pub(crate) fn drain(&mut self) -> (BTreeMap<String, Vec<C>>, usize) {
        let count = self.contributors.len();
        self.contributors.clear();
        (std::mem::take(&mut self.per_parameter), count)
    }

    pub(crate) fn clear(&mut self) {
        self.per_parameter.clear();
        self.contributors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_drain() {
        let mut buf: ContributionBuffer<u32> = ContributionBuffer::default();
        buf.append("a".into(), BTreeMap::from([("w".to_string(), 1), ("b".to_string(), 2)]));
        buf.append("b".into(), BTreeMap::from([("w".to_string(), 3), ("b".to_string(), 4)]));
        assert_eq!(buf.contributor_count(), 2);
        assert_eq!(buf.depth("w"), 2);
        assert!(buf.has_contributed("a"));
        let (lists, count) = buf.drain();
        assert_eq!(count, 2);
        assert_eq!(lists["w"], vec![1, 3]);
        assert!(buf.is_empty());
        assert_eq!(buf.depth("w"), 0);
    }
}
