//! Visit marks for graph-wide traversals.
//!
//! A DAG may reach the same node along several paths. Passes that must touch
//! every node exactly once (count normalisation) keep a
//! [`BitSet`] of already-handled node indices.

use crate::reference::NodeId;

/// A bit set backed by a vector of u64 words, one bit per node index.
///
/// Grows automatically when a bit beyond the current capacity is set.
#[derive(Debug, Clone, Default)]
pub(crate) struct BitSet {
    words: Vec<u64>,
    count: usize,
}

impl BitSet {
    const BITS_PER_WORD: usize = 64;

    /// Creates an empty bit set able to hold `capacity` bits without growing.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(Self::BITS_PER_WORD)],
            count: 0,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.count
    }

    #[inline]
    fn word_and_bit(id: NodeId) -> (usize, u64) {
        let index = id.index();
        (index / Self::BITS_PER_WORD, 1u64 << (index % Self::BITS_PER_WORD))
    }

    /// Marks `id`. Returns true if it was not marked before.
    #[inline]
    pub(crate) fn insert(&mut self, id: NodeId) -> bool {
        let (word, mask) = Self::word_and_bit(id);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let was_clear = self.words[word] & mask == 0;
        if was_clear {
            self.words[word] |= mask;
            self.count += 1;
        }
        was_clear
    }
}
