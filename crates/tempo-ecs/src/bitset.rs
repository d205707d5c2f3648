//! Fixed-domain bit-sets over component indices.
//!
//! A [`ComponentMask`] records which component indices are present in an
//! archetype or filter category. Subset and intersection tests are plain
//! word-wise operations, which is what makes query matching cheap.
//!
//! The representation is normalized: trailing zero words are trimmed after
//! every mutation, so two masks describing the same index set always compare
//! and hash equal. That property is load-bearing -- masks key the archetype
//! index.

use std::fmt;

const BITS_PER_WORD: usize = 64;

/// A growable set of component indices.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ComponentMask {
    words: Vec<u64>,
}

impl ComponentMask {
    /// The empty mask.
    pub const fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Build a mask from an iterator of component indices.
    pub fn from_indices(indices: impl IntoIterator<Item = usize>) -> Self {
        let mut mask = Self::new();
        for index in indices {
            mask.set(index);
        }
        mask
    }

    /// Mark `index` as present.
    pub fn set(&mut self, index: usize) {
        let word = index / BITS_PER_WORD;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (index % BITS_PER_WORD);
    }

    /// Mark `index` as absent.
    pub fn clear(&mut self, index: usize) {
        let word = index / BITS_PER_WORD;
        if let Some(w) = self.words.get_mut(word) {
            *w &= !(1 << (index % BITS_PER_WORD));
        }
        self.normalize();
    }

    /// Whether `index` is present.
    pub fn contains(&self, index: usize) -> bool {
        let word = index / BITS_PER_WORD;
        self.words
            .get(word)
            .is_some_and(|w| w & (1 << (index % BITS_PER_WORD)) != 0)
    }

    /// Whether no index is present.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Number of present indices.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Whether every index of `other` is also present in `self`.
    pub fn is_superset(&self, other: &Self) -> bool {
        if other.words.len() > self.words.len() {
            return false;
        }
        other
            .words
            .iter()
            .zip(&self.words)
            .all(|(o, s)| o & !s == 0)
    }

    /// Whether at least one index is present in both masks.
    pub fn intersects(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(&other.words)
            .any(|(a, b)| a & b != 0)
    }

    /// Iterate the present indices in ascending order.
    pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &word)| {
            (0..BITS_PER_WORD)
                .filter(move |bit| word & (1 << bit) != 0)
                .map(move |bit| wi * BITS_PER_WORD + bit)
        })
    }

    /// Copy of `self` with `index` additionally present.
    pub fn with(&self, index: usize) -> Self {
        let mut mask = self.clone();
        mask.set(index);
        mask
    }

    /// Copy of `self` with `index` absent.
    pub fn without(&self, index: usize) -> Self {
        let mut mask = self.clone();
        mask.clear(index);
        mask
    }

    fn normalize(&mut self) {
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }
}

impl fmt::Debug for ComponentMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.ones()).finish()
    }
}
