//! # Bitsets
//!
//! Packed bitmaps with one bit per log offset, stored as `u32` words so the
//! in-memory representation is exactly the on-disk body of a bitset index.

const WORD_BITS: u32 = 32;

/// Growable bitmap over dense offsets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitSet {
    words: Vec<u32>,
}

impl BitSet {
    /// Creates an empty bitset
    pub fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Rebuilds a bitset from its persisted word body
    pub fn from_words(words: Vec<u32>) -> Self {
        Self { words }
    }

    /// Sets the bit for `offset`, growing the word array as needed
    pub fn add(&mut self, offset: u32) {
        let word = (offset / WORD_BITS) as usize;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (offset % WORD_BITS);
    }

    /// Returns true if the bit for `offset` is set
    pub fn contains(&self, offset: u32) -> bool {
        let word = (offset / WORD_BITS) as usize;
        match self.words.get(word) {
            Some(w) => w & (1 << (offset % WORD_BITS)) != 0,
            None => false,
        }
    }

    /// Number of set bits
    pub fn cardinality(&self) -> u64 {
        self.words.iter().map(|w| u64::from(w.count_ones())).sum()
    }

    /// Returns true if no bits are set
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Word-wise AND
    pub fn intersect(&self, other: &BitSet) -> BitSet {
        let len = self.words.len().min(other.words.len());
        let words = (0..len).map(|i| self.words[i] & other.words[i]).collect();
        BitSet { words }
    }

    /// Word-wise OR
    pub fn union(&self, other: &BitSet) -> BitSet {
        let (longer, shorter) = if self.words.len() >= other.words.len() {
            (&self.words, &other.words)
        } else {
            (&other.words, &self.words)
        };
        let mut words = longer.clone();
        for (i, w) in shorter.iter().enumerate() {
            words[i] |= w;
        }
        BitSet { words }
    }

    /// Iterates set offsets in ascending order
    pub fn iter(&self) -> SetBits<'_> {
        SetBits {
            words: &self.words,
            pos: 0,
            current: 0,
        }
    }

    /// Raw word body
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Word body without trailing zero words, as written to disk
    pub fn trimmed_words(&self) -> &[u32] {
        let mut len = self.words.len();
        while len > 0 && self.words[len - 1] == 0 {
            len -= 1;
        }
        &self.words[..len]
    }
}

/// Ascending iterator over set offsets
pub struct SetBits<'a> {
    words: &'a [u32],
    pos: usize,
    current: u32,
}

impl Iterator for SetBits<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        while self.current == 0 {
            if self.pos >= self.words.len() {
                return None;
            }
            self.current = self.words[self.pos];
            self.pos += 1;
        }
        let bit = self.current.trailing_zeros();
        self.current &= self.current - 1;
        Some((self.pos as u32 - 1) * WORD_BITS + bit)
    }
}
