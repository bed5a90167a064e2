//! Dirty-field bitmap attached to every structured value.
//!
//! Bit `i` marks field `i` (depth-first field offset) as changed. On the wire the
//! set is written as a size-prefixed byte count that stops at the highest set bit:
//! all complete 64-bit words first, then the bytes of the last word least
//! significant first.

use std::fmt;

use bytes::{Buf, BufMut};

use crate::error::Result;
use crate::protocol::{ensure_remaining, read_size, write_size};

/// Set of changed field offsets.
#[derive(Clone, Default)]
pub struct BitSet {
    bits: bit_set::BitSet,
}

impl BitSet {
    /// Creates an empty set with room for `nbits` fields.
    pub fn new(nbits: usize) -> Self {
        Self {
            bits: bit_set::BitSet::with_capacity(nbits),
        }
    }

    /// Marks field `index`.
    pub fn set(&mut self, index: usize) {
        self.bits.insert(index);
    }

    /// Unmarks field `index`.
    pub fn clear(&mut self, index: usize) {
        self.bits.remove(index);
    }

    /// Returns true if field `index` is marked.
    pub fn get(&self, index: usize) -> bool {
        self.bits.contains(index)
    }

    /// Unmarks every field.
    pub fn clear_all(&mut self) {
        self.bits.clear();
    }

    /// Number of marked fields.
    pub fn cardinality(&self) -> usize {
        self.bits.len()
    }

    /// Returns true if no field is marked.
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Marked field offsets in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter()
    }

    fn words(&self) -> Vec<u64> {
        let mut words: Vec<u64> = Vec::new();
        for bit in self.bits.iter() {
            let word = bit / 64;
            if word >= words.len() {
                words.resize(word + 1, 0);
            }
            words[word] |= 1u64 << (bit % 64);
        }
        words
    }

    /// Writes the set.
    pub fn serialize<B: BufMut + ?Sized>(&self, buf: &mut B) {
        let words = self.words();
        let Some((&last, full)) = words.split_last() else {
            write_size(buf, 0);
            return;
        };
        let tail_bytes = (64 - last.leading_zeros() as usize + 7) / 8;
        write_size(buf, full.len() * 8 + tail_bytes);
        for word in full {
            buf.put_u64(*word);
        }
        for i in 0..tail_bytes {
            buf.put_u8((last >> (8 * i)) as u8);
        }
    }

    /// Reads a set, replacing the current contents.
    pub fn deserialize<B: Buf + ?Sized>(&mut self, buf: &mut B) -> Result<()> {
        let bytes = read_size(buf)?.unwrap_or(0);
        ensure_remaining(buf, bytes)?;
        self.bits.clear();

        let full = bytes / 8;
        let mut base = 0usize;
        for _ in 0..full {
            self.insert_word(base, buf.get_u64());
            base += 64;
        }
        let mut tail = 0u64;
        for i in 0..bytes - full * 8 {
            tail |= u64::from(buf.get_u8()) << (8 * i);
        }
        self.insert_word(base, tail);
        Ok(())
    }

    fn insert_word(&mut self, base: usize, mut word: u64) {
        while word != 0 {
            let offset = word.trailing_zeros() as usize;
            self.bits.insert(base + offset);
            word &= word - 1;
        }
    }
}

impl PartialEq for BitSet {
    fn eq(&self, other: &Self) -> bool {
        self.bits.iter().eq(other.bits.iter())
    }
}

impl Eq for BitSet {}

impl FromIterator<usize> for BitSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = BitSet::default();
        for bit in iter {
            set.set(bit);
        }
        set
    }
}

impl fmt::Debug for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.bits.iter()).finish()
    }
}
