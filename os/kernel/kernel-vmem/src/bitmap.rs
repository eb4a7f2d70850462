//! # Occupancy Bitmap
//!
//! One bit per frame or block, packed into `u32` words. A set bit means
//! "in use". The free search skips fully occupied words before looking at
//! individual bits, so it is a first-fit scan from index 0. The map keeps
//! the index of the lowest word that may have a free bit, so filling it
//! front to back does not rescan the full prefix.

/// Number of `u32` words needed to track `bits` entries.
#[inline]
#[must_use]
pub const fn words_for(bits: usize) -> usize {
    bits.div_ceil(32)
}

/// A fixed-length bit set over some word storage.
///
/// Bits at or beyond [`len`](Self::len) never count as free, even when the
/// last storage word has spare capacity.
pub struct Bitmap<S> {
    words: S,
    bits: usize,
    /// Every word below this one is full.
    low: usize,
}

impl<S> Bitmap<S> {
    /// Wraps `words` to track `bits` entries.
    ///
    /// The storage is used as is; pass zeroed words for an empty map.
    #[must_use]
    pub const fn new(words: S, bits: usize) -> Self {
        Self {
            words,
            bits,
            low: 0,
        }
    }

    /// Number of tracked entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.bits
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }
}

impl<S: AsRef<[u32]>> Bitmap<S> {
    /// Whether entry `index` is in use. Out-of-range entries read as used.
    #[must_use]
    pub fn test(&self, index: usize) -> bool {
        if index >= self.bits {
            return true;
        }
        self.words.as_ref()[index / 32] & (1 << (index % 32)) != 0
    }

    /// Index of the first free entry.
    #[must_use]
    pub fn first_free(&self) -> Option<usize> {
        let words = self.words.as_ref();
        let end = words_for(self.bits);
        for (w, &word) in words.iter().enumerate().take(end).skip(self.low) {
            if word == u32::MAX {
                continue;
            }

            let bit = (!word).trailing_zeros() as usize;
            let index = w * 32 + bit;
            return (index < self.bits).then_some(index);
        }
        None
    }

    /// Number of entries in use.
    #[must_use]
    pub fn count_used(&self) -> usize {
        (0..self.bits).filter(|&i| self.test(i)).count()
    }
}

impl<S: AsMut<[u32]>> Bitmap<S> {
    /// Marks entry `index` as used. Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize) {
        if index < self.bits {
            let words = self.words.as_mut();
            words[index / 32] |= 1 << (index % 32);
            while self.low < words.len() && words[self.low] == u32::MAX {
                self.low += 1;
            }
        }
    }

    /// Marks entry `index` as free. Out-of-range indices are ignored.
    pub fn clear(&mut self, index: usize) {
        if index < self.bits {
            self.words.as_mut()[index / 32] &= !(1 << (index % 32));
            self.low = self.low.min(index / 32);
        }
    }

    /// Marks every tracked entry as used.
    pub fn set_all(&mut self) {
        for i in 0..self.bits {
            self.set(i);
        }
    }

    /// Marks every tracked entry as free.
    pub fn clear_all(&mut self) {
        self.words.as_mut().fill(0);
        self.low = 0;
    }
}
