//! # Slot Bitmap
//!
//! Compact per-slot bitset used for chunk occupancy. 64 slots per `u64`.
//!
//! ## Performance
//!
//! - Set / clear / test: O(1)
//! - Iterate set bits: O(words + set)
//! - Find a clear run: O(slots)

/// Fixed-length bitset with a cached population count.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlotBitmap {
    /// 1 = set. Bits past `len` are always zero.
    words: Vec<u64>,
    /// Number of addressable bits.
    len: usize,
    /// Cached number of set bits.
    count: usize,
}

impl SlotBitmap {
    /// Creates a bitmap of `len` clear bits.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(64)],
            len,
            count: 0,
        }
    }

    /// Number of addressable bits.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the bitmap has no addressable bits.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of set bits.
    #[inline]
    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    /// Tests a bit. Out-of-range bits read as clear.
    #[inline]
    #[must_use]
    pub fn is_set(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        (self.words[index / 64] >> (index % 64)) & 1 == 1
    }

    /// Sets a bit. Returns `true` if it was clear.
    #[inline]
    pub fn set(&mut self, index: usize) -> bool {
        debug_assert!(index < self.len, "Index out of bounds");
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        let was_clear = *word & mask == 0;
        *word |= mask;
        if was_clear {
            self.count += 1;
        }
        was_clear
    }

    /// Clears a bit. Returns `true` if it was set.
    #[inline]
    pub fn clear(&mut self, index: usize) -> bool {
        debug_assert!(index < self.len, "Index out of bounds");
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        let was_set = *word & mask != 0;
        *word &= !mask;
        if was_set {
            self.count -= 1;
        }
        was_set
    }

    /// Sets `start..start + len`.
    pub fn set_range(&mut self, start: usize, len: usize) {
        for index in start..start + len {
            self.set(index);
        }
    }

    /// Clears `start..start + len`.
    pub fn clear_range(&mut self, start: usize, len: usize) {
        for index in start..start + len {
            self.clear(index);
        }
    }

    /// Checks that every bit of `start..start + len` is clear and in range.
    #[must_use]
    pub fn is_range_clear(&self, start: usize, len: usize) -> bool {
        start + len <= self.len && (start..start + len).all(|index| !self.is_set(index))
    }

    /// Lowest start of `run` consecutive clear bits.
    #[must_use]
    pub fn find_clear_run(&self, run: usize) -> Option<usize> {
        if run == 0 || run > self.len - self.count {
            return None;
        }
        let mut start = 0;
        let mut found = 0;
        for index in 0..self.len {
            if self.is_set(index) {
                found = 0;
                start = index + 1;
            } else {
                found += 1;
                if found == run {
                    return Some(start);
                }
            }
        }
        None
    }

    /// Grows or shrinks to `len` bits. New bits are clear.
    pub fn resize(&mut self, len: usize) {
        if len < self.len {
            for index in len..self.len {
                self.clear(index);
            }
        }
        self.words.resize(len.div_ceil(64), 0);
        self.len = len;
    }

    /// Clears every bit.
    pub fn clear_all(&mut self) {
        self.words.fill(0);
        self.count = 0;
    }

    /// Iterates over set bit indices, ascending.
    ///
    /// Uses `trailing_zeros` to skip clear regions.
    #[must_use]
    pub fn iter_set(&self) -> SetBits<'_> {
        SetBits {
            words: &self.words,
            word_idx: 0,
            current_word: self.words.first().copied().unwrap_or(0),
        }
    }
}

/// Iterator over set bit indices.
pub struct SetBits<'a> {
    words: &'a [u64],
    word_idx: usize,
    current_word: u64,
}

impl Iterator for SetBits<'_> {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current_word != 0 {
                let bit = self.current_word.trailing_zeros() as usize;
                self.current_word &= self.current_word - 1;
                return Some(self.word_idx * 64 + bit);
            }

            self.word_idx += 1;
            if self.word_idx >= self.words.len() {
                return None;
            }
            self.current_word = self.words[self.word_idx];
        }
    }
}
