//! Per-element validity masks.
//!
//! One dynamically sized bitset type backs every domain mask (blend domain,
//! remap domain, flush domain, remap success flags).

const WORD_BITS: usize = 64;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidMask {
    words: Vec<u64>,
    len: usize,
}

impl ValidMask {
    /// All bits cleared.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(WORD_BITS)],
            len,
        }
    }

    /// All bits set.
    pub fn full(len: usize) -> Self {
        let mut mask = Self::new(len);
        mask.set_all(true);
        mask
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Out-of-range bits read as unset.
    #[inline]
    pub fn test(&self, i: usize) -> bool {
        if i >= self.len {
            return false;
        }
        self.words[i / WORD_BITS] & (1u64 << (i % WORD_BITS)) != 0
    }

    /// Out-of-range writes are ignored.
    #[inline]
    pub fn set(&mut self, i: usize, value: bool) {
        if i >= self.len {
            return;
        }
        let bit = 1u64 << (i % WORD_BITS);
        let word = &mut self.words[i / WORD_BITS];
        if value {
            *word |= bit;
        } else {
            *word &= !bit;
        }
    }

    #[inline]
    pub fn enable(&mut self, i: usize) {
        self.set(i, true);
    }

    #[inline]
    pub fn disable(&mut self, i: usize) {
        self.set(i, false);
    }

    pub fn set_all(&mut self, value: bool) {
        for word in self.words.iter_mut() {
            *word = if value { u64::MAX } else { 0 };
        }
        self.clear_tail();
    }

    /// Copy the first `min(len, other.len)` bits from `other`.
    pub fn copy_from(&mut self, other: &ValidMask) {
        let n = self.len.min(other.len);
        for i in 0..n {
            self.set(i, other.test(i));
        }
    }

    pub fn all(&self) -> bool {
        (0..self.len).all(|i| self.test(i))
    }

    pub fn any(&self) -> bool {
        self.words.iter().any(|w| *w != 0)
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(move |i| self.test(i))
    }

    /// Indices of set bits, ascending.
    pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |i| self.test(*i))
    }

    fn clear_tail(&mut self) {
        let rem = self.len % WORD_BITS;
        if rem != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << rem) - 1;
            }
        }
    }
}

impl FromIterator<bool> for ValidMask {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        let bits: Vec<bool> = iter.into_iter().collect();
        let mut mask = ValidMask::new(bits.len());
        for (i, b) in bits.into_iter().enumerate() {
            mask.set(i, b);
        }
        mask
    }
}
