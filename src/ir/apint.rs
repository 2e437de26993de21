//! Arbitrary-width integer constants.
//!
//! [`ApInt`] stores the value as little-endian 64-bit words. Bits above the declared width
//! are always zero, so two values of the same width compare equal exactly when they denote
//! the same integer modulo `2^bits`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Fixed-width two's complement integer of arbitrary bit width.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApInt {
    bits: u32,
    words: Vec<u64>,
}

fn word_count(bits: u32) -> usize {
    (bits as usize).div_ceil(64).max(1)
}

impl ApInt {
    /// Creates an integer of `bits` width from an unsigned value (truncating).
    #[must_use]
    pub fn new(bits: u32, value: u64) -> Self {
        let mut words = vec![0; word_count(bits)];
        words[0] = value;
        Self::from_words(bits, words)
    }

    /// Creates an integer of `bits` width from a signed value (sign-extending).
    #[must_use]
    pub fn from_i64(bits: u32, value: i64) -> Self {
        let fill = if value < 0 { u64::MAX } else { 0 };
        let mut words = vec![fill; word_count(bits)];
        words[0] = value as u64;
        Self::from_words(bits, words)
    }

    /// Creates an integer from little-endian words, truncating to `bits`.
    #[must_use]
    pub fn from_words(bits: u32, mut words: Vec<u64>) -> Self {
        words.resize(word_count(bits), 0);
        let mut value = Self { bits, words };
        value.clear_unused_bits();
        value
    }

    /// All-zero integer.
    #[must_use]
    pub fn zero(bits: u32) -> Self {
        Self::new(bits, 0)
    }

    /// All-ones integer.
    #[must_use]
    pub fn all_ones(bits: u32) -> Self {
        Self::from_words(bits, vec![u64::MAX; word_count(bits)])
    }

    fn clear_unused_bits(&mut self) {
        let used = self.bits % 64;
        if used != 0 {
            if let Some(top) = self.words.last_mut() {
                *top &= (1u64 << used) - 1;
            }
        }
        if self.bits == 0 {
            self.words.iter_mut().for_each(|w| *w = 0);
        }
    }

    /// Width in bits.
    #[must_use]
    pub const fn bits(&self) -> u32 {
        self.bits
    }

    /// Little-endian words.
    #[must_use]
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Returns true when every bit is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Returns true when every bit within the width is set.
    #[must_use]
    pub fn is_all_ones(&self) -> bool {
        *self == Self::all_ones(self.bits)
    }

    /// Lowest 64 bits as an unsigned value.
    #[must_use]
    pub fn low_u64(&self) -> u64 {
        self.words[0]
    }

    /// Returns the value as `u64` if it fits.
    #[must_use]
    pub fn to_u64(&self) -> Option<u64> {
        if self.words[1..].iter().all(|w| *w == 0) {
            Some(self.words[0])
        } else {
            None
        }
    }

    /// Sign-interprets the value and returns it as `i64` if it fits.
    #[must_use]
    pub fn to_i64(&self) -> Option<i64> {
        if self.bits == 0 {
            return Some(0);
        }
        if self.bits <= 64 {
            let shift = 64 - self.bits;
            return Some(((self.words[0] << shift) as i64) >> shift);
        }
        let low = self.words[0] as i64;
        let fill = if low < 0 { u64::MAX } else { 0 };
        let sext = Self::from_words(self.bits, {
            let mut words = vec![fill; self.words.len()];
            words[0] = self.words[0];
            words
        });
        (sext == *self).then_some(low)
    }

    /// Returns bit `index`.
    #[must_use]
    pub fn bit(&self, index: u32) -> bool {
        let word = (index / 64) as usize;
        word < self.words.len() && (self.words[word] >> (index % 64)) & 1 == 1
    }

    /// Extracts `width` bits starting at bit `offset` as a new integer of `width` bits.
    #[must_use]
    pub fn extract(&self, offset: u32, width: u32) -> Self {
        self.lshr(offset).trunc(width)
    }

    /// Splits the integer into little-endian limbs of `limb_bits` each.
    ///
    /// The last limb is zero-extended when the width is not a multiple of `limb_bits`.
    #[must_use]
    pub fn split(&self, limb_bits: u32) -> Vec<ApInt> {
        let count = self.bits.div_ceil(limb_bits).max(1);
        (0..count)
            .map(|i| self.extract(i * limb_bits, limb_bits))
            .collect()
    }

    /// Reassembles little-endian limbs into one integer of `bits` width.
    #[must_use]
    pub fn join(limbs: &[ApInt], bits: u32) -> Self {
        let mut result = Self::zero(bits);
        let mut offset = 0;
        for limb in limbs {
            result = result.or(&limb.zext(bits).shl(offset));
            offset += limb.bits;
        }
        result
    }

    /// Zero-extends (or truncates) to `bits`.
    #[must_use]
    pub fn zext(&self, bits: u32) -> Self {
        Self::from_words(bits, self.words.clone())
    }

    /// Sign-extends (or truncates) to `bits`.
    #[must_use]
    pub fn sext(&self, bits: u32) -> Self {
        if bits <= self.bits || self.bits == 0 || !self.bit(self.bits - 1) {
            return self.zext(bits);
        }
        let fill = Self::all_ones(bits).shl(self.bits);
        self.zext(bits).or(&fill)
    }

    /// Truncates to `bits`.
    #[must_use]
    pub fn trunc(&self, bits: u32) -> Self {
        self.zext(bits)
    }

    /// Bitwise not.
    #[must_use]
    pub fn not(&self) -> Self {
        Self::from_words(self.bits, self.words.iter().map(|w| !w).collect())
    }

    fn zip_words(&self, other: &Self, f: impl Fn(u64, u64) -> u64) -> Self {
        let words = self
            .words
            .iter()
            .zip(other.words.iter().chain(std::iter::repeat(&0)))
            .map(|(a, b)| f(*a, *b))
            .collect();
        Self::from_words(self.bits, words)
    }

    /// Bitwise and.
    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        self.zip_words(other, |a, b| a & b)
    }

    /// Bitwise or.
    #[must_use]
    pub fn or(&self, other: &Self) -> Self {
        self.zip_words(other, |a, b| a | b)
    }

    /// Bitwise xor.
    #[must_use]
    pub fn xor(&self, other: &Self) -> Self {
        self.zip_words(other, |a, b| a ^ b)
    }

    /// Addition modulo `2^bits`.
    #[must_use]
    pub fn wrapping_add(&self, other: &Self) -> Self {
        let mut carry = false;
        let words = self
            .words
            .iter()
            .zip(other.words.iter().chain(std::iter::repeat(&0)))
            .map(|(a, b)| {
                let (sum, c1) = a.overflowing_add(*b);
                let (sum, c2) = sum.overflowing_add(u64::from(carry));
                carry = c1 || c2;
                sum
            })
            .collect();
        Self::from_words(self.bits, words)
    }

    /// Subtraction modulo `2^bits`.
    #[must_use]
    pub fn wrapping_sub(&self, other: &Self) -> Self {
        let negated = other.zext(self.bits).not().wrapping_add(&Self::new(self.bits, 1));
        self.wrapping_add(&negated)
    }

    /// Multiplication modulo `2^bits`.
    #[must_use]
    pub fn wrapping_mul(&self, other: &Self) -> Self {
        let mut result = Self::zero(self.bits);
        for i in 0..self.bits {
            if other.bit(i) {
                result = result.wrapping_add(&self.shl(i));
            }
        }
        result
    }

    /// Shift left; shifting by the width or more yields zero.
    #[must_use]
    pub fn shl(&self, amount: u32) -> Self {
        if amount >= self.bits {
            return Self::zero(self.bits);
        }
        let word_shift = (amount / 64) as usize;
        let bit_shift = amount % 64;
        let n = self.words.len();
        let mut words = vec![0u64; n];
        for i in (word_shift..n).rev() {
            let src = i - word_shift;
            let mut w = self.words[src] << bit_shift;
            if bit_shift != 0 && src > 0 {
                w |= self.words[src - 1] >> (64 - bit_shift);
            }
            words[i] = w;
        }
        Self::from_words(self.bits, words)
    }

    /// Logical shift right; shifting by the width or more yields zero.
    #[must_use]
    pub fn lshr(&self, amount: u32) -> Self {
        if amount >= self.bits {
            return Self::zero(self.bits);
        }
        let word_shift = (amount / 64) as usize;
        let bit_shift = amount % 64;
        let n = self.words.len();
        let mut words = vec![0u64; n];
        for i in 0..n - word_shift {
            let src = i + word_shift;
            let mut w = self.words[src] >> bit_shift;
            if bit_shift != 0 && src + 1 < n {
                w |= self.words[src + 1] << (64 - bit_shift);
            }
            words[i] = w;
        }
        Self::from_words(self.bits, words)
    }

    /// Arithmetic shift right.
    #[must_use]
    pub fn ashr(&self, amount: u32) -> Self {
        let negative = self.bits > 0 && self.bit(self.bits - 1);
        let shifted = self.lshr(amount.min(self.bits));
        if !negative {
            return shifted;
        }
        let fill = Self::all_ones(self.bits).shl(self.bits.saturating_sub(amount));
        shifted.or(&fill)
    }

    /// Unsigned comparison.
    #[must_use]
    pub fn ucmp(&self, other: &Self) -> std::cmp::Ordering {
        for (a, b) in self.words.iter().zip(other.words.iter()).rev() {
            match a.cmp(b) {
                std::cmp::Ordering::Equal => {}
                ord => return ord,
            }
        }
        std::cmp::Ordering::Equal
    }

    /// Signed comparison.
    #[must_use]
    pub fn scmp(&self, other: &Self) -> std::cmp::Ordering {
        let a_neg = self.bits > 0 && self.bit(self.bits - 1);
        let b_neg = other.bits > 0 && other.bit(other.bits - 1);
        match (a_neg, b_neg) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => self.ucmp(other),
        }
    }

    /// Returns `Some(k)` when the value is exactly `2^k`.
    #[must_use]
    pub fn exact_log2(&self) -> Option<u32> {
        let ones: u32 = self.words.iter().map(|w| w.count_ones()).sum();
        if ones != 1 {
            return None;
        }
        (0..self.bits).find(|i| self.bit(*i))
    }
}

impl fmt::Display for ApInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(value) = self.to_i64() {
            return write!(f, "{value}");
        }
        write!(f, "0x")?;
        for word in self.words.iter().rev() {
            write!(f, "{word:016x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_and_join() {
        let value = ApInt::from_words(128, vec![0x1122_3344_5566_7788, 0x99aa_bbcc_ddee_ff00]);
        let limbs = value.split(64);
        assert_eq!(limbs.len(), 2);
        assert_eq!(limbs[0].low_u64(), 0x1122_3344_5566_7788);
        assert_eq!(limbs[1].low_u64(), 0x99aa_bbcc_ddee_ff00);
        assert_eq!(ApInt::join(&limbs, 128), value);
    }

    #[test]
    fn test_shifts_cross_words() {
        let one = ApInt::new(128, 1);
        let shifted = one.shl(64);
        assert_eq!(shifted.words(), &[0, 1]);
        assert_eq!(shifted.lshr(63).words(), &[2, 0]);
        assert_eq!(ApInt::new(128, 0xff).shl(60).words(), &[0xf000_0000_0000_0000, 0xf]);
        assert!(one.shl(128).is_zero());
    }

    #[test]
    fn test_add_carries() {
        let a = ApInt::new(128, u64::MAX);
        let sum = a.wrapping_add(&ApInt::new(128, 1));
        assert_eq!(sum.words(), &[0, 1]);
        let wrapped = ApInt::all_ones(128).wrapping_add(&ApInt::new(128, 1));
        assert!(wrapped.is_zero());
        assert_eq!(sum.wrapping_sub(&ApInt::new(128, 1)), a);
    }

    #[test]
    fn test_signed_views() {
        let minus_one = ApInt::from_i64(128, -1);
        assert!(minus_one.is_all_ones());
        assert_eq!(minus_one.to_i64(), Some(-1));
        assert_eq!(ApInt::new(8, 0x80).to_i64(), Some(-128));
        assert_eq!(ApInt::new(8, 0x80).sext(16).low_u64(), 0xff80);
        assert_eq!(ApInt::from_i64(16, -256).ashr(4).to_i64(), Some(-16));
    }

    #[test]
    fn test_exact_log2() {
        assert_eq!(ApInt::new(128, 2).exact_log2(), Some(1));
        assert_eq!(ApInt::new(128, 1).shl(100).exact_log2(), Some(100));
        assert_eq!(ApInt::new(128, 6).exact_log2(), None);
    }
}
