//! Fixed-length bit vectors used for instruction opcodes, data registers and raw shifts.
//!
//! Bit `0` of a [`TapRegister`] is the first bit clocked into (or out of) the chain. The
//! textual representation is MSB-first, so the last character of a bit string is bit `0`.

use std::fmt;
use std::str::FromStr;

use bitvec::prelude::*;
use once_cell::unsync::OnceCell;

/// Errors which can occur while creating or manipulating a [`TapRegister`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    /// A register needs to hold at least one bit.
    #[error("A register must be at least one bit long")]
    InvalidLength,
    /// Two registers, or a register and a bit string, differ in length.
    #[error("Register length mismatch: expected {expected} bits, got {actual}")]
    LengthMismatch {
        /// The length of the register.
        expected: usize,
        /// The length of the other operand.
        actual: usize,
    },
    /// A bit string contained something other than `0` and `1`.
    #[error("Invalid character {0:?} in bit string")]
    InvalidCharacter(char),
}

/// An ordered sequence of bits with a length fixed at creation.
#[derive(Clone)]
pub struct TapRegister {
    bits: BitVec<u8, Lsb0>,
    /// Cached MSB-first string, dropped on every mutation.
    string: OnceCell<String>,
}

impl TapRegister {
    /// Create a register of `len` bits, all cleared.
    pub fn new(len: usize) -> Result<Self, RegisterError> {
        Self::filled(len, false)
    }

    /// Create a register of `len` bits, all set to `value`.
    pub fn filled(len: usize, value: bool) -> Result<Self, RegisterError> {
        if len == 0 {
            return Err(RegisterError::InvalidLength);
        }

        Ok(Self {
            bits: BitVec::repeat(value, len),
            string: OnceCell::new(),
        })
    }

    /// Create a register holding a copy of `bits`.
    pub fn from_bits(bits: &BitSlice<u8, Lsb0>) -> Result<Self, RegisterError> {
        if bits.is_empty() {
            return Err(RegisterError::InvalidLength);
        }

        Ok(Self {
            bits: bits.to_bitvec(),
            string: OnceCell::new(),
        })
    }

    /// Create a register of `len` bits holding the low bits of `value`.
    ///
    /// Bits above 64 are cleared.
    pub fn with_value(len: usize, value: u64) -> Result<Self, RegisterError> {
        let mut register = Self::new(len)?;
        for (i, mut bit) in register.bits.iter_mut().enumerate().take(64) {
            *bit = value & (1 << i) != 0;
        }
        Ok(register)
    }

    /// The number of bits in the register.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Registers are never empty, this exists for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Get bit `index`, or `None` if it is out of range.
    pub fn get(&self, index: usize) -> Option<bool> {
        self.bits.get(index).map(|bit| *bit)
    }

    /// Set bit `index` to `value`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range, like slice indexing does.
    pub fn set(&mut self, index: usize, value: bool) {
        self.invalidate();
        self.bits.set(index, value);
    }

    pub fn as_bitslice(&self) -> &BitSlice<u8, Lsb0> {
        &self.bits
    }

    pub fn as_mut_bitslice(&mut self) -> &mut BitSlice<u8, Lsb0> {
        self.invalidate();
        &mut self.bits
    }

    /// Set every bit to `value`.
    pub fn fill(&mut self, value: bool) {
        self.invalidate();
        self.bits.fill(value);
    }

    /// Copy the contents of `bits` into this register. The lengths have to match.
    pub fn copy_from_bitslice(&mut self, bits: &BitSlice<u8, Lsb0>) -> Result<(), RegisterError> {
        self.check_len(bits.len())?;
        self.invalidate();
        self.bits.copy_from_bitslice(bits);
        Ok(())
    }

    /// The MSB-first string representation of the register.
    ///
    /// The string is cached until the register is modified.
    pub fn to_bit_string(&self) -> &str {
        self.string.get_or_init(|| {
            self.bits
                .iter()
                .rev()
                .map(|bit| if *bit { '1' } else { '0' })
                .collect()
        })
    }

    /// Load the register from an MSB-first bit string of exactly [`len`](Self::len) characters.
    ///
    /// On error the register is left unchanged.
    pub fn init_from_str(&mut self, s: &str) -> Result<(), RegisterError> {
        self.check_len(s.chars().count())?;

        let mut bits = BitVec::<u8, Lsb0>::with_capacity(self.len());
        for c in s.chars().rev() {
            match c {
                '0' => bits.push(false),
                '1' => bits.push(true),
                other => return Err(RegisterError::InvalidCharacter(other)),
            }
        }

        self.bits = bits;
        self.invalidate();
        Ok(())
    }

    /// Compare two registers of the same length, returning `true` if they are equal.
    pub fn compare(&self, other: &TapRegister) -> Result<bool, RegisterError> {
        self.check_len(other.len())?;
        Ok(self.bits == other.bits)
    }

    /// Match against an MSB-first pattern in which `?` matches either bit value.
    ///
    /// A pattern of the wrong length or with invalid characters never matches.
    pub fn matches(&self, pattern: &str) -> bool {
        if pattern.chars().count() != self.len() {
            return false;
        }

        pattern
            .chars()
            .rev()
            .zip(self.bits.iter())
            .all(|(c, bit)| match c {
                '?' => true,
                '0' => !*bit,
                '1' => *bit,
                _ => false,
            })
    }

    /// Add one, treating the register as an unsigned binary counter. Wraps to zero.
    pub fn increment(&mut self) {
        self.invalidate();
        for mut bit in self.bits.iter_mut() {
            *bit = !*bit;
            if *bit {
                break;
            }
        }
    }

    /// Subtract one, treating the register as an unsigned binary counter. Wraps to all ones.
    pub fn decrement(&mut self) {
        self.invalidate();
        for mut bit in self.bits.iter_mut() {
            *bit = !*bit;
            if !*bit {
                break;
            }
        }
    }

    /// Logical shift towards the most significant bit, filling with zeros.
    pub fn shift_left(&mut self, by: usize) {
        self.invalidate();
        if by >= self.len() {
            self.bits.fill(false);
        } else {
            // bitvec shifts are named by memory direction, not by value.
            self.bits.shift_right(by);
        }
    }

    /// Logical shift towards bit `0`, filling with zeros.
    pub fn shift_right(&mut self, by: usize) {
        self.invalidate();
        if by >= self.len() {
            self.bits.fill(false);
        } else {
            self.bits.shift_left(by);
        }
    }

    /// Returns the common value if all bits are equal.
    pub fn all_bits_same_value(&self) -> Option<bool> {
        if self.bits.all() {
            Some(true)
        } else if self.bits.not_any() {
            Some(false)
        } else {
            None
        }
    }

    /// The low 64 bits of the register as an integer.
    pub fn to_u64(&self) -> u64 {
        self.bits
            .iter()
            .take(64)
            .enumerate()
            .fold(0, |acc, (i, bit)| acc | (u64::from(*bit) << i))
    }

    fn check_len(&self, actual: usize) -> Result<(), RegisterError> {
        if actual != self.len() {
            return Err(RegisterError::LengthMismatch {
                expected: self.len(),
                actual,
            });
        }
        Ok(())
    }

    fn invalidate(&mut self) {
        self.string.take();
    }
}

impl PartialEq for TapRegister {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits
    }
}

impl Eq for TapRegister {}

impl fmt::Debug for TapRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TapRegister({}: {})", self.len(), self.to_bit_string())
    }
}

impl fmt::Display for TapRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_bit_string())
    }
}

impl FromStr for TapRegister {
    type Err = RegisterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut register = Self::new(s.chars().count())?;
        register.init_from_str(s)?;
        Ok(register)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn reg(s: &str) -> TapRegister {
        s.parse().unwrap()
    }

    #[test]
    fn zero_length_is_rejected() {
        assert_eq!(TapRegister::new(0).unwrap_err(), RegisterError::InvalidLength);
        assert_eq!(
            "".parse::<TapRegister>().unwrap_err(),
            RegisterError::InvalidLength
        );
    }

    #[test]
    fn string_is_msb_first() {
        let mut r = TapRegister::new(4).unwrap();
        r.set(0, true);
        assert_eq!(r.to_bit_string(), "0001");

        r.set(3, true);
        assert_eq!(r.to_bit_string(), "1001");
        assert_eq!(r.to_u64(), 0b1001);
    }

    #[test]
    fn string_round_trip_all_lengths() {
        for len in 1..=1024 {
            let mut r = TapRegister::new(len).unwrap();
            for i in (0..len).step_by(3) {
                r.set(i, true);
            }
            let s = r.to_bit_string().to_owned();

            let mut copy = TapRegister::new(len).unwrap();
            copy.init_from_str(&s).unwrap();
            assert_eq!(copy, r, "length {len}");
        }
    }

    #[test]
    fn init_from_str_requires_exact_length() {
        let mut r = reg("1010");
        assert_eq!(
            r.init_from_str("101"),
            Err(RegisterError::LengthMismatch {
                expected: 4,
                actual: 3
            })
        );
        assert_eq!(r.init_from_str("10x0"), Err(RegisterError::InvalidCharacter('x')));
        assert_eq!(r.to_bit_string(), "1010");
    }

    #[test]
    fn increment_wraps() {
        let mut r = TapRegister::filled(7, true).unwrap();
        r.increment();
        assert_eq!(r.all_bits_same_value(), Some(false));

        r.decrement();
        assert_eq!(r.all_bits_same_value(), Some(true));
    }

    #[test]
    fn increment_counts() {
        let mut r = TapRegister::new(4).unwrap();
        for expected in 1..16u64 {
            r.increment();
            assert_eq!(r.to_u64(), expected);
        }
        r.increment();
        assert_eq!(r.to_u64(), 0);
    }

    #[test]
    fn cached_string_follows_mutation() {
        let mut r = reg("0000");
        assert_eq!(r.to_bit_string(), "0000");
        r.increment();
        assert_eq!(r.to_bit_string(), "0001");
        r.fill(true);
        assert_eq!(r.to_string(), "1111");
    }

    #[test_case("1011", 1, "0110"; "left by one")]
    #[test_case("1011", 3, "1000"; "left by three")]
    #[test_case("1011", 4, "0000"; "left by length")]
    #[test_case("1011", 0, "1011"; "left by zero")]
    fn shift_left(input: &str, by: usize, expected: &str) {
        let mut r = reg(input);
        r.shift_left(by);
        assert_eq!(r.to_bit_string(), expected);
    }

    #[test_case("1011", 1, "0101"; "right by one")]
    #[test_case("1011", 3, "0001"; "right by three")]
    #[test_case("1011", 9, "0000"; "right past length")]
    fn shift_right(input: &str, by: usize, expected: &str) {
        let mut r = reg(input);
        r.shift_right(by);
        assert_eq!(r.to_bit_string(), expected);
    }

    #[test]
    fn compare_is_reflexive_and_symmetric() {
        let a = reg("1100");
        let b = reg("1100");
        let c = reg("0011");

        assert!(a.compare(&a).unwrap());
        assert_eq!(a.compare(&b).unwrap(), b.compare(&a).unwrap());
        assert_eq!(a.compare(&c).unwrap(), c.compare(&a).unwrap());
        assert!(!a.compare(&c).unwrap());
    }

    #[test]
    fn compare_requires_equal_length() {
        assert_eq!(
            reg("11").compare(&reg("110")),
            Err(RegisterError::LengthMismatch {
                expected: 2,
                actual: 3
            })
        );
    }

    #[test_case("10?1", true)]
    #[test_case("????", true)]
    #[test_case("0??1", false)]
    #[test_case("1?1", false)]
    fn wildcard_match(pattern: &str, expected: bool) {
        assert_eq!(reg("1011").matches(pattern), expected);
    }

    #[test]
    fn with_value_sets_low_bits() {
        let r = TapRegister::with_value(6, 0b101101).unwrap();
        assert_eq!(r.to_bit_string(), "101101");

        let r = TapRegister::with_value(70, u64::MAX).unwrap();
        assert_eq!(r.get(63), Some(true));
        assert_eq!(r.get(64), Some(false));
        assert_eq!(r.get(70), None);
    }

    #[test]
    fn all_bits_same_value() {
        assert_eq!(reg("000").all_bits_same_value(), Some(false));
        assert_eq!(reg("111").all_bits_same_value(), Some(true));
        assert_eq!(reg("101").all_bits_same_value(), None);
    }
}
