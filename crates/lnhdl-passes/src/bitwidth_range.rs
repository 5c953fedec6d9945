//! Numeric range lattice for bitwidth inference
//!
//! A value set is tracked as a `[min, max]` interval. Two encodings share
//! one struct: exact mode, where both bounds are literal machine integers,
//! and overflow mode, where the bounds are *bit counts* (positive for the
//! unsigned count, negative for the signed count of the absolute value).
//! Overflow mode kicks in whenever an exact bound would not fit an `i64`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Hard cap on representable widths; `get_bits` returns 0 at or above it
pub const BITS_MAX: u32 = 4096;

/// Sentinel `max` for the zero-width ("unknown") range. Downstream passes
/// key on this exact value, so it is kept verbatim.
const UNKNOWN_MAX: i64 = 326768;
const UNKNOWN_MIN: i64 = -32768;

/// A constant bound: exact machine value, or a bit-counted wide value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bound {
    /// Fits a signed 64-bit machine integer
    Exact(i64),
    /// Needs `bits` bits; `negative` selects the signed interpretation
    Bits { bits: u32, negative: bool },
}

impl Bound {
    fn is_exact(self) -> bool {
        matches!(self, Bound::Exact(_))
    }

    /// Encoded bound for overflow mode: bit count, negated when negative
    fn to_bit_encoding(self) -> i64 {
        match self {
            Bound::Exact(0) => 0,
            Bound::Exact(v) => {
                let bits = 64 - v.unsigned_abs().leading_zeros();
                if v < 0 {
                    -i64::from(bits)
                } else {
                    i64::from(bits)
                }
            }
            Bound::Bits { bits, negative } => {
                if negative {
                    -i64::from(bits)
                } else {
                    i64::from(bits)
                }
            }
        }
    }
}

/// Signed/unsigned numeric range with an overflow encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitwidthRange {
    max: i64,
    min: i64,
    overflow: bool,
}

impl BitwidthRange {
    /// Range holding exactly one constant
    pub fn from_const(bound: Bound) -> Self {
        match bound {
            Bound::Exact(v) => Self {
                max: v,
                min: v,
                overflow: false,
            },
            Bound::Bits { .. } => {
                let enc = bound.to_bit_encoding();
                Self {
                    max: enc,
                    min: enc,
                    overflow: true,
                }
            }
        }
    }

    /// Full range of `bits` bits, unsigned or signed
    pub fn from_bits(bits: u32, signed: bool) -> Self {
        let mut r = Self {
            max: 0,
            min: 0,
            overflow: false,
        };
        if signed {
            r.set_sbits(bits);
        } else {
            r.set_ubits(bits);
        }
        r
    }

    /// Narrow to `[min_val, max_val]`
    ///
    /// # Panics
    /// Panics when `max_val < min_val`.
    pub fn set_range(&mut self, min_val: Bound, max_val: Bound) {
        if let (Bound::Exact(lo), Bound::Exact(hi)) = (min_val, max_val) {
            assert!(hi >= lo, "range bounds inverted: [{lo}, {hi}]");
            self.overflow = false;
            self.max = hi;
            self.min = lo;
            return;
        }
        self.overflow = true;
        self.max = max_val.to_bit_encoding();
        self.min = min_val.to_bit_encoding();
    }

    /// Like `set_range`, but asserts the new exact range does not widen
    /// the current exact range
    pub fn set_narrower_range(&mut self, min_val: Bound, max_val: Bound) {
        if !self.overflow {
            if let (Bound::Exact(lo), Bound::Exact(hi)) = (min_val, max_val) {
                debug_assert!(self.max >= hi, "set_narrower_range widened max");
                debug_assert!(self.min <= lo, "set_narrower_range widened min");
            }
        }
        self.set_range(min_val, max_val);
    }

    /// Initialize to the full unsigned range of `size` bits
    ///
    /// `size == 0` denotes an unknown width and yields the sentinel range.
    ///
    /// # Panics
    /// Panics when `size >= BITS_MAX`.
    pub fn set_ubits(&mut self, size: u32) {
        assert!(size < BITS_MAX, "unsigned width {size} exceeds BITS_MAX");

        if size == 0 {
            self.overflow = true;
            self.max = UNKNOWN_MAX;
            self.min = 0;
            return;
        }

        self.min = 0;
        if size > 63 {
            self.overflow = true;
            self.max = i64::from(size); // bit count in overflow mode
        } else {
            self.overflow = false;
            self.max = ((1u64 << size) - 1) as i64;
        }
    }

    /// Initialize to the full signed range of `size` bits
    ///
    /// # Panics
    /// Panics when `size >= BITS_MAX`.
    pub fn set_sbits(&mut self, size: u32) {
        assert!(size < BITS_MAX, "signed width {size} exceeds BITS_MAX");

        if size == 0 {
            self.overflow = true;
            self.max = UNKNOWN_MAX;
            self.min = UNKNOWN_MIN;
            return;
        }

        if size > 63 {
            self.overflow = true;
            self.max = i64::from(size) - 1; // bit counts in overflow mode
            self.min = -(i64::from(size) - 1);
        } else {
            self.overflow = false;
            self.max = ((1u64 << (size - 1)) - 1) as i64;
            self.min = -((1u64 << (size - 1)) as i64);
        }
    }

    /// Minimal bit count representing `[min, max]`
    ///
    /// Adds one bit when `min < 0` so the sign is encodable; deferred-
    /// priority assignment masks must cover the whole symbolic range, so
    /// this never undercounts. Returns 0 when the count would reach
    /// `BITS_MAX` (unable to compute).
    pub fn get_bits(&self) -> u32 {
        if self.overflow {
            let mut bits = self.max;
            if self.min < 0 {
                bits += 1;
            }
            if bits >= i64::from(BITS_MAX) {
                return 0;
            }
            return bits as u32;
        }

        let mut bits = 1u32;
        if self.max != 0 {
            let abs_max = self.max.unsigned_abs();
            bits = 64 - abs_max.leading_zeros();
        }
        if self.min < 0 {
            bits += 1;
        }
        debug_assert!(bits < BITS_MAX);
        bits
    }

    pub fn is_overflow(&self) -> bool {
        self.overflow
    }

    /// Raw maximum: literal value in exact mode, bit encoding in overflow mode
    pub fn max(&self) -> i64 {
        self.max
    }

    /// Raw minimum: literal value in exact mode, bit encoding in overflow mode
    pub fn min(&self) -> i64 {
        self.min
    }
}

impl fmt::Display for BitwidthRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "max:{} min:{} {}",
            self.max,
            self.min,
            if self.overflow { "overflow" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ubits_roundtrip_small_widths() {
        for n in 1..=63u32 {
            let r = BitwidthRange::from_bits(n, false);
            assert_eq!(r.get_bits(), n, "ubits({n})");
            assert!(!r.is_overflow());
        }
    }

    #[test]
    fn sbits_roundtrip_small_widths() {
        for n in 2..=63u32 {
            let r = BitwidthRange::from_bits(n, true);
            assert_eq!(r.get_bits(), n, "sbits({n})");
        }
        // sbits(1) is [-1, 0]; the negative min always costs a sign bit
        let r = BitwidthRange::from_bits(1, true);
        assert_eq!(r.get_bits(), 2);
    }

    #[test]
    fn wide_widths_switch_to_overflow_mode() {
        let r = BitwidthRange::from_bits(64, false);
        assert!(r.is_overflow());
        assert_eq!(r.max(), 64);
        assert_eq!(r.get_bits(), 64);

        let s = BitwidthRange::from_bits(128, true);
        assert!(s.is_overflow());
        assert_eq!(s.max(), 127);
        assert_eq!(s.min(), -127);
        assert_eq!(s.get_bits(), 128);
    }

    #[test]
    fn zero_width_uses_sentinel_range() {
        let u = BitwidthRange::from_bits(0, false);
        assert!(u.is_overflow());
        assert_eq!(u.max(), 326768);
        assert_eq!(u.min(), 0);

        let s = BitwidthRange::from_bits(0, true);
        assert_eq!(s.max(), 326768);
        assert_eq!(s.min(), -32768);
    }

    #[test]
    fn exact_unsigned_bits_is_ceil_log2() {
        let mut r = BitwidthRange::from_const(Bound::Exact(0));
        assert_eq!(r.get_bits(), 1);

        r.set_range(Bound::Exact(0), Bound::Exact(1));
        assert_eq!(r.get_bits(), 1);
        r.set_range(Bound::Exact(0), Bound::Exact(15));
        assert_eq!(r.get_bits(), 4);
        r.set_range(Bound::Exact(0), Bound::Exact(16));
        assert_eq!(r.get_bits(), 5);
    }

    #[test]
    fn negative_min_adds_a_sign_bit() {
        let mut r = BitwidthRange::from_const(Bound::Exact(0));
        r.set_range(Bound::Exact(-1), Bound::Exact(15));
        assert_eq!(r.get_bits(), 5);
        r.set_range(Bound::Exact(-8), Bound::Exact(15));
        assert_eq!(r.get_bits(), 5);
    }

    #[test]
    fn const_construction() {
        let r = BitwidthRange::from_const(Bound::Exact(42));
        assert_eq!(r.min(), 42);
        assert_eq!(r.max(), 42);
        assert!(!r.is_overflow());

        let wide = BitwidthRange::from_const(Bound::Bits {
            bits: 90,
            negative: true,
        });
        assert!(wide.is_overflow());
        assert_eq!(wide.max(), -90);
        assert_eq!(wide.min(), -90);
    }

    #[test]
    fn wide_range_bounds_encode_bit_counts() {
        let mut r = BitwidthRange::from_const(Bound::Exact(0));
        r.set_range(
            Bound::Exact(0),
            Bound::Bits {
                bits: 70,
                negative: false,
            },
        );
        assert!(r.is_overflow());
        assert_eq!(r.max(), 70);
        assert_eq!(r.min(), 0);
        assert_eq!(r.get_bits(), 70);
    }

    #[test]
    fn unable_to_compute_returns_zero() {
        let mut r = BitwidthRange::from_const(Bound::Exact(0));
        r.set_range(
            Bound::Exact(0),
            Bound::Bits {
                bits: BITS_MAX,
                negative: false,
            },
        );
        assert_eq!(r.get_bits(), 0);
    }

    #[test]
    #[should_panic]
    fn inverted_range_panics() {
        let mut r = BitwidthRange::from_const(Bound::Exact(0));
        r.set_range(Bound::Exact(5), Bound::Exact(3));
    }
}
