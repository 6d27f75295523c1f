//! Layered-notation arithmetic for quantities that outgrow `f64`.
//!
//! A [`BigNum`] is a normalized `mantissa * 10^exponent` pair covering 0 up
//! to roughly 1e(9.2e18), far past the largest values an idle economy can
//! reach. All engine arithmetic on amounts, rates, and costs goes through
//! this type; raw `f64` math on quantities is reserved for display ratios.
//!
//! Values are non-negative by construction: subtraction saturates at zero
//! and any non-finite or negative input normalizes to [`BigNum::ZERO`].
//! Serde encodes a `BigNum` as a decimal string (`"30"`, `"1.5e340"`),
//! which is the save wire format.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

/// Normalized big number: `mantissa in [1, 10)` (or exactly 0) times
/// `10^exponent`.
#[derive(Debug, Clone, Copy)]
pub struct BigNum {
    mantissa: f64,
    exponent: i64,
}

/// Largest exponent gap where the smaller operand still affects an `f64`
/// mantissa sum.
const ADD_PRECISION_EXP: i64 = 17;

impl BigNum {
    pub const ZERO: BigNum = BigNum {
        mantissa: 0.0,
        exponent: 0,
    };

    pub const ONE: BigNum = BigNum {
        mantissa: 1.0,
        exponent: 0,
    };

    /// Build a normalized value from a raw mantissa/exponent pair.
    /// Non-finite or non-positive mantissas collapse to zero.
    pub fn from_parts(mantissa: f64, exponent: i64) -> Self {
        if !mantissa.is_finite() || mantissa <= 0.0 {
            return Self::ZERO;
        }
        let shift = mantissa.log10().floor();
        let mut m = mantissa / 10f64.powf(shift);
        let mut e = exponent.saturating_add(shift as i64);
        // Guard against rounding on the normalization boundary.
        if m >= 10.0 {
            m /= 10.0;
            e = e.saturating_add(1);
        }
        if m < 1.0 {
            m *= 10.0;
            e = e.saturating_sub(1);
        }
        Self {
            mantissa: m,
            exponent: e,
        }
    }

    /// Convert from `f64`. Negative, NaN, and infinite inputs become zero.
    pub fn from_f64(v: f64) -> Self {
        Self::from_parts(v, 0)
    }

    pub fn from_u32(v: u32) -> Self {
        Self::from_f64(f64::from(v))
    }

    pub fn is_zero(self) -> bool {
        self.mantissa == 0.0
    }

    pub fn mantissa(self) -> f64 {
        self.mantissa
    }

    pub fn exponent(self) -> i64 {
        self.exponent
    }

    /// Saturating conversion to `f64` for display and ratios. Values past
    /// the `f64` range clamp to `f64::MAX`.
    pub fn to_f64(self) -> f64 {
        if self.is_zero() {
            return 0.0;
        }
        if self.exponent > 307 {
            return f64::MAX;
        }
        if self.exponent < -323 {
            return 0.0;
        }
        self.mantissa * 10f64.powi(self.exponent as i32)
    }

    pub fn add(self, other: Self) -> Self {
        if self.is_zero() {
            return other;
        }
        if other.is_zero() {
            return self;
        }
        let (hi, lo) = if self >= other {
            (self, other)
        } else {
            (other, self)
        };
        let diff = hi.exponent - lo.exponent;
        if diff > ADD_PRECISION_EXP {
            return hi;
        }
        Self::from_parts(
            hi.mantissa + lo.mantissa * 10f64.powi(-(diff as i32)),
            hi.exponent,
        )
    }

    /// Saturating subtraction: returns zero when `other >= self`.
    pub fn sub(self, other: Self) -> Self {
        match self.cmp(&other) {
            Ordering::Less | Ordering::Equal => Self::ZERO,
            Ordering::Greater => {
                let diff = self.exponent - other.exponent;
                if diff > ADD_PRECISION_EXP {
                    return self;
                }
                Self::from_parts(
                    self.mantissa - other.mantissa * 10f64.powi(-(diff as i32)),
                    self.exponent,
                )
            }
        }
    }

    pub fn mul(self, other: Self) -> Self {
        if self.is_zero() || other.is_zero() {
            return Self::ZERO;
        }
        Self::from_parts(
            self.mantissa * other.mantissa,
            self.exponent.saturating_add(other.exponent),
        )
    }

    /// Division. A zero divisor yields zero rather than an error; dividing
    /// by zero is an expected edge case in bonus math, not a fault.
    pub fn div(self, other: Self) -> Self {
        if self.is_zero() || other.is_zero() {
            return Self::ZERO;
        }
        Self::from_parts(
            self.mantissa / other.mantissa,
            self.exponent.saturating_sub(other.exponent),
        )
    }

    /// Integer power by repeated squaring. `powi(0)` is one; negative
    /// exponents give the reciprocal.
    pub fn powi(self, n: i64) -> Self {
        if n == 0 {
            return Self::ONE;
        }
        if n < 0 {
            return Self::ONE.div(self.powi(-n));
        }
        if self.is_zero() {
            return Self::ZERO;
        }
        let mut base = self;
        let mut exp = n;
        let mut acc = Self::ONE;
        while exp > 0 {
            if exp & 1 == 1 {
                acc = acc.mul(base);
            }
            base = base.mul(base);
            exp >>= 1;
        }
        acc
    }

    /// Real power via base-10 logarithms.
    pub fn pow(self, p: f64) -> Self {
        if p == 0.0 {
            return Self::ONE;
        }
        if self.is_zero() {
            return Self::ZERO;
        }
        let log = self.exponent as f64 + self.mantissa.log10();
        let r = log * p;
        if !r.is_finite() {
            return Self::ZERO;
        }
        let e = r.floor();
        Self::from_parts(10f64.powf(r - e), e as i64)
    }

    pub fn max(self, other: Self) -> Self {
        if self >= other { self } else { other }
    }

    pub fn min(self, other: Self) -> Self {
        if self <= other { self } else { other }
    }

    /// `self / target` clamped into `[0, 1]`, for progress bars.
    /// A zero target counts as already reached.
    pub fn ratio_to(self, target: Self) -> f64 {
        if target.is_zero() {
            return 1.0;
        }
        if self.is_zero() {
            return 0.0;
        }
        let diff = self.exponent - target.exponent;
        if diff >= 2 {
            return 1.0;
        }
        if diff <= -ADD_PRECISION_EXP {
            return 0.0;
        }
        let r = (self.mantissa / target.mantissa) * 10f64.powi(diff as i32);
        r.clamp(0.0, 1.0)
    }
}

impl Default for BigNum {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for BigNum {
    fn eq(&self, other: &Self) -> bool {
        self.mantissa == other.mantissa && (self.is_zero() || self.exponent == other.exponent)
    }
}

// Normalized values never hold NaN, so total equality is sound.
impl Eq for BigNum {}

impl PartialOrd for BigNum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BigNum {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_zero(), other.is_zero()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self
                .exponent
                .cmp(&other.exponent)
                .then(
                    self.mantissa
                        .partial_cmp(&other.mantissa)
                        .unwrap_or(Ordering::Equal),
                ),
        }
    }
}

impl Add for BigNum {
    type Output = BigNum;
    fn add(self, rhs: BigNum) -> BigNum {
        BigNum::add(self, rhs)
    }
}

impl Sub for BigNum {
    type Output = BigNum;
    fn sub(self, rhs: BigNum) -> BigNum {
        BigNum::sub(self, rhs)
    }
}

impl Mul for BigNum {
    type Output = BigNum;
    fn mul(self, rhs: BigNum) -> BigNum {
        BigNum::mul(self, rhs)
    }
}

impl Div for BigNum {
    type Output = BigNum;
    fn div(self, rhs: BigNum) -> BigNum {
        BigNum::div(self, rhs)
    }
}

// ---------------------------------------------------------------------------
// Display / parsing
// ---------------------------------------------------------------------------

/// Error parsing a decimal string into a [`BigNum`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid big-number literal: {0:?}")]
pub struct ParseBigNumError(pub String);

impl fmt::Display for BigNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "0");
        }
        if self.exponent.abs() <= 15 {
            write!(f, "{}", self.to_f64())
        } else {
            write!(f, "{}e{}", self.mantissa, self.exponent)
        }
    }
}

impl FromStr for BigNum {
    type Err = ParseBigNumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseBigNumError(s.to_string()));
        }
        // Split the exponent off first: "2e400" overflows a plain f64
        // parse, and going through from_parts keeps the mantissa exact.
        if let Some((m_str, e_str)) = s.split_once(['e', 'E']) {
            if let (Ok(m), Ok(e)) = (m_str.parse::<f64>(), e_str.parse::<i64>()) {
                if m.is_finite() {
                    return Ok(Self::from_parts(m, e));
                }
            }
        }
        let v: f64 = s.parse().map_err(|_| ParseBigNumError(s.to_string()))?;
        if !v.is_finite() {
            return Err(ParseBigNumError(s.to_string()));
        }
        Ok(Self::from_f64(v))
    }
}

// ---------------------------------------------------------------------------
// Serde — decimal strings on the wire, with numeric fallback for saves
// written by hand or by older tooling
// ---------------------------------------------------------------------------

impl Serialize for BigNum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct BigNumVisitor;

impl Visitor<'_> for BigNumVisitor {
    type Value = BigNum;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a decimal string or number")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<BigNum, E> {
        v.parse().map_err(de::Error::custom)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<BigNum, E> {
        Ok(BigNum::from_f64(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<BigNum, E> {
        Ok(BigNum::from_f64(v as f64))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<BigNum, E> {
        Ok(BigNum::from_f64(v as f64))
    }
}

impl<'de> Deserialize<'de> for BigNum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(BigNumVisitor)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
