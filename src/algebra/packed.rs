//! Packed reduced-precision representation: two `f16` lanes per value.
//!
//! Each [`Half2`] carries two independent scalar lanes, and every operation acts on
//! both lanes at once. Transcendental functions are evaluated per lane in `f32`
//! and rounded back to `f16`. Indices stored in a lane are exact up to 2048.

use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub};

use half::f16;

use super::Numeric;

/// Two packed half-precision lanes.
///
/// # Example
///
/// ```rust
/// use kerfold::algebra::{Half2, Numeric};
///
/// let a = Half2::new(1.0, 4.0);
/// let b = Half2::new(2.0, 3.0);
///
/// // Lane-wise comparison: lane 0 is less, lane 1 is not.
/// assert_eq!(a.lt_mask(b), Half2::new(1.0, 0.0));
/// assert_eq!(a.min_lane(b), Half2::new(1.0, 3.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Half2 {
    lo: f16,
    hi: f16,
}

impl Half2 {
    /// Pack two lanes, rounding each to half precision.
    pub fn new(lo: f32, hi: f32) -> Self {
        Self {
            lo: f16::from_f32(lo),
            hi: f16::from_f32(hi),
        }
    }

    /// Same value in both lanes.
    pub fn splat(value: f32) -> Self {
        Self::new(value, value)
    }

    /// Lane 0 as `f32`.
    pub fn lo(self) -> f32 {
        self.lo.to_f32()
    }

    /// Lane 1 as `f32`.
    pub fn hi(self) -> f32 {
        self.hi.to_f32()
    }

    #[inline]
    fn map(self, f: impl Fn(f32) -> f32) -> Self {
        Self::new(f(self.lo()), f(self.hi()))
    }

    #[inline]
    fn zip(self, rhs: Self, f: impl Fn(f32, f32) -> f32) -> Self {
        Self::new(f(self.lo(), rhs.lo()), f(self.hi(), rhs.hi()))
    }
}

#[inline]
fn lane_bits(mask: f16) -> u16 {
    (((mask.to_bits() & 0x7FFF) != 0) as u16).wrapping_neg()
}

#[inline]
fn blend(mask: f16, a: f16, b: f16) -> f16 {
    let m = lane_bits(mask);
    f16::from_bits((a.to_bits() & m) | (b.to_bits() & !m))
}

impl Add for Half2 {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| a + b)
    }
}

impl Sub for Half2 {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| a - b)
    }
}

impl Mul for Half2 {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| a * b)
    }
}

impl Div for Half2 {
    type Output = Self;

    #[inline]
    fn div(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| a / b)
    }
}

impl Neg for Half2 {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Self {
            lo: -self.lo,
            hi: -self.hi,
        }
    }
}

impl AddAssign for Half2 {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Numeric for Half2 {
    const LANES: usize = 2;
    const MAX_EXACT_INDEX: u64 = 1 << f16::MANTISSA_DIGITS;

    fn name() -> &'static str {
        "half2"
    }

    #[inline]
    fn zero() -> Self {
        Self {
            lo: f16::ZERO,
            hi: f16::ZERO,
        }
    }

    #[inline]
    fn one() -> Self {
        Self {
            lo: f16::ONE,
            hi: f16::ONE,
        }
    }

    #[inline]
    fn infinity() -> Self {
        Self {
            lo: f16::INFINITY,
            hi: f16::INFINITY,
        }
    }

    #[inline]
    fn neg_infinity() -> Self {
        Self {
            lo: f16::NEG_INFINITY,
            hi: f16::NEG_INFINITY,
        }
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        let lane = f16::from_f64(value);
        Self { lo: lane, hi: lane }
    }

    #[inline]
    fn lane(self, lane: usize) -> f64 {
        match lane {
            0 => self.lo.to_f64(),
            _ => self.hi.to_f64(),
        }
    }

    #[inline]
    fn mul_add(self, a: Self, b: Self) -> Self {
        Self::new(
            self.lo().mul_add(a.lo(), b.lo()),
            self.hi().mul_add(a.hi(), b.hi()),
        )
    }

    #[inline]
    fn lt_mask(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| (a < b) as u8 as f32)
    }

    #[inline]
    fn eq_mask(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| (a == b) as u8 as f32)
    }

    #[inline]
    fn select(mask: Self, a: Self, b: Self) -> Self {
        Self {
            lo: blend(mask.lo, a.lo, b.lo),
            hi: blend(mask.hi, a.hi, b.hi),
        }
    }

    #[inline]
    fn exp(self) -> Self {
        self.map(f32::exp)
    }

    #[inline]
    fn ln(self) -> Self {
        self.map(f32::ln)
    }

    #[inline]
    fn sin(self) -> Self {
        self.map(f32::sin)
    }

    #[inline]
    fn cos(self) -> Self {
        self.map(f32::cos)
    }

    #[inline]
    fn sqrt(self) -> Self {
        self.map(f32::sqrt)
    }

    #[inline]
    fn abs(self) -> Self {
        self.map(f32::abs)
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        self.map(|x| x.powi(n))
    }

    #[inline]
    fn round(self) -> Self {
        self.map(|x| (x + 0.5).floor())
    }
}
