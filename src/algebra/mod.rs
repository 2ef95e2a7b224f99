//! Numeric representations for formula evaluation.
//!
//! This module defines the [`Numeric`] kernel trait and its implementations:
//! - `f32`: single precision
//! - `f64`: double precision
//! - [`Half2`]: two packed `f16` lanes processed together per operation
//!
//! Every operation and reduction is written once against [`Numeric`]. Conditional
//! semantics (steps, one-hot encodings, index-selecting maxima, min/max folds) are
//! expressed with lane-wise masks and [`Numeric::select`], never with a branch on
//! the value, so the packed representation behaves exactly like the scalar ones
//! lane by lane.

mod float;
mod packed;

pub use packed::Half2;

use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub};

/// Marker trait for element types that can live in bound buffers.
pub trait Scalar:
    Copy + Clone + Send + Sync + Default + std::fmt::Debug + 'static + bytemuck::Pod
{
}

impl Scalar for f32 {}
impl Scalar for f64 {}
impl Scalar for Half2 {}

/// Generic numeric kernel interface.
///
/// # Masks
///
/// Comparison methods return a *mask*: a value whose lanes are `1` where the
/// comparison holds and `0` elsewhere. Masks feed [`Numeric::select`], which
/// picks lane-wise between two values without branching.
///
/// | Method | Lane result |
/// |--------|-------------|
/// | `a.lt_mask(b)` | `a < b` |
/// | `a.gt_mask(b)` | `a > b` |
/// | `a.eq_mask(b)` | `a == b` |
///
/// NaN compares false everywhere, so a NaN lane never wins a strict comparison.
pub trait Numeric:
    Scalar
    + PartialEq
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
{
    /// Number of independent scalar lanes carried by one value.
    const LANES: usize;

    /// Largest index that [`from_index`](Numeric::from_index) encodes exactly.
    const MAX_EXACT_INDEX: u64;

    /// Short name used in logs.
    fn name() -> &'static str;

    /// Additive identity.
    fn zero() -> Self;

    /// Multiplicative identity.
    fn one() -> Self;

    /// Positive infinity in every lane.
    fn infinity() -> Self;

    /// Negative infinity in every lane.
    fn neg_infinity() -> Self;

    /// Broadcast a constant to every lane (rounded to the representation).
    fn from_f64(value: f64) -> Self;

    /// Encode an index as a value in every lane.
    #[inline]
    fn from_index(index: usize) -> Self {
        Self::from_f64(index as f64)
    }

    /// Read lane `lane` back as `f64`.
    fn lane(self, lane: usize) -> f64;

    /// Fused multiply-add: `self * a + b`.
    fn mul_add(self, a: Self, b: Self) -> Self;

    /// Lane mask of `self < rhs`.
    fn lt_mask(self, rhs: Self) -> Self;

    /// Lane mask of `self == rhs`.
    fn eq_mask(self, rhs: Self) -> Self;

    /// Lane mask of `self > rhs`.
    #[inline]
    fn gt_mask(self, rhs: Self) -> Self {
        rhs.lt_mask(self)
    }

    /// Branchless lane select: `a` where `mask` is set, `b` elsewhere.
    ///
    /// Equivalent to `mask * a + (1 - mask) * b` for finite operands, but exact
    /// when either operand is infinite.
    fn select(mask: Self, a: Self, b: Self) -> Self;

    /// Lane-wise maximum; ties keep `self`.
    #[inline]
    fn max_lane(self, rhs: Self) -> Self {
        Self::select(rhs.gt_mask(self), rhs, self)
    }

    /// Lane-wise minimum; ties keep `self`.
    #[inline]
    fn min_lane(self, rhs: Self) -> Self {
        Self::select(rhs.lt_mask(self), rhs, self)
    }

    fn exp(self) -> Self;
    fn ln(self) -> Self;
    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn sqrt(self) -> Self;
    fn abs(self) -> Self;
    fn powi(self, n: i32) -> Self;

    /// Round half up: `floor(self + 0.5)`.
    fn round(self) -> Self;

    #[inline]
    fn recip(self) -> Self {
        Self::one() / self
    }
}
