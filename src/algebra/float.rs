//! Single and double precision kernels.

use num_traits::{Float, One, Zero};

use super::Numeric;

macro_rules! impl_float_numeric {
    ($t:ty, $bits:ty, $abs_mask:expr, $name:expr) => {
        impl Numeric for $t {
            const LANES: usize = 1;
            const MAX_EXACT_INDEX: u64 = 1 << <$t>::MANTISSA_DIGITS;

            fn name() -> &'static str {
                $name
            }

            #[inline]
            fn zero() -> Self {
                <$t as Zero>::zero()
            }

            #[inline]
            fn one() -> Self {
                <$t as One>::one()
            }

            #[inline]
            fn infinity() -> Self {
                <$t as Float>::infinity()
            }

            #[inline]
            fn neg_infinity() -> Self {
                <$t as Float>::neg_infinity()
            }

            #[inline]
            fn from_f64(value: f64) -> Self {
                value as $t
            }

            #[inline]
            fn lane(self, _lane: usize) -> f64 {
                self as f64
            }

            #[inline]
            fn mul_add(self, a: Self, b: Self) -> Self {
                <$t as Float>::mul_add(self, a, b)
            }

            #[inline]
            fn lt_mask(self, rhs: Self) -> Self {
                ((self < rhs) as u8) as $t
            }

            #[inline]
            fn eq_mask(self, rhs: Self) -> Self {
                ((self == rhs) as u8) as $t
            }

            #[inline]
            fn select(mask: Self, a: Self, b: Self) -> Self {
                // All-ones where the mask lane is non-zero (sign ignored).
                let m = (((mask.to_bits() & $abs_mask) != 0) as $bits).wrapping_neg();
                <$t>::from_bits((a.to_bits() & m) | (b.to_bits() & !m))
            }

            #[inline]
            fn exp(self) -> Self {
                <$t as Float>::exp(self)
            }

            #[inline]
            fn ln(self) -> Self {
                <$t as Float>::ln(self)
            }

            #[inline]
            fn sin(self) -> Self {
                <$t as Float>::sin(self)
            }

            #[inline]
            fn cos(self) -> Self {
                <$t as Float>::cos(self)
            }

            #[inline]
            fn sqrt(self) -> Self {
                <$t as Float>::sqrt(self)
            }

            #[inline]
            fn abs(self) -> Self {
                <$t as Float>::abs(self)
            }

            #[inline]
            fn powi(self, n: i32) -> Self {
                <$t as Float>::powi(self, n)
            }

            #[inline]
            fn round(self) -> Self {
                <$t as Float>::floor(self + <$t as One>::one() / (2 as $t))
            }

            #[inline]
            fn recip(self) -> Self {
                <$t as Float>::recip(self)
            }
        }
    };
}

impl_float_numeric!(f32, u32, 0x7FFF_FFFFu32, "f32");
impl_float_numeric!(f64, u64, 0x7FFF_FFFF_FFFF_FFFFu64, "f64");
