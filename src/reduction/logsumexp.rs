//! Log-sum-exp reduction.
//!
//! The accumulator keeps, per lane, a running maximum `m` and a rescaled sum
//! `s = sum(exp(v - m))`, laid out as `[m..., s...]`. The output is
//! `m + ln(s)`. Shifting by the running maximum keeps every exponent at most
//! zero, so large inputs do not overflow.

use crate::algebra::Numeric;

use super::{Reduction, ReductionKind};

/// Stable `log(sum_j exp(f_j))`, lane by lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSumExp {
    width: usize,
}

impl LogSumExp {
    pub fn new(width: usize) -> Self {
        Self { width }
    }

    /// Merge the pair `(m2, s2)` into `(m1, s1)`.
    #[inline]
    fn merge<T: Numeric>(m1: T, s1: T, m2: T, s2: T) -> (T, T) {
        let m = m1.max_lane(m2);
        let s = s1 * (m1 - m).exp() + s2 * (m2 - m).exp();
        // While both sides are still -inf the shift is NaN; keep the empty sum.
        let empty = m.eq_mask(T::neg_infinity());
        let s = T::select(empty, s1, s);
        // A +inf maximum also gives a NaN shift; keep the sum of the side holding it.
        let overflow = m.eq_mask(T::infinity());
        let s_inf = T::select(m1.eq_mask(T::infinity()), s1, s2);
        (m, T::select(overflow, s_inf, s))
    }
}

impl<T: Numeric> Reduction<T> for LogSumExp {
    fn kind(&self) -> ReductionKind {
        ReductionKind::LogSumExp
    }

    fn formula_width(&self) -> usize {
        self.width
    }

    fn output_width(&self) -> usize {
        self.width
    }

    fn accumulator_width(&self) -> usize {
        2 * self.width
    }

    fn initialize(&self, acc: &mut [T]) {
        let (m, s) = acc.split_at_mut(self.width);
        m.fill(T::neg_infinity());
        s.fill(T::zero());
    }

    #[inline]
    fn reduce_pair(&self, acc: &mut [T], other: &[T]) {
        let w = self.width;
        for k in 0..w {
            let (m, s) = Self::merge(acc[k], acc[w + k], other[k], other[w + k]);
            acc[k] = m;
            acc[w + k] = s;
        }
    }

    #[inline]
    fn reduce_pair_short(&self, acc: &mut [T], value: &[T], _index: T) {
        let w = self.width;
        for (k, &v) in value.iter().enumerate() {
            let (m, s) = Self::merge(acc[k], acc[w + k], v, T::one());
            acc[k] = m;
            acc[w + k] = s;
        }
    }

    fn finalize_output(&self, acc: &[T], out: &mut [T]) {
        let (m, s) = acc.split_at(self.width);
        for ((o, &m), &s) in out.iter_mut().zip(m).zip(s) {
            *o = m + s.ln();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lse(values: &[f64]) -> f64 {
        let r = LogSumExp::new(1);
        let mut acc = [0.0; 2];
        r.initialize(&mut acc);
        for (j, &v) in values.iter().enumerate() {
            r.reduce_pair_short(&mut acc, &[v], j as f64);
        }
        let mut out = [0.0];
        r.finalize_output(&acc, &mut out);
        out[0]
    }

    #[test]
    fn test_matches_direct_formula() {
        let values = [0.5, -1.0, 2.0, 0.0];
        let direct = values.iter().map(|v: &f64| v.exp()).sum::<f64>().ln();
        assert!((lse(&values) - direct).abs() < 1e-12);
    }

    #[test]
    fn test_large_inputs_do_not_overflow() {
        let out = lse(&[1000.0, 1000.0]);
        assert!((out - (1000.0 + 2.0f64.ln())).abs() < 1e-9);
    }

    #[test]
    fn test_positive_infinity_entries() {
        assert_eq!(lse(&[1.0, f64::INFINITY, 2.0]), f64::INFINITY);
        assert_eq!(lse(&[f64::INFINITY, f64::INFINITY]), f64::INFINITY);
        assert_eq!(lse(&[f64::NEG_INFINITY, f64::INFINITY]), f64::INFINITY);
    }

    #[test]
    fn test_negative_infinity_entries() {
        assert_eq!(lse(&[f64::NEG_INFINITY, f64::NEG_INFINITY]), f64::NEG_INFINITY);
        assert!((lse(&[f64::NEG_INFINITY, 0.0]) - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_merge_partials() {
        let r = LogSumExp::new(1);
        let mut a = [0.0f32; 2];
        let mut b = [0.0f32; 2];
        r.initialize(&mut a);
        r.initialize(&mut b);
        r.reduce_pair_short(&mut a, &[1.0], 0.0);
        r.reduce_pair_short(&mut b, &[2.0], 1.0);
        r.reduce_pair_short(&mut b, &[3.0], 2.0);
        r.reduce_pair(&mut a, &b);
        let mut out = [0.0f32];
        r.finalize_output(&a, &mut out);
        let direct = (1.0f32.exp() + 2.0f32.exp() + 3.0f32.exp()).ln();
        assert!((out[0] - direct).abs() < 1e-5);
    }
}
