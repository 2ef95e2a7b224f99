//! Additive reductions.

use crate::algebra::Numeric;

use super::{Reduction, ReductionKind};

/// Lane-wise sum over the reduced index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sum {
    width: usize,
}

impl Sum {
    pub fn new(width: usize) -> Self {
        Self { width }
    }
}

impl<T: Numeric> Reduction<T> for Sum {
    fn kind(&self) -> ReductionKind {
        ReductionKind::Sum
    }

    fn formula_width(&self) -> usize {
        self.width
    }

    fn output_width(&self) -> usize {
        self.width
    }

    fn accumulator_width(&self) -> usize {
        self.width
    }

    fn initialize(&self, acc: &mut [T]) {
        acc.fill(T::zero());
    }

    #[inline]
    fn reduce_pair(&self, acc: &mut [T], other: &[T]) {
        for (a, &o) in acc.iter_mut().zip(other) {
            *a += o;
        }
    }

    #[inline]
    fn reduce_pair_short(&self, acc: &mut [T], value: &[T], _index: T) {
        for (a, &v) in acc.iter_mut().zip(value) {
            *a += v;
        }
    }

    fn finalize_output(&self, acc: &[T], out: &mut [T]) {
        out.copy_from_slice(acc);
    }
}

/// Reduction whose output is identically zero.
///
/// Folds are no-ops; this is the gradient of argmin/argmax reductions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZeroReduction {
    width: usize,
}

impl ZeroReduction {
    pub fn new(width: usize) -> Self {
        Self { width }
    }
}

impl<T: Numeric> Reduction<T> for ZeroReduction {
    fn kind(&self) -> ReductionKind {
        ReductionKind::Zero
    }

    fn formula_width(&self) -> usize {
        self.width
    }

    fn output_width(&self) -> usize {
        self.width
    }

    fn accumulator_width(&self) -> usize {
        0
    }

    fn initialize(&self, _acc: &mut [T]) {}

    fn reduce_pair(&self, _acc: &mut [T], _other: &[T]) {}

    fn reduce_pair_short(&self, _acc: &mut [T], _value: &[T], _index: T) {}

    fn finalize_output(&self, _acc: &[T], out: &mut [T]) {
        out.fill(T::zero());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::Half2;

    #[test]
    fn test_sum_merge_matches_single_pass() {
        let r = Sum::new(2);
        let values = [[1.0f64, 2.0], [3.0, 4.0], [5.0, 6.0]];

        let mut whole = [0.0; 2];
        r.initialize(&mut whole);
        for (j, v) in values.iter().enumerate() {
            r.reduce_pair_short(&mut whole, v, j as f64);
        }

        let mut left = [0.0; 2];
        let mut right = [0.0; 2];
        r.initialize(&mut left);
        r.initialize(&mut right);
        r.reduce_pair_short(&mut left, &values[0], 0.0);
        r.reduce_pair_short(&mut right, &values[1], 1.0);
        r.reduce_pair_short(&mut right, &values[2], 2.0);
        r.reduce_pair(&mut left, &right);

        assert_eq!(whole, [9.0, 12.0]);
        assert_eq!(left, whole);
    }

    #[test]
    fn test_sum_packed() {
        let r = Sum::new(1);
        let mut acc = [Half2::default()];
        r.initialize(&mut acc);
        r.reduce_pair_short(&mut acc, &[Half2::new(1.0, -1.0)], Half2::splat(0.0));
        r.reduce_pair_short(&mut acc, &[Half2::new(2.5, 4.0)], Half2::splat(1.0));
        let mut out = [Half2::default()];
        r.finalize_output(&acc, &mut out);
        assert_eq!(out[0], Half2::new(3.5, 3.0));
    }

    #[test]
    fn test_zero_reduction() {
        let r = ZeroReduction::new(3);
        let mut out = [7.0f32; 3];
        r.finalize_output(&[], &mut out);
        assert_eq!(out, [0.0; 3]);
    }
}
