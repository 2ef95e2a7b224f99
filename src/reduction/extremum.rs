//! Minimum / maximum reductions with optional index tracking.

use crate::algebra::Numeric;

use super::{Reduction, ReductionKind};

/// Which extremum is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Min,
    Max,
}

impl Direction {
    /// Identity element of the fold.
    #[inline]
    fn identity<T: Numeric>(self) -> T {
        match self {
            Direction::Min => T::infinity(),
            Direction::Max => T::neg_infinity(),
        }
    }

    /// Lane mask of where `candidate` strictly improves on `best`.
    #[inline]
    fn improves<T: Numeric>(self, candidate: T, best: T) -> T {
        match self {
            Direction::Min => candidate.lt_mask(best),
            Direction::Max => candidate.gt_mask(best),
        }
    }
}

/// Which part of the accumulator is written out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    /// Extremal values only.
    Value,
    /// Positions of the extremal values only.
    Index,
    /// Values, then positions.
    Both,
}

/// Lane-wise min or max over the reduced index.
///
/// When positions are tracked the accumulator holds `[values..., indices...]`.
/// A lane is overwritten only when the incoming value is strictly better, so
/// among equal values the first one folded in keeps its index.
///
/// # Example
///
/// ```rust
/// use kerfold::reduction::{Direction, Extremum, Reduction, Report};
///
/// let r = Extremum::new(1, Direction::Min, Report::Both);
/// let mut acc = [0.0f32; 2];
/// r.initialize(&mut acc);
/// for (j, v) in [5.0f32, 3.0, 3.0, 7.0].iter().enumerate() {
///     r.reduce_pair_short(&mut acc, &[*v], j as f32);
/// }
/// let mut out = [0.0f32; 2];
/// r.finalize_output(&acc, &mut out);
/// assert_eq!(out, [3.0, 1.0]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extremum {
    width: usize,
    direction: Direction,
    report: Report,
}

impl Extremum {
    pub fn new(width: usize, direction: Direction, report: Report) -> Self {
        Self {
            width,
            direction,
            report,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn report(&self) -> Report {
        self.report
    }

    #[inline]
    fn tracks_index(&self) -> bool {
        self.report != Report::Value
    }

    /// Blend `value` (and `index`) into lane `k` where it improves on the stored entry.
    #[inline]
    fn fold_lane<T: Numeric>(&self, acc: &mut [T], k: usize, value: T, index: T) {
        let mask = self.direction.improves(value, acc[k]);
        acc[k] = T::select(mask, value, acc[k]);
        if self.tracks_index() {
            let slot = self.width + k;
            acc[slot] = T::select(mask, index, acc[slot]);
        }
    }
}

impl<T: Numeric> Reduction<T> for Extremum {
    fn kind(&self) -> ReductionKind {
        match (self.direction, self.report) {
            (Direction::Min, Report::Value) => ReductionKind::Min,
            (Direction::Min, Report::Index) => ReductionKind::ArgMin,
            (Direction::Min, Report::Both) => ReductionKind::MinArgMin,
            (Direction::Max, Report::Value) => ReductionKind::Max,
            (Direction::Max, Report::Index) => ReductionKind::ArgMax,
            (Direction::Max, Report::Both) => ReductionKind::MaxArgMax,
        }
    }

    fn formula_width(&self) -> usize {
        self.width
    }

    fn output_width(&self) -> usize {
        match self.report {
            Report::Both => 2 * self.width,
            Report::Value | Report::Index => self.width,
        }
    }

    fn accumulator_width(&self) -> usize {
        if self.tracks_index() {
            2 * self.width
        } else {
            self.width
        }
    }

    fn initialize(&self, acc: &mut [T]) {
        let (values, indices) = acc.split_at_mut(self.width);
        values.fill(self.direction.identity());
        indices.fill(T::zero());
    }

    #[inline]
    fn reduce_pair(&self, acc: &mut [T], other: &[T]) {
        for k in 0..self.width {
            let index = if self.tracks_index() {
                other[self.width + k]
            } else {
                T::zero()
            };
            self.fold_lane(acc, k, other[k], index);
        }
    }

    #[inline]
    fn reduce_pair_short(&self, acc: &mut [T], value: &[T], index: T) {
        for (k, &v) in value.iter().enumerate() {
            self.fold_lane(acc, k, v, index);
        }
    }

    fn finalize_output(&self, acc: &[T], out: &mut [T]) {
        let w = self.width;
        match self.report {
            Report::Value => out.copy_from_slice(&acc[..w]),
            Report::Index => out.copy_from_slice(&acc[w..2 * w]),
            Report::Both => out.copy_from_slice(&acc[..2 * w]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::Half2;

    fn fold<T: Numeric>(r: &Extremum, values: &[T]) -> Vec<T> {
        let mut acc = vec![T::zero(); Reduction::<T>::accumulator_width(r)];
        r.initialize(&mut acc);
        for (j, &v) in values.iter().enumerate() {
            r.reduce_pair_short(&mut acc, &[v], T::from_index(j));
        }
        acc
    }

    #[test]
    fn test_ties_keep_earliest() {
        let r = Extremum::new(1, Direction::Min, Report::Both);
        assert_eq!(fold(&r, &[4.0f64, 1.0, 9.0, 1.0]), vec![1.0, 1.0]);

        let r = Extremum::new(1, Direction::Max, Report::Both);
        assert_eq!(fold(&r, &[4.0f64, 9.0, 9.0, 1.0]), vec![9.0, 1.0]);
    }

    #[test]
    fn test_merge_keeps_earlier_partial_on_tie() {
        let r = Extremum::new(1, Direction::Min, Report::Both);
        let mut first = fold(&r, &[5.0f32, 3.0]);
        // Second tile saw an equal minimum at global index 2.
        let second = [3.0f32, 2.0];
        r.reduce_pair(&mut first, &second);
        assert_eq!(first, vec![3.0, 1.0]);

        let better = [2.0f32, 6.0];
        r.reduce_pair(&mut first, &better);
        assert_eq!(first, vec![2.0, 6.0]);
    }

    #[test]
    fn test_value_only_accumulator() {
        let r = Extremum::new(2, Direction::Max, Report::Value);
        assert_eq!(Reduction::<f64>::accumulator_width(&r), 2);
        let mut acc = [0.0f64; 2];
        r.initialize(&mut acc);
        r.reduce_pair_short(&mut acc, &[1.0, -3.0], 0.0);
        r.reduce_pair_short(&mut acc, &[0.0, -1.0], 1.0);
        assert_eq!(acc, [1.0, -1.0]);

        let mut other = [0.0f64; 2];
        r.initialize(&mut other);
        r.reduce_pair_short(&mut other, &[4.0, -2.0], 2.0);
        r.reduce_pair(&mut acc, &other);
        assert_eq!(acc, [4.0, -1.0]);
    }

    #[test]
    fn test_nan_never_wins() {
        let r = Extremum::new(1, Direction::Min, Report::Both);
        assert_eq!(fold(&r, &[2.0f64, f64::NAN, 1.0]), vec![1.0, 2.0]);
    }

    #[test]
    fn test_packed_lanes_tie_independently() {
        let r = Extremum::new(1, Direction::Min, Report::Both);
        let values = [
            Half2::new(3.0, 1.0),
            Half2::new(1.0, 1.0),
            Half2::new(1.0, 0.5),
        ];
        let acc = fold(&r, &values);
        assert_eq!(acc[0], Half2::new(1.0, 0.5));
        assert_eq!(acc[1], Half2::new(1.0, 2.0));
    }
}
