//! Reduction accumulators.
//!
//! A reduction folds the values of a formula over one index set into a small
//! per-row accumulator. Every strategy follows the same lifecycle, driven once
//! per output row:
//!
//! ```text
//! initialize ──▶ reduce_pair_short / reduce_pair (*) ──▶ finalize_output
//! ```
//!
//! | Kind | Accumulator | Output | Identity |
//! |------|-------------|--------|----------|
//! | `Sum` | `w` | `w` | `0` |
//! | `Min` / `Max` | `w` | `w` | `+∞` / `-∞` |
//! | `ArgMin` / `ArgMax` | `2w` | `w` (indices) | `(±∞, 0)` |
//! | `MinArgMin` / `MaxArgMax` | `2w` | `2w` (values, then indices) | `(±∞, 0)` |
//! | `LogSumExp` | `2w` | `w` | `(-∞, 0)` |
//! | `Zero` | `0` | `w` | none |
//!
//! Index-tracking strategies replace a stored entry only on a strict
//! improvement, so among equal values the first one folded in is kept.

mod extremum;
mod logsumexp;
mod sum;

pub use extremum::{Direction, Extremum, Report};
pub use logsumexp::LogSumExp;
pub use sum::{Sum, ZeroReduction};

use crate::algebra::Numeric;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The reductions available to [`Reduce`](crate::Reduce).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ReductionKind {
    Sum,
    Min,
    Max,
    ArgMin,
    ArgMax,
    /// Minimum and its index, output as `[values..., indices...]`.
    MinArgMin,
    /// Maximum and its index, output as `[values..., indices...]`.
    MaxArgMax,
    /// Numerically stable `log(sum(exp(.)))`.
    LogSumExp,
    /// Always zero; the gradient of index-producing reductions.
    Zero,
}

impl ReductionKind {
    pub fn name(self) -> &'static str {
        match self {
            ReductionKind::Sum => "Sum",
            ReductionKind::Min => "Min",
            ReductionKind::Max => "Max",
            ReductionKind::ArgMin => "ArgMin",
            ReductionKind::ArgMax => "ArgMax",
            ReductionKind::MinArgMin => "MinArgMin",
            ReductionKind::MaxArgMax => "MaxArgMax",
            ReductionKind::LogSumExp => "LogSumExp",
            ReductionKind::Zero => "Zero",
        }
    }

    /// Strategy for a formula of width `width`.
    pub fn build(self, width: usize) -> AnyReduction {
        use Direction::{Max, Min};
        match self {
            ReductionKind::Sum => AnyReduction::Sum(Sum::new(width)),
            ReductionKind::Min => AnyReduction::Extremum(Extremum::new(width, Min, Report::Value)),
            ReductionKind::Max => AnyReduction::Extremum(Extremum::new(width, Max, Report::Value)),
            ReductionKind::ArgMin => {
                AnyReduction::Extremum(Extremum::new(width, Min, Report::Index))
            }
            ReductionKind::ArgMax => {
                AnyReduction::Extremum(Extremum::new(width, Max, Report::Index))
            }
            ReductionKind::MinArgMin => {
                AnyReduction::Extremum(Extremum::new(width, Min, Report::Both))
            }
            ReductionKind::MaxArgMax => {
                AnyReduction::Extremum(Extremum::new(width, Max, Report::Both))
            }
            ReductionKind::LogSumExp => AnyReduction::LogSumExp(LogSumExp::new(width)),
            ReductionKind::Zero => AnyReduction::Zero(ZeroReduction::new(width)),
        }
    }

    /// Output width for a formula of width `width`.
    pub fn output_width(self, width: usize) -> usize {
        match self {
            ReductionKind::MinArgMin | ReductionKind::MaxArgMax => 2 * width,
            _ => width,
        }
    }

    /// True for reductions that record the position of the selected term.
    pub fn tracks_index(self) -> bool {
        matches!(
            self,
            ReductionKind::ArgMin
                | ReductionKind::ArgMax
                | ReductionKind::MinArgMin
                | ReductionKind::MaxArgMax
        )
    }

    /// True for reductions whose output holds indices only.
    pub fn is_index_only(self) -> bool {
        matches!(self, ReductionKind::ArgMin | ReductionKind::ArgMax)
    }
}

/// The accumulator protocol.
///
/// All buffers are plain slices; the caller owns them and guarantees their
/// lengths: `acc` has [`accumulator_width`](Reduction::accumulator_width),
/// `value` has [`formula_width`](Reduction::formula_width) and `out` has
/// [`output_width`](Reduction::output_width). Widths are fixed at construction.
pub trait Reduction<T: Numeric> {
    fn kind(&self) -> ReductionKind;

    /// Width of the formula being reduced.
    fn formula_width(&self) -> usize;

    fn output_width(&self) -> usize;

    fn accumulator_width(&self) -> usize;

    /// Write the identity element into `acc`.
    fn initialize(&self, acc: &mut [T]);

    /// Fold another accumulator-shaped buffer into `acc`.
    ///
    /// `other` must cover entries visited after everything already in `acc`;
    /// tie-breaking strategies keep `acc`'s entry when the two are equal.
    fn reduce_pair(&self, acc: &mut [T], other: &[T]);

    /// Fold one formula value whose position along the reduced index is `index`.
    fn reduce_pair_short(&self, acc: &mut [T], value: &[T], index: T);

    /// Write the result held in `acc` into `out`.
    fn finalize_output(&self, acc: &[T], out: &mut [T]);
}

/// Closed set of reduction strategies, dispatched by tag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnyReduction {
    Sum(Sum),
    Extremum(Extremum),
    LogSumExp(LogSumExp),
    Zero(ZeroReduction),
}

macro_rules! dispatch {
    ($self:ident, $r:ident => $e:expr) => {
        match $self {
            AnyReduction::Sum($r) => $e,
            AnyReduction::Extremum($r) => $e,
            AnyReduction::LogSumExp($r) => $e,
            AnyReduction::Zero($r) => $e,
        }
    };
}

impl<T: Numeric> Reduction<T> for AnyReduction {
    fn kind(&self) -> ReductionKind {
        dispatch!(self, r => Reduction::<T>::kind(r))
    }

    fn formula_width(&self) -> usize {
        dispatch!(self, r => Reduction::<T>::formula_width(r))
    }

    fn output_width(&self) -> usize {
        dispatch!(self, r => Reduction::<T>::output_width(r))
    }

    fn accumulator_width(&self) -> usize {
        dispatch!(self, r => Reduction::<T>::accumulator_width(r))
    }

    #[inline]
    fn initialize(&self, acc: &mut [T]) {
        dispatch!(self, r => r.initialize(acc))
    }

    #[inline]
    fn reduce_pair(&self, acc: &mut [T], other: &[T]) {
        dispatch!(self, r => r.reduce_pair(acc, other))
    }

    #[inline]
    fn reduce_pair_short(&self, acc: &mut [T], value: &[T], index: T) {
        dispatch!(self, r => r.reduce_pair_short(acc, value, index))
    }

    #[inline]
    fn finalize_output(&self, acc: &[T], out: &mut [T]) {
        dispatch!(self, r => r.finalize_output(acc, out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run<T: Numeric>(kind: ReductionKind, width: usize, values: &[T]) -> Vec<T> {
        let r = kind.build(width);
        let mut acc = vec![T::zero(); Reduction::<T>::accumulator_width(&r)];
        r.initialize(&mut acc);
        for (j, v) in values.chunks(width).enumerate() {
            r.reduce_pair_short(&mut acc, v, T::from_index(j));
        }
        let mut out = vec![T::zero(); Reduction::<T>::output_width(&r)];
        r.finalize_output(&acc, &mut out);
        out
    }

    #[test]
    fn test_widths() {
        for (kind, acc, out) in [
            (ReductionKind::Sum, 3, 3),
            (ReductionKind::Min, 3, 3),
            (ReductionKind::ArgMax, 6, 3),
            (ReductionKind::MinArgMin, 6, 6),
            (ReductionKind::LogSumExp, 6, 3),
            (ReductionKind::Zero, 0, 3),
        ] {
            let r = kind.build(3);
            assert_eq!(Reduction::<f32>::kind(&r), kind);
            assert_eq!(Reduction::<f32>::accumulator_width(&r), acc, "{:?}", kind);
            assert_eq!(Reduction::<f32>::output_width(&r), out, "{:?}", kind);
            assert_eq!(kind.output_width(3), out);
        }
    }

    #[test]
    fn test_tie_break_first_seen() {
        let values = [5.0f64, 3.0, 3.0, 7.0];
        assert_eq!(run(ReductionKind::Min, 1, &values), vec![3.0]);
        assert_eq!(run(ReductionKind::ArgMin, 1, &values), vec![1.0]);
        assert_eq!(run(ReductionKind::MinArgMin, 1, &values), vec![3.0, 1.0]);
    }

    #[test]
    fn test_max_family() {
        let values = [2.0f32, 9.0, 1.0, 9.0];
        assert_eq!(run(ReductionKind::Max, 1, &values), vec![9.0]);
        assert_eq!(run(ReductionKind::ArgMax, 1, &values), vec![1.0]);
        assert_eq!(run(ReductionKind::MaxArgMax, 1, &values), vec![9.0, 1.0]);
    }

    #[test]
    fn test_per_lane_indices() {
        // Two lanes reduced independently.
        let values = [1.0f64, 8.0, 0.5, 9.0, 0.5, 2.0];
        assert_eq!(
            run(ReductionKind::MinArgMin, 2, &values),
            vec![0.5, 2.0, 1.0, 2.0]
        );
    }

    #[test]
    fn test_empty_fold_gives_identity() {
        let empty: [f64; 0] = [];
        assert_eq!(run(ReductionKind::Sum, 2, &empty), vec![0.0, 0.0]);
        assert_eq!(run(ReductionKind::Min, 1, &empty), vec![f64::INFINITY]);
        assert_eq!(run(ReductionKind::ArgMax, 1, &empty), vec![0.0]);
        assert_eq!(run(ReductionKind::LogSumExp, 1, &empty), vec![f64::NEG_INFINITY]);
    }
}
