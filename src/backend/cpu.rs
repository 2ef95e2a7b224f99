//! CPU driver.

use super::traits::{Backend, BackendScalar};
use crate::algebra::Numeric;
use crate::bindings::Bindings;
use crate::error::{FormulaError, Result};
use crate::formula::{Category, Formula, Program, Resolved};
use crate::reduction::{AnyReduction, Reduction};
use crate::{Axis, Reduce};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Default inner-loop tile length.
pub const DEFAULT_BLOCK_SIZE: usize = 256;

/// CPU driver.
///
/// Each output row owns one accumulator. The reduced index is visited in
/// ascending tiles of `block_size`; every tile is folded into a fresh partial
/// accumulator with `reduce_pair_short` and merged into the row accumulator
/// with `reduce_pair`, then the row is finalized once. With the `parallel`
/// feature, rows are distributed over the rayon pool, each worker holding its
/// own copy of the evaluation plan.
///
/// # Example
///
/// ```rust
/// use kerfold::{Axis, Backend, Bindings, Cpu, Formula, Reduce, ReductionKind, Variable};
///
/// let mut f = Formula::new();
/// let x = f.var(Variable::outer(0, 1))?;
/// let y = f.var(Variable::inner(0, 1))?;
/// let d = f.subtract(x, y)?;
/// let root = f.abs(d)?;
///
/// let xs = [0.0f64, 10.0];
/// let ys = [4.0f64, 1.0, 9.0, 1.0];
/// let bindings = Bindings::new().outer(0, &xs).inner(0, &ys);
///
/// let argmin = Reduce::new(root, ReductionKind::ArgMin, Axis::Inner);
/// let out = Cpu::default().reduce(&f, &argmin, &bindings)?;
/// assert_eq!(out, vec![1.0, 2.0]);
/// # Ok::<(), kerfold::FormulaError>(())
/// ```
#[derive(Clone, Debug)]
pub struct Cpu {
    block_size: usize,
    parallel: bool,
}

impl Default for Cpu {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            parallel: cfg!(feature = "parallel"),
        }
    }
}

impl Cpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Driver that never uses the thread pool.
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }

    /// Set the tile length of the reduced index (at least 1).
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// Reduce one output row into `out`.
    #[allow(clippy::too_many_arguments)]
    fn reduce_row<T: Numeric>(
        &self,
        program: &mut Program<T>,
        data: &Resolved<'_, T>,
        reduction: &AnyReduction,
        axis: Axis,
        row: usize,
        reduced: usize,
        out: &mut [T],
    ) {
        let width = Reduction::<T>::accumulator_width(reduction);
        let mut acc = vec![T::zero(); width];
        reduction.initialize(&mut acc);

        if width > 0 {
            let mut partial = vec![T::zero(); width];
            for start in (0..reduced).step_by(self.block_size) {
                let end = (start + self.block_size).min(reduced);
                reduction.initialize(&mut partial);
                for k in start..end {
                    let (i, j) = match axis {
                        Axis::Inner => (row, k),
                        Axis::Outer => (k, row),
                    };
                    let value = program.eval(data, i, j);
                    reduction.reduce_pair_short(&mut partial, value, T::from_index(k));
                }
                reduction.reduce_pair(&mut acc, &partial);
            }
        }

        reduction.finalize_output(&acc, out);
    }
}

impl Backend for Cpu {
    fn name() -> &'static str {
        "cpu"
    }

    fn reduce<T>(
        &self,
        formula: &Formula,
        reduce: &Reduce,
        bindings: &Bindings<'_, T>,
    ) -> Result<Vec<T>>
    where
        T: BackendScalar<Self>,
    {
        let reduction = reduce.strategy(formula)?;
        let program = Program::<T>::compile(formula, reduce.root)?;
        let data = program.resolve(bindings)?;

        // A category the root never reads takes its row count from the other
        // bound variables of the formula, or a single row if there are none.
        let count = |category: Category| -> Result<usize> {
            match data.rows(category) {
                Some(n) => Ok(n),
                None => Ok(bindings.rows(formula, category)?.unwrap_or(1)),
            }
        };
        let rows = count(reduce.axis.output_category())?;
        let reduced = count(reduce.axis.reduced_category())?;
        let width = Reduction::<T>::output_width(&reduction);

        // Positions 0..reduced must be representable as `T`.
        if reduce.kind.tracks_index() && reduced as u64 > T::MAX_EXACT_INDEX + 1 {
            return Err(FormulaError::IndexRange {
                kind: reduce.kind,
                reduced,
                limit: T::MAX_EXACT_INDEX,
                scalar: T::name(),
            });
        }

        log::debug!(
            "cpu reduce: {} over {:?}, {} rows x {} reduced, block {}, {}, parallel={}",
            reduce.kind.name(),
            reduce.axis,
            rows,
            reduced,
            self.block_size,
            T::name(),
            self.parallel
        );

        let mut out = vec![T::zero(); rows * width];
        if width == 0 {
            return Ok(out);
        }

        #[cfg(feature = "parallel")]
        if self.parallel {
            out.par_chunks_mut(width).enumerate().for_each_init(
                || program.clone(),
                |program, (row, chunk)| {
                    self.reduce_row(program, &data, &reduction, reduce.axis, row, reduced, chunk)
                },
            );
            return Ok(out);
        }

        let mut program = program;
        for (row, chunk) in out.chunks_mut(width).enumerate() {
            self.reduce_row(&mut program, &data, &reduction, reduce.axis, row, reduced, chunk);
        }
        Ok(out)
    }
}
