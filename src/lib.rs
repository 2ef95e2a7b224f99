//! # kerfold
//!
//! Symbolic formulas over paired index sets, their structural gradients, and
//! the reductions that fold them without materialising the interaction matrix.
//!
//! ## Features
//!
//! - **Owned formula graphs**: interned nodes with widths validated at construction
//! - **Symbolic differentiation**: reverse-mode gradients built as new nodes in the same graph
//! - **Reduction protocol**: sum, min/max with first-seen argmin/argmax, log-sum-exp
//! - **One numeric interface**: `f32`, `f64` and packed two-lane half precision
//! - **CPU driver**: tiled inner loop, rayon-parallel across output rows
//!
//! ## Quick Start
//!
//! ```rust
//! use kerfold::{reduce, Axis, Bindings, Formula, ReductionKind, Variable};
//!
//! // K[i, j] = exp(-g * |x_i - y_j|^2), summed over j
//! let mut f = Formula::new();
//! let x = f.var(Variable::outer(0, 2))?;
//! let y = f.var(Variable::inner(1, 2))?;
//! let g = f.var(Variable::param(2, 1))?;
//! let k = f.gaussian_kernel(x, y, g)?;
//!
//! let xs = [0.0f64, 0.0, 1.0, 1.0];
//! let ys = [0.0f64, 0.0, 0.0, 1.0, 3.0, 3.0];
//! let gamma = [0.5f64];
//! let bindings = Bindings::new().outer(0, &xs).inner(1, &ys).param(2, &gamma);
//!
//! let out = reduce(&f, k, ReductionKind::Sum, Axis::Inner, &bindings)?;
//! assert_eq!(out.len(), 2);
//! assert!((out[0] - (1.0 + (-0.5f64).exp() + (-9.0f64).exp())).abs() < 1e-12);
//! # Ok::<(), kerfold::FormulaError>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         User API                            │
//! │   Formula::{var, exp, mat_vec_mult, ...} → NodeId           │
//! │   Formula::diff(root, var, grad_in) → NodeId                │
//! │   Reduce::new(root, kind, axis).execute(backend, ...)       │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Backend (driver)                       │
//! │   Program::compile(formula, root) → flat evaluation plan    │
//! │   per output row: initialize → fold tiles → finalize        │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Numeric dispatch                         │
//! │   f32 / f64:  scalar lanes                                  │
//! │   Half2:      two f16 lanes, branchless masks and selects   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod algebra;
pub mod backend;
mod bindings;
mod error;
pub mod formula;
pub mod reduction;

// Re-exports
pub use algebra::{Half2, Numeric, Scalar};
pub use backend::{Backend, Cpu};
pub use bindings::Bindings;
pub use error::{FormulaError, Result};
pub use formula::{BinaryOp, Category, Formula, Node, NodeId, Op, Program, UnaryOp, Variable};
pub use reduction::{AnyReduction, Reduction, ReductionKind};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Which index a reduction folds over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Axis {
    /// Fold over `j`; one output row per `i`.
    Inner,
    /// Fold over `i`; one output row per `j`.
    Outer,
}

impl Axis {
    /// Category indexing the output rows.
    pub fn output_category(self) -> Category {
        match self {
            Axis::Inner => Category::Outer,
            Axis::Outer => Category::Inner,
        }
    }

    /// Category that is folded away.
    pub fn reduced_category(self) -> Category {
        match self {
            Axis::Inner => Category::Inner,
            Axis::Outer => Category::Outer,
        }
    }

    /// Axis whose output rows are indexed like `category`.
    ///
    /// Parameters are reported per outer row.
    pub fn producing(category: Category) -> Axis {
        match category {
            Category::Inner => Axis::Outer,
            Category::Outer | Category::Param => Axis::Inner,
        }
    }
}

/// A reduction of one formula node over one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reduce {
    pub root: NodeId,
    pub kind: ReductionKind,
    pub axis: Axis,
}

impl Reduce {
    pub fn new(root: NodeId, kind: ReductionKind, axis: Axis) -> Self {
        Self { root, kind, axis }
    }

    /// Sum over `j`, the most common reduction.
    pub fn sum(root: NodeId) -> Self {
        Self::new(root, ReductionKind::Sum, Axis::Inner)
    }

    /// Width of one output row.
    pub fn output_width(&self, formula: &Formula) -> Result<usize> {
        Ok(self.kind.output_width(formula.width(self.root)?))
    }

    /// Accumulator strategy for this reduction.
    pub fn strategy(&self, formula: &Formula) -> Result<AnyReduction> {
        Ok(self.kind.build(formula.width(self.root)?))
    }

    /// Run this reduction on `backend`.
    pub fn execute<T, B>(
        &self,
        backend: &B,
        formula: &Formula,
        bindings: &Bindings<'_, T>,
    ) -> Result<Vec<T>>
    where
        B: Backend,
        T: crate::backend::BackendScalar<B>,
    {
        backend.reduce(formula, self, bindings)
    }

    /// Gradient of this reduction with respect to `var`.
    ///
    /// `grad_in` is the adjoint of the output: a variable indexed like the
    /// output rows with the output width. The result is another reduction,
    /// built in `formula`, whose output rows are indexed like `var` (per outer
    /// row for parameters, which the caller sums).
    ///
    /// - `Sum` gives a `Sum` of `root.diff(var, grad_in)`.
    /// - `ArgMin` / `ArgMax` give a `Zero` reduction.
    /// - Other kinds fail with [`FormulaError::NoGradient`].
    pub fn grad(&self, formula: &mut Formula, var: Variable, grad_in: Variable) -> Result<Reduce> {
        let axis = Axis::producing(var.category);
        match self.kind {
            ReductionKind::Sum => {
                let expected = self.axis.output_category();
                let width = self.output_width(formula)?;
                if grad_in.category != expected || grad_in.width != width {
                    return Err(FormulaError::GradientInput {
                        var: grad_in,
                        expected,
                        width,
                    });
                }
                let root = formula.grad(self.root, var, grad_in)?;
                Ok(Reduce::new(root, ReductionKind::Sum, axis))
            }
            ReductionKind::ArgMin | ReductionKind::ArgMax => {
                let root = formula.zero(var.width)?;
                Ok(Reduce::new(root, ReductionKind::Zero, axis))
            }
            kind => Err(FormulaError::NoGradient(kind)),
        }
    }
}

/// One-shot reduction on the default CPU driver.
pub fn reduce<T: Numeric>(
    formula: &Formula,
    root: NodeId,
    kind: ReductionKind,
    axis: Axis,
    bindings: &Bindings<'_, T>,
) -> Result<Vec<T>> {
    Reduce::new(root, kind, axis).execute(&Cpu::default(), formula, bindings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_categories() {
        assert_eq!(Axis::Inner.output_category(), Category::Outer);
        assert_eq!(Axis::Outer.reduced_category(), Category::Outer);
        assert_eq!(Axis::producing(Category::Inner), Axis::Outer);
        assert_eq!(Axis::producing(Category::Param), Axis::Inner);
    }

    #[test]
    fn test_grad_input_validated() {
        let mut f = Formula::new();
        let x = f.var(Variable::outer(0, 3)).unwrap();
        let y = f.var(Variable::inner(0, 3)).unwrap();
        let root = f.sqdist(x, y).unwrap();
        let r = Reduce::sum(root);

        // Adjoint must be outer-indexed with width 1.
        let err = r
            .grad(&mut f, Variable::outer(0, 3), Variable::inner(5, 1))
            .unwrap_err();
        assert!(matches!(err, FormulaError::GradientInput { .. }));
        assert!(r
            .grad(&mut f, Variable::outer(0, 3), Variable::outer(5, 2))
            .is_err());

        let g = r
            .grad(&mut f, Variable::inner(0, 3), Variable::outer(5, 1))
            .unwrap();
        assert_eq!(g.kind, ReductionKind::Sum);
        assert_eq!(g.axis, Axis::Outer);
        assert_eq!(g.output_width(&f).unwrap(), 3);
    }

    #[test]
    fn test_grad_of_index_reductions_is_zero() {
        let mut f = Formula::new();
        let x = f.var(Variable::outer(0, 2)).unwrap();
        let y = f.var(Variable::inner(0, 2)).unwrap();
        let root = f.sqdist(x, y).unwrap();
        let r = Reduce::new(root, ReductionKind::ArgMin, Axis::Inner);
        let g = r
            .grad(&mut f, Variable::inner(0, 2), Variable::outer(9, 1))
            .unwrap();
        assert_eq!(g.kind, ReductionKind::Zero);
        assert_eq!(g.axis, Axis::Outer);

        let xs = [1.0f32, 2.0, 3.0, 4.0];
        let ys = [0.0f32; 6];
        let bindings = Bindings::new().outer(0, &xs).inner(0, &ys);
        let out = g.execute(&Cpu::default(), &f, &bindings).unwrap();
        assert_eq!(out, vec![0.0; 6]);
    }

    #[test]
    fn test_min_has_no_gradient() {
        let mut f = Formula::new();
        let x = f.var(Variable::outer(0, 1)).unwrap();
        for kind in [
            ReductionKind::Min,
            ReductionKind::MinArgMin,
            ReductionKind::LogSumExp,
        ] {
            let r = Reduce::new(x, kind, Axis::Inner);
            assert_eq!(
                r.grad(&mut f, Variable::outer(0, 1), Variable::outer(1, 1))
                    .unwrap_err(),
                FormulaError::NoGradient(kind)
            );
        }
    }
}
