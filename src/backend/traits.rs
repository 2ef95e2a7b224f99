//! Backend trait definitions.

use crate::algebra::Numeric;
use crate::bindings::Bindings;
use crate::error::Result;
use crate::formula::Formula;
use crate::Reduce;

/// Marker trait for numeric types supported by a specific backend.
///
/// Lets a backend restrict the representations it can evaluate at compile time.
pub trait BackendScalar<B: Backend>: Numeric {}

/// Evaluation driver for reductions.
///
/// A backend owns traversal order and work partitioning over the
/// `(outer, inner)` index pairs. It must call the reduction protocol once per
/// output row, in the order `initialize`, folds, `finalize_output`, and must fold
/// the reduced index in ascending order (or merge partial accumulators in
/// ascending order) so that index-tracking reductions keep the first extremum.
pub trait Backend: Clone + Send + Sync + 'static {
    /// Backend name for debugging.
    fn name() -> &'static str;

    /// Reduce `reduce.root` over `reduce.axis`.
    ///
    /// Returns a row-major buffer of `rows * output_width` values, one row per
    /// index of the non-reduced category.
    fn reduce<T>(
        &self,
        formula: &Formula,
        reduce: &Reduce,
        bindings: &Bindings<'_, T>,
    ) -> Result<Vec<T>>
    where
        T: BackendScalar<Self>;
}

// CPU supports every numeric representation
impl<T: Numeric> BackendScalar<crate::backend::Cpu> for T {}
