//! Error types for formula construction, binding and reduction setup.
//!
//! Every error here is raised while a graph or a reduction is being assembled.
//! Evaluation itself never fails: floating-point special values propagate.

use thiserror::Error;

use crate::formula::{Category, NodeId, Variable};
use crate::reduction::ReductionKind;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FormulaError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FormulaError {
    /// Node id does not belong to this arena.
    #[error("Unknown node {0:?}")]
    UnknownNode(NodeId),

    /// Elementwise operands must have equal widths or one of them must be scalar.
    #[error("{op}: incompatible widths {left} and {right}")]
    WidthMismatch {
        op: &'static str,
        left: usize,
        right: usize,
    },

    /// Matrix width must be a multiple of the vector width.
    #[error("{op}: width {matrix} is not divisible by {vector}")]
    NotDivisible {
        op: &'static str,
        matrix: usize,
        vector: usize,
    },

    /// Operand has to be a scalar (width 1).
    #[error("{op} expects a scalar operand, got width {width}")]
    NotScalar { op: &'static str, width: usize },

    /// Operand must have at least one component.
    #[error("{op} is only possible when the input width is non zero")]
    ZeroWidth { op: &'static str },

    /// Extraction range outside the operand.
    #[error("{op}: range {start}..{end} out of bounds for width {width}")]
    OutOfRange {
        op: &'static str,
        start: usize,
        end: usize,
        width: usize,
    },

    /// Adjoint width differs from the differentiated node's width.
    #[error("Gradient input has width {got}, expected {expected}")]
    GradientWidth { expected: usize, got: usize },

    /// Adjoint variable of a reduction gradient is not indexed like the output.
    #[error("Gradient input {var:?} must be {expected:?}-indexed with width {width}")]
    GradientInput {
        var: Variable,
        expected: Category,
        width: usize,
    },

    /// Reduction kind has no differentiable path.
    #[error("No gradient implemented for {0:?} reduction")]
    NoGradient(ReductionKind),

    /// Variable used by the formula has no bound data.
    #[error("No data bound for {0:?}")]
    MissingBinding(Variable),

    /// Bound data length is not a whole number of rows.
    #[error("Data for {var:?} has length {len}, not a multiple of width {width}")]
    BindingLength {
        var: Variable,
        len: usize,
        width: usize,
    },

    /// Reduced range is longer than the scalar type can index exactly.
    #[error("{kind:?} over {reduced} rows exceeds the exact index range of {scalar} (up to {limit})")]
    IndexRange {
        kind: ReductionKind,
        reduced: usize,
        limit: u64,
        scalar: &'static str,
    },

    /// Requested row is outside the bound data.
    #[error("{category:?} row {row} out of range for {rows} rows")]
    RowOutOfRange {
        category: Category,
        row: usize,
        rows: usize,
    },

    /// Derivative exponent `n - 1` is not representable.
    #[error("Pow({0}) cannot be differentiated: exponent overflow")]
    ExponentOverflow(i32),

    /// Two variables of one category disagree on the number of rows.
    #[error("{category:?} variables disagree on row count: {expected} vs {got}")]
    RowMismatch {
        category: Category,
        expected: usize,
        got: usize,
    },
}
