//! Operation kinds: width rules and elementwise evaluation.
//!
//! Each operation declares its output width from its operands' widths (validated
//! once, at construction) and evaluates from already-evaluated operand buffers.
//! Evaluation is pure and allocation-free, and writes exactly the declared width.

use crate::algebra::Numeric;
use crate::error::{FormulaError, Result};

use super::{NodeId, Variable};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Closed set of node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Op {
    Var(Variable),
    Zero { width: usize },
    IntConst(i32),
    /// Real constant, stored as `f64` bits so nodes stay hashable.
    Const { bits: u64 },
    Unary(UnaryOp, NodeId),
    Binary(BinaryOp, NodeId, NodeId),
}

impl Op {
    /// Child node ids, left to right.
    pub fn children(&self) -> impl Iterator<Item = NodeId> {
        let (a, b) = match *self {
            Op::Unary(_, x) => (Some(x), None),
            Op::Binary(_, l, r) => (Some(l), Some(r)),
            _ => (None, None),
        };
        a.into_iter().chain(b)
    }
}

/// Single-operand operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum UnaryOp {
    Minus,
    Exp,
    Log,
    Sin,
    Cos,
    Inv,
    Sqrt,
    Rsqrt,
    Square,
    Abs,
    Sign,
    Step,
    ReLU,
    Pow(i32),
    /// Sum of components (width 1).
    Sum,
    /// Broadcast a scalar to `dim` components.
    SumT { dim: usize },
    /// Squared Euclidean norm (width 1).
    SqNorm2,
    /// Largest component (width 1).
    Max,
    /// Smallest component (width 1).
    Min,
    /// Index of the first largest component (width 1).
    ArgMax,
    /// Index of the first smallest component (width 1).
    ArgMin,
    /// Encode a rounded scalar as a `dim`-wide one-hot vector.
    OneHot { dim: usize },
    /// Components `start..start + dim`.
    Extract { start: usize, dim: usize },
    /// Embed the operand at `start` inside `dim` zeros.
    ExtractT { start: usize, dim: usize },
}

impl UnaryOp {
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Minus => "Minus",
            UnaryOp::Exp => "Exp",
            UnaryOp::Log => "Log",
            UnaryOp::Sin => "Sin",
            UnaryOp::Cos => "Cos",
            UnaryOp::Inv => "Inv",
            UnaryOp::Sqrt => "Sqrt",
            UnaryOp::Rsqrt => "Rsqrt",
            UnaryOp::Square => "Square",
            UnaryOp::Abs => "Abs",
            UnaryOp::Sign => "Sign",
            UnaryOp::Step => "Step",
            UnaryOp::ReLU => "ReLU",
            UnaryOp::Pow(_) => "Pow",
            UnaryOp::Sum => "Sum",
            UnaryOp::SumT { .. } => "SumT",
            UnaryOp::SqNorm2 => "SqNorm2",
            UnaryOp::Max => "Max",
            UnaryOp::Min => "Min",
            UnaryOp::ArgMax => "ArgMax",
            UnaryOp::ArgMin => "ArgMin",
            UnaryOp::OneHot { .. } => "OneHot",
            UnaryOp::Extract { .. } => "Extract",
            UnaryOp::ExtractT { .. } => "ExtractT",
        }
    }

    /// Output width for an operand of width `input`.
    pub fn width(self, input: usize) -> Result<usize> {
        match self {
            UnaryOp::Sum | UnaryOp::SqNorm2 => Ok(1),
            UnaryOp::SumT { dim } => {
                scalar(self.name(), input)?;
                Ok(dim)
            }
            UnaryOp::Max | UnaryOp::Min | UnaryOp::ArgMax | UnaryOp::ArgMin => {
                if input == 0 {
                    return Err(FormulaError::ZeroWidth { op: self.name() });
                }
                Ok(1)
            }
            UnaryOp::OneHot { dim } => {
                scalar(self.name(), input)?;
                if dim == 0 {
                    return Err(FormulaError::ZeroWidth { op: self.name() });
                }
                Ok(dim)
            }
            UnaryOp::Extract { start, dim } => {
                in_range(self.name(), start, dim, input)?;
                Ok(dim)
            }
            UnaryOp::ExtractT { start, dim } => {
                in_range(self.name(), start, input, dim)?;
                Ok(dim)
            }
            _ => Ok(input),
        }
    }

    /// Evaluate into `out` (declared width) from the operand buffer `x`.
    pub fn apply<T: Numeric>(self, out: &mut [T], x: &[T]) {
        match self {
            UnaryOp::Minus => map(out, x, |v| -v),
            UnaryOp::Exp => map(out, x, T::exp),
            UnaryOp::Log => map(out, x, T::ln),
            UnaryOp::Sin => map(out, x, T::sin),
            UnaryOp::Cos => map(out, x, T::cos),
            UnaryOp::Inv => map(out, x, T::recip),
            UnaryOp::Sqrt => map(out, x, T::sqrt),
            UnaryOp::Rsqrt => map(out, x, |v| v.sqrt().recip()),
            UnaryOp::Square => map(out, x, |v| v * v),
            UnaryOp::Abs => map(out, x, T::abs),
            UnaryOp::Sign => map(out, x, |v| v.gt_mask(T::zero()) - v.lt_mask(T::zero())),
            UnaryOp::Step => map(out, x, |v| T::one() - v.lt_mask(T::zero())),
            UnaryOp::ReLU => map(out, x, |v| T::select(v.lt_mask(T::zero()), T::zero(), v)),
            UnaryOp::Pow(n) => map(out, x, |v| v.powi(n)),
            UnaryOp::Sum => {
                out[0] = x.iter().fold(T::zero(), |acc, &v| acc + v);
            }
            UnaryOp::SumT { .. } => out.fill(x[0]),
            UnaryOp::SqNorm2 => {
                out[0] = x.iter().fold(T::zero(), |acc, &v| v.mul_add(v, acc));
            }
            UnaryOp::Max => out[0] = extremum(x, T::gt_mask).0,
            UnaryOp::Min => out[0] = extremum(x, T::lt_mask).0,
            UnaryOp::ArgMax => out[0] = extremum(x, T::gt_mask).1,
            UnaryOp::ArgMin => out[0] = extremum(x, T::lt_mask).1,
            UnaryOp::OneHot { .. } => {
                // Out-of-range inputs give an all-zero vector.
                let r = x[0].round();
                for (k, o) in out.iter_mut().enumerate() {
                    *o = r.eq_mask(T::from_index(k));
                }
            }
            UnaryOp::Extract { start, dim } => out.copy_from_slice(&x[start..start + dim]),
            UnaryOp::ExtractT { start, .. } => {
                out.fill(T::zero());
                out[start..start + x.len()].copy_from_slice(x);
            }
        }
    }
}

/// Two-operand operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BinaryOp {
    Add,
    Subtract,
    Mult,
    Divide,
    /// Concatenation `[a, b]`.
    Concat,
    /// Dot product (width 1).
    ScalProd,
    /// `s * <a, a>` with scalar `s` (width 1).
    SqNormIso,
    /// Row-major `n x p` matrix times `p` vector.
    MatVecMult,
    /// `n` vector times row-major `n x p` matrix.
    VecMatMult,
    /// Outer product, row-major.
    TensorProd,
}

impl BinaryOp {
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "Add",
            BinaryOp::Subtract => "Subtract",
            BinaryOp::Mult => "Mult",
            BinaryOp::Divide => "Divide",
            BinaryOp::Concat => "Concat",
            BinaryOp::ScalProd => "ScalProd",
            BinaryOp::SqNormIso => "SqNormIso",
            BinaryOp::MatVecMult => "MatVecMult",
            BinaryOp::VecMatMult => "VecMatMult",
            BinaryOp::TensorProd => "TensorProd",
        }
    }

    /// True for the elementwise operations that broadcast a scalar operand.
    pub fn broadcasts(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Mult | BinaryOp::Divide
        )
    }

    /// Output width for operands of widths `left` and `right`.
    pub fn width(self, left: usize, right: usize) -> Result<usize> {
        let mismatch = FormulaError::WidthMismatch {
            op: self.name(),
            left,
            right,
        };
        match self {
            BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Mult | BinaryOp::Divide => {
                if left == right || right == 1 {
                    Ok(left)
                } else if left == 1 {
                    Ok(right)
                } else {
                    Err(mismatch)
                }
            }
            BinaryOp::Concat => Ok(left + right),
            BinaryOp::ScalProd => {
                if left != right {
                    return Err(mismatch);
                }
                Ok(1)
            }
            BinaryOp::SqNormIso => {
                scalar(self.name(), left)?;
                Ok(1)
            }
            BinaryOp::MatVecMult => {
                divisible(self.name(), left, right)?;
                Ok(left / right)
            }
            BinaryOp::VecMatMult => {
                divisible(self.name(), right, left)?;
                Ok(right / left)
            }
            BinaryOp::TensorProd => Ok(left * right),
        }
    }

    /// Evaluate into `out` (declared width) from operand buffers `a` and `b`.
    pub fn apply<T: Numeric>(self, out: &mut [T], a: &[T], b: &[T]) {
        match self {
            BinaryOp::Add => zip(out, a, b, |x, y| x + y),
            BinaryOp::Subtract => zip(out, a, b, |x, y| x - y),
            BinaryOp::Mult => zip(out, a, b, |x, y| x * y),
            BinaryOp::Divide => zip(out, a, b, |x, y| x / y),
            BinaryOp::Concat => {
                out[..a.len()].copy_from_slice(a);
                out[a.len()..].copy_from_slice(b);
            }
            BinaryOp::ScalProd => {
                out[0] = a
                    .iter()
                    .zip(b)
                    .fold(T::zero(), |acc, (&x, &y)| x.mul_add(y, acc));
            }
            BinaryOp::SqNormIso => {
                let norm = b.iter().fold(T::zero(), |acc, &v| v.mul_add(v, acc));
                out[0] = norm * a[0];
            }
            BinaryOp::MatVecMult => {
                let p = b.len();
                for (i, o) in out.iter_mut().enumerate() {
                    let row = &a[i * p..(i + 1) * p];
                    *o = row
                        .iter()
                        .zip(b)
                        .fold(T::zero(), |acc, (&m, &v)| m.mul_add(v, acc));
                }
            }
            BinaryOp::VecMatMult => {
                let p = out.len();
                out.fill(T::zero());
                for (i, &v) in a.iter().enumerate() {
                    let row = &b[i * p..(i + 1) * p];
                    for (o, &m) in out.iter_mut().zip(row) {
                        *o = v.mul_add(m, *o);
                    }
                }
            }
            BinaryOp::TensorProd => {
                let p = b.len();
                for (i, &x) in a.iter().enumerate() {
                    for (o, &y) in out[i * p..(i + 1) * p].iter_mut().zip(b) {
                        *o = x * y;
                    }
                }
            }
        }
    }
}

fn scalar(op: &'static str, width: usize) -> Result<()> {
    if width != 1 {
        return Err(FormulaError::NotScalar { op, width });
    }
    Ok(())
}

fn divisible(op: &'static str, matrix: usize, vector: usize) -> Result<()> {
    if vector == 0 || matrix % vector != 0 {
        return Err(FormulaError::NotDivisible { op, matrix, vector });
    }
    Ok(())
}

fn in_range(op: &'static str, start: usize, len: usize, width: usize) -> Result<()> {
    match start.checked_add(len) {
        Some(end) if end <= width => Ok(()),
        end => Err(FormulaError::OutOfRange {
            op,
            start,
            end: end.unwrap_or(usize::MAX),
            width,
        }),
    }
}

#[inline]
fn map<T: Numeric>(out: &mut [T], x: &[T], f: impl Fn(T) -> T) {
    for (o, &v) in out.iter_mut().zip(x) {
        *o = f(v);
    }
}

#[inline]
fn zip<T: Numeric>(out: &mut [T], a: &[T], b: &[T], f: impl Fn(T, T) -> T) {
    let sa = (a.len() > 1) as usize;
    let sb = (b.len() > 1) as usize;
    for (k, o) in out.iter_mut().enumerate() {
        *o = f(a[k * sa], b[k * sb]);
    }
}

/// First extremal component and its index; `better(candidate, best)` is the
/// strict comparison mask, so later ties never replace the stored entry.
#[inline]
fn extremum<T: Numeric>(x: &[T], better: impl Fn(T, T) -> T) -> (T, T) {
    let mut best = x[0];
    let mut index = T::zero();
    for (k, &v) in x.iter().enumerate().skip(1) {
        let mask = better(v, best);
        index = T::select(mask, T::from_index(k), index);
        best = T::select(mask, v, best);
    }
    (best, index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::Half2;

    #[test]
    fn test_matvec_row_major() {
        let a = [1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = [1.0f64, 1.0, 1.0];
        let mut out = [0.0f64; 2];
        assert_eq!(BinaryOp::MatVecMult.width(6, 3), Ok(2));
        BinaryOp::MatVecMult.apply(&mut out, &a, &b);
        assert_eq!(out, [6.0, 15.0]);
    }

    #[test]
    fn test_vecmat_is_column_sums() {
        let g = [1.0f64, 1.0];
        let a = [1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut out = [0.0f64; 3];
        BinaryOp::VecMatMult.apply(&mut out, &g, &a);
        assert_eq!(out, [5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_tensor_prod() {
        let mut out = [0.0f32; 6];
        BinaryOp::TensorProd.apply(&mut out, &[1.0, 2.0], &[1.0, 10.0, 100.0]);
        assert_eq!(out, [1.0, 10.0, 100.0, 2.0, 20.0, 200.0]);
    }

    #[test]
    fn test_broadcast_scalar_operand() {
        assert_eq!(BinaryOp::Mult.width(1, 3), Ok(3));
        assert_eq!(BinaryOp::Mult.width(3, 1), Ok(3));
        assert!(BinaryOp::Mult.width(2, 3).is_err());

        let mut out = [0.0f64; 3];
        BinaryOp::Subtract.apply(&mut out, &[10.0], &[1.0, 2.0, 3.0]);
        assert_eq!(out, [9.0, 8.0, 7.0]);
    }

    #[test]
    fn test_argmax_first_occurrence() {
        let mut out = [0.0f64];
        UnaryOp::ArgMax.apply(&mut out, &[1.0, 7.0, 7.0, 3.0]);
        assert_eq!(out, [1.0]);
        UnaryOp::ArgMin.apply(&mut out, &[4.0, 1.0, 9.0, 1.0]);
        assert_eq!(out, [1.0]);
        UnaryOp::Max.apply(&mut out, &[4.0, 1.0, 9.0, 1.0]);
        assert_eq!(out, [9.0]);
    }

    #[test]
    fn test_argmax_packed_lanes() {
        let x = [
            Half2::new(1.0, 5.0),
            Half2::new(3.0, 2.0),
            Half2::new(3.0, 6.0),
        ];
        let mut out = [Half2::zero()];
        UnaryOp::ArgMax.apply(&mut out, &x);
        assert_eq!(out[0], Half2::new(1.0, 2.0));
    }

    #[test]
    fn test_step_and_sign() {
        let x = [-2.0f32, 0.0, 3.0];
        let mut out = [0.0f32; 3];
        UnaryOp::Step.apply(&mut out, &x);
        assert_eq!(out, [0.0, 1.0, 1.0]);
        UnaryOp::Sign.apply(&mut out, &x);
        assert_eq!(out, [-1.0, 0.0, 1.0]);
        UnaryOp::ReLU.apply(&mut out, &x);
        assert_eq!(out, [0.0, 0.0, 3.0]);
    }

    #[test]
    fn test_one_hot_rounds() {
        let mut out = [9.0f64; 4];
        UnaryOp::OneHot { dim: 4 }.apply(&mut out, &[1.6]);
        assert_eq!(out, [0.0, 0.0, 1.0, 0.0]);
        UnaryOp::OneHot { dim: 4 }.apply(&mut out, &[7.0]);
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn test_static_preconditions() {
        assert_eq!(
            UnaryOp::ArgMax.width(0),
            Err(FormulaError::ZeroWidth { op: "ArgMax" })
        );
        assert_eq!(
            UnaryOp::OneHot { dim: 3 }.width(2),
            Err(FormulaError::NotScalar { op: "OneHot", width: 2 })
        );
        assert_eq!(
            BinaryOp::MatVecMult.width(7, 3),
            Err(FormulaError::NotDivisible {
                op: "MatVecMult",
                matrix: 7,
                vector: 3
            })
        );
        assert_eq!(
            BinaryOp::SqNormIso.width(2, 3),
            Err(FormulaError::NotScalar { op: "SqNormIso", width: 2 })
        );
        assert!(UnaryOp::Extract { start: 2, dim: 2 }.width(3).is_err());
    }

    #[test]
    fn test_extract_transpose() {
        let mut out = [1.0f64; 5];
        UnaryOp::ExtractT { start: 1, dim: 5 }.apply(&mut out, &[7.0, 8.0]);
        assert_eq!(out, [0.0, 7.0, 8.0, 0.0, 0.0]);
    }
}
