//! Formula construction.
//!
//! Every constructor validates operand widths before creating a node and
//! returns the (possibly shared) id of the result. A few algebraic identities
//! involving [`Op::Zero`] are folded on the spot, which keeps gradient graphs small.
//!
//! # Example
//!
//! ```rust
//! use kerfold::{Formula, Variable};
//!
//! let mut f = Formula::new();
//! let a = f.var(Variable::param(0, 6))?;    // 2 x 3 matrix, row-major
//! let x = f.var(Variable::inner(0, 3))?;
//! let y = f.mat_vec_mult(a, x)?;
//! assert_eq!(f.width(y)?, 2);
//!
//! // 6 is not a multiple of 4
//! let z = f.var(Variable::inner(1, 4))?;
//! assert!(f.mat_vec_mult(a, z).is_err());
//! # Ok::<(), kerfold::FormulaError>(())
//! ```

use crate::error::{FormulaError, Result};

use super::{BinaryOp, Formula, NodeId, Op, UnaryOp, Variable};

impl Formula {
    // ========================================================================
    // Leaves
    // ========================================================================

    /// Leaf for a variable; the width of an identity is fixed by its first use.
    pub fn var(&mut self, v: Variable) -> Result<NodeId> {
        self.intern(Op::Var(v))
    }

    /// All-zero node of the given width.
    pub fn zero(&mut self, width: usize) -> Result<NodeId> {
        self.intern(Op::Zero { width })
    }

    /// Scalar integer constant.
    pub fn int_const(&mut self, value: i32) -> Result<NodeId> {
        self.intern(Op::IntConst(value))
    }

    /// Scalar real constant.
    pub fn constant(&mut self, value: f64) -> Result<NodeId> {
        self.intern(Op::Const {
            bits: value.to_bits(),
        })
    }

    fn is_zero(&self, id: NodeId) -> Result<bool> {
        Ok(matches!(self.op(id)?, Op::Zero { .. }))
    }

    fn unary(&mut self, op: UnaryOp, x: NodeId) -> Result<NodeId> {
        self.intern(Op::Unary(op, x))
    }

    fn binary(&mut self, op: BinaryOp, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.intern(Op::Binary(op, a, b))
    }

    // ========================================================================
    // Elementwise unary
    // ========================================================================

    pub fn minus(&mut self, x: NodeId) -> Result<NodeId> {
        if self.is_zero(x)? {
            return Ok(x);
        }
        self.unary(UnaryOp::Minus, x)
    }

    pub fn exp(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::Exp, x)
    }

    pub fn log(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::Log, x)
    }

    pub fn sin(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::Sin, x)
    }

    pub fn cos(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::Cos, x)
    }

    /// Reciprocal `1 / x`.
    pub fn inv(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::Inv, x)
    }

    pub fn sqrt(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::Sqrt, x)
    }

    /// Reciprocal square root.
    pub fn rsqrt(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::Rsqrt, x)
    }

    pub fn square(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::Square, x)
    }

    pub fn abs(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::Abs, x)
    }

    pub fn sign(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::Sign, x)
    }

    /// 0 where `x < 0`, 1 elsewhere.
    pub fn step(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::Step, x)
    }

    pub fn relu(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::ReLU, x)
    }

    /// Integer power.
    pub fn pow(&mut self, x: NodeId, n: i32) -> Result<NodeId> {
        self.unary(UnaryOp::Pow(n), x)
    }

    // ========================================================================
    // Structural unary
    // ========================================================================

    pub fn sum(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::Sum, x)
    }

    /// Broadcast a scalar to `dim` components.
    pub fn sum_t(&mut self, x: NodeId, dim: usize) -> Result<NodeId> {
        self.unary(UnaryOp::SumT { dim }, x)
    }

    pub fn sqnorm2(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::SqNorm2, x)
    }

    /// Euclidean norm, `Sqrt(SqNorm2(x))`.
    pub fn norm2(&mut self, x: NodeId) -> Result<NodeId> {
        let sq = self.sqnorm2(x)?;
        self.sqrt(sq)
    }

    /// `x / |x|`.
    pub fn normalize(&mut self, x: NodeId) -> Result<NodeId> {
        let sq = self.sqnorm2(x)?;
        let scale = self.rsqrt(sq)?;
        self.mult(scale, x)
    }

    pub fn max(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::Max, x)
    }

    pub fn min(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::Min, x)
    }

    /// Index of the first largest component. Requires width >= 1.
    pub fn argmax(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::ArgMax, x)
    }

    /// Index of the first smallest component. Requires width >= 1.
    pub fn argmin(&mut self, x: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::ArgMin, x)
    }

    /// One-hot encoding of a scalar. Requires a width-1 input and `dim >= 1`.
    pub fn one_hot(&mut self, x: NodeId, dim: usize) -> Result<NodeId> {
        self.unary(UnaryOp::OneHot { dim }, x)
    }

    pub fn extract(&mut self, x: NodeId, start: usize, dim: usize) -> Result<NodeId> {
        self.unary(UnaryOp::Extract { start, dim }, x)
    }

    pub fn extract_t(&mut self, x: NodeId, start: usize, dim: usize) -> Result<NodeId> {
        self.unary(UnaryOp::ExtractT { start, dim }, x)
    }

    // ========================================================================
    // Binary
    // ========================================================================

    pub fn add(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        let width = BinaryOp::Add.width(self.width(a)?, self.width(b)?)?;
        if self.is_zero(a)? && self.width(b)? == width {
            return Ok(b);
        }
        if self.is_zero(b)? && self.width(a)? == width {
            return Ok(a);
        }
        self.binary(BinaryOp::Add, a, b)
    }

    pub fn subtract(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        let width = BinaryOp::Subtract.width(self.width(a)?, self.width(b)?)?;
        if self.is_zero(b)? && self.width(a)? == width {
            return Ok(a);
        }
        if self.is_zero(a)? && self.width(b)? == width {
            return self.minus(b);
        }
        self.binary(BinaryOp::Subtract, a, b)
    }

    pub fn mult(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        let width = BinaryOp::Mult.width(self.width(a)?, self.width(b)?)?;
        if self.is_zero(a)? || self.is_zero(b)? {
            return self.zero(width);
        }
        self.binary(BinaryOp::Mult, a, b)
    }

    pub fn divide(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.binary(BinaryOp::Divide, a, b)
    }

    pub fn concat(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.binary(BinaryOp::Concat, a, b)
    }

    /// Dot product of two equal-width operands.
    pub fn scal_prod(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.binary(BinaryOp::ScalProd, a, b)
    }

    /// Squared distance, `SqNorm2(a - b)`.
    pub fn sqdist(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        let d = self.subtract(a, b)?;
        self.sqnorm2(d)
    }

    /// Isotropic squared norm `s * <x, x>`; `s` must be scalar.
    pub fn sqnorm_iso(&mut self, s: NodeId, x: NodeId) -> Result<NodeId> {
        self.binary(BinaryOp::SqNormIso, s, x)
    }

    /// Diagonal squared norm `sum_k s_k * x_k^2`; widths must match.
    pub fn sqnorm_diag(&mut self, s: NodeId, x: NodeId) -> Result<NodeId> {
        // Equal widths only, no broadcast.
        BinaryOp::ScalProd.width(self.width(s)?, self.width(x)?)?;
        let sq = self.square(x)?;
        let weighted = self.mult(s, sq)?;
        self.sum(weighted)
    }

    /// Row-major matrix-vector product; matrix width must be a multiple of vector width.
    pub fn mat_vec_mult(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.binary(BinaryOp::MatVecMult, a, b)
    }

    /// Vector-matrix product; matrix width must be a multiple of vector width.
    pub fn vec_mat_mult(&mut self, b: NodeId, a: NodeId) -> Result<NodeId> {
        self.binary(BinaryOp::VecMatMult, b, a)
    }

    pub fn tensor_prod(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.binary(BinaryOp::TensorProd, a, b)
    }

    // ========================================================================
    // Kernels
    // ========================================================================

    /// Gaussian kernel `exp(-gamma * |x - y|^2)` with scalar `gamma`.
    pub fn gaussian_kernel(&mut self, x: NodeId, y: NodeId, gamma: NodeId) -> Result<NodeId> {
        let width = self.width(gamma)?;
        if width != 1 {
            return Err(FormulaError::NotScalar {
                op: "GaussKernel",
                width,
            });
        }
        let d = self.sqdist(x, y)?;
        let scaled = self.mult(gamma, d)?;
        let neg = self.minus(scaled)?;
        self.exp(neg)
    }
}
