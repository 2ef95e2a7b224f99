//! Structural reverse-mode differentiation.
//!
//! `diff(root, v, g)` builds, inside the same arena, a new formula equal to the
//! transposed Jacobian of `root` with respect to the variable `v`, applied to
//! the adjoint `g`. Adjoints are swept from the root towards the leaves in
//! descending id order, so a node shared by several parents receives the sum
//! of their contributions before it passes its own adjoint down.
//!
//! Subgraphs that do not depend on `v` contribute nothing and are skipped.
//! The result always has the width of `v`; it is [`Op::Zero`] when the root
//! does not depend on `v` at all.
//!
//! | Node | Contribution to the operand adjoint |
//! |------|-------------------------------------|
//! | `Exp(x)` | `Exp(x) * g` |
//! | `Log(x)` | `Inv(x) * g` |
//! | `Sum(x)` | `SumT(g, width(x))` |
//! | `Max(x)` | `g * OneHot(ArgMax(x), width(x))` |
//! | `MatVecMult(A, b)` | `TensorProd(g, b)`, `VecMatMult(g, A)` |
//! | `Step`, `Sign`, `ArgMax`, `OneHot`, ... | none |

use crate::error::{FormulaError, Result};

use super::{BinaryOp, Formula, NodeId, Op, UnaryOp, Variable};

impl Formula {
    /// Gradient of `root` with respect to `var`, contracted with `grad_in`.
    ///
    /// `grad_in` must have the width of `root`; the result has the width of `var`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use kerfold::{Bindings, Formula, Variable};
    ///
    /// let mut f = Formula::new();
    /// let x = f.var(Variable::outer(0, 1))?;
    /// let y = f.var(Variable::inner(0, 1))?;
    /// let xy = f.mult(x, y)?;
    /// let root = f.log(xy)?;
    ///
    /// let g = f.var(Variable::param(0, 1))?;
    /// let dx = f.diff(root, Variable::outer(0, 1), g)?;
    ///
    /// let (xs, ys, gs) = ([2.0f64], [3.0f64], [1.0f64]);
    /// let bindings = Bindings::new().outer(0, &xs).inner(0, &ys).param(0, &gs);
    /// let out = f.eval(dx, &bindings, 0, 0)?;
    /// assert!((out[0] - 0.5).abs() < 1e-12);
    /// # Ok::<(), kerfold::FormulaError>(())
    /// ```
    pub fn diff(&mut self, root: NodeId, var: Variable, grad_in: NodeId) -> Result<NodeId> {
        let expected = self.width(root)?;
        let got = self.width(grad_in)?;
        if expected != got {
            return Err(FormulaError::GradientWidth { expected, got });
        }
        if let Some(&declared) = self.variables.get(&(var.index, var.category)) {
            if declared != var.width {
                return Err(FormulaError::WidthMismatch {
                    op: "Grad",
                    left: declared,
                    right: var.width,
                });
            }
        }

        let order = self.reachable(root)?;
        let depends = self.dependency_mask(&order, &var)?;
        let mut adjoint: Vec<Option<NodeId>> = vec![None; self.len()];
        adjoint[root.index()] = Some(grad_in);

        let mut result = None;
        for &id in order.iter().rev() {
            if !depends[id.index()] {
                continue;
            }
            let Some(g) = adjoint[id.index()] else {
                continue;
            };
            let node = *self.node(id)?;
            if node.width == 0 {
                continue;
            }
            match node.op {
                Op::Var(v) if v.same_identity(&var) => result = Some(g),
                Op::Var(_) | Op::Zero { .. } | Op::IntConst(_) | Op::Const { .. } => {}
                Op::Unary(op, x) => {
                    if depends[x.index()] {
                        let dx = self.unary_adjoint(op, id, x, g)?;
                        self.accumulate(&mut adjoint, x, dx)?;
                    }
                }
                Op::Binary(op, a, b) => {
                    let need = (depends[a.index()], depends[b.index()]);
                    let (da, db) = self.binary_adjoint(op, a, b, g, need)?;
                    if let Some(da) = da {
                        self.accumulate(&mut adjoint, a, da)?;
                    }
                    if let Some(db) = db {
                        self.accumulate(&mut adjoint, b, db)?;
                    }
                }
            }
        }

        log::debug!(
            "diff {:?} w.r.t. {:?}: {} nodes visited",
            root,
            var,
            order.len()
        );
        match result {
            Some(g) => Ok(g),
            None => self.zero(var.width),
        }
    }

    /// Gradient with a fresh variable `grad_var` as the adjoint input.
    pub fn grad(&mut self, root: NodeId, var: Variable, grad_var: Variable) -> Result<NodeId> {
        let g = self.var(grad_var)?;
        self.diff(root, var, g)
    }

    /// `mask[id]` is set when node `id` transitively reads `var`.
    fn dependency_mask(&self, order: &[NodeId], var: &Variable) -> Result<Vec<bool>> {
        let mut mask = vec![false; self.len()];
        for &id in order {
            let op = self.op(id)?;
            mask[id.index()] = match op {
                Op::Var(v) => v.same_identity(var),
                _ => op.children().any(|c| mask[c.index()]),
            };
        }
        Ok(mask)
    }

    fn accumulate(
        &mut self,
        adjoint: &mut [Option<NodeId>],
        id: NodeId,
        g: NodeId,
    ) -> Result<()> {
        adjoint[id.index()] = Some(match adjoint[id.index()] {
            Some(prev) => self.add(prev, g)?,
            None => g,
        });
        Ok(())
    }

    /// Adjoint reaching operand `x` of the unary node `id` from adjoint `g`.
    fn unary_adjoint(&mut self, op: UnaryOp, id: NodeId, x: NodeId, g: NodeId) -> Result<NodeId> {
        let wx = self.width(x)?;
        match op {
            UnaryOp::Minus => self.minus(g),
            UnaryOp::Exp => self.mult(id, g),
            UnaryOp::Log => {
                let inv = self.inv(x)?;
                self.mult(inv, g)
            }
            UnaryOp::Sin => {
                let c = self.cos(x)?;
                self.mult(c, g)
            }
            UnaryOp::Cos => {
                let s = self.sin(x)?;
                let sg = self.mult(s, g)?;
                self.minus(sg)
            }
            UnaryOp::Inv => {
                let sq = self.square(id)?;
                let sg = self.mult(sq, g)?;
                self.minus(sg)
            }
            UnaryOp::Sqrt => {
                let half = self.constant(0.5)?;
                let inv = self.inv(id)?;
                let d = self.mult(half, inv)?;
                self.mult(d, g)
            }
            UnaryOp::Rsqrt => {
                let c = self.constant(-0.5)?;
                let cube = self.pow(id, 3)?;
                let d = self.mult(c, cube)?;
                self.mult(d, g)
            }
            UnaryOp::Square => {
                let two = self.int_const(2)?;
                let d = self.mult(two, x)?;
                self.mult(d, g)
            }
            UnaryOp::Abs => {
                let s = self.sign(x)?;
                self.mult(s, g)
            }
            UnaryOp::ReLU => {
                let s = self.step(x)?;
                self.mult(s, g)
            }
            UnaryOp::Pow(0) => self.zero(wx),
            UnaryOp::Pow(n) => {
                let lowered = n.checked_sub(1).ok_or(FormulaError::ExponentOverflow(n))?;
                let k = self.int_const(n)?;
                let p = self.pow(x, lowered)?;
                let d = self.mult(k, p)?;
                self.mult(d, g)
            }
            UnaryOp::Sign
            | UnaryOp::Step
            | UnaryOp::ArgMax
            | UnaryOp::ArgMin
            | UnaryOp::OneHot { .. } => self.zero(wx),
            UnaryOp::Sum => self.sum_t(g, wx),
            UnaryOp::SumT { .. } => self.sum(g),
            UnaryOp::SqNorm2 => {
                let two = self.int_const(2)?;
                let d = self.mult(two, x)?;
                self.mult(g, d)
            }
            UnaryOp::Max | UnaryOp::Min => {
                let arg = if op == UnaryOp::Max {
                    self.argmax(x)?
                } else {
                    self.argmin(x)?
                };
                let hot = self.one_hot(arg, wx)?;
                self.mult(g, hot)
            }
            UnaryOp::Extract { start, .. } => self.extract_t(g, start, wx),
            UnaryOp::ExtractT { start, .. } => self.extract(g, start, wx),
        }
    }

    /// Adjoints reaching operands `a` and `b`; `None` for operands that do not
    /// depend on the differentiation variable.
    fn binary_adjoint(
        &mut self,
        op: BinaryOp,
        a: NodeId,
        b: NodeId,
        g: NodeId,
        (need_a, need_b): (bool, bool),
    ) -> Result<(Option<NodeId>, Option<NodeId>)> {
        let mut da = None;
        let mut db = None;
        match op {
            BinaryOp::Add => {
                if need_a {
                    da = Some(self.unbroadcast(g, a)?);
                }
                if need_b {
                    db = Some(self.unbroadcast(g, b)?);
                }
            }
            BinaryOp::Subtract => {
                if need_a {
                    da = Some(self.unbroadcast(g, a)?);
                }
                if need_b {
                    let neg = self.minus(g)?;
                    db = Some(self.unbroadcast(neg, b)?);
                }
            }
            BinaryOp::Mult => {
                if need_a {
                    let gb = self.mult(g, b)?;
                    da = Some(self.unbroadcast(gb, a)?);
                }
                if need_b {
                    let ga = self.mult(g, a)?;
                    db = Some(self.unbroadcast(ga, b)?);
                }
            }
            BinaryOp::Divide => {
                if need_a {
                    let q = self.divide(g, b)?;
                    da = Some(self.unbroadcast(q, a)?);
                }
                if need_b {
                    let ga = self.mult(g, a)?;
                    let sq = self.square(b)?;
                    let q = self.divide(ga, sq)?;
                    let neg = self.minus(q)?;
                    db = Some(self.unbroadcast(neg, b)?);
                }
            }
            BinaryOp::Concat => {
                let wa = self.width(a)?;
                let wb = self.width(b)?;
                if need_a {
                    da = Some(self.extract(g, 0, wa)?);
                }
                if need_b {
                    db = Some(self.extract(g, wa, wb)?);
                }
            }
            BinaryOp::ScalProd => {
                if need_a {
                    da = Some(self.mult(g, b)?);
                }
                if need_b {
                    db = Some(self.mult(g, a)?);
                }
            }
            BinaryOp::SqNormIso => {
                // a is the scalar weight, b the vector.
                if need_a {
                    let n = self.sqnorm2(b)?;
                    da = Some(self.mult(g, n)?);
                }
                if need_b {
                    let two = self.int_const(2)?;
                    let gs = self.mult(g, a)?;
                    let gs2 = self.mult(two, gs)?;
                    db = Some(self.mult(gs2, b)?);
                }
            }
            BinaryOp::MatVecMult => {
                if need_a {
                    da = Some(self.tensor_prod(g, b)?);
                }
                if need_b {
                    db = Some(self.vec_mat_mult(g, a)?);
                }
            }
            BinaryOp::VecMatMult => {
                // a is the vector, b the matrix.
                if need_a {
                    da = Some(self.mat_vec_mult(b, g)?);
                }
                if need_b {
                    db = Some(self.tensor_prod(a, g)?);
                }
            }
            BinaryOp::TensorProd => {
                if need_a {
                    da = Some(self.mat_vec_mult(g, b)?);
                }
                if need_b {
                    db = Some(self.vec_mat_mult(a, g)?);
                }
            }
        }
        Ok((da, db))
    }

    /// Sum `g` down to the width of a scalar operand that was broadcast.
    fn unbroadcast(&mut self, g: NodeId, operand: NodeId) -> Result<NodeId> {
        if self.width(operand)? == 1 && self.width(g)? != 1 {
            self.sum(g)
        } else {
            Ok(g)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::bindings::Bindings;
    use crate::formula::{Formula, Op, Variable};

    #[test]
    fn test_matvec_gradient_wrt_vector() {
        let mut f = Formula::new();
        let a = f.var(Variable::param(0, 6)).unwrap();
        let b = f.var(Variable::inner(0, 3)).unwrap();
        let root = f.mat_vec_mult(a, b).unwrap();
        let g = f.var(Variable::outer(0, 2)).unwrap();
        let db = f.diff(root, Variable::inner(0, 3), g).unwrap();
        assert_eq!(f.width(db).unwrap(), 3);

        let a_data = [1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b_data = [0.3f64, -1.0, 2.0];
        let g_data = [1.0f64, 1.0];
        let bindings = Bindings::new()
            .param(0, &a_data)
            .inner(0, &b_data)
            .outer(0, &g_data);
        assert_eq!(f.eval(db, &bindings, 0, 0).unwrap(), vec![5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_matvec_gradient_wrt_matrix() {
        let mut f = Formula::new();
        let a = f.var(Variable::param(0, 6)).unwrap();
        let b = f.var(Variable::inner(0, 3)).unwrap();
        let root = f.mat_vec_mult(a, b).unwrap();
        let g = f.var(Variable::outer(0, 2)).unwrap();
        let da = f.diff(root, Variable::param(0, 6), g).unwrap();

        let a_data = [0.0f64; 6];
        let b_data = [1.0f64, 2.0, 3.0];
        let g_data = [1.0f64, -1.0];
        let bindings = Bindings::new()
            .param(0, &a_data)
            .inner(0, &b_data)
            .outer(0, &g_data);
        assert_eq!(
            f.eval(da, &bindings, 0, 0).unwrap(),
            vec![1.0, 2.0, 3.0, -1.0, -2.0, -3.0]
        );
    }

    #[test]
    fn test_independent_root_gives_zero() {
        let mut f = Formula::new();
        let x = f.var(Variable::outer(0, 2)).unwrap();
        let root = f.exp(x).unwrap();
        let g = f.var(Variable::param(0, 2)).unwrap();
        let d = f.diff(root, Variable::inner(4, 5), g).unwrap();
        assert_eq!(f.op(d).unwrap(), Op::Zero { width: 5 });
    }

    #[test]
    fn test_discrete_ops_have_zero_gradient() {
        let mut f = Formula::new();
        let x = f.var(Variable::outer(0, 4)).unwrap();
        let am = f.argmax(x).unwrap();
        let st = f.step(x).unwrap();
        let sg = f.sign(x).unwrap();
        let g1 = f.var(Variable::param(0, 1)).unwrap();
        let g4 = f.var(Variable::param(1, 4)).unwrap();

        for (root, g) in [(am, g1), (st, g4), (sg, g4)] {
            let d = f.diff(root, Variable::outer(0, 4), g).unwrap();
            assert_eq!(f.op(d).unwrap(), Op::Zero { width: 4 });
        }
    }

    #[test]
    fn test_gradient_width_checked() {
        let mut f = Formula::new();
        let x = f.var(Variable::outer(0, 3)).unwrap();
        let root = f.sqnorm2(x).unwrap();
        let g = f.var(Variable::param(0, 3)).unwrap();
        assert!(f.diff(root, Variable::outer(0, 3), g).is_err());
    }

    #[test]
    fn test_shared_subgraph_accumulates() {
        // (x * x) + x  ->  2x + 1
        let mut f = Formula::new();
        let x = f.var(Variable::outer(0, 1)).unwrap();
        let xx = f.mult(x, x).unwrap();
        let root = f.add(xx, x).unwrap();
        let g = f.var(Variable::param(0, 1)).unwrap();
        let d = f.diff(root, Variable::outer(0, 1), g).unwrap();

        let xs = [3.0f64];
        let gs = [1.0f64];
        let bindings = Bindings::new().outer(0, &xs).param(0, &gs);
        assert_eq!(f.eval(d, &bindings, 0, 0).unwrap(), vec![7.0]);
    }

    #[test]
    fn test_max_routes_through_argmax() {
        let mut f = Formula::new();
        let x = f.var(Variable::outer(0, 4)).unwrap();
        let root = f.max(x).unwrap();
        let g = f.var(Variable::param(0, 1)).unwrap();
        let d = f.diff(root, Variable::outer(0, 4), g).unwrap();

        let xs = [1.0f32, 7.0, 7.0, -2.0];
        let gs = [2.0f32];
        let bindings = Bindings::new().outer(0, &xs).param(0, &gs);
        assert_eq!(
            f.eval(d, &bindings, 0, 0).unwrap(),
            vec![0.0, 2.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_broadcast_operand_is_summed() {
        // s * x with scalar s: d/ds = <g, x>
        let mut f = Formula::new();
        let s = f.var(Variable::param(0, 1)).unwrap();
        let x = f.var(Variable::outer(0, 3)).unwrap();
        let root = f.mult(s, x).unwrap();
        let g = f.var(Variable::inner(0, 3)).unwrap();
        let ds = f.diff(root, Variable::param(0, 1), g).unwrap();
        assert_eq!(f.width(ds).unwrap(), 1);

        let ss = [10.0f64];
        let xs = [1.0f64, 2.0, 3.0];
        let gs = [1.0f64, 0.0, 2.0];
        let bindings = Bindings::new().param(0, &ss).outer(0, &xs).inner(0, &gs);
        assert_eq!(f.eval(ds, &bindings, 0, 0).unwrap(), vec![7.0]);
    }
}
