//! Evaluation plans.
//!
//! A [`Program`] flattens the nodes reachable from a root into a list of steps
//! over one scratch buffer. Every node gets a fixed slot in the buffer, and a
//! child's slot always precedes its parent's, so each step reads finished
//! operand slots and writes its own. Constants are written once at compile time.
//! Evaluating a program at an `(i, j)` pair allocates nothing.

use std::ops::Range;

use crate::algebra::Numeric;
use crate::bindings::Bindings;
use crate::error::{FormulaError, Result};

use super::{BinaryOp, Category, Formula, NodeId, Op, UnaryOp, Variable};

#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: usize,
    width: usize,
}

impl Slot {
    #[inline]
    fn range(self) -> Range<usize> {
        self.offset..self.offset + self.width
    }
}

#[derive(Debug, Clone, Copy)]
enum Kernel {
    Load { var: usize, category: Category },
    Unary(UnaryOp, Slot),
    Binary(BinaryOp, Slot, Slot),
}

#[derive(Debug, Clone, Copy)]
struct Step {
    kernel: Kernel,
    out: Slot,
}

/// Variable data resolved against a program's variable list.
///
/// Produced by [`Bindings::resolve`]; holds one row-major slice per variable.
#[derive(Debug, Clone)]
pub struct Resolved<'a, T> {
    pub(crate) data: Vec<&'a [T]>,
    pub(crate) outer_rows: Option<usize>,
    pub(crate) inner_rows: Option<usize>,
}

impl<'a, T> Resolved<'a, T> {
    /// Rows shared by every outer-indexed variable, if any is used.
    pub fn outer_rows(&self) -> Option<usize> {
        self.outer_rows
    }

    /// Rows shared by every inner-indexed variable, if any is used.
    pub fn inner_rows(&self) -> Option<usize> {
        self.inner_rows
    }

    /// Row count of `category`, if the formula uses it.
    pub fn rows(&self, category: Category) -> Option<usize> {
        match category {
            Category::Outer => self.outer_rows,
            Category::Inner => self.inner_rows,
            Category::Param => Some(1),
        }
    }
}

/// Compiled evaluation plan for one root node.
///
/// Each evaluation stream owns its own program (the scratch buffer is mutable
/// state); clone it to evaluate on several threads.
#[derive(Debug, Clone)]
pub struct Program<T: Numeric> {
    steps: Vec<Step>,
    vars: Vec<Variable>,
    scratch: Vec<T>,
    root: Slot,
}

impl<T: Numeric> Program<T> {
    /// Compile the subgraph reachable from `root`.
    pub fn compile(formula: &Formula, root: NodeId) -> Result<Self> {
        let ids = formula.reachable(root)?;
        let mut slots: Vec<Option<Slot>> = vec![None; formula.len()];
        let mut steps = Vec::with_capacity(ids.len());
        let mut vars: Vec<Variable> = Vec::new();
        let mut constants = Vec::new();
        let mut offset = 0;

        for &id in &ids {
            let node = formula.node(id)?;
            let out = Slot {
                offset,
                width: node.width,
            };
            offset += node.width;
            slots[id.index()] = Some(out);

            // Children precede parents in id order, so their slots exist.
            let slot = |child: NodeId| {
                slots[child.index()].ok_or(FormulaError::UnknownNode(child))
            };

            let kernel = match node.op {
                Op::Var(v) => {
                    let var = match vars.iter().position(|u| u.same_identity(&v)) {
                        Some(k) => k,
                        None => {
                            vars.push(v);
                            vars.len() - 1
                        }
                    };
                    Kernel::Load {
                        var,
                        category: v.category,
                    }
                }
                Op::Zero { .. } => {
                    constants.push((out, 0.0));
                    continue;
                }
                Op::IntConst(n) => {
                    constants.push((out, n as f64));
                    continue;
                }
                Op::Const { bits } => {
                    constants.push((out, f64::from_bits(bits)));
                    continue;
                }
                Op::Unary(u, x) => Kernel::Unary(u, slot(x)?),
                Op::Binary(b, l, r) => Kernel::Binary(b, slot(l)?, slot(r)?),
            };
            steps.push(Step { kernel, out });
        }

        let mut scratch = vec![T::zero(); offset];
        for (out, value) in constants {
            scratch[out.range()].fill(T::from_f64(value));
        }
        let root = slots[root.index()].ok_or(FormulaError::UnknownNode(root))?;

        log::debug!(
            "compiled program: {} nodes, {} steps, {} variables, scratch {} x {}",
            ids.len(),
            steps.len(),
            vars.len(),
            offset,
            T::name()
        );

        Ok(Self {
            steps,
            vars,
            scratch,
            root,
        })
    }

    /// Output width of the root.
    pub fn width(&self) -> usize {
        self.root.width
    }

    /// Distinct variables the program loads, in slot order.
    pub fn variables(&self) -> &[Variable] {
        &self.vars
    }

    /// Resolve bound data for this program's variables.
    pub fn resolve<'a>(&self, bindings: &Bindings<'a, T>) -> Result<Resolved<'a, T>> {
        bindings.resolve(&self.vars)
    }

    /// Evaluate the root at outer row `i` and inner row `j`.
    ///
    /// # Panics
    ///
    /// Panics if `i` or `j` is beyond the rows of the resolved data.
    pub fn eval(&mut self, data: &Resolved<'_, T>, i: usize, j: usize) -> &[T] {
        for step in &self.steps {
            let (done, rest) = self.scratch.split_at_mut(step.out.offset);
            let out = &mut rest[..step.out.width];
            match step.kernel {
                Kernel::Load { var, category } => {
                    let row = match category {
                        Category::Outer => i,
                        Category::Inner => j,
                        Category::Param => 0,
                    };
                    let w = step.out.width;
                    out.copy_from_slice(&data.data[var][row * w..(row + 1) * w]);
                }
                Kernel::Unary(op, x) => op.apply(out, &done[x.range()]),
                Kernel::Binary(op, a, b) => op.apply(out, &done[a.range()], &done[b.range()]),
            }
        }
        &self.scratch[self.root.range()]
    }
}

impl Formula {
    /// Evaluate `root` once at `(i, j)`.
    ///
    /// Convenience for inspection and tests; drivers compile a [`Program`] once
    /// and reuse it.
    pub fn eval<T: Numeric>(
        &self,
        root: NodeId,
        bindings: &Bindings<'_, T>,
        i: usize,
        j: usize,
    ) -> Result<Vec<T>> {
        let mut program = Program::compile(self, root)?;
        let data = program.resolve(bindings)?;
        for (category, row) in [(Category::Outer, i), (Category::Inner, j)] {
            match data.rows(category) {
                Some(rows) if row >= rows => {
                    return Err(FormulaError::RowOutOfRange {
                        category,
                        row,
                        rows,
                    })
                }
                _ => {}
            }
        }
        Ok(program.eval(&data, i, j).to_vec())
    }
}
