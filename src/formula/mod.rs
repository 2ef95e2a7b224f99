//! Formula graphs stored in an owned, indexed node arena.
//!
//! A [`Formula`] owns every node it has ever built. Nodes reference their children
//! by [`NodeId`], and a child is always created before its parent, so ascending id
//! order is a valid evaluation order. Identical nodes are interned: building the
//! same operation on the same children twice returns the same id.
//!
//! - [`builder`](Formula::add): construction with width validation
//! - [`engine`](Program): compiled evaluation plans
//! - [`backward`](Formula::diff): structural reverse-mode differentiation

mod backward;
mod builder;
mod engine;
mod op;

pub use engine::{Program, Resolved};
pub use op::{BinaryOp, Op, UnaryOp};

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;

use crate::error::{FormulaError, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Which index set a variable is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Category {
    /// Indexed by the outer index `i`.
    Outer,
    /// Indexed by the inner index `j`.
    Inner,
    /// Shared by every `(i, j)` pair.
    Param,
}

impl Category {
    /// Short tag used when rendering formulas.
    pub fn tag(self) -> char {
        match self {
            Category::Outer => 'i',
            Category::Inner => 'j',
            Category::Param => 'p',
        }
    }
}

/// A leaf bound to one row of outer-indexed, inner-indexed or parameter data.
///
/// Identity is the pair `(index, category)`; the width is declared alongside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Variable {
    pub index: usize,
    pub width: usize,
    pub category: Category,
}

impl Variable {
    pub fn new(index: usize, width: usize, category: Category) -> Self {
        Self {
            index,
            width,
            category,
        }
    }

    /// Outer-indexed (`i`) variable.
    pub fn outer(index: usize, width: usize) -> Self {
        Self::new(index, width, Category::Outer)
    }

    /// Inner-indexed (`j`) variable.
    pub fn inner(index: usize, width: usize) -> Self {
        Self::new(index, width, Category::Inner)
    }

    /// Parameter shared by all pairs.
    pub fn param(index: usize, width: usize) -> Self {
        Self::new(index, width, Category::Param)
    }

    /// Same index and category.
    pub fn same_identity(&self, other: &Variable) -> bool {
        self.index == other.index && self.category == other.category
    }
}

/// Index of a node inside its [`Formula`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One interned node: an operation and its validated output width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Node {
    pub op: Op,
    pub width: usize,
}

/// Owned arena of formula nodes.
///
/// # Example
///
/// ```rust
/// use kerfold::{Formula, Variable};
///
/// let mut f = Formula::new();
/// let x = f.var(Variable::outer(0, 3))?;
/// let y = f.var(Variable::inner(1, 3))?;
/// let d = f.sqdist(x, y)?;
/// let neg = f.minus(d)?;
/// let k = f.exp(neg)?;
///
/// assert_eq!(f.width(k)?, 1);
/// assert_eq!(f.render(k)?, "Exp(Minus(SqNorm2(Subtract(Var(0,i,3),Var(1,j,3)))))");
/// # Ok::<(), kerfold::FormulaError>(())
/// ```
#[derive(Debug, Clone, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "Vec<Node>", into = "Vec<Node>")
)]
pub struct Formula {
    nodes: Vec<Node>,
    interned: HashMap<Node, NodeId>,
    variables: HashMap<(usize, Category), usize>,
}

impl Formula {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in creation order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Look up a node.
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.index())
            .ok_or(FormulaError::UnknownNode(id))
    }

    /// Declared output width of a node.
    pub fn width(&self, id: NodeId) -> Result<usize> {
        Ok(self.node(id)?.width)
    }

    /// Operation of a node.
    pub fn op(&self, id: NodeId) -> Result<Op> {
        Ok(self.node(id)?.op)
    }

    /// Validate `op`, compute its width and return the interned node id.
    pub(crate) fn intern(&mut self, op: Op) -> Result<NodeId> {
        let width = self.infer_width(&op)?;
        let node = Node { op, width };
        if let Some(&id) = self.interned.get(&node) {
            return Ok(id);
        }
        if let Op::Var(v) = op {
            self.variables.insert((v.index, v.category), v.width);
        }
        let id = NodeId(self.nodes.len() as u32);
        log::trace!("intern {:?} -> {:?} (width {})", op, id, width);
        self.nodes.push(node);
        self.interned.insert(node, id);
        Ok(id)
    }

    fn infer_width(&self, op: &Op) -> Result<usize> {
        match *op {
            Op::Var(v) => match self.variables.get(&(v.index, v.category)) {
                Some(&w) if w != v.width => Err(FormulaError::WidthMismatch {
                    op: "Var",
                    left: w,
                    right: v.width,
                }),
                _ => Ok(v.width),
            },
            Op::Zero { width } => Ok(width),
            Op::IntConst(_) | Op::Const { .. } => Ok(1),
            Op::Unary(u, x) => u.width(self.width(x)?),
            Op::Binary(b, l, r) => b.width(self.width(l)?, self.width(r)?),
        }
    }

    /// Ids reachable from `root`, in ascending (evaluation) order.
    pub fn reachable(&self, root: NodeId) -> Result<Vec<NodeId>> {
        self.node(root)?;
        let mut seen = BTreeSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            stack.extend(self.nodes[id.index()].op.children());
        }
        Ok(seen.into_iter().collect())
    }

    /// Distinct variables used by `root`, sorted.
    pub fn variables(&self, root: NodeId) -> Result<Vec<Variable>> {
        let vars: BTreeSet<Variable> = self
            .reachable(root)?
            .into_iter()
            .filter_map(|id| match self.nodes[id.index()].op {
                Op::Var(v) => Some(v),
                _ => None,
            })
            .collect();
        Ok(vars.into_iter().collect())
    }

    /// Every variable declared anywhere in the arena, sorted.
    pub fn declared_variables(&self) -> Vec<Variable> {
        let mut vars: Vec<Variable> = self
            .variables
            .iter()
            .map(|(&(index, category), &width)| Variable::new(index, width, category))
            .collect();
        vars.sort();
        vars
    }

    /// Textual form of the tree rooted at `id`.
    pub fn render(&self, id: NodeId) -> Result<String> {
        let mut out = String::new();
        self.render_into(id, &mut out)?;
        Ok(out)
    }

    fn render_into(&self, id: NodeId, out: &mut String) -> Result<()> {
        let node = self.node(id)?;
        // Writing to a String cannot fail.
        let _ = match node.op {
            Op::Var(v) => write!(out, "Var({},{},{})", v.index, v.category.tag(), v.width),
            Op::Zero { width } => write!(out, "Zero({})", width),
            Op::IntConst(n) => write!(out, "IntCst({})", n),
            Op::Const { bits } => write!(out, "Cst({})", f64::from_bits(bits)),
            Op::Unary(u, x) => {
                let _ = write!(out, "{}(", u.name());
                self.render_into(x, out)?;
                match u {
                    UnaryOp::Pow(n) => write!(out, ",{})", n),
                    UnaryOp::SumT { dim } | UnaryOp::OneHot { dim } => write!(out, ",{})", dim),
                    UnaryOp::Extract { start, dim } | UnaryOp::ExtractT { start, dim } => {
                        write!(out, ",{},{})", start, dim)
                    }
                    _ => write!(out, ")"),
                }
            }
            Op::Binary(b, l, r) => {
                let _ = write!(out, "{}(", b.name());
                self.render_into(l, out)?;
                out.push(',');
                self.render_into(r, out)?;
                write!(out, ")")
            }
        };
        Ok(())
    }
}

impl TryFrom<Vec<Node>> for Formula {
    type Error = FormulaError;

    /// Rebuild an arena from serialized nodes, re-validating every width.
    fn try_from(nodes: Vec<Node>) -> Result<Self> {
        let mut formula = Formula::new();
        for (position, node) in nodes.into_iter().enumerate() {
            for child in node.op.children() {
                if child.index() >= position {
                    return Err(FormulaError::UnknownNode(child));
                }
            }
            let id = formula.intern(node.op)?;
            if id.index() != position || formula.nodes[position].width != node.width {
                return Err(FormulaError::UnknownNode(NodeId(position as u32)));
            }
        }
        Ok(formula)
    }
}

impl From<Formula> for Vec<Node> {
    fn from(formula: Formula) -> Self {
        formula.nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_shares_nodes() {
        let mut f = Formula::new();
        let x = f.var(Variable::outer(0, 2)).unwrap();
        let a = f.exp(x).unwrap();
        let b = f.exp(x).unwrap();
        assert_eq!(a, b);
        assert_eq!(f.len(), 2);
    }

    #[test]
    fn test_variable_width_conflict() {
        let mut f = Formula::new();
        f.var(Variable::outer(0, 2)).unwrap();
        let err = f.var(Variable::outer(0, 3)).unwrap_err();
        assert!(matches!(err, FormulaError::WidthMismatch { op: "Var", .. }));

        // Same index, other category: a different variable.
        assert!(f.var(Variable::inner(0, 3)).is_ok());
    }

    #[test]
    fn test_foreign_node_rejected() {
        let mut small = Formula::new();
        let mut big = Formula::new();
        let _ = big.var(Variable::outer(0, 1)).unwrap();
        let y = big.var(Variable::outer(1, 1)).unwrap();
        assert_eq!(small.exp(y), Err(FormulaError::UnknownNode(y)));
    }

    #[test]
    fn test_reachable_and_variables() {
        let mut f = Formula::new();
        let x = f.var(Variable::outer(0, 1)).unwrap();
        let y = f.var(Variable::inner(0, 1)).unwrap();
        let unused = f.var(Variable::param(0, 1)).unwrap();
        let m = f.mult(x, y).unwrap();
        let root = f.log(m).unwrap();

        let ids = f.reachable(root).unwrap();
        assert_eq!(ids, vec![x, y, m, root]);
        assert!(!ids.contains(&unused));

        let vars = f.variables(root).unwrap();
        assert_eq!(vars, vec![Variable::outer(0, 1), Variable::inner(0, 1)]);
    }

    #[test]
    fn test_render() {
        let mut f = Formula::new();
        let x = f.var(Variable::outer(0, 1)).unwrap();
        let h = f.one_hot(x, 4).unwrap();
        let e = f.extract(h, 1, 2).unwrap();
        assert_eq!(f.render(e).unwrap(), "Extract(OneHot(Var(0,i,1),4),1,2)");
    }

    #[test]
    fn test_rebuild_from_nodes() {
        let mut f = Formula::new();
        let x = f.var(Variable::outer(0, 3)).unwrap();
        let y = f.var(Variable::inner(0, 3)).unwrap();
        let root = f.scal_prod(x, y).unwrap();

        let nodes: Vec<Node> = f.clone().into();
        let rebuilt = Formula::try_from(nodes).unwrap();
        assert_eq!(rebuilt.render(root).unwrap(), f.render(root).unwrap());
        assert_eq!(rebuilt.width(root).unwrap(), 1);
    }

    #[test]
    fn test_rebuild_rejects_forward_reference() {
        let nodes = vec![Node {
            op: Op::Unary(UnaryOp::Exp, NodeId(0)),
            width: 1,
        }];
        assert!(Formula::try_from(nodes).is_err());
    }
}
