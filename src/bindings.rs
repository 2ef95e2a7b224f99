//! Row-major data bound to formula variables.

use std::collections::HashMap;

use crate::error::{FormulaError, Result};
use crate::formula::{Category, Formula, Resolved, Variable};

/// Borrowed data for the variables of a formula, keyed by `(index, category)`.
///
/// Each buffer is row-major: row `r` of a variable of width `w` occupies
/// `data[r * w..(r + 1) * w]`. Parameters hold exactly one row.
///
/// # Example
///
/// ```rust
/// use kerfold::Bindings;
///
/// let x = [0.0f32, 1.0, 2.0, 3.0];
/// let y = [1.0f32, 1.0];
/// let bindings = Bindings::new().outer(0, &x).inner(1, &y);
/// assert_eq!(bindings.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct Bindings<'a, T> {
    data: HashMap<(usize, Category), &'a [T]>,
}

impl<'a, T> Default for Bindings<'a, T> {
    fn default() -> Self {
        Self {
            data: HashMap::new(),
        }
    }
}

impl<'a, T> Bindings<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind data to the outer-indexed variable `index`.
    pub fn outer(self, index: usize, data: &'a [T]) -> Self {
        self.bind(index, Category::Outer, data)
    }

    /// Bind data to the inner-indexed variable `index`.
    pub fn inner(self, index: usize, data: &'a [T]) -> Self {
        self.bind(index, Category::Inner, data)
    }

    /// Bind data to the parameter `index`.
    pub fn param(self, index: usize, data: &'a [T]) -> Self {
        self.bind(index, Category::Param, data)
    }

    /// Bind data by category, replacing any previous binding.
    pub fn bind(mut self, index: usize, category: Category, data: &'a [T]) -> Self {
        self.insert(index, category, data);
        self
    }

    pub fn insert(&mut self, index: usize, category: Category, data: &'a [T]) {
        self.data.insert((index, category), data);
    }

    pub fn get(&self, index: usize, category: Category) -> Option<&'a [T]> {
        self.data.get(&(index, category)).copied()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row count of `category` implied by the bound variables of `formula`.
    ///
    /// Used when the reduced expression itself reads no variable of that
    /// category, e.g. the zero gradient of an index reduction.
    pub fn rows(&self, formula: &Formula, category: Category) -> Result<Option<usize>> {
        let vars: Vec<Variable> = formula
            .declared_variables()
            .into_iter()
            .filter(|v| v.category == category && self.get(v.index, category).is_some())
            .collect();
        Ok(self.resolve(&vars)?.rows(category))
    }

    /// Look up and validate the data of `vars`.
    ///
    /// Checks that every variable is bound, that each buffer is a whole number
    /// of rows, that parameters have one row, and that variables of one
    /// category agree on their row count.
    pub fn resolve(&self, vars: &[Variable]) -> Result<Resolved<'a, T>> {
        let mut data = Vec::with_capacity(vars.len());
        let mut outer_rows = None;
        let mut inner_rows = None;

        for v in vars {
            let buf = self
                .get(v.index, v.category)
                .ok_or(FormulaError::MissingBinding(*v))?;

            let rows = match (v.width, buf.len()) {
                (0, 0) => None,
                (0, len) => {
                    return Err(FormulaError::BindingLength {
                        var: *v,
                        len,
                        width: 0,
                    })
                }
                (w, len) if len % w != 0 => {
                    return Err(FormulaError::BindingLength {
                        var: *v,
                        len,
                        width: w,
                    })
                }
                (w, len) => Some(len / w),
            };

            if let Some(rows) = rows {
                let seen = match v.category {
                    Category::Outer => &mut outer_rows,
                    Category::Inner => &mut inner_rows,
                    Category::Param if rows != 1 => {
                        return Err(FormulaError::RowMismatch {
                            category: Category::Param,
                            expected: 1,
                            got: rows,
                        })
                    }
                    Category::Param => {
                        data.push(buf);
                        continue;
                    }
                };
                match *seen {
                    Some(expected) if expected != rows => {
                        return Err(FormulaError::RowMismatch {
                            category: v.category,
                            expected,
                            got: rows,
                        })
                    }
                    _ => *seen = Some(rows),
                }
            }
            data.push(buf);
        }

        Ok(Resolved {
            data,
            outer_rows,
            inner_rows,
        })
    }
}
