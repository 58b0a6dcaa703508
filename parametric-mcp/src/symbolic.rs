//! Symbolic tracing and the two interchangeable code-generation engines.
//!
//! The rest of the crate only touches this module through four capabilities:
//! variable creation, in-place evaluator construction, dense derivatives,
//! and sparse Jacobian extraction. Which engine generates the evaluators is
//! picked once, at compile time, through [`SymbolicBackend`]; nothing pays
//! for the indirection during solves or sensitivity evaluations.

mod expr;
mod graph;
mod tape;

pub use expr::Expr;

use indexmap::IndexSet;
use rustc_hash::FxHashMap;

/// An in-place numerical evaluator: `f(out, input)` where `input` is the
/// concatenation of every variable set in layout order.
pub(crate) type CompiledFn = Box<dyn Fn(&mut [f64], &[f64])>;

/// Offsets of each variable set inside the concatenated input vector.
#[derive(Clone, Debug)]
pub(crate) struct VarLayout {
    blocks: Vec<(&'static str, usize)>,
}

impl VarLayout {
    pub(crate) fn new(blocks: &[(&'static str, usize)]) -> Self {
        Self {
            blocks: blocks.to_vec(),
        }
    }

    pub(crate) fn total_len(&self) -> usize {
        self.blocks.iter().map(|(_, len)| len).sum()
    }

    pub(crate) fn offset_of(&self, name: &str) -> Option<usize> {
        let mut offset = 0;
        for (block, len) in &self.blocks {
            if *block == name {
                return Some(offset);
            }
            offset += len;
        }
        None
    }
}

/// Which symbolic engine generates the numerical evaluators.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SymbolicBackend {
    /// Flatten the expression graph into an instruction tape with shared
    /// subexpressions emitted once, then evaluate by walking the tape over a
    /// reused slot buffer.
    #[default]
    InstructionTape,
    /// Interpret the expression graph directly, memoizing shared nodes per
    /// evaluation.
    ExpressionGraph,
}

impl SymbolicBackend {
    /// Creates a fresh vector of `dim` symbolic variables drawn from the set
    /// `name`.
    ///
    /// `dim == 0` yields an empty vector; a zero-parameter problem still
    /// traces and compiles.
    pub fn variables(name: &'static str, dim: usize) -> Vec<Expr> {
        (0..dim).map(|index| Expr::variable(name, index)).collect()
    }

    pub(crate) fn build_in_place(self, exprs: &[Expr], layout: &VarLayout) -> CompiledFn {
        match self {
            SymbolicBackend::InstructionTape => tape::compile(exprs, layout),
            SymbolicBackend::ExpressionGraph => graph::compile(exprs, layout),
        }
    }
}

/// Dense symbolic gradient of a scalar expression.
///
/// Panics if `variables` contains anything other than plain variables.
pub fn gradient(expr: &Expr, variables: &[Expr]) -> Vec<Expr> {
    variables
        .iter()
        .map(|v| {
            let (name, index) = v
                .variable_id()
                .expect("gradient variables must be plain variables");
            expr.derivative(name, index)
        })
        .collect()
}

/// Dense symbolic Jacobian, one gradient row per expression.
///
/// Panics if `variables` contains anything other than plain variables.
pub fn jacobian(exprs: &[Expr], variables: &[Expr]) -> Vec<Vec<Expr>> {
    exprs.iter().map(|e| gradient(e, variables)).collect()
}

/// A sparse symbolic Jacobian: the structural pattern plus one derivative
/// expression per nonzero, stored in column-major order.
///
/// The pattern comes from structural dependence, so it is stable across all
/// numerical inputs: an entry is present exactly when the row's expression
/// mentions the column's variable.
pub struct SymbolicJacobian {
    nrows: usize,
    ncols: usize,
    entries: Vec<(usize, usize, Expr)>,
}

impl SymbolicJacobian {
    /// Number of rows.
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Number of columns.
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Number of structural nonzeros.
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    /// Row index of every nonzero, in column-major order.
    pub fn rows(&self) -> Vec<usize> {
        self.entries.iter().map(|(row, _, _)| *row).collect()
    }

    /// Column index of every nonzero, in column-major order.
    pub fn cols(&self) -> Vec<usize> {
        self.entries.iter().map(|(_, col, _)| *col).collect()
    }

    pub(crate) fn entries(&self) -> &[(usize, usize, Expr)] {
        &self.entries
    }

    pub(crate) fn exprs(&self) -> Vec<Expr> {
        self.entries.iter().map(|(_, _, e)| e.clone()).collect()
    }
}

/// Symbolic sparse Jacobian of `exprs` with respect to `variables`.
///
/// Panics if `variables` contains anything other than plain variables.
pub fn sparse_jacobian(exprs: &[Expr], variables: &[Expr]) -> SymbolicJacobian {
    let column_of: FxHashMap<(&'static str, usize), usize> = variables
        .iter()
        .enumerate()
        .map(|(j, v)| {
            let id = v
                .variable_id()
                .expect("jacobian variables must be plain variables");
            (id, j)
        })
        .collect();

    let mut entries = Vec::new();
    for (i, expr) in exprs.iter().enumerate() {
        let mut mentioned = IndexSet::new();
        expr.collect_variables(&mut mentioned);
        for (name, index) in mentioned {
            if let Some(&j) = column_of.get(&(name, index)) {
                entries.push((i, j, expr.derivative(name, index)));
            }
        }
    }
    // faer's CSC storage wants columns outermost, rows ascending inside.
    entries.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));

    SymbolicJacobian {
        nrows: exprs.len(),
        ncols: variables.len(),
        entries,
    }
}
