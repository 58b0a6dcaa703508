//! Sparse containers and adapters: the pattern-plus-scratch evaluator used
//! for both Jacobians, and the COO conversion the solver wire contract
//! expects.

use std::cell::RefCell;

use faer::sparse::{Pair, SparseColMat, SparseColMatRef, SymbolicSparseColMat, Triplet};
use rustc_hash::FxHashSet;

use crate::Error;
use crate::symbolic::{CompiledFn, Expr, SymbolicJacobian};

/// A matrix-valued function with a fixed sparsity pattern.
///
/// Bundles an in-place evaluator with the pattern it writes into, a
/// preallocated compressed-sparse-column scratch matrix, and the set of
/// entries whose expressions are constant in the differentiation variable.
/// The scratch lives in a [`RefCell`], which is what makes a compiled
/// problem single-threaded by construction: one handle per worker.
pub struct SparseFunction {
    eval: CompiledFn,
    symbolic: SymbolicSparseColMat<usize>,
    values: RefCell<Vec<f64>>,
    input: RefCell<Vec<f64>>,
    rows: Vec<usize>,
    cols: Vec<usize>,
    constant_entries: Vec<usize>,
}

impl SparseFunction {
    pub(crate) fn new(
        jacobian: &SymbolicJacobian,
        eval: CompiledFn,
        constant_entries: Vec<usize>,
        input_len: usize,
    ) -> Result<Self, Error> {
        let rows = jacobian.rows();
        let cols = jacobian.cols();
        let pairs: Vec<Pair<usize, usize>> = rows
            .iter()
            .zip(&cols)
            .map(|(&row, &col)| Pair { row, col })
            .collect();
        // The entries are already sorted column-major, so the storage order
        // of the symbolic structure matches the evaluator's output order.
        let (symbolic, _) =
            SymbolicSparseColMat::try_new_from_indices(jacobian.nrows(), jacobian.ncols(), &pairs)?;
        Ok(Self {
            eval,
            symbolic,
            values: RefCell::new(vec![0.0; pairs.len()]),
            input: RefCell::new(vec![0.0; input_len]),
            rows,
            cols,
            constant_entries,
        })
    }

    /// Number of structural nonzeros.
    pub fn nnz(&self) -> usize {
        self.rows.len()
    }

    /// `(nrows, ncols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.symbolic.nrows(), self.symbolic.ncols())
    }

    /// Row index of every nonzero, in storage (column-major) order.
    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    /// Column index of every nonzero, in storage (column-major) order.
    pub fn cols(&self) -> &[usize] {
        &self.cols
    }

    /// 0-based storage positions of the entries that do not depend on the
    /// differentiation variable. These are the solver's presolve "linear
    /// elements".
    pub fn constant_entries(&self) -> &[usize] {
        &self.constant_entries
    }

    /// Evaluates the function at `(z, theta)` into the scratch matrix and
    /// hands a view of it to `access`.
    pub fn with_refreshed<R>(
        &self,
        z: &[f64],
        theta: &[f64],
        access: impl FnOnce(SparseColMatRef<'_, usize, f64>) -> R,
    ) -> R {
        {
            let mut input = self.input.borrow_mut();
            input[..z.len()].copy_from_slice(z);
            input[z.len()..].copy_from_slice(theta);
            let mut values = self.values.borrow_mut();
            (self.eval)(&mut values, &input);
        }
        let values = self.values.borrow();
        access(SparseColMatRef::new(self.symbolic.as_ref(), &values))
    }

    /// Evaluates at `(z, theta)` and copies the result into an owned matrix.
    pub(crate) fn matrix_at(&self, z: &[f64], theta: &[f64]) -> Result<SparseColMat<usize, f64>, Error> {
        self.with_refreshed(z, theta, |matrix| {
            let triplets: Vec<Triplet<usize, usize, f64>> = self
                .rows
                .iter()
                .zip(&self.cols)
                .zip(matrix.val())
                .map(|((&row, &col), &val)| Triplet::new(row, col, val))
                .collect();
            let (nrows, ncols) = self.shape();
            Ok(SparseColMat::try_new_from_triplets(nrows, ncols, &triplets)?)
        })
    }
}

/// Populates the solver's COO arrays from a CSC matrix.
///
/// `col` receives 1-indexed column start positions, `len` per-column counts,
/// `row` 1-indexed row indices, and `data` the nonzero values; CSC iteration
/// order is preserved. With `contiguous_data` the values are copied in one
/// pass; otherwise each column is written at the position its column start
/// dictates, which is what a solver handing out scattered `data` segments
/// relies on.
pub fn csc_to_coo(
    matrix: SparseColMatRef<'_, usize, f64>,
    col: &mut [i32],
    len: &mut [i32],
    row: &mut [i32],
    data: &mut [f64],
    contiguous_data: bool,
) {
    let col_ptr = matrix.symbolic().col_ptr();
    let row_idx = matrix.symbolic().row_idx();
    let values = matrix.val();

    for j in 0..matrix.ncols() {
        col[j] = (col_ptr[j] + 1) as i32;
        len[j] = (col_ptr[j + 1] - col_ptr[j]) as i32;
    }
    for (dst, &r) in row.iter_mut().zip(row_idx) {
        *dst = (r + 1) as i32;
    }
    if contiguous_data {
        data[..values.len()].copy_from_slice(values);
    } else {
        for j in 0..matrix.ncols() {
            let start = (col[j] - 1) as usize;
            for (t, k) in (col_ptr[j]..col_ptr[j + 1]).enumerate() {
                data[start + t] = values[k];
            }
        }
    }
}

/// 0-based storage indices of the Jacobian entries whose expression mentions
/// none of `variables`.
///
/// These feed the solver's linear-elements presolve hint: an entry constant
/// in the differentiation variable can be exploited during the solver's
/// initial reduction pass.
pub fn constant_entries(jacobian: &SymbolicJacobian, variables: &[Expr]) -> Vec<usize> {
    let ids: FxHashSet<(&'static str, usize)> = variables
        .iter()
        .filter_map(|v| v.variable_id())
        .collect();
    jacobian
        .entries()
        .iter()
        .enumerate()
        .filter(|(_, (_, _, expr))| !expr.references_any(&ids))
        .map(|(k, _)| k)
        .collect()
}
