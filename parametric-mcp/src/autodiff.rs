//! AD rule glue: three integrations with identical mathematical content.
//!
//! * [`pullback`](solve_with_pullback) — a reverse-mode rule whose cotangent
//!   computation is lazy.
//! * [`dual`](solve_dual) — a forward-mode rule over dual numbers.
//! * [`activity`](solve_forward) — an annotation-based forward/reverse pair
//!   in the style of activity-tracking AD engines, with batched tangents and
//!   a two-phase augmented-primal / reverse split.
//!
//! All three compose the sensitivity `∂z*/∂θ` from
//! [`jacobian_wrt_parameters`](crate::jacobian_wrt_parameters) with upstream
//! or downstream (co)tangents; none differentiates through the solver's
//! iterations.

mod activity;
mod dual;
mod pullback;

pub use activity::{
    ParameterActivity, ParameterTangents, ProblemActivity, ReverseTape, SolutionTangents,
    solve_augmented, solve_forward,
};
pub use dual::{DualSolution, solve_dual};
pub use pullback::{PullbackSolve, solve_with_pullback};

use faer::sparse::SparseColMat;

/// Accumulates `matrix * vector` into `out`.
pub(crate) fn times_vector(matrix: &SparseColMat<usize, f64>, vector: &[f64], out: &mut [f64]) {
    let col_ptr = matrix.symbolic().col_ptr();
    let row_idx = matrix.symbolic().row_idx();
    let values = matrix.val();
    for (j, &v) in vector.iter().enumerate() {
        for k in col_ptr[j]..col_ptr[j + 1] {
            out[row_idx[k]] += values[k] * v;
        }
    }
}

/// Accumulates `matrix^T * vector` into `out`.
pub(crate) fn transpose_times_vector(
    matrix: &SparseColMat<usize, f64>,
    vector: &[f64],
    out: &mut [f64],
) {
    let col_ptr = matrix.symbolic().col_ptr();
    let row_idx = matrix.symbolic().row_idx();
    let values = matrix.val();
    for (j, dst) in out.iter_mut().enumerate() {
        for k in col_ptr[j]..col_ptr[j + 1] {
            *dst += values[k] * vector[row_idx[k]];
        }
    }
}
