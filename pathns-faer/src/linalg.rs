use faer::prelude::{Solve, SolveLstsq};
use faer::sparse::linalg::solvers::{Lu, Qr, SymbolicLu, SymbolicQr};
use faer::sparse::{SparseColMat, Triplet};
use faer::{Col, Mat};

/// Solves the Newton system `M d = rhs` assembled from `triplets`.
///
/// Tries a sparse LU factorization first. When the matrix is singular (a
/// degenerate active set can zero out rows), falls back to a sparse QR
/// least-squares solve so the outer iteration still gets a usable direction.
/// Returns `None` if the matrix could not be assembled or factored, or if
/// the computed direction is not finite.
pub(crate) fn solve_step(
    n: usize,
    triplets: &[Triplet<usize, usize, f64>],
    rhs: &[f64],
) -> Option<Vec<f64>> {
    let matrix = SparseColMat::<usize, f64>::try_new_from_triplets(n, n, triplets).ok()?;

    let b = Col::<f64>::from_fn(n, |i| rhs[i]);
    if let Ok(symbolic) = SymbolicLu::try_new(matrix.symbolic()) {
        if let Ok(lu) = Lu::try_new_with_symbolic(symbolic, matrix.as_ref()) {
            let x = lu.solve(&b);
            if x.iter().all(|v| v.is_finite()) {
                return Some(x.iter().copied().collect());
            }
        }
    }

    let symbolic = SymbolicQr::try_new(matrix.symbolic()).ok()?;
    let qr = Qr::try_new_with_symbolic(symbolic, matrix.as_ref()).ok()?;
    let mut solution = Mat::<f64>::zeros(n, 1);
    for i in 0..n {
        solution[(i, 0)] = rhs[i];
    }
    // QR least-squares writes the solution into the top n rows.
    qr.solve_lstsq_in_place(solution.as_mut());
    let x: Vec<f64> = (0..n).map(|i| solution[(i, 0)]).collect();
    x.iter().all(|v| v.is_finite()).then_some(x)
}
