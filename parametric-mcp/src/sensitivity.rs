//! The implicit-differentiation core: `∂z*/∂θ` from the residual equations
//! restricted to the strictly inactive coordinates.

use faer::Mat;
use faer::prelude::SolveLstsq;
use faer::sparse::{SparseColMat, Triplet};

use crate::Error;
use crate::problem::ParametricMCP;
use crate::solve::Solution;

/// Default tolerance `τ` of the strictly-inactive predicate.
pub const ACTIVE_TOLERANCE: f64 = 1e-3;

/// [`jacobian_wrt_parameters_with`] at the default [`ACTIVE_TOLERANCE`].
pub fn jacobian_wrt_parameters(
    problem: &ParametricMCP,
    solution: &Solution,
    theta: &[f64],
) -> Result<SparseColMat<usize, f64>, Error> {
    jacobian_wrt_parameters_with(problem, solution, theta, ACTIVE_TOLERANCE)
}

/// The sensitivity `∂z*/∂θ` of the solution map, as a sparse `n × m` matrix.
///
/// A coordinate is strictly inactive when it is at least `active_tolerance`
/// away from both of its bounds; there the residual equality `F_i = 0` holds
/// and the implicit function theorem gives
/// `∂z*[I]/∂θ = (-A[I,I]) \ B[I,:]` with `A = ∂F/∂z` and `B = ∂F/∂θ`.
/// Coordinates pinned at a bound contribute zero rows. The restricted solve
/// uses a column-pivoted QR factorization, so a numerically singular
/// `A[I,I]` degrades to a least-squares solution instead of producing NaNs.
///
/// Fails with [`Error::MissingSensitivities`] when the problem was compiled
/// without `∂F/∂θ`.
pub fn jacobian_wrt_parameters_with(
    problem: &ParametricMCP,
    solution: &Solution,
    theta: &[f64],
    active_tolerance: f64,
) -> Result<SparseColMat<usize, f64>, Error> {
    let n = problem.problem_size();
    let m = problem.parameter_dimension();
    let jacobian_theta = problem.jacobian_theta()?;
    if theta.len() != m {
        return Err(Error::DimensionMismatch {
            argument: "theta",
            expected: m,
            actual: theta.len(),
        });
    }
    if solution.z.len() != n {
        return Err(Error::DimensionMismatch {
            argument: "solution",
            expected: n,
            actual: solution.z.len(),
        });
    }

    let z = &solution.z;
    let lower = problem.lower_bounds();
    let upper = problem.upper_bounds();
    let inactive: Vec<usize> = (0..n)
        .filter(|&i| {
            z[i] >= lower[i] + active_tolerance && z[i] <= upper[i] - active_tolerance
        })
        .collect();

    let empty: [Triplet<usize, usize, f64>; 0] = [];
    if inactive.is_empty() || m == 0 {
        return Ok(SparseColMat::try_new_from_triplets(n, m, &empty)?);
    }

    let k = inactive.len();
    let mut local = vec![usize::MAX; n];
    for (r, &i) in inactive.iter().enumerate() {
        local[i] = r;
    }

    // Gather -A[I, I] and B[I, :] densely; the inactive block is typically
    // small compared to the full pattern.
    let mut negated_a = Mat::<f64>::zeros(k, k);
    problem.jacobian_z().with_refreshed(z, theta, |a| {
        let col_ptr = a.symbolic().col_ptr();
        let row_idx = a.symbolic().row_idx();
        let values = a.val();
        for j in 0..n {
            if local[j] == usize::MAX {
                continue;
            }
            for idx in col_ptr[j]..col_ptr[j + 1] {
                let r = row_idx[idx];
                if local[r] != usize::MAX {
                    negated_a[(local[r], local[j])] = -values[idx];
                }
            }
        }
    });

    let mut rhs = Mat::<f64>::zeros(k, m);
    jacobian_theta.with_refreshed(z, theta, |b| {
        let col_ptr = b.symbolic().col_ptr();
        let row_idx = b.symbolic().row_idx();
        let values = b.val();
        for j in 0..m {
            for idx in col_ptr[j]..col_ptr[j + 1] {
                let r = row_idx[idx];
                if local[r] != usize::MAX {
                    rhs[(local[r], j)] = values[idx];
                }
            }
        }
    });

    // Column pivoting is what keeps a rank-deficient inactive block from
    // silently turning into NaNs.
    let qr = negated_a.col_piv_qr();
    let restricted = qr.solve_lstsq(rhs.as_ref());

    let mut triplets = Vec::with_capacity(k * m);
    for (r, &i) in inactive.iter().enumerate() {
        for j in 0..m {
            triplets.push(Triplet::new(i, j, restricted[(r, j)]));
        }
    }
    Ok(SparseColMat::try_new_from_triplets(n, m, &triplets)?)
}
