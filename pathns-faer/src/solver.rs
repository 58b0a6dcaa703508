use std::time::Instant;

use faer::sparse::Triplet;

use crate::linalg::solve_step;
use crate::{Info, SolverOptions, Status};

/// Armijo sufficient-decrease parameter for the merit line search.
const ARMIJO_SIGMA: f64 = 1e-4;
const STEP_SHRINK: f64 = 0.5;
const MIN_STEP: f64 = 1e-12;

/// Which piece of the minimum map is active for a coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Branch {
    /// `z - F(z)` fell below the lower bound: the coordinate is pinned there.
    Lower,
    /// `z - F(z)` rose above the upper bound.
    Upper,
    /// The coordinate is interior and the residual row is `F_i`.
    Free,
}

/// Evaluates `H(z) = z - mid(lb, ub, z - F(z))` into `h`, records which
/// branch each coordinate took, and returns the infinity norm of `h`.
fn min_map(
    z: &[f64],
    fval: &[f64],
    lower: &[f64],
    upper: &[f64],
    h: &mut [f64],
    branch: &mut [Branch],
) -> f64 {
    let mut norm = 0.0_f64;
    for i in 0..z.len() {
        let inner = z[i] - fval[i];
        if inner <= lower[i] {
            branch[i] = Branch::Lower;
            h[i] = z[i] - lower[i];
        } else if inner >= upper[i] {
            branch[i] = Branch::Upper;
            h[i] = z[i] - upper[i];
        } else {
            branch[i] = Branch::Free;
            h[i] = fval[i];
        }
        norm = norm.max(h[i].abs());
    }
    norm
}

fn merit(h: &[f64]) -> f64 {
    0.5 * h.iter().map(|v| v * v).sum::<f64>()
}

/// Solve the MCP `F(z) ⟂ lb <= z <= ub`.
///
/// `residual` and `jacobian` follow the PATH callback contract documented at
/// the crate root: both return `0` on success, and `jacobian` writes
/// 1-indexed column starts into `col`, per-column counts into `len`, and
/// 1-indexed row indices plus values, in CSC order, into `row` and `data`.
/// `nnz` is the fixed number of structural nonzeros of `∂F/∂z`.
///
/// The initial point is clamped into `[lb, ub]` before the first iteration.
/// Returns the final iterate, a [`Status`], and solve diagnostics; failure to
/// converge is reported through the status, never by panicking.
pub fn solve_mcp<F, J>(
    n: usize,
    nnz: usize,
    mut residual: F,
    mut jacobian: J,
    lower: &[f64],
    upper: &[f64],
    initial: &[f64],
    options: &SolverOptions,
) -> (Vec<f64>, Status, Info)
where
    F: FnMut(usize, &[f64], &mut [f64]) -> i32,
    J: FnMut(usize, usize, &[f64], &mut [i32], &mut [i32], &mut [i32], &mut [f64]) -> i32,
{
    let mut info = Info::default();
    assert_eq!(lower.len(), n, "lower bound length must match the problem size");
    assert_eq!(upper.len(), n, "upper bound length must match the problem size");
    assert_eq!(initial.len(), n, "initial point length must match the problem size");

    if n == 0 {
        return (Vec::new(), Status::Solved, info);
    }
    for i in 0..n {
        if !(lower[i] <= upper[i]) {
            return (initial.to_vec(), Status::BoundError, info);
        }
    }

    let mut z: Vec<f64> = initial
        .iter()
        .zip(lower.iter().zip(upper))
        .map(|(&v, (&l, &u))| v.clamp(l, u))
        .collect();

    // COO arrays owned by the solver for the duration of each callback.
    let mut col = vec![0_i32; n];
    let mut len = vec![0_i32; n];
    let mut row = vec![0_i32; nnz];
    let mut data = vec![0.0_f64; nnz];

    let mut fetch =
        |z: &[f64], col: &mut [i32], len: &mut [i32], row: &mut [i32], data: &mut [f64], info: &mut Info| {
            info.jacobian_evaluations += 1;
            jacobian(n, nnz, z, col, len, row, data) == 0
        };

    if !fetch(&z, &mut col, &mut len, &mut row, &mut data, &mut info) {
        return (z, Status::DomainError, info);
    }

    // Decode the wire layout once. `pattern` holds 0-based (row, col) pairs
    // and `data_pos` the position of each entry in `data`, honoring the
    // column starts the callback reported.
    let decode = |col: &[i32], len: &[i32], row: &[i32]| {
        let mut pattern = Vec::with_capacity(nnz);
        let mut data_pos = Vec::with_capacity(nnz);
        for j in 0..n {
            let start = (col[j] - 1) as usize;
            for t in 0..len[j] as usize {
                pattern.push(((row[start + t] - 1) as usize, j));
                data_pos.push(start + t);
            }
        }
        (pattern, data_pos)
    };
    let (mut pattern, mut data_pos) = decode(&col, &len, &row);

    // A Jacobian whose every entry is linear in z never needs re-evaluation.
    let fully_linear = nnz > 0 && options.linear_elements.len() == nnz;

    let mut fval = vec![0.0; n];
    let mut h = vec![0.0; n];
    let mut branch = vec![Branch::Free; n];
    let mut neg_h = vec![0.0; n];
    let mut z_trial = vec![0.0; n];
    let mut f_trial = vec![0.0; n];
    let mut h_trial = vec![0.0; n];
    let mut branch_trial = vec![Branch::Free; n];
    let started = Instant::now();

    for major in 0..options.major_iteration_limit {
        info.major_iterations = major;
        if residual(n, &z, &mut fval) != 0 {
            return (z, Status::DomainError, info);
        }
        let res = min_map(&z, &fval, lower, upper, &mut h, &mut branch);
        info.residual = res;
        if !options.silent {
            println!("| {major:4} | {res:<10.3e} |");
        }
        // `max` ignores NaN operands, so the norm alone cannot be trusted.
        if !res.is_finite() || h.iter().any(|v| v.is_nan()) {
            return (z, Status::DomainError, info);
        }
        if res <= options.convergence_tolerance {
            return (z, Status::Solved, info);
        }
        if let Some(limit) = options.time_limit {
            if started.elapsed() > limit {
                return (z, Status::TimeLimit, info);
            }
        }
        if info.major_iterations + info.minor_iterations >= options.cumulative_iteration_limit {
            return (z, Status::CumulativeIterationLimit, info);
        }

        if major > 0 && !fully_linear {
            if !fetch(&z, &mut col, &mut len, &mut row, &mut data, &mut info) {
                return (z, Status::DomainError, info);
            }
            if !options.jacobian_structure_constant {
                (pattern, data_pos) = decode(&col, &len, &row);
            }
        }

        // Newton matrix of the minimum map: Jacobian rows where the residual
        // branch is active, identity rows where a bound is.
        let mut triplets: Vec<Triplet<usize, usize, f64>> = Vec::with_capacity(pattern.len() + n);
        for (k, &(r, c)) in pattern.iter().enumerate() {
            if branch[r] == Branch::Free {
                triplets.push(Triplet::new(r, c, data[data_pos[k]]));
            }
        }
        for i in 0..n {
            if branch[i] != Branch::Free {
                triplets.push(Triplet::new(i, i, 1.0));
            }
        }
        for i in 0..n {
            neg_h[i] = -h[i];
        }
        let Some(direction) = solve_step(n, &triplets, &neg_h) else {
            return (z, Status::InternalError, info);
        };

        // Backtracking line search on the merit function.
        let psi = merit(&h);
        let mut step = 1.0_f64;
        loop {
            for i in 0..n {
                z_trial[i] = z[i] + step * direction[i];
            }
            if residual(n, &z_trial, &mut f_trial) == 0 {
                min_map(&z_trial, &f_trial, lower, upper, &mut h_trial, &mut branch_trial);
                let psi_trial = merit(&h_trial);
                if psi_trial.is_finite() && psi_trial <= (1.0 - 2.0 * ARMIJO_SIGMA * step) * psi {
                    break;
                }
            }
            info.minor_iterations += 1;
            step *= STEP_SHRINK;
            if step < MIN_STEP {
                return (z, Status::NoProgress, info);
            }
            if info.major_iterations + info.minor_iterations >= options.cumulative_iteration_limit {
                return (z, Status::CumulativeIterationLimit, info);
            }
        }
        z.copy_from_slice(&z_trial);
    }

    info.major_iterations = options.major_iteration_limit;
    (z, Status::MajorIterationLimit, info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_map_classifies_branches() {
        let z = [0.0, 5.0, 1.0];
        let fval = [2.0, -3.0, 0.5];
        let lower = [0.0, 0.0, f64::NEG_INFINITY];
        let upper = [4.0, 4.0, f64::INFINITY];
        let mut h = [0.0; 3];
        let mut branch = [Branch::Free; 3];
        let norm = min_map(&z, &fval, &lower, &upper, &mut h, &mut branch);

        // z - F = (-2, 8, 0.5): below lb, above ub, interior.
        assert_eq!(branch, [Branch::Lower, Branch::Upper, Branch::Free]);
        assert_eq!(h[0], 0.0);
        assert_eq!(h[1], 1.0);
        assert_eq!(h[2], 0.5);
        assert_eq!(norm, 1.0);
    }

    #[test]
    fn merit_is_half_squared_norm() {
        assert_eq!(merit(&[3.0, 4.0]), 12.5);
    }
}
