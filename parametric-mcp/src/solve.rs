//! Driving the external complementarity solver through its callback wire
//! contract.

use faer::sparse::SparseColMat;
use pathns_faer::{Info, SolverOptions, Status, solve_mcp};

use crate::Error;
use crate::problem::ParametricMCP;
use crate::sparse::csc_to_coo;

/// What a [`solve`] call produced.
///
/// Non-convergence is not an error: inspect [`Solution::status`] and decide
/// on a policy (retry from another initial guess, relax bounds, give up).
#[derive(Clone, Debug)]
pub struct Solution {
    /// The final iterate, length `n`.
    pub z: Vec<f64>,
    /// The solver's termination status, passed through verbatim.
    pub status: Status,
    /// Solver diagnostics, passed through verbatim.
    pub info: Info,
}

/// Options accepted by [`solve`].
#[derive(Clone, Debug)]
pub struct SolveOptions {
    /// Starting point, length `n`. Defaults to the zero vector.
    pub initial_guess: Option<Vec<f64>>,
    /// Let the solver print its per-iteration convergence table.
    pub verbose: bool,
    /// Emit a warning when the solver finishes with a non-solved status.
    pub warn_on_failure: bool,
    /// Pass the structurally constant Jacobian entries to the solver as
    /// presolve linear elements.
    pub enable_presolve: bool,
    /// Whether the Jacobian values may be written as one contiguous block,
    /// or must be scattered per column according to the column starts.
    pub jacobian_data_contiguous: bool,
    /// Solve the linearization of `F` around the initial guess instead of
    /// `F` itself. The Jacobian is then evaluated exactly once and every
    /// entry is a presolve linear element.
    pub approximate_linear: bool,
    /// Pass-through solver options (tolerances, iteration limits, ...).
    /// The silence flag, structure-constant hint, and linear elements are
    /// managed by the driver and overwritten here.
    pub solver: SolverOptions,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            initial_guess: None,
            verbose: false,
            warn_on_failure: true,
            enable_presolve: false,
            jacobian_data_contiguous: true,
            approximate_linear: false,
            solver: SolverOptions::default(),
        }
    }
}

/// Solves the problem at the given parameter value.
///
/// Returns `Err` only for malformed arguments; solver non-convergence comes
/// back as a non-solved [`Status`] on the solution, with an optional
/// warning.
pub fn solve(
    problem: &ParametricMCP,
    theta: &[f64],
    options: &SolveOptions,
) -> Result<Solution, Error> {
    let n = problem.problem_size();
    if theta.len() != problem.parameter_dimension() {
        return Err(Error::DimensionMismatch {
            argument: "theta",
            expected: problem.parameter_dimension(),
            actual: theta.len(),
        });
    }
    let initial_guess = match &options.initial_guess {
        Some(guess) => {
            if guess.len() != n {
                return Err(Error::DimensionMismatch {
                    argument: "initial_guess",
                    expected: n,
                    actual: guess.len(),
                });
            }
            guess.clone()
        }
        None => vec![0.0; n],
    };

    let solution = if options.approximate_linear {
        solve_linearized(problem, theta, initial_guess, options)?
    } else {
        solve_exact(problem, theta, initial_guess, options)
    };

    if !solution.status.is_solved() && options.warn_on_failure {
        log::warn!(
            "complementarity solve finished with status {:?} (residual {:.3e} after {} major iterations)",
            solution.status,
            solution.info.residual,
            solution.info.major_iterations,
        );
    }
    Ok(solution)
}

fn solver_options(options: &SolveOptions, linear_elements: Vec<usize>) -> SolverOptions {
    options
        .solver
        .clone()
        .with_silent(!options.verbose)
        .with_constant_structure(true)
        .with_linear_elements(linear_elements)
}

fn solve_exact(
    problem: &ParametricMCP,
    theta: &[f64],
    initial_guess: Vec<f64>,
    options: &SolveOptions,
) -> Solution {
    let n = problem.problem_size();
    let nnz = problem.jacobian_z().nnz();
    let contiguous = options.jacobian_data_contiguous;

    let residual = |_n: usize, z: &[f64], out: &mut [f64]| -> i32 {
        problem.evaluate_residual(out, z, theta);
        0
    };
    let jacobian = |_n: usize,
                    _nnz: usize,
                    z: &[f64],
                    col: &mut [i32],
                    len: &mut [i32],
                    row: &mut [i32],
                    data: &mut [f64]|
     -> i32 {
        problem
            .jacobian_z()
            .with_refreshed(z, theta, |matrix| csc_to_coo(matrix, col, len, row, data, contiguous));
        0
    };

    let linear_elements = if options.enable_presolve {
        problem.jacobian_z().constant_entries().to_vec()
    } else {
        Vec::new()
    };
    let (z, status, info) = solve_mcp(
        n,
        nnz,
        residual,
        jacobian,
        problem.lower_bounds(),
        problem.upper_bounds(),
        &initial_guess,
        &solver_options(options, linear_elements),
    );
    Solution { z, status, info }
}

/// The linearized fast path: solve `M d + q ⟂ lb - z0 <= d <= ub - z0` with
/// `M = ∂F/∂z(z0, θ)` and `q = F(z0, θ)`, then shift back by `z0`.
fn solve_linearized(
    problem: &ParametricMCP,
    theta: &[f64],
    initial_guess: Vec<f64>,
    options: &SolveOptions,
) -> Result<Solution, Error> {
    let n = problem.problem_size();
    let contiguous = options.jacobian_data_contiguous;

    let mut q = vec![0.0; n];
    problem.evaluate_residual(&mut q, &initial_guess, theta);
    let matrix: SparseColMat<usize, f64> = problem.jacobian_z().matrix_at(&initial_guess, theta)?;

    let shifted_lower: Vec<f64> = problem
        .lower_bounds()
        .iter()
        .zip(&initial_guess)
        .map(|(&b, &z0)| b - z0)
        .collect();
    let shifted_upper: Vec<f64> = problem
        .upper_bounds()
        .iter()
        .zip(&initial_guess)
        .map(|(&b, &z0)| b - z0)
        .collect();

    let col_ptr = matrix.symbolic().col_ptr().to_vec();
    let row_idx = matrix.symbolic().row_idx().to_vec();
    let values = matrix.val().to_vec();
    let nnz = values.len();

    let residual = |_n: usize, d: &[f64], out: &mut [f64]| -> i32 {
        out.copy_from_slice(&q);
        for j in 0..n {
            for k in col_ptr[j]..col_ptr[j + 1] {
                out[row_idx[k]] += values[k] * d[j];
            }
        }
        0
    };
    let jacobian = |_n: usize,
                    _nnz: usize,
                    _d: &[f64],
                    col: &mut [i32],
                    len: &mut [i32],
                    row: &mut [i32],
                    data: &mut [f64]|
     -> i32 {
        csc_to_coo(matrix.as_ref(), col, len, row, data, contiguous);
        0
    };

    // In this mode every nonzero of M is a linear element.
    let (d, status, info) = solve_mcp(
        n,
        nnz,
        residual,
        jacobian,
        &shifted_lower,
        &shifted_upper,
        &vec![0.0; n],
        &solver_options(options, (0..nnz).collect()),
    );
    let z = d.iter().zip(&initial_guess).map(|(&d, &z0)| d + z0).collect();
    Ok(Solution { z, status, info })
}
