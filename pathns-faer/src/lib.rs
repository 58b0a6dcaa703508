#![doc = include_str!("../README.md")]

mod linalg;
mod solver;

pub use solver::solve_mcp;

use std::time::Duration;

/// Outcome of an MCP solve.
///
/// The taxonomy mirrors the termination codes of the PATH solver so that
/// callers wrapping either backend see the same vocabulary. Only `Solved`
/// means the returned point satisfies the complementarity conditions to
/// within the convergence tolerance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Status {
    /// Converged to a solution.
    Solved,
    /// The line search could not make further progress.
    NoProgress,
    /// Ran out of major (Newton) iterations.
    MajorIterationLimit,
    /// Ran out of cumulative (major plus line-search) iterations.
    CumulativeIterationLimit,
    /// Ran out of wall-clock time.
    TimeLimit,
    /// Interrupted by the caller.
    UserInterrupt,
    /// A lower bound exceeds the matching upper bound.
    BoundError,
    /// A callback reported failure or produced non-finite values.
    DomainError,
    /// The problem was detected to be infeasible.
    Infeasible,
    /// An internal failure, e.g. the Newton matrix could not be factored.
    InternalError,
}

impl Status {
    /// Did the solver converge?
    pub fn is_solved(&self) -> bool {
        matches!(self, Status::Solved)
    }
}

/// Diagnostics reported alongside the final iterate.
#[derive(Clone, Debug, Default)]
pub struct Info {
    /// Infinity norm of the complementarity residual at the final iterate.
    pub residual: f64,
    /// Number of major (Newton) iterations taken.
    pub major_iterations: usize,
    /// Number of minor iterations, i.e. rejected line-search trials.
    pub minor_iterations: usize,
    /// How often the Jacobian callback was invoked.
    pub jacobian_evaluations: usize,
}

/// Options controlling a single [`solve_mcp`] call.
#[derive(Clone, Debug)]
pub struct SolverOptions {
    /// Declare convergence once the residual infinity norm drops below this.
    pub convergence_tolerance: f64,
    /// Maximum number of Newton iterations.
    pub major_iteration_limit: usize,
    /// Maximum number of major plus minor iterations combined.
    pub cumulative_iteration_limit: usize,
    /// Wall-clock budget, checked once per major iteration.
    pub time_limit: Option<Duration>,
    /// Suppress the per-iteration convergence table.
    pub silent: bool,
    /// The Jacobian callback always reports the same sparsity structure, so
    /// the index arrays only need to be fetched once.
    pub jacobian_structure_constant: bool,
    /// 0-based positions (in nonzero order) of Jacobian entries that do not
    /// depend on `z`. When every entry is listed the Jacobian is evaluated
    /// exactly once.
    pub linear_elements: Vec<usize>,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            convergence_tolerance: 1e-10,
            major_iteration_limit: 500,
            cumulative_iteration_limit: 10_000,
            time_limit: None,
            silent: true,
            jacobian_structure_constant: false,
            linear_elements: Vec::new(),
        }
    }
}

impl SolverOptions {
    /// Set the convergence tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.convergence_tolerance = tolerance;
        self
    }

    /// Set the major iteration limit.
    pub fn with_major_iteration_limit(mut self, limit: usize) -> Self {
        self.major_iteration_limit = limit;
        self
    }

    /// Enable or suppress per-iteration output.
    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Promise that the Jacobian sparsity structure never changes.
    pub fn with_constant_structure(mut self, constant: bool) -> Self {
        self.jacobian_structure_constant = constant;
        self
    }

    /// Declare which Jacobian entries are constant in `z`.
    pub fn with_linear_elements(mut self, elements: Vec<usize>) -> Self {
        self.linear_elements = elements;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writes the COO arrays for a dense column-major pattern.
    /// Rows and column starts are 1-indexed, as the wire contract demands.
    fn dense_pattern(n: usize, col: &mut [i32], len: &mut [i32], row: &mut [i32]) {
        for j in 0..n {
            col[j] = (j * n + 1) as i32;
            len[j] = n as i32;
            for i in 0..n {
                row[j * n + i] = (i + 1) as i32;
            }
        }
    }

    #[test]
    fn solves_interior_linear_problem() {
        // F(z) = z - 1 on [0, inf): solution z = 1, strictly interior.
        let f = |_n: usize, z: &[f64], out: &mut [f64]| -> i32 {
            out[0] = z[0] - 1.0;
            0
        };
        let j = |n: usize,
                 _nnz: usize,
                 _z: &[f64],
                 col: &mut [i32],
                 len: &mut [i32],
                 row: &mut [i32],
                 data: &mut [f64]|
         -> i32 {
            dense_pattern(n, col, len, row);
            data[0] = 1.0;
            0
        };
        let (z, status, info) = solve_mcp(
            1,
            1,
            f,
            j,
            &[0.0],
            &[f64::INFINITY],
            &[0.0],
            &SolverOptions::default(),
        );
        assert_eq!(status, Status::Solved);
        assert!((z[0] - 1.0).abs() < 1e-9);
        assert!(info.residual <= 1e-10);
    }

    #[test]
    fn solves_bound_active_linear_problem() {
        // F(z) = z + 1 on [0, inf): F > 0 everywhere in the box, so the
        // solution is pinned at the lower bound.
        let f = |_n: usize, z: &[f64], out: &mut [f64]| -> i32 {
            out[0] = z[0] + 1.0;
            0
        };
        let j = |n: usize,
                 _nnz: usize,
                 _z: &[f64],
                 col: &mut [i32],
                 len: &mut [i32],
                 row: &mut [i32],
                 data: &mut [f64]|
         -> i32 {
            dense_pattern(n, col, len, row);
            data[0] = 1.0;
            0
        };
        let (z, status, _info) = solve_mcp(
            1,
            1,
            f,
            j,
            &[0.0],
            &[f64::INFINITY],
            &[3.0],
            &SolverOptions::default(),
        );
        assert_eq!(status, Status::Solved);
        assert!(z[0].abs() < 1e-9);
    }

    #[test]
    fn solves_nonlinear_free_problem() {
        // F(z) = z^2 - 2 with z free: plain Newton territory.
        let f = |_n: usize, z: &[f64], out: &mut [f64]| -> i32 {
            out[0] = z[0] * z[0] - 2.0;
            0
        };
        let j = |n: usize,
                 _nnz: usize,
                 z: &[f64],
                 col: &mut [i32],
                 len: &mut [i32],
                 row: &mut [i32],
                 data: &mut [f64]|
         -> i32 {
            dense_pattern(n, col, len, row);
            data[0] = 2.0 * z[0];
            0
        };
        let (z, status, _info) = solve_mcp(
            1,
            1,
            f,
            j,
            &[f64::NEG_INFINITY],
            &[f64::INFINITY],
            &[1.0],
            &SolverOptions::default(),
        );
        assert_eq!(status, Status::Solved);
        assert!((z[0] - 2.0_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn solves_two_dimensional_lcp() {
        // F(z) = M z + q with M = [[2, 1], [1, 2]], q = [-3, -3], z >= 0.
        // The interior solution of M z = -q is z = (1, 1).
        let f = |_n: usize, z: &[f64], out: &mut [f64]| -> i32 {
            out[0] = 2.0 * z[0] + z[1] - 3.0;
            out[1] = z[0] + 2.0 * z[1] - 3.0;
            0
        };
        let j = |n: usize,
                 _nnz: usize,
                 _z: &[f64],
                 col: &mut [i32],
                 len: &mut [i32],
                 row: &mut [i32],
                 data: &mut [f64]|
         -> i32 {
            dense_pattern(n, col, len, row);
            data[0] = 2.0;
            data[1] = 1.0;
            data[2] = 1.0;
            data[3] = 2.0;
            0
        };
        let options = SolverOptions::default()
            .with_constant_structure(true)
            .with_linear_elements(vec![0, 1, 2, 3]);
        let (z, status, info) = solve_mcp(
            2,
            4,
            f,
            j,
            &[0.0, 0.0],
            &[f64::INFINITY, f64::INFINITY],
            &[0.0, 0.0],
            &options,
        );
        assert_eq!(status, Status::Solved);
        assert!((z[0] - 1.0).abs() < 1e-9);
        assert!((z[1] - 1.0).abs() < 1e-9);
        // Every entry was declared linear, so one Jacobian fetch suffices.
        assert_eq!(info.jacobian_evaluations, 1);
    }

    #[test]
    fn clamps_initial_point_into_the_box() {
        let f = |_n: usize, z: &[f64], out: &mut [f64]| -> i32 {
            out[0] = z[0] + 1.0;
            0
        };
        let j = |n: usize,
                 _nnz: usize,
                 _z: &[f64],
                 col: &mut [i32],
                 len: &mut [i32],
                 row: &mut [i32],
                 data: &mut [f64]|
         -> i32 {
            dense_pattern(n, col, len, row);
            data[0] = 1.0;
            0
        };
        // Initial point far below the lower bound.
        let (z, status, _info) = solve_mcp(
            1,
            1,
            f,
            j,
            &[0.0],
            &[2.0],
            &[-100.0],
            &SolverOptions::default(),
        );
        assert_eq!(status, Status::Solved);
        assert!(z[0].abs() < 1e-9);
    }

    #[test]
    fn rejects_inverted_bounds() {
        let f = |_n: usize, _z: &[f64], out: &mut [f64]| -> i32 {
            out[0] = 0.0;
            0
        };
        let j = |_n: usize,
                 _nnz: usize,
                 _z: &[f64],
                 _col: &mut [i32],
                 _len: &mut [i32],
                 _row: &mut [i32],
                 _data: &mut [f64]|
         -> i32 { 0 };
        let (_z, status, _info) =
            solve_mcp(1, 1, f, j, &[1.0], &[-1.0], &[0.0], &SolverOptions::default());
        assert_eq!(status, Status::BoundError);
    }

    #[test]
    fn reports_major_iteration_limit() {
        // A residual the solver cannot zero out in one step, with the budget
        // capped below what convergence needs.
        let f = |_n: usize, z: &[f64], out: &mut [f64]| -> i32 {
            out[0] = (z[0] - 4.0).exp() - 1.0;
            0
        };
        let j = |n: usize,
                 _nnz: usize,
                 z: &[f64],
                 col: &mut [i32],
                 len: &mut [i32],
                 row: &mut [i32],
                 data: &mut [f64]|
         -> i32 {
            dense_pattern(n, col, len, row);
            data[0] = (z[0] - 4.0).exp();
            0
        };
        let options = SolverOptions::default().with_major_iteration_limit(1);
        let (_z, status, info) = solve_mcp(
            1,
            1,
            f,
            j,
            &[f64::NEG_INFINITY],
            &[f64::INFINITY],
            &[0.0],
            &options,
        );
        assert_eq!(status, Status::MajorIterationLimit);
        assert_eq!(info.major_iterations, 1);
    }

    #[test]
    fn surfaces_callback_failure_as_domain_error() {
        let f = |_n: usize, _z: &[f64], _out: &mut [f64]| -> i32 { 1 };
        let j = |_n: usize,
                 _nnz: usize,
                 _z: &[f64],
                 _col: &mut [i32],
                 _len: &mut [i32],
                 _row: &mut [i32],
                 _data: &mut [f64]|
         -> i32 { 0 };
        let (_z, status, _info) = solve_mcp(
            1,
            1,
            f,
            j,
            &[f64::NEG_INFINITY],
            &[f64::INFINITY],
            &[0.0],
            &SolverOptions::default(),
        );
        assert_eq!(status, Status::DomainError);
    }

    #[test]
    fn empty_problem_is_trivially_solved() {
        let f = |_n: usize, _z: &[f64], _out: &mut [f64]| -> i32 { 0 };
        let j = |_n: usize,
                 _nnz: usize,
                 _z: &[f64],
                 _col: &mut [i32],
                 _len: &mut [i32],
                 _row: &mut [i32],
                 _data: &mut [f64]|
         -> i32 { 0 };
        let (z, status, _info) =
            solve_mcp(0, 0, f, j, &[], &[], &[], &SolverOptions::default());
        assert_eq!(status, Status::Solved);
        assert!(z.is_empty());
    }
}
