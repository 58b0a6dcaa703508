//! The forward-mode rule over dual numbers.

use num_dual::Dual64;
use pathns_faer::{Info, Status};

use super::times_vector;
use crate::Error;
use crate::problem::ParametricMCP;
use crate::sensitivity::jacobian_wrt_parameters;
use crate::solve::{SolveOptions, solve};

/// A solution whose coordinates carry the pushed-forward perturbation.
#[derive(Clone, Debug)]
pub struct DualSolution {
    /// `z*` re-wrapped as duals: value `z*[i]`, perturbation `ż[i]`.
    pub z: Vec<Dual64>,
    /// Solver status, forwarded unchanged from the primal solve.
    pub status: Status,
    /// Solver diagnostics, forwarded unchanged from the primal solve.
    pub info: Info,
}

/// Solves at the real parts of `theta` and pushes the perturbation
/// `θ̇ = eps(theta)` forward through the solution map:
/// `ż = (∂z*/∂θ) θ̇`.
pub fn solve_dual(
    problem: &ParametricMCP,
    theta: &[Dual64],
    options: &SolveOptions,
) -> Result<DualSolution, Error> {
    let values: Vec<f64> = theta.iter().map(|d| d.re).collect();
    let seeds: Vec<f64> = theta.iter().map(|d| d.eps).collect();

    let solution = solve(problem, &values, options)?;
    let sensitivity = jacobian_wrt_parameters(problem, &solution, &values)?;

    let mut z_tangent = vec![0.0; problem.problem_size()];
    times_vector(&sensitivity, &seeds, &mut z_tangent);

    let z = solution
        .z
        .iter()
        .zip(&z_tangent)
        .map(|(&value, &tangent)| Dual64::new(value, tangent))
        .collect();
    Ok(DualSolution {
        z,
        status: solution.status,
        info: solution.info,
    })
}
