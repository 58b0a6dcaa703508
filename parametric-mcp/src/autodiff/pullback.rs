//! The reverse-mode rule: solve once, pull cotangents back lazily.

use std::cell::RefCell;

use faer::sparse::SparseColMat;

use super::transpose_times_vector;
use crate::Error;
use crate::problem::ParametricMCP;
use crate::sensitivity::jacobian_wrt_parameters;
use crate::solve::{Solution, SolveOptions, solve};

/// A solved problem together with its reverse-mode pullback.
///
/// The sensitivity `∂z*/∂θ` is only computed when a cotangent is first
/// pulled back, and is cached afterwards. The problem handle itself is
/// non-differentiable; its cotangent is structurally zero.
pub struct PullbackSolve<'p> {
    problem: &'p ParametricMCP,
    theta: Vec<f64>,
    solution: Solution,
    sensitivity: RefCell<Option<SparseColMat<usize, f64>>>,
}

/// Solves the problem and packages the solution with a lazy pullback.
pub fn solve_with_pullback<'p>(
    problem: &'p ParametricMCP,
    theta: &[f64],
    options: &SolveOptions,
) -> Result<PullbackSolve<'p>, Error> {
    let solution = solve(problem, theta, options)?;
    Ok(PullbackSolve {
        problem,
        theta: theta.to_vec(),
        solution,
        sensitivity: RefCell::new(None),
    })
}

impl PullbackSolve<'_> {
    /// The primal solution.
    pub fn solution(&self) -> &Solution {
        &self.solution
    }

    /// Pulls the cotangent `z̄` of the solution back to the parameters:
    /// `θ̄ = (∂z*/∂θ)ᵀ z̄`.
    pub fn pullback(&self, z_cotangent: &[f64]) -> Result<Vec<f64>, Error> {
        let n = self.problem.problem_size();
        if z_cotangent.len() != n {
            return Err(Error::DimensionMismatch {
                argument: "z_cotangent",
                expected: n,
                actual: z_cotangent.len(),
            });
        }
        if self.sensitivity.borrow().is_none() {
            let computed = jacobian_wrt_parameters(self.problem, &self.solution, &self.theta)?;
            *self.sensitivity.borrow_mut() = Some(computed);
        }
        let borrowed = self.sensitivity.borrow();
        let sensitivity = borrowed.as_ref().expect("sensitivity was just cached");

        let mut theta_cotangent = vec![0.0; self.problem.parameter_dimension()];
        transpose_times_vector(sensitivity, z_cotangent, &mut theta_cotangent);
        Ok(theta_cotangent)
    }
}
