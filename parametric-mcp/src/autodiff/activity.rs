//! The annotation-based forward/reverse pair, packaged the way
//! activity-tracking AD engines expect: arguments carry explicit
//! constant/active annotations, forward mode accepts single or batched
//! tangents, and reverse mode is split into an augmented primal that caches
//! a tape and a reverse phase that accumulates into a shadow.

use std::cell::RefCell;

use faer::sparse::SparseColMat;

use super::{times_vector, transpose_times_vector};
use crate::Error;
use crate::problem::ParametricMCP;
use crate::sensitivity::jacobian_wrt_parameters;
use crate::solve::{Solution, SolveOptions, solve};

/// Annotation of the problem argument. Problem handles are opaque
/// non-differentiable data, so only [`ProblemActivity::Const`] is accepted.
pub enum ProblemActivity<'p> {
    /// The problem carries no derivatives.
    Const(&'p ParametricMCP),
    /// Rejected: differentiating with respect to the problem is not
    /// supported.
    Active(&'p ParametricMCP),
}

impl<'p> ProblemActivity<'p> {
    fn require_const(self) -> Result<&'p ParametricMCP, Error> {
        match self {
            ProblemActivity::Const(problem) => Ok(problem),
            ProblemActivity::Active(_) => Err(Error::ActiveProblem),
        }
    }
}

/// Forward-mode annotation of the parameters: the value together with one
/// or several tangent seeds.
pub enum ParameterTangents<'a> {
    /// Rejected: a constant parameter makes the differentiation a no-op.
    Const(&'a [f64]),
    /// One tangent `θ̇`.
    Dual {
        /// The parameter value.
        value: &'a [f64],
        /// Its perturbation.
        tangent: &'a [f64],
    },
    /// A batch of tangents, pushed forward in one primal solve.
    BatchDual {
        /// The parameter value.
        value: &'a [f64],
        /// The perturbations.
        tangents: &'a [Vec<f64>],
    },
}

/// Tangents of the solution, mirroring the shape of the seeds.
#[derive(Clone, Debug)]
pub enum SolutionTangents {
    /// `ż` for a single seed.
    Single(Vec<f64>),
    /// One `ż` per seed in the batch.
    Batch(Vec<Vec<f64>>),
}

/// Forward mode: solve at the parameter value and push every tangent seed
/// through `ż = (∂z*/∂θ) θ̇`.
///
/// The problem must be annotated constant and the parameters must carry
/// tangents; [`Error::ActiveProblem`] and [`Error::ConstantParameters`]
/// report violations.
pub fn solve_forward(
    problem: ProblemActivity<'_>,
    theta: ParameterTangents<'_>,
    options: &SolveOptions,
) -> Result<(Solution, SolutionTangents), Error> {
    let problem = problem.require_const()?;
    let m = problem.parameter_dimension();

    let (value, seeds, batched): (&[f64], Vec<&[f64]>, bool) = match theta {
        ParameterTangents::Const(_) => return Err(Error::ConstantParameters),
        ParameterTangents::Dual { value, tangent } => (value, vec![tangent], false),
        ParameterTangents::BatchDual { value, tangents } => {
            (value, tangents.iter().map(Vec::as_slice).collect(), true)
        }
    };
    for seed in &seeds {
        if seed.len() != m {
            return Err(Error::DimensionMismatch {
                argument: "tangent",
                expected: m,
                actual: seed.len(),
            });
        }
    }

    let solution = solve(problem, value, options)?;
    let sensitivity = jacobian_wrt_parameters(problem, &solution, value)?;

    let mut pushed: Vec<Vec<f64>> = Vec::with_capacity(seeds.len());
    for seed in &seeds {
        let mut z_tangent = vec![0.0; problem.problem_size()];
        times_vector(&sensitivity, seed, &mut z_tangent);
        pushed.push(z_tangent);
    }

    let tangents = if batched {
        SolutionTangents::Batch(pushed)
    } else {
        SolutionTangents::Single(pushed.pop().expect("one seed was pushed"))
    };
    Ok((solution, tangents))
}

/// Reverse-mode annotation of the parameters.
pub enum ParameterActivity<'a> {
    /// Rejected: a constant parameter makes the differentiation a no-op.
    Const(&'a [f64]),
    /// The parameters are differentiated.
    Active(&'a [f64]),
}

/// The tape cached between the augmented primal and the reverse phase:
/// the primal solution plus a zero-initialized shadow for `θ̄`.
pub struct ReverseTape<'p> {
    problem: &'p ParametricMCP,
    theta: Vec<f64>,
    solution: Solution,
    shadow: RefCell<Vec<f64>>,
    sensitivity: RefCell<Option<SparseColMat<usize, f64>>>,
}

impl std::fmt::Debug for ReverseTape<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReverseTape")
            .field("theta", &self.theta)
            .finish_non_exhaustive()
    }
}

/// The augmented primal: solve, and cache what the reverse phase needs.
pub fn solve_augmented<'p>(
    problem: ProblemActivity<'p>,
    theta: ParameterActivity<'_>,
    options: &SolveOptions,
) -> Result<ReverseTape<'p>, Error> {
    let problem = problem.require_const()?;
    let theta = match theta {
        ParameterActivity::Const(_) => return Err(Error::ConstantParameters),
        ParameterActivity::Active(theta) => theta,
    };
    let solution = solve(problem, theta, options)?;
    Ok(ReverseTape {
        problem,
        theta: theta.to_vec(),
        solution,
        shadow: RefCell::new(vec![0.0; problem.parameter_dimension()]),
        sensitivity: RefCell::new(None),
    })
}

impl ReverseTape<'_> {
    /// The primal solution.
    pub fn solution(&self) -> &Solution {
        &self.solution
    }

    /// The current shadow, i.e. everything accumulated into `θ̄` so far.
    pub fn shadow(&self) -> Vec<f64> {
        self.shadow.borrow().clone()
    }

    /// The reverse phase: accumulates `(∂z*/∂θ)ᵀ z̄` into the shadow and
    /// returns its updated value. The sensitivity is computed on the first
    /// call and reused for every further cotangent.
    pub fn reverse(&self, z_cotangent: &[f64]) -> Result<Vec<f64>, Error> {
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

        let mut shadow = self.shadow.borrow_mut();
        transpose_times_vector(sensitivity, z_cotangent, &mut shadow);
        Ok(shadow.clone())
    }
}
