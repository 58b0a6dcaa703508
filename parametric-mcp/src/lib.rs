#![doc = include_str!("../README.md")]

pub use crate::autodiff::{
    DualSolution, ParameterActivity, ParameterTangents, ProblemActivity, PullbackSolve,
    ReverseTape, SolutionTangents, solve_augmented, solve_dual, solve_forward,
    solve_with_pullback,
};
pub use crate::error::Error;
pub use crate::problem::{CompileOptions, ParametricMCP, compile};
pub use crate::sensitivity::{
    ACTIVE_TOLERANCE, jacobian_wrt_parameters, jacobian_wrt_parameters_with,
};
pub use crate::solve::{Solution, SolveOptions, solve};
pub use crate::sparse::{SparseFunction, constant_entries, csc_to_coo};
pub use crate::symbolic::{
    Expr, SymbolicBackend, SymbolicJacobian, gradient, jacobian, sparse_jacobian,
};
pub use pathns_faer::{Info, SolverOptions, Status};

/// AD rule glue: pullbacks, dual numbers, activity annotations.
pub mod autodiff;
mod error;
mod problem;
mod sensitivity;
mod solve;
/// Sparse containers and the solver-facing COO adapter.
pub mod sparse;
/// Symbolic tracing and the two code-generation engines.
pub mod symbolic;
