use faer::sparse::CreationError;

/// All errors that can occur when compiling, solving, or differentiating a
/// problem.
///
/// Solver non-convergence is deliberately not here: it is reported through
/// [`Status`](crate::Status) on the returned solution instead.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Two arguments that must have matching lengths did not.
    #[error("{argument} should have length {expected}, but has length {actual}")]
    DimensionMismatch {
        /// Which argument was the wrong size.
        argument: &'static str,
        /// The length implied by the problem.
        expected: usize,
        /// The length that was supplied.
        actual: usize,
    },
    /// The residual callable produced the wrong number of expressions.
    #[error("the residual produced {actual} expressions, but the problem has {expected} unknowns")]
    ResidualDimension {
        /// The number of unknowns, i.e. the length of the bound vectors.
        expected: usize,
        /// How many expressions the residual returned.
        actual: usize,
    },
    /// A lower bound exceeds the matching upper bound.
    #[error("lower bound {lower} exceeds upper bound {upper} at index {index}")]
    InvertedBounds {
        /// Offending coordinate.
        index: usize,
        /// Its lower bound.
        lower: f64,
        /// Its upper bound.
        upper: f64,
    },
    /// A sensitivity operation was requested on a problem that was compiled
    /// with `compute_sensitivities = false`.
    #[error("problem was compiled without parameter sensitivities; recompile with them enabled")]
    MissingSensitivities,
    /// Parameters were annotated constant, so differentiating with respect
    /// to them would be a no-op.
    #[error("parameters are annotated constant; there is nothing to differentiate")]
    ConstantParameters,
    /// Problem handles are opaque to differentiation and must be annotated
    /// constant.
    #[error("problem handles cannot carry derivatives; annotate the problem as constant")]
    ActiveProblem,
    /// Faer: could not create a sparse matrix.
    #[error("could not create sparse matrix: {error}")]
    SparseCreation {
        /// The underlying faer error.
        #[from]
        error: CreationError,
    },
}
