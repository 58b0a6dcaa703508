//! Tracing the user residual and assembling the reusable problem handle.

use std::cell::RefCell;

use crate::Error;
use crate::sparse::{SparseFunction, constant_entries};
use crate::symbolic::{CompiledFn, Expr, SymbolicBackend, VarLayout, sparse_jacobian};

pub(crate) const DECISION: &str = "z";
pub(crate) const PARAMETER: &str = "theta";

/// Options accepted by [`compile`].
#[derive(Clone, Debug)]
pub struct CompileOptions {
    /// Also derive and compile `∂F/∂θ`. Disabling this makes compilation
    /// cheaper but every later sensitivity request fails with
    /// [`Error::MissingSensitivities`].
    pub compute_sensitivities: bool,
    /// Which symbolic engine generates the evaluators.
    pub backend: SymbolicBackend,
    /// Expected problem size; checked against the bound vectors when given.
    pub problem_size: Option<usize>,
    /// Run every compiled evaluator once on zero inputs, so the first real
    /// call does not pay for lazily touched allocations.
    pub warm_up: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            compute_sensitivities: true,
            backend: SymbolicBackend::default(),
            problem_size: None,
            warm_up: true,
        }
    }
}

/// A compiled parametric mixed complementarity problem.
///
/// Holds the in-place residual evaluator, the sparse Jacobian evaluators
/// with their fixed patterns and scratch matrices, and the box bounds.
/// Created once by [`compile`] and immutable afterwards; reuse it across as
/// many solves as you like, but from one thread at a time, since the scratch
/// buffers are mutated during every solve and sensitivity call.
pub struct ParametricMCP {
    residual: CompiledFn,
    residual_input: RefCell<Vec<f64>>,
    jacobian_z: SparseFunction,
    jacobian_theta: Option<SparseFunction>,
    lower_bounds: Vec<f64>,
    upper_bounds: Vec<f64>,
    parameter_dimension: usize,
}

impl std::fmt::Debug for ParametricMCP {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParametricMCP")
            .field("lower_bounds", &self.lower_bounds)
            .field("upper_bounds", &self.upper_bounds)
            .field("parameter_dimension", &self.parameter_dimension)
            .finish_non_exhaustive()
    }
}

impl ParametricMCP {
    /// Number of unknowns `n`.
    pub fn problem_size(&self) -> usize {
        self.lower_bounds.len()
    }

    /// Number of parameters `m`.
    pub fn parameter_dimension(&self) -> usize {
        self.parameter_dimension
    }

    /// The lower bounds, length `n`; entries may be `-inf`.
    pub fn lower_bounds(&self) -> &[f64] {
        &self.lower_bounds
    }

    /// The upper bounds, length `n`; entries may be `+inf`.
    pub fn upper_bounds(&self) -> &[f64] {
        &self.upper_bounds
    }

    /// The sparse evaluator of `∂F/∂z`.
    pub fn jacobian_z(&self) -> &SparseFunction {
        &self.jacobian_z
    }

    /// The sparse evaluator of `∂F/∂θ`, or [`Error::MissingSensitivities`]
    /// when the problem was compiled without it.
    pub fn jacobian_theta(&self) -> Result<&SparseFunction, Error> {
        self.jacobian_theta.as_ref().ok_or(Error::MissingSensitivities)
    }

    /// Evaluates `F(z, theta)` into `out`.
    pub fn evaluate_residual(&self, out: &mut [f64], z: &[f64], theta: &[f64]) {
        let mut input = self.residual_input.borrow_mut();
        input[..z.len()].copy_from_slice(z);
        input[z.len()..].copy_from_slice(theta);
        (self.residual)(out, &input);
    }
}

/// Compiles the residual `f` into a reusable [`ParametricMCP`].
///
/// `f` is applied once to symbolic vectors of lengths `n = |lower_bounds|`
/// and `parameter_dimension`; it must return exactly `n` expressions. The
/// sparse Jacobian `∂F/∂z` (and, unless disabled, `∂F/∂θ`) is derived
/// symbolically, its structurally constant entries are recorded for the
/// solver's presolve, and in-place evaluators are generated over a single
/// concatenated `[z; θ]` input with a `(out, z, θ)` adapter on top.
///
/// Anything `f` panics with propagates unchanged.
pub fn compile<F>(
    f: F,
    lower_bounds: Vec<f64>,
    upper_bounds: Vec<f64>,
    parameter_dimension: usize,
    options: CompileOptions,
) -> Result<ParametricMCP, Error>
where
    F: FnOnce(&[Expr], &[Expr]) -> Vec<Expr>,
{
    let n = lower_bounds.len();
    if upper_bounds.len() != n {
        return Err(Error::DimensionMismatch {
            argument: "upper_bounds",
            expected: n,
            actual: upper_bounds.len(),
        });
    }
    if let Some(size) = options.problem_size {
        if size != n {
            return Err(Error::DimensionMismatch {
                argument: "problem_size",
                expected: n,
                actual: size,
            });
        }
    }
    for (index, (&lower, &upper)) in lower_bounds.iter().zip(&upper_bounds).enumerate() {
        if !(lower <= upper) {
            return Err(Error::InvertedBounds { index, lower, upper });
        }
    }

    let z = SymbolicBackend::variables(DECISION, n);
    let theta = SymbolicBackend::variables(PARAMETER, parameter_dimension);
    let residual_exprs = f(&z, &theta);
    if residual_exprs.len() != n {
        return Err(Error::ResidualDimension {
            expected: n,
            actual: residual_exprs.len(),
        });
    }

    let layout = VarLayout::new(&[(DECISION, n), (PARAMETER, parameter_dimension)]);
    let input_len = layout.total_len();
    let backend = options.backend;

    let jac_z_sym = sparse_jacobian(&residual_exprs, &z);
    let jacobian_z = SparseFunction::new(
        &jac_z_sym,
        backend.build_in_place(&jac_z_sym.exprs(), &layout),
        constant_entries(&jac_z_sym, &z),
        input_len,
    )?;

    let jacobian_theta = if options.compute_sensitivities {
        let jac_theta_sym = sparse_jacobian(&residual_exprs, &theta);
        Some(SparseFunction::new(
            &jac_theta_sym,
            backend.build_in_place(&jac_theta_sym.exprs(), &layout),
            constant_entries(&jac_theta_sym, &theta),
            input_len,
        )?)
    } else {
        None
    };

    let problem = ParametricMCP {
        residual: backend.build_in_place(&residual_exprs, &layout),
        residual_input: RefCell::new(vec![0.0; input_len]),
        jacobian_z,
        jacobian_theta,
        lower_bounds,
        upper_bounds,
        parameter_dimension,
    };

    if options.warm_up {
        let z0 = vec![0.0; n];
        let theta0 = vec![0.0; parameter_dimension];
        let mut out = vec![0.0; n];
        problem.evaluate_residual(&mut out, &z0, &theta0);
        problem.jacobian_z.with_refreshed(&z0, &theta0, |_| ());
        if let Some(jac_theta) = &problem.jacobian_theta {
            jac_theta.with_refreshed(&z0, &theta0, |_| ());
        }
    }

    Ok(problem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_and_reports_dimensions() {
        let problem = compile(
            |z, theta| vec![&z[0] - &theta[0], z[1].clone()],
            vec![0.0, 0.0],
            vec![1.0, f64::INFINITY],
            1,
            CompileOptions::default(),
        )
        .unwrap();
        assert_eq!(problem.problem_size(), 2);
        assert_eq!(problem.parameter_dimension(), 1);
        assert_eq!(problem.jacobian_z().shape(), (2, 2));
        assert_eq!(problem.jacobian_theta().unwrap().shape(), (2, 1));
    }

    #[test]
    fn rejects_mismatched_bounds() {
        let err = compile(
            |z, _| vec![z[0].clone()],
            vec![0.0],
            vec![1.0, 2.0],
            0,
            CompileOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { argument: "upper_bounds", .. }));
    }

    #[test]
    fn rejects_wrong_residual_length() {
        let err = compile(
            |z, _| vec![z[0].clone(), z[1].clone(), Expr::constant(0.0)],
            vec![0.0, 0.0],
            vec![1.0, 1.0],
            0,
            CompileOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ResidualDimension { expected: 2, actual: 3 }));
    }

    #[test]
    fn rejects_inverted_bounds() {
        let err = compile(
            |z, _| vec![z[0].clone()],
            vec![2.0],
            vec![1.0],
            0,
            CompileOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvertedBounds { index: 0, .. }));
    }

    #[test]
    fn rejects_wrong_problem_size_option() {
        let options = CompileOptions {
            problem_size: Some(3),
            ..Default::default()
        };
        let err = compile(|z, _| vec![z[0].clone()], vec![0.0], vec![1.0], 0, options).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { argument: "problem_size", .. }));
    }

    #[test]
    fn sensitivities_can_be_disabled() {
        let options = CompileOptions {
            compute_sensitivities: false,
            ..Default::default()
        };
        let problem = compile(
            |z, theta| vec![&z[0] - &theta[0]],
            vec![f64::NEG_INFINITY],
            vec![f64::INFINITY],
            1,
            options,
        )
        .unwrap();
        assert!(matches!(problem.jacobian_theta(), Err(Error::MissingSensitivities)));
    }

    #[test]
    fn evaluates_residual_in_place() {
        let problem = compile(
            |z, theta| vec![z[0].powi(2) - &theta[0], &z[0] + &z[1]],
            vec![f64::NEG_INFINITY; 2],
            vec![f64::INFINITY; 2],
            1,
            CompileOptions::default(),
        )
        .unwrap();
        let mut out = [0.0; 2];
        problem.evaluate_residual(&mut out, &[3.0, 4.0], &[1.0]);
        assert!((out[0] - 8.0).abs() < 1e-15);
        assert!((out[1] - 7.0).abs() < 1e-15);
    }

    #[test]
    fn zero_parameter_problem_compiles() {
        let problem = compile(
            |z, _theta| vec![&z[0] - 1.0],
            vec![f64::NEG_INFINITY],
            vec![f64::INFINITY],
            0,
            CompileOptions::default(),
        )
        .unwrap();
        assert_eq!(problem.parameter_dimension(), 0);
        let mut out = [0.0];
        problem.evaluate_residual(&mut out, &[2.0], &[]);
        assert!((out[0] - 1.0).abs() < 1e-15);
    }

    #[test]
    fn both_backends_compile_the_same_problem() {
        for backend in [SymbolicBackend::InstructionTape, SymbolicBackend::ExpressionGraph] {
            let options = CompileOptions {
                backend,
                ..Default::default()
            };
            let problem = compile(
                |z, theta| vec![z[0].sin() - &theta[0]],
                vec![f64::NEG_INFINITY],
                vec![f64::INFINITY],
                1,
                options,
            )
            .unwrap();
            let mut out = [0.0];
            problem.evaluate_residual(&mut out, &[0.5], &[0.25]);
            assert!((out[0] - (0.5_f64.sin() - 0.25)).abs() < 1e-15);
        }
    }
}
