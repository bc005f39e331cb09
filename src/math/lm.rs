//! Levenberg–Marquardt nonlinear least squares.
//!
//! Minimizes `Σ r_i(x)²` for a problem that supplies residuals and an
//! analytic Jacobian. The implementation follows the classic minpack scheme:
//!
//! - parameters are scaled by the running maximum of the Jacobian column
//!   norms, so the fit is insensitive to wildly different parameter units
//!   (an amplitude of 1e-10 s³/m⁶ next to speeds of 400 km/s)
//! - each damped step is a stacked linear least-squares solve
//!   `[J D⁻¹; √λ I] z = [-r; 0]`, `δ = D⁻¹ z`
//! - termination is reported with minpack-compatible codes; callers accept
//!   codes 1–4 as converged

use nalgebra::{DMatrix, DVector};

use crate::math::solve_least_squares;

/// Upper bound on the damping parameter before giving up on a step.
const LAMBDA_MAX: f64 = 1e20;
/// Lower bound on the damping parameter; keeps the stacked system well posed.
const LAMBDA_MIN: f64 = 1e-12;

/// A nonlinear least-squares problem.
pub trait LeastSquaresProblem {
    /// Residual vector at `params`.
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64>;

    /// Jacobian of the residuals with respect to `params` (rows = residuals).
    fn jacobian(&self, params: &DVector<f64>) -> DMatrix<f64>;
}

/// Solver settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LmOptions {
    /// Maximum number of Jacobian evaluations (outer iterations).
    pub max_iterations: usize,
    /// Relative reduction in the sum of squares considered converged.
    pub ftol: f64,
    /// Relative scaled step size considered converged.
    pub xtol: f64,
    /// Orthogonality between residuals and Jacobian columns considered converged.
    pub gtol: f64,
    /// Initial damping parameter.
    pub initial_lambda: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            ftol: 1.49012e-8,
            xtol: 1.49012e-8,
            gtol: 0.0,
            initial_lambda: 1e-3,
        }
    }
}

/// Why the solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LmTermination {
    /// Relative reduction of the sum of squares below `ftol`.
    ResidualConverged,
    /// Relative scaled step below `xtol`.
    StepConverged,
    /// Both of the above.
    ResidualAndStepConverged,
    /// Residuals orthogonal to every Jacobian column (or exactly zero).
    GradientConverged,
    /// Iteration limit reached.
    MaxIterations,
    /// Non-finite values or an unsolvable step.
    NumericalFailure,
}

impl LmTermination {
    /// minpack `info` code.
    pub fn code(self) -> i32 {
        match self {
            LmTermination::ResidualConverged => 1,
            LmTermination::StepConverged => 2,
            LmTermination::ResidualAndStepConverged => 3,
            LmTermination::GradientConverged => 4,
            LmTermination::MaxIterations => 5,
            LmTermination::NumericalFailure => 6,
        }
    }

    pub fn is_converged(self) -> bool {
        matches!(self.code(), 1..=4)
    }
}

/// Solver output.
#[derive(Debug, Clone)]
pub struct LmReport {
    pub params: DVector<f64>,
    pub sse: f64,
    pub iterations: usize,
    pub termination: LmTermination,
}

/// Run Levenberg–Marquardt from `initial`.
pub fn levenberg_marquardt<P: LeastSquaresProblem>(
    problem: &P,
    initial: DVector<f64>,
    opts: &LmOptions,
) -> LmReport {
    let n = initial.len();
    let mut x = initial;
    let mut r = problem.residuals(&x);
    let mut sse = r.norm_squared();

    let finish = |x: DVector<f64>, sse: f64, iterations: usize, termination: LmTermination| LmReport {
        params: x,
        sse,
        iterations,
        termination,
    };

    if !sse.is_finite() {
        return finish(x, sse, 0, LmTermination::NumericalFailure);
    }

    let mut lambda = opts.initial_lambda.max(LAMBDA_MIN);
    let mut diag = DVector::<f64>::zeros(n);

    for iter in 1..=opts.max_iterations {
        if sse == 0.0 {
            return finish(x, sse, iter - 1, LmTermination::GradientConverged);
        }

        let jac = problem.jacobian(&x);
        if jac.iter().any(|v| !v.is_finite()) {
            return finish(x, sse, iter, LmTermination::NumericalFailure);
        }

        let col_norms: Vec<f64> = (0..n).map(|c| jac.column(c).norm()).collect();
        for (c, &norm) in col_norms.iter().enumerate() {
            // Columns with no influence get unit scale.
            let scale = if norm > 0.0 { norm } else { 1.0 };
            diag[c] = diag[c].max(scale);
        }

        // Scaled gradient test.
        let rnorm = sse.sqrt();
        let grad = jac.transpose() * &r;
        let gnorm = col_norms
            .iter()
            .enumerate()
            .filter(|(_, norm)| **norm > 0.0)
            .map(|(c, norm)| (grad[c] / (norm * rnorm)).abs())
            .fold(0.0_f64, f64::max);
        if gnorm <= opts.gtol {
            return finish(x, sse, iter, LmTermination::GradientConverged);
        }

        let xnorm = diag.component_mul(&x).norm();

        // Inner loop: raise damping until a step reduces the sum of squares.
        loop {
            let Some(step) = damped_step(&jac, &r, &diag, lambda) else {
                return finish(x, sse, iter, LmTermination::NumericalFailure);
            };
            let dxnorm = diag.component_mul(&step).norm();
            let x_trial = &x + &step;
            let r_trial = problem.residuals(&x_trial);
            let sse_trial = r_trial.norm_squared();

            if sse_trial.is_finite() && sse_trial < sse {
                let reduction = (sse - sse_trial) / sse;
                x = x_trial;
                r = r_trial;
                sse = sse_trial;
                lambda = (lambda / 10.0).max(LAMBDA_MIN);

                let f_conv = reduction <= opts.ftol || sse == 0.0;
                let x_conv = dxnorm <= opts.xtol * xnorm;
                match (f_conv, x_conv) {
                    (true, true) => {
                        return finish(x, sse, iter, LmTermination::ResidualAndStepConverged);
                    }
                    (true, false) => return finish(x, sse, iter, LmTermination::ResidualConverged),
                    (false, true) => return finish(x, sse, iter, LmTermination::StepConverged),
                    (false, false) => break,
                }
            }

            // Rejected: the current point is already a minimum to within xtol.
            if dxnorm <= opts.xtol * xnorm {
                return finish(x, sse, iter, LmTermination::StepConverged);
            }
            lambda *= 10.0;
            if lambda > LAMBDA_MAX {
                return finish(x, sse, iter, LmTermination::NumericalFailure);
            }
        }
    }

    let iterations = opts.max_iterations;
    finish(x, sse, iterations, LmTermination::MaxIterations)
}

/// Solve the damped, scaled normal equations for one step.
fn damped_step(
    jac: &DMatrix<f64>,
    r: &DVector<f64>,
    diag: &DVector<f64>,
    lambda: f64,
) -> Option<DVector<f64>> {
    let m = jac.nrows();
    let n = jac.ncols();
    let sqrt_lambda = lambda.sqrt();

    let mut a = DMatrix::<f64>::zeros(m + n, n);
    let mut b = DVector::<f64>::zeros(m + n);
    for c in 0..n {
        let inv = 1.0 / diag[c];
        for i in 0..m {
            a[(i, c)] = jac[(i, c)] * inv;
        }
        a[(m + c, c)] = sqrt_lambda;
    }
    for i in 0..m {
        b[i] = -r[i];
    }

    let z = solve_least_squares(&a, &b)?;
    Some(z.component_div(diag))
}
