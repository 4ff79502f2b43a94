//! Levenberg-Marquardt solver for the calibration residual models.
//!
//! Minimises ½‖r(x)‖² with a forward-difference Jacobian. Square systems that
//! have an exact root are driven to it; over- or under-determined models end
//! at a stationary point. Each iteration solves
//!
//!   (JᵀJ + λ·diag(JᵀJ)) δ = −Jᵀr
//!
//! and adapts λ from the ratio of actual to predicted cost reduction.
//! Residual evaluations that fail or produce NaN/∞ during a trial step are
//! treated as rejected steps; a failure at the initial guess is returned.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::{OdometryError, Result};
use crate::types::{Jacobian, NormalMatrix, ParamVec, ResidualVec};

/// Maps a candidate parameter vector to its residual vector
pub trait ResidualModel {
    /// Number of unknowns
    fn dimension(&self) -> usize;

    fn residuals(&self, params: &ParamVec) -> Result<ResidualVec>;
}

/// Configuration for the Levenberg-Marquardt solver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Default: 200
    pub max_iterations: usize,

    /// Stop once ‖r‖ falls below this.
    /// Default: 1e-10
    pub residual_tolerance: f64,

    /// Stop once ‖δ‖ < tol · (‖x‖ + tol).
    /// Default: 1e-10
    pub step_tolerance: f64,

    /// Relative forward-difference step, scaled by max(|xᵢ|, 1).
    /// Default: 1e-7
    pub fd_step: f64,

    /// Default: 1e-3
    pub initial_lambda: f64,

    /// Default: 10
    pub lambda_factor: f64,

    /// Default: 1e-12
    pub min_lambda: f64,

    /// Reaching this damping ends the solve as stalled.
    /// Default: 1e12
    pub max_lambda: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            residual_tolerance: 1e-10,
            step_tolerance: 1e-10,
            fd_step: 1e-7,
            initial_lambda: 1e-3,
            lambda_factor: 10.0,
            min_lambda: 1e-12,
            max_lambda: 1e12,
        }
    }
}

impl SolverConfig {
    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    pub fn with_residual_tolerance(mut self, tolerance: f64) -> Self {
        self.residual_tolerance = tolerance;
        self
    }
}

/// Damping schedule driven by step quality.
struct AdaptiveLm {
    lambda: f64,
    lambda_factor: f64,
    min_lambda: f64,
    max_lambda: f64,
}

impl AdaptiveLm {
    fn new(config: &SolverConfig) -> Self {
        Self {
            lambda: config.initial_lambda,
            lambda_factor: config.lambda_factor,
            min_lambda: config.min_lambda,
            max_lambda: config.max_lambda,
        }
    }

    /// `rho` is actual over predicted cost reduction of an accepted step.
    fn update(&mut self, rho: f64) {
        if rho > 0.75 {
            self.lambda = (self.lambda / self.lambda_factor).max(self.min_lambda);
        } else if rho > 0.25 {
            self.lambda = (self.lambda / self.lambda_factor.sqrt()).max(self.min_lambda);
        } else if rho < 0.0 {
            self.lambda = (self.lambda * self.lambda_factor).min(self.max_lambda);
        }
    }

    fn reject_step(&mut self) {
        self.lambda = (self.lambda * self.lambda_factor).min(self.max_lambda);
    }

    fn is_stuck(&self) -> bool {
        self.lambda >= self.max_lambda * 0.99
    }
}

/// Why the solver stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    ResidualTolerance,
    StepTolerance,
    MaxIterations,
    /// Damping saturated without finding a step that lowers the cost
    Stalled,
}

impl Termination {
    pub fn is_converged(self) -> bool {
        matches!(self, Termination::ResidualTolerance | Termination::StepTolerance)
    }
}

/// Outcome of one solve, converged or not.
///
/// On non-convergence `parameters` still holds the best point found.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolverReport {
    pub converged: bool,
    pub termination: Termination,
    pub iterations: usize,
    pub initial_residual_norm: f64,
    pub final_residual_norm: f64,
    pub parameters: Vec<f64>,
    pub residuals: Vec<f64>,
}

fn all_finite(v: &DVector<f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}

/// Evaluate a trial point; failures become `None`
fn try_residuals<M: ResidualModel + ?Sized>(model: &M, x: &ParamVec) -> Option<ResidualVec> {
    match model.residuals(x) {
        Ok(r) if all_finite(&r) => Some(r),
        Ok(_) => {
            log::debug!("trial point gives non-finite residuals");
            None
        }
        Err(err) => {
            log::debug!("trial point rejected: {}", err);
            None
        }
    }
}

/// Forward-difference Jacobian, falling back to a backward difference for
/// columns whose forward probe fails. A column with no usable probe is zero.
fn jacobian<M: ResidualModel + ?Sized>(
    model: &M,
    x: &ParamVec,
    r: &ResidualVec,
    fd_step: f64,
) -> Jacobian {
    let mut j = Jacobian::zeros(r.len(), x.len());
    for col in 0..x.len() {
        let h = fd_step * x[col].abs().max(1.0);
        for signed_h in [h, -h] {
            let mut probe = x.clone();
            probe[col] += signed_h;
            if let Some(r_probe) = try_residuals(model, &probe) {
                if r_probe.len() == r.len() {
                    j.set_column(col, &((r_probe - r) / signed_h));
                    break;
                }
            }
        }
    }
    j
}

/// Solve the damped normal equations, Cholesky first and LU as fallback
fn solve_damped(a: &NormalMatrix, g: &ParamVec, lambda: f64) -> Option<ParamVec> {
    let mut damped = a.clone();
    for i in 0..damped.nrows() {
        damped[(i, i)] += lambda * a[(i, i)].max(1e-12);
    }
    let rhs = -g;
    let delta = match damped.clone().cholesky() {
        Some(chol) => chol.solve(&rhs),
        None => damped.lu().solve(&rhs)?,
    };
    all_finite(&delta).then_some(delta)
}

/// Drive `model` from `initial` towards a zero (or minimum) of its residuals.
pub fn solve<M: ResidualModel + ?Sized>(
    model: &M,
    initial: &[f64],
    config: &SolverConfig,
) -> Result<SolverReport> {
    if initial.len() != model.dimension() {
        return Err(OdometryError::ParameterCount {
            expected: model.dimension(),
            got: initial.len(),
        });
    }

    let mut x = ParamVec::from_column_slice(initial);
    let mut r = model.residuals(&x)?;
    if !all_finite(&r) {
        return Err(OdometryError::InvalidParameters(
            "initial guess gives non-finite residuals".to_string(),
        ));
    }

    let initial_residual_norm = r.norm();
    let mut cost = 0.5 * r.norm_squared();
    let mut lm = AdaptiveLm::new(config);
    let mut iterations = 0;
    let mut termination = Termination::MaxIterations;

    if initial_residual_norm <= config.residual_tolerance {
        termination = Termination::ResidualTolerance;
    } else {
        'outer: for iter in 0..config.max_iterations {
            iterations = iter + 1;

            let j = jacobian(model, &x, &r, config.fd_step);
            let a: NormalMatrix = j.transpose() * &j;
            let g: ParamVec = j.transpose() * &r;

            loop {
                let Some(delta) = solve_damped(&a, &g, lm.lambda) else {
                    lm.reject_step();
                    if lm.is_stuck() {
                        termination = Termination::Stalled;
                        break 'outer;
                    }
                    continue;
                };

                let step_small =
                    delta.norm() <= config.step_tolerance * (x.norm() + config.step_tolerance);

                let x_new = &x + &delta;
                let accepted = try_residuals(model, &x_new).and_then(|r_new| {
                    let new_cost = 0.5 * r_new.norm_squared();
                    let actual = cost - new_cost;
                    (actual > 0.0).then_some((r_new, new_cost, actual))
                });

                match accepted {
                    Some((r_new, new_cost, actual)) => {
                        let predicted = -(delta.dot(&g) + 0.5 * delta.dot(&(&a * &delta)));
                        let rho = if predicted > 0.0 { actual / predicted } else { 0.0 };
                        lm.update(rho);
                        x = x_new;
                        r = r_new;
                        cost = new_cost;
                        log::debug!(
                            "iteration {}: |r| = {:.3e}, lambda = {:.1e}, rho = {:.2}",
                            iterations,
                            r.norm(),
                            lm.lambda,
                            rho
                        );
                        if step_small {
                            termination = Termination::StepTolerance;
                            break 'outer;
                        }
                        break;
                    }
                    None => {
                        if step_small {
                            termination = Termination::StepTolerance;
                            break 'outer;
                        }
                        lm.reject_step();
                        if lm.is_stuck() {
                            termination = Termination::Stalled;
                            break 'outer;
                        }
                    }
                }
            }

            if r.norm() <= config.residual_tolerance {
                termination = Termination::ResidualTolerance;
                break;
            }
        }
    }

    let report = SolverReport {
        converged: termination.is_converged(),
        termination,
        iterations,
        initial_residual_norm,
        final_residual_norm: r.norm(),
        parameters: x.iter().copied().collect(),
        residuals: r.iter().copied().collect(),
    };

    if report.converged {
        log::info!(
            "solver converged after {} iterations ({:?}), |r| {:.3e} -> {:.3e}",
            report.iterations,
            report.termination,
            report.initial_residual_norm,
            report.final_residual_norm
        );
    } else {
        log::warn!(
            "solver did not converge ({:?} after {} iterations), |r| {:.3e} -> {:.3e}",
            report.termination,
            report.iterations,
            report.initial_residual_norm,
            report.final_residual_norm
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Rosenbrock;

    impl ResidualModel for Rosenbrock {
        fn dimension(&self) -> usize {
            2
        }

        fn residuals(&self, p: &ParamVec) -> Result<ResidualVec> {
            Ok(ResidualVec::from_vec(vec![10.0 * (p[1] - p[0] * p[0]), 1.0 - p[0]]))
        }
    }

    /// Two incompatible equations for one unknown; least-squares answer 2
    struct Disagreeing;

    impl ResidualModel for Disagreeing {
        fn dimension(&self) -> usize {
            1
        }

        fn residuals(&self, p: &ParamVec) -> Result<ResidualVec> {
            Ok(ResidualVec::from_vec(vec![p[0] - 1.0, p[0] - 3.0]))
        }
    }

    /// Root at x = 4 but undefined for x < 0.5
    struct Guarded;

    impl ResidualModel for Guarded {
        fn dimension(&self) -> usize {
            1
        }

        fn residuals(&self, p: &ParamVec) -> Result<ResidualVec> {
            if p[0] < 0.5 {
                return Err(OdometryError::InvalidParameters("below domain".into()));
            }
            Ok(ResidualVec::from_vec(vec![p[0].ln() - 4.0_f64.ln()]))
        }
    }

    #[test]
    fn test_rosenbrock_root() {
        let report = solve(&Rosenbrock, &[-1.2, 1.0], &SolverConfig::default()).unwrap();
        assert!(report.converged, "{:?}", report);
        assert_relative_eq!(report.parameters[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(report.parameters[1], 1.0, epsilon = 1e-6);
        assert!(report.final_residual_norm < report.initial_residual_norm);
    }

    #[test]
    fn test_least_squares_minimum() {
        let report = solve(&Disagreeing, &[10.0], &SolverConfig::default()).unwrap();
        assert!(report.converged);
        assert_eq!(report.termination, Termination::StepTolerance);
        assert_relative_eq!(report.parameters[0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(report.final_residual_norm, 2.0_f64.sqrt(), epsilon = 1e-6);
    }

    #[test]
    fn test_failed_trials_are_rejected_not_fatal() {
        // The undamped first step lands far below the domain
        let report = solve(&Guarded, &[20.0], &SolverConfig::default()).unwrap();
        assert!(report.converged);
        assert_relative_eq!(report.parameters[0], 4.0, epsilon = 1e-6);
    }

    #[test]
    fn test_failure_at_initial_guess_propagates() {
        let err = solve(&Guarded, &[0.1], &SolverConfig::default()).unwrap_err();
        assert!(matches!(err, OdometryError::InvalidParameters(_)));
    }

    #[test]
    fn test_iteration_cap_reports_non_convergence() {
        let config = SolverConfig::default().with_max_iterations(1);
        let report = solve(&Rosenbrock, &[-1.2, 1.0], &config).unwrap();
        assert!(!report.converged);
        assert_eq!(report.termination, Termination::MaxIterations);
        assert_eq!(report.iterations, 1);
        assert_eq!(report.parameters.len(), 2);
    }

    #[test]
    fn test_parameter_count_mismatch() {
        let err = solve(&Rosenbrock, &[1.0], &SolverConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            OdometryError::ParameterCount { expected: 2, got: 1 }
        ));
    }

    #[test]
    fn test_already_solved() {
        let report = solve(&Rosenbrock, &[1.0, 1.0], &SolverConfig::default()).unwrap();
        assert!(report.converged);
        assert_eq!(report.iterations, 0);
        assert_eq!(report.termination, Termination::ResidualTolerance);
    }
}
