use nalgebra::{Isometry3, Matrix6, Vector6};

use crate::se3;

/// A differentiable scalar residual over a rigid transform.
pub trait ScalarResidual {
    /// Residual value and its gradient with respect to `δ` in `T · Exp(δ)`,
    /// evaluated at `δ = 0`. `None` means the term is undefined at
    /// `transform` and contributes nothing.
    fn evaluate(&self, transform: &Isometry3<f64>) -> Option<(f64, Vector6<f64>)>;

    /// Residual value only.
    fn residual(&self, transform: &Isometry3<f64>) -> Option<f64> {
        self.evaluate(transform).map(|(r, _)| r)
    }

    /// Positive semi-definite approximation of the residual's own Hessian
    /// with respect to `δ`. Without it the solver uses plain Gauss-Newton,
    /// whose normal matrix is rank-deficient when every residual is a
    /// quadratic form of an error vector.
    fn curvature(&self, _transform: &Isometry3<f64>) -> Option<Matrix6<f64>> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverParams {
    pub max_iterations: usize,
    /// Stop when an accepted step lowers the cost by less than this fraction.
    pub function_tolerance: f64,
    /// Stop when the largest gradient component falls below this value.
    pub gradient_tolerance: f64,
    /// Stop when `‖δ‖ ≤ tol · (‖x‖ + tol)`.
    pub parameter_tolerance: f64,
    pub initial_lambda: f64,
    /// Damping beyond which no further progress is attempted.
    pub max_lambda: f64,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            function_tolerance: 1e-6,
            gradient_tolerance: 1e-10,
            parameter_tolerance: 1e-8,
            initial_lambda: 1e-4,
            max_lambda: 1e32,
        }
    }
}

/// Why the solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    FunctionTolerance,
    GradientTolerance,
    ParameterTolerance,
    /// Damping exhausted without finding a lower cost; the current point is
    /// a local minimum as far as the solver can tell.
    MinimumStep,
    /// Iteration budget spent; the result is usable but not converged.
    MaxIterations,
    /// Cost or derivatives became non-finite.
    Failure,
}

impl Termination {
    pub fn is_converged(self) -> bool {
        matches!(
            self,
            Termination::FunctionTolerance
                | Termination::GradientTolerance
                | Termination::ParameterTolerance
                | Termination::MinimumStep
        )
    }

    /// Whether the returned transform may replace the initial one.
    pub fn is_usable(self) -> bool {
        self != Termination::Failure
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSummary {
    pub transform: Isometry3<f64>,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub iterations: usize,
    pub successful_steps: usize,
    pub termination: Termination,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LevenbergMarquardt {
    params: SolverParams,
}

impl LevenbergMarquardt {
    pub fn new(params: SolverParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SolverParams {
        &self.params
    }

    /// Minimize `½ Σ rᵢ²` starting from `initial`.
    pub fn minimize<R: ScalarResidual>(
        &self,
        residuals: &[R],
        initial: &Isometry3<f64>,
    ) -> SolverSummary {
        let p = &self.params;
        let mut x = *initial;

        let Some(mut lin) = linearize(residuals, &x) else {
            return SolverSummary {
                transform: x,
                initial_cost: f64::NAN,
                final_cost: f64::NAN,
                iterations: 0,
                successful_steps: 0,
                termination: Termination::Failure,
            };
        };
        let initial_cost = lin.cost;

        let mut lambda = p.initial_lambda;
        let mut nu = 2.0;
        let mut iterations = 0;
        let mut successful_steps = 0;
        let mut termination = Termination::MaxIterations;

        while iterations < p.max_iterations {
            if lin.gradient.amax() <= p.gradient_tolerance {
                termination = Termination::GradientTolerance;
                break;
            }
            iterations += 1;

            let Some(step) = damped_step(&lin, lambda) else {
                if !escalate(&mut lambda, &mut nu, p.max_lambda) {
                    termination = Termination::MinimumStep;
                    break;
                }
                continue;
            };

            let x_norm = (x.translation.vector.norm_squared() + 1.0).sqrt();
            if step.norm() <= p.parameter_tolerance * (x_norm + p.parameter_tolerance) {
                termination = Termination::ParameterTolerance;
                break;
            }

            let candidate = se3::plus(&x, &step);
            let new_cost = cost(residuals, &candidate);

            // Reduction predicted by the local quadratic model.
            let predicted =
                -(lin.gradient.dot(&step) + 0.5 * step.dot(&(lin.hessian * step)));
            let rho = if predicted > 0.0 {
                (lin.cost - new_cost) / predicted
            } else {
                -1.0
            };

            if new_cost.is_finite() && rho > 1e-3 {
                let Some(next) = linearize(residuals, &candidate) else {
                    termination = Termination::Failure;
                    break;
                };
                let old_cost = lin.cost;
                x = candidate;
                lin = next;
                successful_steps += 1;

                lambda *= (1.0 - (2.0 * rho - 1.0).powi(3)).max(1.0 / 3.0);
                nu = 2.0;

                if old_cost - lin.cost <= p.function_tolerance * old_cost {
                    termination = Termination::FunctionTolerance;
                    break;
                }
            } else if !escalate(&mut lambda, &mut nu, p.max_lambda) {
                termination = Termination::MinimumStep;
                break;
            }
        }

        SolverSummary {
            transform: x,
            initial_cost,
            final_cost: lin.cost,
            iterations,
            successful_steps,
            termination,
        }
    }
}

/// Cost, gradient and approximate Hessian at one point.
///
/// The Hessian is `Σ jᵢ jᵢᵀ + rᵢ Kᵢ`, where `Kᵢ` is the curvature a residual
/// reports for itself. The second sum is only taken over positive residuals
/// so the model stays convex.
struct Linearization {
    cost: f64,
    gradient: Vector6<f64>,
    hessian: Matrix6<f64>,
}

fn linearize<R: ScalarResidual>(residuals: &[R], x: &Isometry3<f64>) -> Option<Linearization> {
    let mut lin = Linearization {
        cost: 0.0,
        gradient: Vector6::zeros(),
        hessian: Matrix6::zeros(),
    };

    for res in residuals {
        let Some((r, j)) = res.evaluate(x) else {
            continue;
        };
        lin.cost += 0.5 * r * r;
        lin.gradient += j * r;
        lin.hessian += j * j.transpose();
        if r > 0.0 {
            if let Some(k) = res.curvature(x) {
                lin.hessian += k * r;
            }
        }
    }

    let finite = lin.cost.is_finite()
        && lin.gradient.iter().all(|v| v.is_finite())
        && lin.hessian.iter().all(|v| v.is_finite());
    finite.then_some(lin)
}

fn cost<R: ScalarResidual>(residuals: &[R], x: &Isometry3<f64>) -> f64 {
    residuals
        .iter()
        .filter_map(|res| res.residual(x))
        .map(|r| 0.5 * r * r)
        .sum()
}

/// Solve `(H + λ D) δ = −g` with `D` the clamped diagonal of `H`.
fn damped_step(lin: &Linearization, lambda: f64) -> Option<Vector6<f64>> {
    let mut damped = lin.hessian;
    for i in 0..6 {
        damped[(i, i)] += lambda * lin.hessian[(i, i)].clamp(1e-6, 1e32);
    }
    let step = damped.cholesky()?.solve(&(-lin.gradient));
    step.iter().all(|v| v.is_finite()).then_some(step)
}

/// Increase damping after a rejected step. Returns `false` once damping
/// exceeds `max_lambda`.
fn escalate(lambda: &mut f64, nu: &mut f64, max_lambda: f64) -> bool {
    *lambda *= *nu;
    *nu *= 2.0;
    *lambda <= max_lambda
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Point3, Vector3};

    /// Residual `pᵢ·(T·a − b)` along one axis, linear in the translation.
    struct AxisOffset {
        source: Point3<f64>,
        target: Point3<f64>,
        axis: Vector3<f64>,
    }

    impl ScalarResidual for AxisOffset {
        fn evaluate(&self, t: &Isometry3<f64>) -> Option<(f64, Vector6<f64>)> {
            let moved = t * self.source;
            let r = self.axis.dot(&(moved - self.target));
            // d(T·Exp(δ)·a)/dρ = R, d/dφ = −R [a]×
            let rt_axis = t.rotation.inverse() * self.axis;
            let d_rho = rt_axis;
            let d_phi = self.source.coords.cross(&rt_axis);
            let mut j = Vector6::zeros();
            j.fixed_rows_mut::<3>(0).copy_from(&d_rho);
            j.fixed_rows_mut::<3>(3).copy_from(&d_phi);
            Some((r, j))
        }
    }

    struct Undefined;

    impl ScalarResidual for Undefined {
        fn evaluate(&self, _: &Isometry3<f64>) -> Option<(f64, Vector6<f64>)> {
            None
        }
    }

    struct Poisoned;

    impl ScalarResidual for Poisoned {
        fn evaluate(&self, _: &Isometry3<f64>) -> Option<(f64, Vector6<f64>)> {
            Some((f64::NAN, Vector6::zeros()))
        }
    }

    /// Residual `|T·a − b|²`, quadratic in the error vector.
    struct SquaredOffset {
        source: Point3<f64>,
        target: Point3<f64>,
    }

    impl ScalarResidual for SquaredOffset {
        fn evaluate(&self, t: &Isometry3<f64>) -> Option<(f64, Vector6<f64>)> {
            let d = t * self.source - self.target;
            let local = t.rotation.inverse() * d;
            let mut j = Vector6::zeros();
            j.fixed_rows_mut::<3>(0).copy_from(&(2.0 * local));
            j.fixed_rows_mut::<3>(3).copy_from(&(2.0 * self.source.coords.cross(&local)));
            Some((d.norm_squared(), j))
        }

        fn curvature(&self, _: &Isometry3<f64>) -> Option<Matrix6<f64>> {
            let a = se3::hat(&self.source.coords);
            let mut k = Matrix6::zeros();
            k.fixed_view_mut::<3, 3>(0, 0).copy_from(&Matrix3::identity());
            k.fixed_view_mut::<3, 3>(0, 3).copy_from(&(-a));
            k.fixed_view_mut::<3, 3>(3, 0).copy_from(&a);
            k.fixed_view_mut::<3, 3>(3, 3).copy_from(&(-a * a));
            Some(k * 2.0)
        }
    }

    fn translated_residuals(offset: Vector3<f64>) -> Vec<AxisOffset> {
        let sources = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(1.0, 1.0, 1.0),
        ];
        let mut out = Vec::new();
        for s in sources {
            for axis in [Vector3::x(), Vector3::y(), Vector3::z()] {
                out.push(AxisOffset {
                    source: s,
                    target: s + offset,
                    axis,
                });
            }
        }
        out
    }

    #[test]
    fn recovers_translation() {
        let offset = Vector3::new(0.5, -0.25, 1.0);
        let residuals = translated_residuals(offset);
        let summary = LevenbergMarquardt::default().minimize(&residuals, &Isometry3::identity());

        assert!(summary.termination.is_converged(), "{:?}", summary.termination);
        assert!(summary.final_cost < 1e-12);
        assert!(summary.final_cost < summary.initial_cost);
        assert_relative_eq!(summary.transform.translation.vector, offset, epsilon = 1e-6);
        assert_relative_eq!(summary.transform.rotation.angle(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn zero_gradient_stops_immediately() {
        let residuals = translated_residuals(Vector3::zeros());
        let summary = LevenbergMarquardt::default().minimize(&residuals, &Isometry3::identity());

        assert_eq!(summary.termination, Termination::GradientTolerance);
        assert_eq!(summary.iterations, 0);
        assert_eq!(summary.transform, Isometry3::identity());
    }

    #[test]
    fn empty_problem_is_trivially_converged() {
        let residuals: Vec<AxisOffset> = Vec::new();
        let start = Isometry3::translation(1.0, 2.0, 3.0);
        let summary = LevenbergMarquardt::default().minimize(&residuals, &start);

        assert!(summary.termination.is_converged());
        assert_eq!(summary.transform, start);
    }

    #[test]
    fn undefined_terms_are_skipped() {
        let summary =
            LevenbergMarquardt::default().minimize(&[Undefined, Undefined], &Isometry3::identity());
        assert_eq!(summary.final_cost, 0.0);
        assert!(summary.termination.is_usable());
    }

    #[test]
    fn non_finite_cost_is_a_failure() {
        let summary = LevenbergMarquardt::default().minimize(&[Poisoned], &Isometry3::identity());
        assert_eq!(summary.termination, Termination::Failure);
        assert!(!summary.termination.is_usable());
        assert_eq!(summary.transform, Isometry3::identity());
    }

    #[test]
    fn iteration_budget_is_respected() {
        let params = SolverParams {
            max_iterations: 1,
            ..SolverParams::default()
        };
        let residuals = translated_residuals(Vector3::new(3.0, 0.0, 0.0));
        let summary = LevenbergMarquardt::new(params).minimize(&residuals, &Isometry3::identity());
        assert!(summary.iterations <= 1);
    }

    #[test]
    fn quadratic_form_residuals_reach_the_optimum() {
        let offset = Vector3::new(0.3, -0.2, 0.1);
        let residuals: Vec<SquaredOffset> = translated_residuals(offset)
            .into_iter()
            .step_by(3)
            .map(|r| SquaredOffset {
                source: r.source,
                target: r.target,
            })
            .collect();
        assert_eq!(residuals.len(), 5);

        let summary = LevenbergMarquardt::default().minimize(&residuals, &Isometry3::identity());

        assert!(summary.termination.is_converged(), "{:?}", summary.termination);
        assert!(summary.iterations < SolverParams::default().max_iterations);
        assert!(summary.final_cost < 1e-12);
        assert_relative_eq!(summary.transform.translation.vector, offset, epsilon = 1e-3);
        assert_relative_eq!(summary.transform.rotation.angle(), 0.0, epsilon = 1e-3);
    }

    #[test]
    fn coincident_quadratic_residuals_stop_immediately() {
        let p = Point3::new(1.0, 2.0, 3.0);
        let residuals = [SquaredOffset { source: p, target: p }];
        let summary = LevenbergMarquardt::default().minimize(&residuals, &Isometry3::identity());

        assert_eq!(summary.termination, Termination::GradientTolerance);
        assert_eq!(summary.transform, Isometry3::identity());
    }
}
