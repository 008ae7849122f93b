use log::trace;
use nalgebra::{Isometry3, Matrix3, Matrix6, Point3, SymmetricEigen, Vector6};
use semantic_icp_core::Covariance;

use crate::correspondence::Correspondence;
use crate::se3;
use crate::semantic_cloud::LabeledPoints;
use crate::solver::ScalarResidual;

/// Smallest accepted ratio between the extreme eigenvalues of `C`.
const MIN_CONDITION_RATIO: f64 = 1e-12;

/// Squared Mahalanobis distance `dᵀ C⁻¹ d` with `d = q − T·y` and
/// `C = Σq + R Σy Rᵀ`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GicpTerm {
    /// Source point mapped through the base transformation.
    source: Point3<f64>,
    /// Source covariance rotated into the base frame.
    source_cov: Covariance,
    target: Point3<f64>,
    target_cov: Covariance,
}

impl GicpTerm {
    /// Build a term from a source point and covariance (in the source frame),
    /// the target point and covariance, and the fixed base transformation.
    pub fn new(
        source: Point3<f64>,
        source_cov: &Covariance,
        target: Point3<f64>,
        target_cov: &Covariance,
        base: &Isometry3<f64>,
    ) -> Self {
        let r_base = base.rotation.to_rotation_matrix();
        let r_base = r_base.matrix();
        Self {
            source: base * source,
            source_cov: r_base * source_cov * r_base.transpose(),
            target,
            target_cov: *target_cov,
        }
    }

    /// `Σq + R Σy Rᵀ` for the rotation of `transform`.
    pub fn combined_covariance(&self, transform: &Isometry3<f64>) -> Matrix3<f64> {
        let r = transform.rotation.to_rotation_matrix();
        let r = r.matrix();
        self.target_cov + r * self.source_cov * r.transpose()
    }

    /// Whether `C` is numerically invertible at `transform`.
    pub fn is_well_conditioned(&self, transform: &Isometry3<f64>) -> bool {
        let c = self.combined_covariance(transform);
        if !c.iter().all(|v| v.is_finite()) {
            return false;
        }
        let eigenvalues = SymmetricEigen::new(c).eigenvalues;
        let max = eigenvalues.max();
        let min = eigenvalues.min();
        max > 0.0 && min > max * MIN_CONDITION_RATIO
    }
}

impl ScalarResidual for GicpTerm {
    /// With `g = C⁻¹ d`, `h = Rᵀ g` and `s = Σy h` the gradient is
    /// `[−2h, 2(h × y) − 2(s × h)]`. The last term comes from rotating `Σy`.
    fn evaluate(&self, transform: &Isometry3<f64>) -> Option<(f64, Vector6<f64>)> {
        let info = self.combined_covariance(transform).cholesky()?.inverse();
        if !info.iter().all(|v| v.is_finite()) {
            return None;
        }

        let d = self.target - transform * self.source;
        let g = info * d;
        let r = d.dot(&g);

        let y = self.source.coords;
        let h = transform.rotation.inverse() * g;
        let s = self.source_cov * h;

        let d_rho = -2.0 * h;
        let d_phi = 2.0 * h.cross(&y) - 2.0 * s.cross(&h);

        let mut j = Vector6::zeros();
        j.fixed_rows_mut::<3>(0).copy_from(&d_rho);
        j.fixed_rows_mut::<3>(3).copy_from(&d_phi);
        Some((r, j))
    }

    fn residual(&self, transform: &Isometry3<f64>) -> Option<f64> {
        let info = self.combined_covariance(transform).cholesky()?.inverse();
        let d = self.target - transform * self.source;
        let r = d.dot(&(info * d));
        r.is_finite().then_some(r)
    }

    /// `2 Jᵀ C⁻¹ J` with `J = [−R, R [y]×]` the derivative of `d`. The
    /// rotation of `Σy` is held fixed.
    fn curvature(&self, transform: &Isometry3<f64>) -> Option<Matrix6<f64>> {
        let info = self.combined_covariance(transform).cholesky()?.inverse();
        let r = transform.rotation.to_rotation_matrix();
        let m = r.matrix().transpose() * info * r.matrix();
        let y = se3::hat(&self.source.coords);

        let mut k = Matrix6::zeros();
        k.fixed_view_mut::<3, 3>(0, 0).copy_from(&m);
        k.fixed_view_mut::<3, 3>(0, 3).copy_from(&(-m * y));
        k.fixed_view_mut::<3, 3>(3, 0).copy_from(&(y * m));
        k.fixed_view_mut::<3, 3>(3, 3).copy_from(&(-y * m * y));
        let k = k * 2.0;
        k.iter().all(|v| v.is_finite()).then_some(k)
    }
}

/// Residual terms for one label plus the number of correspondences whose
/// combined covariance was singular and therefore dropped.
#[derive(Debug, Clone, Default)]
pub struct GicpTerms {
    pub terms: Vec<GicpTerm>,
    pub dropped: usize,
}

/// Turn accepted correspondences into residual terms, dropping any whose
/// combined covariance is singular at `estimate`.
pub fn build_terms(
    source: &LabeledPoints,
    target: &LabeledPoints,
    correspondences: &[Correspondence],
    estimate: &Isometry3<f64>,
    base: &Isometry3<f64>,
) -> GicpTerms {
    let mut out = GicpTerms {
        terms: Vec::with_capacity(correspondences.len()),
        dropped: 0,
    };

    for c in correspondences {
        let term = GicpTerm::new(
            source.points().point_f64(c.source_index),
            &source.covariances()[c.source_index],
            target.points().point_f64(c.target_index),
            &target.covariances()[c.target_index],
            base,
        );
        if term.is_well_conditioned(estimate) {
            out.terms.push(term);
        } else {
            trace!(
                "dropping singular term: source {} target {}",
                c.source_index,
                c.target_index
            );
            out.dropped += 1;
        }
    }

    out
}
