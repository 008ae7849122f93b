use nalgebra::{Isometry3, Matrix3, Translation3, UnitQuaternion, Vector3, Vector6};

/// Below this rotation angle the Taylor expansions are used.
const SMALL_ANGLE: f64 = 1e-4;

/// Skew-symmetric matrix such that `hat(a) * b == a.cross(&b)`.
pub fn hat(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Exponential map from a tangent vector `[υ, ω]` (translation first) to a
/// rigid transform.
pub fn exp(xi: &Vector6<f64>) -> Isometry3<f64> {
    let upsilon = xi.fixed_rows::<3>(0).into_owned();
    let omega = xi.fixed_rows::<3>(3).into_owned();

    let rotation = UnitQuaternion::from_scaled_axis(omega);
    let translation = left_jacobian(&omega) * upsilon;
    Isometry3::from_parts(Translation3::from(translation), rotation)
}

/// Logarithm map from a rigid transform to its tangent vector.
pub fn log(transform: &Isometry3<f64>) -> Vector6<f64> {
    let omega = transform.rotation.scaled_axis();
    let upsilon = inverse_left_jacobian(&omega) * transform.translation.vector;

    let mut xi = Vector6::zeros();
    xi.fixed_rows_mut::<3>(0).copy_from(&upsilon);
    xi.fixed_rows_mut::<3>(3).copy_from(&omega);
    xi
}

/// Manifold retraction `T · Exp(δ)`.
pub fn plus(transform: &Isometry3<f64>, delta: &Vector6<f64>) -> Isometry3<f64> {
    transform * exp(delta)
}

/// Squared norm of `log(a⁻¹ · b)`: how far `b` moved away from `a`.
pub fn squared_distance(a: &Isometry3<f64>, b: &Isometry3<f64>) -> f64 {
    log(&(a.inverse() * b)).norm_squared()
}

/// True when every rotation and translation component is finite.
pub fn is_finite(transform: &Isometry3<f64>) -> bool {
    transform.translation.vector.iter().all(|v| v.is_finite())
        && transform.rotation.coords.iter().all(|v| v.is_finite())
}

/// `V(ω) = I + (1 − cos θ)/θ² [ω]× + (θ − sin θ)/θ³ [ω]×²`
fn left_jacobian(omega: &Vector3<f64>) -> Matrix3<f64> {
    let theta_sq = omega.norm_squared();
    let theta = theta_sq.sqrt();
    let w = hat(omega);
    let w2 = w * w;

    let (a, b) = if theta < SMALL_ANGLE {
        (0.5 - theta_sq / 24.0, 1.0 / 6.0 - theta_sq / 120.0)
    } else {
        (
            2.0 * (0.5 * theta).sin().powi(2) / theta_sq,
            (theta - theta.sin()) / (theta_sq * theta),
        )
    };
    Matrix3::identity() + w * a + w2 * b
}

/// `V(ω)⁻¹ = I − ½[ω]× + (1/θ²)(1 − (θ/2) cot(θ/2)) [ω]×²`
fn inverse_left_jacobian(omega: &Vector3<f64>) -> Matrix3<f64> {
    let theta_sq = omega.norm_squared();
    let theta = theta_sq.sqrt();
    let w = hat(omega);
    let w2 = w * w;

    let c = if theta < SMALL_ANGLE {
        1.0 / 12.0 + theta_sq / 720.0
    } else {
        let half = 0.5 * theta;
        (1.0 - half * half.cos() / half.sin()) / theta_sq
    };
    Matrix3::identity() - w * 0.5 + w2 * c
}
