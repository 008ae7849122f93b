use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use rayon::prelude::*;
use semantic_icp_core::{Covariance, PointCloud};
use semantic_icp_spatial::KdTree;

/// Parameters for local covariance estimation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CovarianceParams {
    /// Number of nearest neighbours (including the point itself).
    pub k: usize,
    /// Variance assigned along the surface normal after regularization.
    pub epsilon: f64,
}

impl Default for CovarianceParams {
    fn default() -> Self {
        Self {
            k: 20,
            epsilon: 1e-3,
        }
    }
}

/// Estimate one regularized covariance per point.
///
/// For each point the `k` nearest neighbours are found, their sample
/// covariance is decomposed, and the eigenvalues are replaced by
/// `(epsilon, 1, 1)` so every covariance describes a thin disc aligned with
/// the local surface. Points with fewer than three neighbours get the
/// isotropic `epsilon * I`.
///
/// The computation is parallelized across points using rayon.
pub fn estimate_covariances(cloud: &PointCloud, params: &CovarianceParams) -> Vec<Covariance> {
    if cloud.is_empty() {
        return Vec::new();
    }

    let tree = KdTree::build(cloud);
    let points: Vec<[f32; 3]> = cloud.iter_points().collect();

    points
        .par_iter()
        .map(|point| {
            let indices = tree.knn_indices(point, params.k);
            if indices.len() < 3 {
                return Covariance::identity() * params.epsilon;
            }
            let sample = sample_covariance(&points, &indices);
            regularize_plane(&sample, params.epsilon)
        })
        .collect()
}

/// Population covariance (divide by n) of the selected points.
fn sample_covariance(points: &[[f32; 3]], indices: &[usize]) -> Matrix3<f64> {
    let count = indices.len() as f64;

    let centroid = indices
        .iter()
        .map(|&i| to_vector(points[i]))
        .fold(Vector3::zeros(), |acc, p| acc + p)
        / count;

    indices
        .iter()
        .map(|&i| {
            let d = to_vector(points[i]) - centroid;
            d * d.transpose()
        })
        .fold(Matrix3::zeros(), |acc, m| acc + m)
        / count
}

/// Keep the eigenvectors of `sample` and replace its eigenvalues with
/// `(epsilon, 1, 1)`, smallest first.
fn regularize_plane(sample: &Matrix3<f64>, epsilon: f64) -> Covariance {
    let eigen = SymmetricEigen::new(*sample);
    if !eigen.eigenvalues.iter().all(|v| v.is_finite()) {
        return Covariance::identity() * epsilon;
    }

    let smallest = eigen.eigenvalues.imin();
    let mut values = Vector3::repeat(1.0);
    values[smallest] = epsilon;

    let basis = eigen.eigenvectors;
    basis * Matrix3::from_diagonal(&values) * basis.transpose()
}

fn to_vector(p: [f32; 3]) -> Vector3<f64> {
    Vector3::new(p[0] as f64, p[1] as f64, p[2] as f64)
}
