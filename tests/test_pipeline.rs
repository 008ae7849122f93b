use approx::assert_relative_eq;
use semantic_icp::nalgebra::{Isometry3, Vector3};
use semantic_icp::{
    estimate_covariances, CovarianceParams, LabelStatus, PointCloud, SemanticCloud, SemanticIcp,
};

/// Three orthogonal 10×10 grids meeting at `origin`, spacing 0.2.
/// Tiny per-point offsets keep the planes from being exactly degenerate.
fn corner(origin: [f32; 3]) -> PointCloud {
    let mut cloud = PointCloud::new();
    let [ox, oy, oz] = origin;
    for i in 0..10 {
        for j in 0..10 {
            let a = i as f32 * 0.2;
            let b = j as f32 * 0.2;
            let e = (i * 10 + j) as f32 * 1e-5;
            // floor (z ≈ 0)
            cloud.push([ox + a, oy + b, oz + e]);
            // wall y ≈ 0, above the floor
            cloud.push([ox + a, oy + e, oz + 0.2 + b]);
            // wall x ≈ 0, above the floor and off the other wall
            cloud.push([ox + e, oy + 0.2 + a, oz + 0.2 + b]);
        }
    }
    cloud
}

/// Source scene with two labeled corners, and per-point labels.
fn scene() -> (PointCloud, Vec<u8>) {
    let mut cloud = corner([0.0, 0.0, 0.0]);
    let mut labels = vec![0u8; cloud.len()];
    // Offset so no coordinate value repeats across the two corners.
    for p in corner([10.0, 0.013, 0.007]).iter_points() {
        cloud.push(p);
        labels.push(1);
    }
    (cloud, labels)
}

/// End-to-end: label a flat cloud, estimate covariances per label, register.
#[test]
fn pipeline_label_estimate_register() {
    let (points, labels) = scene();
    let truth = Isometry3::translation(0.05, -0.04, 0.03);
    let moved = points.transformed(&truth);

    let params = CovarianceParams::default();
    let source = SemanticCloud::from_labeled_estimated(&points, &labels, &params).unwrap();
    let target = SemanticCloud::from_labeled_estimated(&moved, &labels, &params).unwrap();
    assert_eq!(source.len(), 2);
    assert_eq!(source.num_points(), points.len());

    let result = SemanticIcp::new(&source, &target).align();

    assert!(result.converged());
    for label in [0u8, 1] {
        assert_eq!(result.labels[&label].status, LabelStatus::Updated);
        assert_eq!(result.labels[&label].dropped_terms, 0);
        let t = result.transform(&label).unwrap();
        assert_relative_eq!(t.translation.vector, truth.translation.vector, epsilon = 1e-3);
        assert_relative_eq!(t.rotation.angle(), 0.0, epsilon = 1e-3);
    }
}

/// Estimated covariances are flat discs whose thin axis is the plane normal.
#[test]
fn pipeline_covariances_follow_surfaces() {
    let mut floor = PointCloud::new();
    for i in 0..15 {
        for j in 0..15 {
            floor.push([i as f32 * 0.1, j as f32 * 0.1, (i * 15 + j) as f32 * 1e-6]);
        }
    }
    let covs = estimate_covariances(&floor, &CovarianceParams::default());
    assert_eq!(covs.len(), floor.len());

    let normal = Vector3::z();
    for c in &covs {
        assert_relative_eq!(normal.dot(&(c * normal)), 1e-3, epsilon = 1e-4);
        assert_relative_eq!(c.trace(), 2.0 + 1e-3, epsilon = 1e-9);
    }
}

/// Explicit covariances and flat labels group the same way as estimation.
#[test]
fn pipeline_from_labeled_matches_insert() {
    let (points, labels) = scene();
    let covs = estimate_covariances(&points, &CovarianceParams::default());

    let grouped = SemanticCloud::from_labeled(&points, &labels, &covs).unwrap();

    assert_eq!(grouped.labels().collect::<Vec<_>>(), vec![0, 1]);
    assert_eq!(grouped.get(&0).unwrap().len(), 300);
    assert_eq!(grouped.get(&1).unwrap().len(), 300);
    assert_eq!(grouped.get(&1).unwrap().points().point(0), points.point(300));
    assert_eq!(grouped.get(&1).unwrap().covariances()[0], covs[300]);
}
