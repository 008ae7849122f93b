use semantic_icp::nalgebra::{Isometry3, Vector3};
use semantic_icp::{
    CloudError, CovarianceParams, PointCloud, SemanticCloud, SemanticIcp, TransformReduction,
};

const GROUND: u8 = 0;
const WALL: u8 = 1;

/// A ground patch at z ≈ 0 and a wall at x ≈ 4, each labeled.
fn scene() -> (PointCloud, Vec<u8>) {
    let mut cloud = PointCloud::new();
    let mut labels = Vec::new();

    // Small offsets keep the grids free of exact duplicates.
    for i in 0..20 {
        for j in 0..20 {
            let k = (i * 20 + j) as f32;
            cloud.push([i as f32 * 0.2, j as f32 * 0.2, k * 1e-5]);
            labels.push(GROUND);
        }
    }
    for j in 0..20 {
        for h in 1..10 {
            let k = (j * 10 + h) as f32;
            cloud.push([4.0 + k * 1e-5, j as f32 * 0.2, h as f32 * 0.2]);
            labels.push(WALL);
        }
    }
    (cloud, labels)
}

fn main() -> Result<(), CloudError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (source_points, labels) = scene();
    let truth = Isometry3::new(Vector3::new(0.1, -0.05, 0.08), Vector3::new(0.0, 0.0, 0.02));
    let target_points = source_points.transformed(&truth);
    println!("Source: {} points", source_points.len());
    println!("Target: {} points (moved by {:?})", target_points.len(), truth.translation.vector);

    let params = CovarianceParams::default();
    let source = SemanticCloud::from_labeled_estimated(&source_points, &labels, &params)?;
    let target = SemanticCloud::from_labeled_estimated(&target_points, &labels, &params)?;

    let result = SemanticIcp::new(&source, &target).align();
    println!("Status: {:?} after {} iterations", result.status, result.iterations);
    for record in &result.history {
        println!(
            "  iteration {:2}: max delta {:.3e}, {} labels updated, {} unconverged",
            record.iteration, record.max_delta, record.labels_updated, record.labels_unconverged
        );
    }

    // Each label is a single plane, so only motion along its normal is
    // observable in its own transform.
    for (label, transform) in &result.transforms {
        let outcome = &result.labels[label];
        let t = transform.translation.vector;
        println!(
            "Label {label}: {:?}, {} correspondences, translation [{:.4}, {:.4}, {:.4}], yaw {:.4}",
            outcome.status,
            outcome.correspondences,
            t[0],
            t[1],
            t[2],
            transform.rotation.euler_angles().2
        );
    }

    if let Some(best) = result.final_transform {
        println!("Most points: {:?}", best.translation.vector);
    }
    if let Some(mean) = result.reduce(&TransformReduction::WeightedMean) {
        println!("Weighted mean: {:?}", mean.translation.vector);
    }
    Ok(())
}
