use semantic_icp_core::PointCloud;
use semantic_icp_spatial::KdTree;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub source_index: usize,
    pub target_index: usize,
    pub distance_sq: f32,
}

/// Find correspondences between source points and the nearest points in the
/// target cloud (represented by its KdTree).
///
/// For each point in `source`, the nearest neighbour in `target_tree` is
/// found. A pair is accepted only if its squared distance is strictly below
/// `max_distance_sq`; rejected points produce no correspondence.
pub fn find_correspondences(
    source: &PointCloud,
    target_tree: &KdTree,
    max_distance_sq: f32,
) -> Vec<Correspondence> {
    source
        .iter_points()
        .enumerate()
        .filter_map(|(i, query)| {
            let (target_index, distance_sq) = target_tree.nearest_one(&query)?;
            (distance_sq < max_distance_sq).then_some(Correspondence {
                source_index: i,
                target_index,
                distance_sq,
            })
        })
        .collect()
}
