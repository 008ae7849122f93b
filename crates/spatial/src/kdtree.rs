use kiddo::float::distance::SquaredEuclidean;
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use semantic_icp_core::PointCloud;
use std::num::NonZero;

/// A KdTree for nearest-neighbour queries on 3D point clouds.
///
/// Built on kiddo's `ImmutableKdTree`. The tree is built once from the
/// cloud's points and cannot be modified afterwards; it stores `u32` indices
/// mapping back to the source cloud.
#[derive(Debug, Clone)]
pub struct KdTree {
    tree: ImmutableKdTree<f32, u32, 3, 32>,
    num_points: usize,
}

impl KdTree {
    /// Build a KdTree from a PointCloud.
    pub fn build(cloud: &PointCloud) -> Self {
        let points: Vec<[f32; 3]> = cloud.iter_points().collect();
        Self::from_points(&points)
    }

    /// Build a KdTree from a contiguous slice of points.
    pub fn from_points(points: &[[f32; 3]]) -> Self {
        Self {
            tree: ImmutableKdTree::new_from_slice(points),
            num_points: points.len(),
        }
    }

    /// Returns the number of points in the tree.
    pub fn len(&self) -> usize {
        self.num_points
    }

    /// Returns true if the tree is empty.
    pub fn is_empty(&self) -> bool {
        self.num_points == 0
    }

    /// Find the single nearest neighbour of `query`.
    ///
    /// Returns `(index, squared_distance)`, or `None` if the tree is empty or
    /// the query is not finite.
    pub fn nearest_one(&self, query: &[f32; 3]) -> Option<(usize, f32)> {
        if self.is_empty() || !query.iter().all(|v| v.is_finite()) {
            return None;
        }

        let nn = self.tree.nearest_one::<SquaredEuclidean>(query);
        Some((nn.item as usize, nn.distance))
    }

    /// Find the `k` nearest neighbours to `query`.
    ///
    /// Returns `(indices, squared_distances)` sorted in ascending order.
    ///
    /// Edge cases:
    /// - Returns empty if `k == 0`, the tree is empty, or the query contains
    ///   NaN.
    /// - If `k > len()`, returns all points.
    pub fn knn(&self, query: &[f32; 3], k: usize) -> (Vec<usize>, Vec<f32>) {
        let Some(nz_k) = self.query_size(query, k) else {
            return (Vec::new(), Vec::new());
        };

        self.tree
            .nearest_n::<SquaredEuclidean>(query, nz_k)
            .into_iter()
            .map(|nn| (nn.item as usize, nn.distance))
            .unzip()
    }

    /// Find the `k` nearest neighbours to `query`, returning only indices.
    pub fn knn_indices(&self, query: &[f32; 3], k: usize) -> Vec<usize> {
        let Some(nz_k) = self.query_size(query, k) else {
            return Vec::new();
        };

        self.tree
            .nearest_n::<SquaredEuclidean>(query, nz_k)
            .iter()
            .map(|nn| nn.item as usize)
            .collect()
    }

    fn query_size(&self, query: &[f32; 3], k: usize) -> Option<NonZero<usize>> {
        if self.is_empty() || !query.iter().all(|v| v.is_finite()) {
            return None;
        }
        NonZero::new(k.min(self.num_points))
    }
}

#[cfg(test)]
mod tests {
    use super::KdTree;
    use proptest::prelude::*;
    use semantic_icp_core::PointCloud;

    #[test]
    fn nearest_one_returns_squared_distance() {
        let cloud = PointCloud::from_xyz(
            vec![0.0, 1.0, 2.0, 10.0],
            vec![0.0, 0.0, 0.0, 0.0],
            vec![0.0, 0.0, 0.0, 0.0],
        );
        let tree = KdTree::build(&cloud);
        let (idx, dist_sq) = tree.nearest_one(&[2.0, 3.0, 0.0]).unwrap();
        assert_eq!(idx, 2);
        assert!((dist_sq - 9.0).abs() < 1e-6);
    }

    #[test]
    fn nearest_one_empty_tree() {
        let tree = KdTree::build(&PointCloud::new());
        assert!(tree.is_empty());
        assert!(tree.nearest_one(&[0.0, 0.0, 0.0]).is_none());
    }

    #[test]
    fn nearest_one_nan_query() {
        let cloud = PointCloud::from_xyz(vec![1.0], vec![2.0], vec![3.0]);
        let tree = KdTree::build(&cloud);
        assert!(tree.nearest_one(&[f32::NAN, 0.0, 0.0]).is_none());
    }

    #[test]
    fn knn_returns_expected_neighbors() {
        let cloud = PointCloud::from_xyz(
            vec![0.0, 1.0, 2.0, 10.0],
            vec![0.0, 0.0, 0.0, 0.0],
            vec![0.0, 0.0, 0.0, 0.0],
        );
        let tree = KdTree::build(&cloud);
        let (idx, dist) = tree.knn(&[0.2, 0.0, 0.0], 2);
        assert_eq!(idx, vec![0, 1]);
        assert!(dist[0] <= dist[1]);
    }

    #[test]
    fn knn_k_zero() {
        let cloud = PointCloud::from_xyz(vec![1.0], vec![2.0], vec![3.0]);
        let tree = KdTree::build(&cloud);
        let (idx, dist) = tree.knn(&[0.0, 0.0, 0.0], 0);
        assert!(idx.is_empty());
        assert!(dist.is_empty());
    }

    #[test]
    fn knn_k_larger_than_cloud() {
        let cloud = PointCloud::from_xyz(vec![0.0, 1.0, 2.0], vec![0.0; 3], vec![0.0; 3]);
        let tree = KdTree::build(&cloud);
        assert_eq!(tree.knn_indices(&[0.0, 0.0, 0.0], 100).len(), 3);
    }

    proptest! {
        #[test]
        fn nearest_one_matches_brute_force(
            pts in prop::collection::vec(
                (-100.0f32..100.0f32, -100.0f32..100.0f32, -100.0f32..100.0f32),
                1..200
            ),
            q in (-100.0f32..100.0f32, -100.0f32..100.0f32, -100.0f32..100.0f32),
        ) {
            let cloud: PointCloud = pts.iter().map(|p| [p.0, p.1, p.2]).collect();
            let tree = KdTree::build(&cloud);
            let (_, dist_sq) = tree.nearest_one(&[q.0, q.1, q.2]).unwrap();

            let brute = pts
                .iter()
                .map(|p| {
                    let dx = p.0 - q.0;
                    let dy = p.1 - q.1;
                    let dz = p.2 - q.2;
                    dx * dx + dy * dy + dz * dz
                })
                .fold(f32::INFINITY, f32::min);
            prop_assert!((dist_sq - brute).abs() <= 1e-3 * brute.max(1.0));
        }

        #[test]
        fn knn_returns_at_most_k_results(
            pts in prop::collection::vec(
                (-100.0f32..100.0f32, -100.0f32..100.0f32, -100.0f32..100.0f32),
                1..200
            ),
            k in 1usize..50,
        ) {
            let cloud: PointCloud = pts.iter().map(|p| [p.0, p.1, p.2]).collect();
            let tree = KdTree::build(&cloud);
            let (idx, dist) = tree.knn(&[0.0, 0.0, 0.0], k);
            prop_assert!(idx.len() <= k);
            prop_assert!(idx.len() <= pts.len());
            prop_assert_eq!(idx.len(), dist.len());
        }
    }
}
