use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;

use semantic_icp_core::{Covariance, PointCloud};
use semantic_icp_covariance::{estimate_covariances, CovarianceParams};
use semantic_icp_spatial::KdTree;

use crate::error::CloudError;

/// A semantic class identifier. Labels are keys, not owned data.
pub trait SemanticLabel: Copy + Ord + Hash + Debug + Send + Sync {}

impl<T> SemanticLabel for T where T: Copy + Ord + Hash + Debug + Send + Sync {}

/// The points of one label, their covariances and a KdTree over them.
///
/// Invariant: `points.len() == covariances.len() > 0`.
#[derive(Debug, Clone)]
pub struct LabeledPoints {
    points: PointCloud,
    covariances: Vec<Covariance>,
    tree: KdTree,
}

impl LabeledPoints {
    fn new(points: PointCloud, covariances: Vec<Covariance>) -> Result<Self, CloudError> {
        if points.len() != covariances.len() {
            return Err(CloudError::CovarianceCountMismatch {
                points: points.len(),
                covariances: covariances.len(),
            });
        }
        let tree = KdTree::build(&points);
        Ok(Self {
            points,
            covariances,
            tree,
        })
    }

    pub fn points(&self) -> &PointCloud {
        &self.points
    }

    pub fn covariances(&self) -> &[Covariance] {
        &self.covariances
    }

    pub fn tree(&self) -> &KdTree {
        &self.tree
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Nearest point of this label to `query`, as `(index, squared_distance)`.
    pub fn nearest(&self, query: &[f32; 3]) -> Option<(usize, f32)> {
        self.tree.nearest_one(query)
    }
}

/// A point cloud partitioned by semantic label.
///
/// Every label present owns at least one point; labels are iterated in
/// ascending order.
#[derive(Debug, Clone)]
pub struct SemanticCloud<L> {
    labels: BTreeMap<L, LabeledPoints>,
}

impl<L: SemanticLabel> Default for SemanticCloud<L> {
    fn default() -> Self {
        Self {
            labels: BTreeMap::new(),
        }
    }
}

impl<L: SemanticLabel> SemanticCloud<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the points and covariances of `label`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if `points` is empty or if `covariances` is not the same
    /// length as `points`.
    pub fn insert(
        &mut self,
        label: L,
        points: PointCloud,
        covariances: Vec<Covariance>,
    ) -> Result<(), CloudError> {
        if points.is_empty() {
            return Err(CloudError::EmptyLabel {
                label: format!("{label:?}"),
            });
        }
        let entry = LabeledPoints::new(points, covariances)?;
        self.labels.insert(label, entry);
        Ok(())
    }

    /// Group a flat cloud by per-point label.
    ///
    /// `labels[i]` and `covariances[i]` belong to point `i`. Labels with no
    /// points never appear in the result.
    pub fn from_labeled(
        cloud: &PointCloud,
        labels: &[L],
        covariances: &[Covariance],
    ) -> Result<Self, CloudError> {
        if covariances.len() != cloud.len() {
            return Err(CloudError::CovarianceCountMismatch {
                points: cloud.len(),
                covariances: covariances.len(),
            });
        }

        let mut out = Self::new();
        for (label, indices) in group_by_label(cloud, labels)? {
            let covs = indices.iter().map(|&i| covariances[i]).collect();
            out.insert(label, cloud.select(&indices), covs)?;
        }
        Ok(out)
    }

    /// Group a flat cloud by per-point label and estimate every point's
    /// covariance from its neighbours within the same label.
    pub fn from_labeled_estimated(
        cloud: &PointCloud,
        labels: &[L],
        params: &CovarianceParams,
    ) -> Result<Self, CloudError> {
        let mut out = Self::new();
        for (label, indices) in group_by_label(cloud, labels)? {
            let points = cloud.select(&indices);
            let covs = estimate_covariances(&points, params);
            out.insert(label, points, covs)?;
        }
        Ok(out)
    }

    pub fn get(&self, label: &L) -> Option<&LabeledPoints> {
        self.labels.get(label)
    }

    pub fn contains(&self, label: &L) -> bool {
        self.labels.contains_key(label)
    }

    pub fn labels(&self) -> impl Iterator<Item = L> + '_ {
        self.labels.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (L, &LabeledPoints)> + '_ {
        self.labels.iter().map(|(l, p)| (*l, p))
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Total number of points across all labels.
    pub fn num_points(&self) -> usize {
        self.labels.values().map(LabeledPoints::len).sum()
    }
}

fn group_by_label<L: SemanticLabel>(
    cloud: &PointCloud,
    labels: &[L],
) -> Result<BTreeMap<L, Vec<usize>>, CloudError> {
    if labels.len() != cloud.len() {
        return Err(CloudError::LabelCountMismatch {
            points: cloud.len(),
            labels: labels.len(),
        });
    }

    let mut groups: BTreeMap<L, Vec<usize>> = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        groups.entry(*label).or_default().push(i);
    }
    Ok(groups)
}
