//! Semantic generalized-ICP registration of labeled point clouds.
//!
//! Each semantic label of the source cloud is registered against the points
//! of the same label in the target, producing one rigid transform per label.
//!
//! ```no_run
//! use semantic_icp::{PointCloud, SemanticCloud, SemanticIcp, CovarianceParams};
//!
//! let points = PointCloud::from_points(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
//! let labels = [0u8, 0, 0];
//! let params = CovarianceParams::default();
//! let source = SemanticCloud::from_labeled_estimated(&points, &labels, &params)?;
//! let target = source.clone();
//!
//! let result = SemanticIcp::new(&source, &target).align();
//! assert!(result.converged());
//! # Ok::<(), semantic_icp::CloudError>(())
//! ```

#![forbid(unsafe_code)]

pub use nalgebra;

pub use semantic_icp_core::{Covariance, PointCloud};
pub use semantic_icp_covariance::{estimate_covariances, CovarianceParams};
pub use semantic_icp_registration::*;
pub use semantic_icp_spatial::KdTree;
