#![forbid(unsafe_code)]

pub mod correspondence;
pub mod driver;
pub mod error;
pub mod gicp;
pub mod reduction;
pub mod se3;
pub mod semantic_cloud;
pub mod semantic_icp;
pub mod solver;

pub use correspondence::{find_correspondences, Correspondence};
pub use driver::{optimize_label, LabelOutcome, LabelSolveParams, LabelStatus};
pub use error::CloudError;
pub use gicp::{build_terms, GicpTerm, GicpTerms};
pub use reduction::{reduce_transforms, TransformReduction};
pub use semantic_cloud::{LabeledPoints, SemanticCloud, SemanticLabel};
pub use semantic_icp::{AlignResult, AlignStatus, IterationRecord, SemanticIcp, SemanticIcpParams};
pub use solver::{LevenbergMarquardt, ScalarResidual, SolverParams, SolverSummary, Termination};
