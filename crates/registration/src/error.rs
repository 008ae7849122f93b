use thiserror::Error;

/// Errors raised while assembling a [`SemanticCloud`](crate::SemanticCloud).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudError {
    /// A label was inserted with no points.
    #[error("label {label} has no points")]
    EmptyLabel { label: String },

    /// The covariance sequence is not index-aligned with the points.
    #[error("{covariances} covariances supplied for {points} points")]
    CovarianceCountMismatch { points: usize, covariances: usize },

    /// The per-point label sequence is not index-aligned with the points.
    #[error("{labels} labels supplied for {points} points")]
    LabelCountMismatch { points: usize, labels: usize },
}
