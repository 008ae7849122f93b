use log::{debug, warn};
use nalgebra::Isometry3;

use crate::correspondence::find_correspondences;
use crate::gicp::build_terms;
use crate::se3;
use crate::semantic_cloud::LabeledPoints;
use crate::solver::{LevenbergMarquardt, SolverParams, SolverSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelStatus {
    /// The solve converged and the estimate was replaced.
    Updated,
    /// The solver spent its iteration budget before converging. The lower
    /// cost estimate was kept, but the label is not settled.
    IterationLimit,
    /// The label has no points in the target cloud; never optimized.
    MissingInTarget,
    /// No correspondence passed the gate; estimate left unchanged.
    NoCorrespondences,
    /// The solver reported failure or produced a non-finite transform; the
    /// prior estimate was retained.
    SolverFailed,
}

/// Result of optimizing one label for one outer iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelOutcome {
    pub status: LabelStatus,
    /// The label's estimate after this iteration.
    pub transform: Isometry3<f64>,
    /// Accepted correspondences.
    pub correspondences: usize,
    /// Correspondences dropped because their combined covariance was singular.
    pub dropped_terms: usize,
    /// `‖log(previous⁻¹ · transform)‖²`
    pub delta: f64,
    pub summary: Option<SolverSummary>,
}

impl LabelOutcome {
    /// Whether this outcome replaced the label's estimate.
    pub fn is_update(&self) -> bool {
        matches!(self.status, LabelStatus::Updated | LabelStatus::IterationLimit)
    }

    pub(crate) fn unchanged(status: LabelStatus, transform: Isometry3<f64>) -> Self {
        Self {
            status,
            transform,
            correspondences: 0,
            dropped_terms: 0,
            delta: 0.0,
            summary: None,
        }
    }
}

/// Per-label inputs that stay fixed for a whole alignment call.
#[derive(Debug, Clone, Copy)]
pub struct LabelSolveParams<'a> {
    pub base: &'a Isometry3<f64>,
    pub max_correspondence_distance_sq: f64,
    pub solver: &'a SolverParams,
}

/// Re-estimate one label's transform starting from `current`.
///
/// The source points are moved by `current · base` into a working copy,
/// matched against the target label, and the resulting generalized-ICP
/// problem is solved on SE(3). Nothing outside the returned outcome is
/// modified.
pub fn optimize_label(
    source: &LabeledPoints,
    target: &LabeledPoints,
    current: &Isometry3<f64>,
    params: &LabelSolveParams<'_>,
) -> LabelOutcome {
    let working = source.points().transformed(&(current * params.base));
    let correspondences = find_correspondences(
        &working,
        target.tree(),
        params.max_correspondence_distance_sq as f32,
    );

    let gicp = build_terms(source, target, &correspondences, current, params.base);
    if gicp.terms.is_empty() {
        let mut outcome = LabelOutcome::unchanged(LabelStatus::NoCorrespondences, *current);
        outcome.dropped_terms = gicp.dropped;
        return outcome;
    }

    let summary = LevenbergMarquardt::new(*params.solver).minimize(&gicp.terms, current);

    let usable = summary.termination.is_usable() && se3::is_finite(&summary.transform);
    if !usable {
        warn!(
            "solver failed ({:?}) after {} iterations with {} terms; keeping previous estimate",
            summary.termination,
            summary.iterations,
            gicp.terms.len()
        );
        return LabelOutcome {
            status: LabelStatus::SolverFailed,
            transform: *current,
            correspondences: correspondences.len(),
            dropped_terms: gicp.dropped,
            delta: 0.0,
            summary: Some(summary),
        };
    }

    let delta = se3::squared_distance(current, &summary.transform);
    let status = if summary.termination.is_converged() {
        LabelStatus::Updated
    } else {
        warn!(
            "solver stopped at its iteration budget ({}) with cost {:.6e} -> {:.6e}, delta {:.6e}",
            summary.iterations, summary.initial_cost, summary.final_cost, delta
        );
        LabelStatus::IterationLimit
    };
    debug!(
        "{} terms ({} dropped), cost {:.6e} -> {:.6e} in {} iterations ({:?}), delta {:.6e}",
        gicp.terms.len(),
        gicp.dropped,
        summary.initial_cost,
        summary.final_cost,
        summary.iterations,
        summary.termination,
        delta
    );

    LabelOutcome {
        status,
        transform: summary.transform,
        correspondences: correspondences.len(),
        dropped_terms: gicp.dropped,
        delta,
        summary: Some(summary),
    }
}
