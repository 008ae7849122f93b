use std::collections::BTreeMap;

use log::{info, warn};
use nalgebra::Isometry3;
use rayon::prelude::*;

use crate::driver::{optimize_label, LabelOutcome, LabelSolveParams, LabelStatus};
use crate::reduction::{reduce_transforms, TransformReduction};
use crate::semantic_cloud::{LabeledPoints, SemanticCloud, SemanticLabel};
use crate::solver::SolverParams;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SemanticIcpParams<L> {
    /// Stop once the iteration counter exceeds this value, i.e. after
    /// `max_iterations + 1` outer iterations.
    pub max_iterations: usize,
    /// Stop once the largest per-label `‖log(T_prev⁻¹ · T)‖²` drops below this
    /// and every solve of the iteration converged.
    pub convergence_threshold: f64,
    /// Correspondences at or beyond this squared distance are rejected.
    pub max_correspondence_distance_sq: f64,
    /// Solve the labels of one iteration concurrently.
    pub parallel: bool,
    pub solver: SolverParams,
    /// Policy used to produce [`AlignResult::final_transform`].
    pub reduction: TransformReduction<L>,
}

impl<L> Default for SemanticIcpParams<L> {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            convergence_threshold: 0.01,
            max_correspondence_distance_sq: 4.0,
            parallel: false,
            solver: SolverParams::default(),
            reduction: TransformReduction::MostPoints,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignStatus {
    Converged,
    IterationCapReached,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationRecord {
    /// 1-based outer iteration number.
    pub iteration: usize,
    pub max_delta: f64,
    /// Labels whose estimate was replaced in this iteration.
    pub labels_updated: usize,
    /// Labels whose solve ran out of iterations. The loop does not report
    /// convergence while this is non-zero.
    pub labels_unconverged: usize,
}

#[derive(Debug, Clone)]
pub struct AlignResult<L> {
    /// One transform per source label. Labels missing from the target keep
    /// the initial guess.
    pub transforms: BTreeMap<L, Isometry3<f64>>,
    /// The per-label map reduced with [`SemanticIcpParams::reduction`].
    pub final_transform: Option<Isometry3<f64>>,
    pub status: AlignStatus,
    pub iterations: usize,
    pub history: Vec<IterationRecord>,
    /// Outcome of the last iteration for every source label.
    pub labels: BTreeMap<L, LabelOutcome>,
    /// Source point counts of the labels that were registered.
    registered_points: BTreeMap<L, usize>,
}

impl<L: SemanticLabel> AlignResult<L> {
    pub fn converged(&self) -> bool {
        self.status == AlignStatus::Converged
    }

    pub fn transform(&self, label: &L) -> Option<&Isometry3<f64>> {
        self.transforms.get(label)
    }

    /// Reduce the per-label map with a policy other than the configured one.
    pub fn reduce(&self, policy: &TransformReduction<L>) -> Option<Isometry3<f64>> {
        reduce_transforms(&self.transforms, &self.registered_points, policy)
    }
}

/// Registers a source [`SemanticCloud`] onto a target one.
///
/// The base transformation `B` is applied to every source point (and its
/// covariance rotated) before the estimated transform, so the full map from
/// the source frame to the target frame is `T · B`.
#[derive(Debug, Clone)]
pub struct SemanticIcp<'a, L> {
    source: &'a SemanticCloud<L>,
    target: &'a SemanticCloud<L>,
    base: Isometry3<f64>,
    params: SemanticIcpParams<L>,
}

impl<'a, L: SemanticLabel> SemanticIcp<'a, L> {
    pub fn new(source: &'a SemanticCloud<L>, target: &'a SemanticCloud<L>) -> Self {
        Self::with_params(source, target, SemanticIcpParams::default())
    }

    pub fn with_params(
        source: &'a SemanticCloud<L>,
        target: &'a SemanticCloud<L>,
        params: SemanticIcpParams<L>,
    ) -> Self {
        Self {
            source,
            target,
            base: Isometry3::identity(),
            params,
        }
    }

    pub fn with_base_transformation(mut self, base: Isometry3<f64>) -> Self {
        self.base = base;
        self
    }

    pub fn params(&self) -> &SemanticIcpParams<L> {
        &self.params
    }

    pub fn base_transformation(&self) -> &Isometry3<f64> {
        &self.base
    }

    /// Align starting from the identity.
    pub fn align(&self) -> AlignResult<L> {
        self.align_with_guess(&Isometry3::identity())
    }

    /// Align with every label's estimate initialized to `initial`.
    pub fn align_with_guess(&self, initial: &Isometry3<f64>) -> AlignResult<L> {
        let mut transforms: BTreeMap<L, Isometry3<f64>> =
            self.source.labels().map(|l| (l, *initial)).collect();

        let mut labels: BTreeMap<L, LabelOutcome> = BTreeMap::new();
        let mut shared: Vec<(L, &LabeledPoints, &LabeledPoints)> = Vec::new();
        for (label, source) in self.source.iter() {
            match self.target.get(&label) {
                Some(target) => shared.push((label, source, target)),
                None => {
                    labels.insert(
                        label,
                        LabelOutcome::unchanged(LabelStatus::MissingInTarget, *initial),
                    );
                }
            }
        }
        let registered_points: BTreeMap<L, usize> =
            shared.iter().map(|(l, s, _)| (*l, s.len())).collect();

        let solve_params = LabelSolveParams {
            base: &self.base,
            max_correspondence_distance_sq: self.params.max_correspondence_distance_sq,
            solver: &self.params.solver,
        };

        let mut history = Vec::new();
        let mut iteration = 0;
        let status = loop {
            let current = &transforms;
            let solve = |&(label, source, target): &(L, &LabeledPoints, &LabeledPoints)| {
                let estimate = current.get(&label).copied().unwrap_or(*initial);
                (label, optimize_label(source, target, &estimate, &solve_params))
            };
            let outcomes: Vec<(L, LabelOutcome)> = if self.params.parallel {
                shared.par_iter().map(solve).collect()
            } else {
                shared.iter().map(solve).collect()
            };

            let max_delta = outcomes
                .iter()
                .map(|(_, o)| o.delta)
                .fold(0.0, f64::max);
            let labels_updated = outcomes.iter().filter(|(_, o)| o.is_update()).count();
            let labels_unconverged = outcomes
                .iter()
                .filter(|(_, o)| o.status == LabelStatus::IterationLimit)
                .count();

            for (label, outcome) in outcomes {
                transforms.insert(label, outcome.transform);
                labels.insert(label, outcome);
            }

            iteration += 1;
            history.push(IterationRecord {
                iteration,
                max_delta,
                labels_updated,
                labels_unconverged,
            });

            if max_delta < self.params.convergence_threshold && labels_unconverged == 0 {
                break AlignStatus::Converged;
            }
            if iteration > self.params.max_iterations {
                break AlignStatus::IterationCapReached;
            }
        };

        let last_delta = history.last().map_or(0.0, |r| r.max_delta);
        match status {
            AlignStatus::Converged => info!(
                "converged after {} iterations over {} labels (max delta {:.3e})",
                iteration,
                shared.len(),
                last_delta
            ),
            AlignStatus::IterationCapReached => warn!(
                "stopped at the iteration cap ({} iterations, max delta {:.3e})",
                iteration, last_delta
            ),
        }

        let final_transform =
            reduce_transforms(&transforms, &registered_points, &self.params.reduction);

        AlignResult {
            transforms,
            final_transform,
            status,
            iterations: iteration,
            history,
            labels,
            registered_points,
        }
    }
}
