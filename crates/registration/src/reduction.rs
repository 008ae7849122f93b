use std::collections::BTreeMap;

use nalgebra::{Isometry3, Matrix3, Rotation3, Translation3, UnitQuaternion, Vector3};

use crate::semantic_cloud::SemanticLabel;

/// How the per-label transforms are collapsed into a single transform.
///
/// Nothing in the registration itself singles out one label, so the choice
/// belongs to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransformReduction<L> {
    /// Use the transform of this label.
    ReferenceLabel(L),
    /// Use the transform of the registered label with the most source points.
    /// Ties go to the smallest label.
    #[default]
    MostPoints,
    /// Point-count weighted chordal mean over all registered labels.
    WeightedMean,
}

/// Collapse `transforms` according to `policy`.
///
/// `weights` holds the source point count of every label that was actually
/// registered (present in both clouds); `MostPoints` and `WeightedMean`
/// consider only those labels. Returns `None` when no label qualifies.
pub fn reduce_transforms<L: SemanticLabel>(
    transforms: &BTreeMap<L, Isometry3<f64>>,
    weights: &BTreeMap<L, usize>,
    policy: &TransformReduction<L>,
) -> Option<Isometry3<f64>> {
    match policy {
        TransformReduction::ReferenceLabel(label) => transforms.get(label).copied(),
        TransformReduction::MostPoints => {
            let (label, _) = weights
                .iter()
                .filter(|(l, _)| transforms.contains_key(*l))
                .fold(None, |best: Option<(&L, usize)>, (l, &w)| match best {
                    Some((_, bw)) if bw >= w => best,
                    _ => Some((l, w)),
                })?;
            transforms.get(label).copied()
        }
        TransformReduction::WeightedMean => weighted_mean(transforms, weights),
    }
}

fn weighted_mean<L: SemanticLabel>(
    transforms: &BTreeMap<L, Isometry3<f64>>,
    weights: &BTreeMap<L, usize>,
) -> Option<Isometry3<f64>> {
    let mut total = 0.0;
    let mut rotation_sum = Matrix3::zeros();
    let mut translation_sum = Vector3::zeros();

    for (label, &w) in weights {
        let Some(t) = transforms.get(label) else {
            continue;
        };
        let w = w as f64;
        total += w;
        rotation_sum += t.rotation.to_rotation_matrix().matrix() * w;
        translation_sum += t.translation.vector * w;
    }
    if total <= 0.0 {
        return None;
    }

    let rotation = project_to_rotation(&(rotation_sum / total))?;
    Some(Isometry3::from_parts(
        Translation3::from(translation_sum / total),
        rotation,
    ))
}

/// Closest rotation to `m` in the Frobenius sense, via SVD.
fn project_to_rotation(m: &Matrix3<f64>) -> Option<UnitQuaternion<f64>> {
    let svd = m.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);

    // Flip the last singular direction if the product is a reflection.
    let mut correction = Matrix3::identity();
    if (u * v_t).determinant() < 0.0 {
        correction[(2, 2)] = -1.0;
    }
    let r = Rotation3::from_matrix_unchecked(u * correction * v_t);
    Some(UnitQuaternion::from_rotation_matrix(&r))
}
