//! Orientation refinement against the full spot list.
//!
//! Refinement proper (detector-geometry and cell refinement, partiality) is an
//! external collaborator; [`OrientationRefiner`] is the seam it plugs into.
//! [`LatticeFitRefiner`] is the built-in implementation: it assigns integer
//! indices to every spot the orientation predicts, then re-fits the crystal
//! rotation to those assignments by least squares.

use std::collections::HashMap;

use tracing::debug;

use crate::orientation::{fit_rotation, OrientationMatrix};
use crate::spot::Spot;
use crate::Vector3;

/// Default distance from an integer, in fractional Miller units, within which
/// a spot counts as explained.
pub const DEFAULT_HKL_TOLERANCE: f64 = 0.15;

/// Outcome of refining one orientation.
#[derive(Debug, Clone)]
pub struct Refinement {
    pub orientation: OrientationMatrix,
    /// Whether the refined orientation is an acceptable solution.
    pub good: bool,
    /// Ids of the spots the refined orientation explains.
    pub explained: Vec<usize>,
}

pub trait OrientationRefiner: Send + Sync {
    /// Refine `orientation` against `spots` and report which spots it explains.
    fn refine(&self, orientation: &OrientationMatrix, spots: &[Spot]) -> Refinement;
}

/// Spot ids whose fractional indices under `orientation` all lie within
/// `tolerance` of a non-zero integer triple, paired with those triples.
pub fn indexed_spots(
    orientation: &OrientationMatrix,
    spots: &[Spot],
    tolerance: f64,
) -> Vec<(usize, Vector3)> {
    let Some(inverse) = orientation.matrix().try_inverse() else {
        return Vec::new();
    };
    spots
        .iter()
        .filter_map(|spot| {
            let frac = inverse * spot.reciprocal;
            let rounded = frac.map(f64::round);
            let within = (frac - rounded).amax() <= tolerance;
            (within && rounded != Vector3::zeros()).then_some((spot.id, rounded))
        })
        .collect()
}

/// Ids of the spots explained by `orientation` without refining it.
pub fn explained_spots(orientation: &OrientationMatrix, spots: &[Spot], tolerance: f64) -> Vec<usize> {
    indexed_spots(orientation, spots, tolerance)
        .into_iter()
        .map(|(id, _)| id)
        .collect()
}

/// Iterative index-and-refit refiner.
#[derive(Debug, Clone)]
pub struct LatticeFitRefiner {
    pub hkl_tolerance: f64,
    /// Maximum number of index/refit passes.
    pub iterations: usize,
    /// Explained-spot count at or above which a solution is good.
    pub minimum_spots_explained: usize,
}

impl LatticeFitRefiner {
    pub fn new(minimum_spots_explained: usize) -> Self {
        Self {
            hkl_tolerance: DEFAULT_HKL_TOLERANCE,
            iterations: 3,
            minimum_spots_explained,
        }
    }
}

impl OrientationRefiner for LatticeFitRefiner {
    fn refine(&self, orientation: &OrientationMatrix, spots: &[Spot]) -> Refinement {
        let b = orientation.rotation().transpose() * orientation.matrix();
        let positions: HashMap<usize, Vector3> = spots.iter().map(|s| (s.id, s.reciprocal)).collect();
        let mut current = *orientation;
        let mut indexed = indexed_spots(&current, spots, self.hkl_tolerance);

        for pass in 0..self.iterations {
            if indexed.len() < 3 {
                break;
            }
            let (theoretical, observed): (Vec<Vector3>, Vec<Vector3>) = indexed
                .iter()
                .filter_map(|(id, hkl)| positions.get(id).map(|q| (b * hkl, *q)))
                .unzip();
            let Some(rotation) = fit_rotation(&theoretical, &observed) else {
                break;
            };
            let candidate = OrientationMatrix::new(rotation, &b);
            let reindexed = indexed_spots(&candidate, spots, self.hkl_tolerance);
            debug!(
                "Refine pass {}: {} -> {} spots explained",
                pass,
                indexed.len(),
                reindexed.len()
            );
            if reindexed.len() < indexed.len() {
                break;
            }
            let converged = reindexed.len() == indexed.len();
            current = candidate;
            indexed = reindexed;
            if converged {
                break;
            }
        }

        let explained: Vec<usize> = indexed.into_iter().map(|(id, _)| id).collect();
        Refinement {
            orientation: current,
            good: explained.len() >= self.minimum_spots_explained,
            explained,
        }
    }
}
