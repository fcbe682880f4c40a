//! Solution validation: deduplication under symmetry and indexing ambiguity,
//! refinement, and commit of accepted lattices.

use std::collections::HashSet;

use tracing::{debug, info};

use super::driver::ExposureState;
use super::network::CandidateNetwork;
use super::vectors::purge_spots;
use super::{AcceptedLattice, Indexer, Phase, TrialStatus};
use crate::orientation::{angle_between, OrientationMatrix};
use crate::refine::{explained_spots, Refinement, DEFAULT_HKL_TOLERANCE};
use crate::{Matrix3, Vector3};

/// Miller-space direction compared between orientations.
fn reference_direction() -> Vector3 {
    Vector3::new(1.0, 0.0, 0.0)
}

/// Whether some equivalence `E` brings `B · E · p` within `spread` of `A · p`.
fn similar_directed(equivalences: &[Matrix3], spread: f64, a: &OrientationMatrix, b: &OrientationMatrix) -> bool {
    let p = reference_direction();
    let reference = a.predict(&p);
    equivalences.iter().any(|e| {
        let image = b.predict(&(e * p));
        angle_between(&reference, &image).is_some_and(|angle| angle < spread)
    })
}

/// Whether two orientations describe the same lattice.
///
/// The direction comparison is evaluated in both directions so the relation is
/// symmetric.
pub fn similar(indexer: &Indexer, a: &OrientationMatrix, b: &OrientationMatrix) -> bool {
    let spread = indexer.config().solution_angle_spread();
    let equivalences = indexer.equivalences();
    similar_directed(equivalences, spread, a, b) || similar_directed(equivalences, spread, b, a)
}

/// Whether `candidate` matches any accepted lattice.
pub fn is_duplicate(indexer: &Indexer, candidate: &OrientationMatrix, accepted: &[AcceptedLattice]) -> bool {
    accepted.iter().any(|l| similar(indexer, candidate, &l.orientation))
}

/// Turn a complete network into an orientation and try to commit it.
///
/// A network below the minimum size is refused before any matrix is built.
pub fn validate_network(indexer: &Indexer, state: &mut ExposureState, network: &CandidateNetwork) -> TrialStatus {
    if network.len() < indexer.config().minimum_network_size {
        return TrialStatus::BranchFailure;
    }
    state.phase = Phase::Validating;
    let orientation = network.orientation(indexer);
    commit(indexer, state, &orientation)
}

/// Deduplicate, refine and, if good, accept an orientation.
///
/// On success the explained spots leave the exposure's pool and every
/// observed vector touching them is purged. Otherwise the pool is left as it
/// was.
pub fn commit(indexer: &Indexer, state: &mut ExposureState, orientation: &OrientationMatrix) -> TrialStatus {
    let config = indexer.config();
    if is_duplicate(indexer, orientation, &state.accepted) {
        debug!("Candidate duplicates an accepted lattice");
        state.phase = Phase::Discarded;
        return TrialStatus::Duplicate;
    }

    state.phase = Phase::Refining;
    let refinement = if config.refine_orientations {
        indexer.refiner().refine(orientation, &state.spots)
    } else {
        let explained = explained_spots(orientation, &state.spots, DEFAULT_HKL_TOLERANCE);
        Refinement {
            orientation: *orientation,
            good: explained.len() >= config.minimum_spots_explained,
            explained,
        }
    };

    if is_duplicate(indexer, &refinement.orientation, &state.accepted) {
        debug!("Refined candidate duplicates an accepted lattice");
        state.phase = Phase::Discarded;
        return TrialStatus::Duplicate;
    }

    let accepted = config.accept_all_solutions
        || (refinement.good && refinement.explained.len() >= config.minimum_spots_explained);
    if !accepted {
        debug!(
            "Refinement rejected candidate: {} spots explained (need {})",
            refinement.explained.len(),
            config.minimum_spots_explained
        );
        state.rejected.push(refinement.orientation);
        state.consecutive_failures += 1;
        state.phase = Phase::Discarded;
        return TrialStatus::Failure;
    }

    let explained: HashSet<usize> = refinement.explained.iter().copied().collect();
    let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.spots)
        .into_iter()
        .partition(|s| explained.contains(&s.id));
    state.spots = kept;
    purge_spots(&mut state.vectors, &explained);

    info!(
        "Accepted lattice {}: {} spots explained, {} spots and {} vectors remain",
        state.accepted.len() + 1,
        taken.len(),
        state.spots.len(),
        state.vectors.len()
    );
    if let Some(cell) = refinement.orientation.unit_cell() {
        debug!("Derived cell {:.3?}", cell.parameters());
    }

    state.accepted.push(AcceptedLattice {
        orientation: refinement.orientation,
        spots: taken,
    });
    state.consecutive_failures = 0;
    state.phase = Phase::Committed;
    TrialStatus::Success(refinement.orientation)
}
