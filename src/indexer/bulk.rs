//! Bulk matcher: a non-recursive global search.
//!
//! Every observed vector is matched by length against the table; pairs of
//! matches with consistent mutual angles each yield a candidate rotation.
//! Candidates vote for each other, and the best-supported distinct ones go
//! through the same validation as network solutions.

use std::time::Instant;

use tracing::{debug, info};

use super::driver::ExposureState;
use super::validate::{commit, similar};
use super::vectors::ObservedVector;
use super::{Indexer, Phase, TrialStatus};
use crate::orientation::{align_pair, angle_between, OrientationMatrix};
use crate::Vector3;

/// An observed vector matched by length to one table entry.
#[derive(Debug, Clone, Copy)]
struct LengthMatch {
    observed: usize,
    theoretical: usize,
    /// Inverse length difference (Å).
    trust: f64,
}

/// Length matches with trust at least `trust_tolerance`, most trusted first.
fn length_matches(indexer: &Indexer, vectors: &[ObservedVector]) -> Vec<LengthMatch> {
    let config = indexer.config();
    let table = indexer.table();
    let tol = config.distance_tolerance();
    let mut matches = Vec::new();
    for (o, v) in vectors.iter().enumerate() {
        for t in table.within_length(v.length, tol) {
            let delta = (table.vectors[t].length - v.length).abs();
            let trust = if delta > 0.0 { 1.0 / delta } else { f64::MAX };
            if trust >= config.trust_tolerance {
                matches.push(LengthMatch {
                    observed: o,
                    theoretical: t,
                    trust,
                });
            }
        }
    }
    matches.sort_by(|a, b| b.trust.total_cmp(&a.trust));
    matches.truncate(config.bulk.max_search_matches);
    matches
}

/// Candidate orientations from every angle-consistent pair of matches.
pub fn candidate_orientations(
    indexer: &Indexer,
    vectors: &[ObservedVector],
    deadline: Option<Instant>,
) -> Vec<OrientationMatrix> {
    let config = indexer.config();
    let table = indexer.table();
    let angle_tol = config.angle_tolerance();
    let matches = length_matches(indexer, vectors);
    debug!("Bulk matcher: {} length matches", matches.len());

    let mut candidates = Vec::new();
    'outer: for (i, m1) in matches.iter().enumerate() {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        let v1 = &vectors[m1.observed].vector;
        let t1 = table.vectors[m1.theoretical].vector();
        for m2 in &matches[i + 1..] {
            if m2.observed == m1.observed || m2.theoretical == m1.theoretical {
                continue;
            }
            let v2 = &vectors[m2.observed].vector;
            let t2 = table.vectors[m2.theoretical].vector();
            let (Some(observed_angle), Some(theoretical_angle)) =
                (angle_between(v1, v2), angle_between(&t1, &t2))
            else {
                continue;
            };
            if (observed_angle - theoretical_angle).abs() > angle_tol {
                continue;
            }
            let Some((rotation, residual)) = align_pair(&t1, &t2, v1, v2) else {
                continue;
            };
            if residual > angle_tol {
                continue;
            }
            candidates.push(indexer.orientation(rotation));
            if candidates.len() >= config.bulk.max_search_solutions {
                break 'outer;
            }
            if !config.bulk.thorough {
                // One candidate per leading match.
                break;
            }
        }
    }
    candidates
}

/// Mutual-agreement score of each candidate.
///
/// For every other candidate, the Miller direction `[1 0 0]` is compared under each
/// ambiguity operator; an angle θ below the solution spread adds
/// `(spread − θ)²`.
pub fn agreement_scores(indexer: &Indexer, candidates: &[OrientationMatrix]) -> Vec<f64> {
    let spread = indexer.config().solution_angle_spread();
    let axis = Vector3::new(1.0, 0.0, 0.0);
    let ambiguities = indexer.ambiguity_matrices();
    let directions: Vec<Vector3> = candidates.iter().map(|c| c.predict(&axis)).collect();

    let mut scores = vec![0.0; candidates.len()];
    for (i, reference) in directions.iter().enumerate() {
        for (j, other) in candidates.iter().enumerate() {
            if i == j {
                continue;
            }
            for m in ambiguities {
                let image = other.predict(&(m * axis));
                if let Some(angle) = angle_between(reference, &image) {
                    if angle < spread {
                        scores[i] += (spread - angle).powi(2);
                    }
                }
            }
        }
    }
    scores
}

/// Highest-scoring candidates, pruning any similar to one already kept.
pub fn distinct_top_candidates(
    indexer: &Indexer,
    candidates: Vec<OrientationMatrix>,
    scores: &[f64],
    count: usize,
) -> Vec<OrientationMatrix> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    let mut kept: Vec<OrientationMatrix> = Vec::new();
    for i in order {
        if kept.len() >= count {
            break;
        }
        if !kept.iter().any(|k| similar(indexer, k, &candidates[i])) {
            kept.push(candidates[i]);
        }
    }
    kept
}

/// Run the bulk matcher on the exposure's remaining pool.
///
/// Returns the number of trials run.
pub fn run_bulk(indexer: &Indexer, state: &mut ExposureState, deadline: Option<Instant>) -> usize {
    let config = indexer.config();
    state.phase = Phase::Seeding;
    let candidates = candidate_orientations(indexer, &state.vectors, deadline);
    if candidates.is_empty() {
        info!("Bulk matcher found no candidate orientations");
        return 0;
    }
    let scores = agreement_scores(indexer, &candidates);
    let total = candidates.len();
    let survivors = distinct_top_candidates(indexer, candidates, &scores, config.bulk.trial_count);
    info!(
        "Bulk matcher: {} candidates, {} distinct survivors",
        total,
        survivors.len()
    );

    let mut trials = 0;
    for orientation in &survivors {
        if state.accepted.len() >= config.max_lattices
            || deadline.is_some_and(|d| Instant::now() >= d)
        {
            break;
        }
        trials += 1;
        state.phase = Phase::Validating;
        let status = commit(indexer, state, orientation);
        debug!("Bulk candidate {}: {}", trials, status.label());
        if let TrialStatus::Success(_) = status {
            if state.vectors.is_empty() {
                break;
            }
        }
    }
    trials
}
