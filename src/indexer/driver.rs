//! Per-exposure driver: repeated seeding, growth and validation until a stop
//! condition holds.
//!
//! The state machine for each trial is
//! `Seeding → Growing → Validating → Refining → (Committed | Discarded)`.
//! Stop conditions are checked before every seed pair: lattice count, empty
//! pool, consecutive failures and the per-exposure time limit. When every
//! seed pair has been tried the largest abandoned network is validated once
//! as it stands, below the minimum network size, before the search gives up.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::bulk::run_bulk;
use super::network::{seed_networks, CandidateNetwork, GrowthOutcome, NetworkSearch};
use super::validate::{commit, is_duplicate, validate_network};
use super::vectors::{compile_vectors, ObservedVector};
use super::{
    AcceptedLattice, Exposure, ExposureReport, Indexer, IndexingStrategy, Phase, StopReason,
    TrialStatus,
};
use crate::orientation::OrientationMatrix;
use crate::spot::Spot;

/// Mutable search state of one exposure, owned by the worker indexing it.
#[derive(Debug, Clone)]
pub struct ExposureState {
    /// Spots not yet explained by an accepted lattice.
    pub spots: Vec<Spot>,
    /// Observed vectors between remaining spots.
    pub vectors: Vec<ObservedVector>,
    pub accepted: Vec<AcceptedLattice>,
    pub rejected: Vec<OrientationMatrix>,
    pub consecutive_failures: usize,
    pub phase: Phase,
    /// Trials run so far.
    pub trials: usize,
}

impl ExposureState {
    pub fn new(spots: Vec<Spot>) -> Self {
        Self {
            spots,
            vectors: Vec::new(),
            accepted: Vec::new(),
            rejected: Vec::new(),
            consecutive_failures: 0,
            phase: Phase::Seeding,
            trials: 0,
        }
    }
}

/// Elapsed time in milliseconds since `t0`.
fn elapsed_ms(t0: Instant) -> f64 {
    t0.elapsed().as_secs_f64() * 1000.0
}

fn past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// Stop condition that holds before the next trial, if any.
fn stop_condition(indexer: &Indexer, state: &ExposureState, deadline: Option<Instant>) -> Option<StopReason> {
    let config = indexer.config();
    if state.accepted.len() >= config.max_lattices {
        Some(StopReason::MaxLattices)
    } else if state.vectors.is_empty() {
        Some(StopReason::PoolExhausted)
    } else if state.consecutive_failures > config.max_consecutive_failures {
        Some(StopReason::TooManyFailures)
    } else if past(deadline) {
        Some(StopReason::TimeLimit)
    } else {
        None
    }
}

/// Pool for growing `network`: every vector not already in it.
fn pool_without(vectors: &[ObservedVector], network: &CandidateNetwork) -> Vec<ObservedVector> {
    vectors
        .iter()
        .filter(|v| !network.contains_observed(v))
        .cloned()
        .collect()
}

/// Seed, grow and validate from observed vectors `i` and `j`.
///
/// Up to `max_seeds_per_pair` seeds are tried; the first that grows into a
/// complete network decides the outcome.
pub fn try_seed_pair(
    indexer: &Indexer,
    state: &mut ExposureState,
    search: &mut NetworkSearch,
    i: usize,
    j: usize,
) -> TrialStatus {
    state.phase = Phase::Seeding;
    let seeds = seed_networks(indexer, &state.vectors[i], &state.vectors[j]);
    for seed in seeds {
        if is_duplicate(indexer, &seed.orientation(indexer), &state.accepted) {
            debug!("Seed from vectors {} and {} duplicates an accepted lattice", i, j);
            state.phase = Phase::Discarded;
            return TrialStatus::Duplicate;
        }
        state.phase = Phase::Growing;
        let pool = pool_without(&state.vectors, &seed);
        match search.grow(seed, pool) {
            GrowthOutcome::Complete(network) => {
                let status = validate_network(indexer, state, &network);
                debug!("Pair {},{}: {} ({:?})", i, j, status.label(), state.phase);
                return status;
            }
            GrowthOutcome::BranchFailure => continue,
        }
    }
    state.phase = Phase::Discarded;
    TrialStatus::BranchFailure
}

/// Validate the largest abandoned network as it stands.
///
/// This is the one path on which a network below `minimum_network_size`
/// becomes a matrix; the refiner's explained-spot count still decides.
pub fn try_fallback(indexer: &Indexer, state: &mut ExposureState, search: &mut NetworkSearch) -> Option<TrialStatus> {
    let network = search.take_fallback()?;
    state.phase = Phase::Validating;
    let status = commit(indexer, state, &network.orientation(indexer));
    info!(
        "Fallback network of {} vectors: {} ({:?})",
        network.len(),
        status.label(),
        state.phase
    );
    Some(status)
}

/// Network search over all seed pairs until a stop condition holds.
fn run_network(indexer: &Indexer, state: &mut ExposureState, deadline: Option<Instant>) -> StopReason {
    let config = indexer.config();
    let mut search = NetworkSearch::new(indexer, deadline);

    'search: loop {
        if let Some(reason) = stop_condition(indexer, state, deadline) {
            return reason;
        }
        let n = state.vectors.len();
        for i in 0..n.min(config.max_search_matches) {
            for j in (i + 1)..n {
                if let Some(reason) = stop_condition(indexer, state, deadline) {
                    return reason;
                }
                state.trials += 1;
                let status = try_seed_pair(indexer, state, &mut search, i, j);
                if status.is_success() {
                    // The pool shrank; restart from the first pair.
                    continue 'search;
                }
            }
        }

        match try_fallback(indexer, state, &mut search) {
            Some(status) => {
                state.trials += 1;
                if !status.is_success() {
                    return StopReason::SearchExhausted;
                }
            }
            None => return StopReason::SearchExhausted,
        }
    }
}

/// Network search, then the bulk matcher if the network found nothing.
///
/// The network search gets `network_time_fraction` of the time limit so the
/// bulk matcher always has a share of its own.
fn run_network_then_bulk(
    indexer: &Indexer,
    state: &mut ExposureState,
    t0: Instant,
    deadline: Option<Instant>,
) -> StopReason {
    let share = indexer.config().network_time_fraction;
    let network_deadline = deadline.map(|d| t0 + d.duration_since(t0).mul_f64(share));
    let reason = run_network(indexer, state, network_deadline);
    if !state.accepted.is_empty() {
        return reason;
    }
    if past(deadline) {
        return StopReason::TimeLimit;
    }
    info!("Network search found nothing ({:?}); trying bulk matcher", reason);
    run_bulk_only(indexer, state, deadline)
}

/// Index one exposure.
pub fn index_exposure(indexer: &Indexer, exposure: Exposure) -> ExposureReport {
    let t0 = Instant::now();
    let config = indexer.config();
    let deadline = config.time_limit_ms.map(|ms| t0 + Duration::from_millis(ms));

    let Exposure { name, spots } = exposure;
    let mut state = ExposureState::new(spots);
    info!("Indexing {}: {} spots", name, state.spots.len());

    let stop_reason = match compile_vectors(&mut state.spots, &config.vectors, indexer.table(), deadline) {
        Err(reason) => reason,
        Ok(vectors) => {
            state.vectors = vectors;
            match config.strategy {
                IndexingStrategy::Network => run_network(indexer, &mut state, deadline),
                IndexingStrategy::Bulk => run_bulk_only(indexer, &mut state, deadline),
                IndexingStrategy::NetworkThenBulk => run_network_then_bulk(indexer, &mut state, t0, deadline),
            }
        }
    };

    let elapsed = elapsed_ms(t0);
    match stop_reason {
        StopReason::TimeLimit => warn!(
            "{}: time limit reached after {:.1} ms with {} crystals found, {} spots unindexed",
            name,
            elapsed,
            state.accepted.len(),
            state.spots.len()
        ),
        _ => info!(
            "{}: {} crystals found in {:.1} ms ({:?}), {} spots remain",
            name,
            state.accepted.len(),
            elapsed,
            stop_reason,
            state.spots.len()
        ),
    }

    ExposureReport {
        name,
        lattices: state.accepted,
        remaining_spots: state.spots,
        rejected: state.rejected,
        stop_reason,
        trials: state.trials,
        elapsed_ms: elapsed,
    }
}

fn run_bulk_only(indexer: &Indexer, state: &mut ExposureState, deadline: Option<Instant>) -> StopReason {
    state.trials += run_bulk(indexer, state, deadline);
    stop_condition(indexer, state, deadline).unwrap_or(StopReason::SearchExhausted)
}
