//! Candidate networks: seeding, one-vector growth and the depth-first search.
//!
//! A network maps observed vectors onto distinct theoretical vectors under a
//! single crystal rotation. It starts from a seed pair and grows one vector
//! at a time. Whenever growth could continue in more than one way the search
//! branches: each branch owns a copy of the network and of the remaining
//! pool, so a failed branch is simply dropped.

use std::collections::HashSet;
use std::time::Instant;

use tracing::debug;

use super::vectors::ObservedVector;
use super::Indexer;
use crate::orientation::{align_pair, angle_between, fit_rotation, OrientationMatrix};
use crate::{Matrix3, Vector3};

/// One observed vector and the table entry it is matched to.
#[derive(Debug, Clone)]
pub struct NetworkMatch {
    pub observed: ObservedVector,
    /// Position in the lattice table.
    pub theoretical: usize,
}

#[derive(Debug, Clone)]
pub struct CandidateNetwork {
    matches: Vec<NetworkMatch>,
    rotation: Matrix3,
    observed_pairs: HashSet<(usize, usize)>,
    theoretical_used: HashSet<usize>,
}

impl CandidateNetwork {
    /// Two-vector network from a seed pair and its solved rotation.
    pub fn seed(first: NetworkMatch, second: NetworkMatch, rotation: Matrix3) -> Self {
        let mut network = Self {
            matches: Vec::with_capacity(2),
            rotation,
            observed_pairs: HashSet::new(),
            theoretical_used: HashSet::new(),
        };
        network.insert(first);
        network.insert(second);
        network
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn matches(&self) -> &[NetworkMatch] {
        &self.matches
    }

    pub fn rotation(&self) -> &Matrix3 {
        &self.rotation
    }

    pub fn contains_observed(&self, v: &ObservedVector) -> bool {
        self.observed_pairs.contains(&(v.first, v.second))
    }

    pub fn uses_theoretical(&self, index: usize) -> bool {
        self.theoretical_used.contains(&index)
    }

    fn insert(&mut self, m: NetworkMatch) {
        self.observed_pairs.insert((m.observed.first, m.observed.second));
        self.theoretical_used.insert(m.theoretical);
        self.matches.push(m);
    }

    /// Add a match and re-fit the rotation to every match in the network.
    fn push(&mut self, m: NetworkMatch, indexer: &Indexer) {
        self.insert(m);
        let table = indexer.table();
        let (theoretical, observed): (Vec<Vector3>, Vec<Vector3>) = self
            .matches
            .iter()
            .map(|m| (table.vectors[m.theoretical].vector(), m.observed.vector))
            .unzip();
        if let Some(rotation) = fit_rotation(&theoretical, &observed) {
            self.rotation = rotation;
        }
    }

    /// Orientation matrix implied by the network's current rotation.
    pub fn orientation(&self, indexer: &Indexer) -> OrientationMatrix {
        indexer.orientation(self.rotation)
    }
}

/// Seed networks for a pair of observed vectors, best residual first.
///
/// Every pair of table entries whose lengths match `v1` and `v2` and whose
/// mutual angle matches theirs is tried; the first entry is restricted to one
/// representative per symmetry orbit since the others give equivalent
/// orientations.
pub fn seed_networks(indexer: &Indexer, v1: &ObservedVector, v2: &ObservedVector) -> Vec<CandidateNetwork> {
    let config = indexer.config();
    let table = indexer.table();
    let tol = config.distance_tolerance();
    let angle_tol = config.angle_tolerance();

    let Some(observed_angle) = angle_between(&v1.vector, &v2.vector) else {
        return Vec::new();
    };

    let mut seeds: Vec<(f64, CandidateNetwork)> = Vec::new();
    for i in table.within_length(v1.length, tol) {
        if !indexer.is_orbit_representative(i) {
            continue;
        }
        let t1 = table.vectors[i].vector();
        for j in table.within_length(v2.length, tol) {
            if j == i {
                continue;
            }
            let t2 = table.vectors[j].vector();
            match angle_between(&t1, &t2) {
                Some(a) if (a - observed_angle).abs() <= angle_tol => {}
                _ => continue,
            }
            let Some((rotation, residual)) = align_pair(&t1, &t2, &v1.vector, &v2.vector) else {
                continue;
            };
            if residual > angle_tol {
                continue;
            }
            let network = CandidateNetwork::seed(
                NetworkMatch {
                    observed: v1.clone(),
                    theoretical: i,
                },
                NetworkMatch {
                    observed: v2.clone(),
                    theoretical: j,
                },
                rotation,
            );
            seeds.push((residual, network));
        }
    }
    seeds.sort_by(|a, b| a.0.total_cmp(&b.0));
    seeds.truncate(config.max_seeds_per_pair);
    seeds.into_iter().map(|(_, n)| n).collect()
}

/// Result of growing one seed.
#[derive(Debug, Clone)]
pub enum GrowthOutcome {
    /// Growth ended with at least the minimum number of matches.
    Complete(CandidateNetwork),
    /// No branch reached the minimum size.
    BranchFailure,
}

/// Depth-first growth state for one exposure.
///
/// The failure counter is per seed; the fallback network survives across
/// seeds until the driver takes it.
pub struct NetworkSearch<'a> {
    indexer: &'a Indexer,
    deadline: Option<Instant>,
    failures: usize,
    fallback: Option<CandidateNetwork>,
}

impl<'a> NetworkSearch<'a> {
    pub fn new(indexer: &'a Indexer, deadline: Option<Instant>) -> Self {
        Self {
            indexer,
            deadline,
            failures: 0,
            fallback: None,
        }
    }

    /// Grow `seed` from `pool`, which must not contain the seed's vectors.
    pub fn grow(&mut self, seed: CandidateNetwork, pool: Vec<ObservedVector>) -> GrowthOutcome {
        self.failures = 0;
        let outcome = self.branch(seed, pool);
        if let GrowthOutcome::Complete(network) = &outcome {
            debug!("Network complete with {} vectors", network.len());
        }
        outcome
    }

    /// The largest network abandoned so far, if any.
    pub fn take_fallback(&mut self) -> Option<CandidateNetwork> {
        self.fallback.take()
    }

    pub fn fallback_len(&self) -> Option<usize> {
        self.fallback.as_ref().map(|n| n.len())
    }

    fn past_deadline(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn remember(&mut self, network: CandidateNetwork) {
        if self.fallback_len().is_none_or(|len| network.len() > len) {
            self.fallback = Some(network);
        }
    }

    fn branch(&mut self, network: CandidateNetwork, mut pool: Vec<ObservedVector>) -> GrowthOutcome {
        let config = self.indexer.config();
        if network.len() >= config.max_network_size {
            return GrowthOutcome::Complete(network);
        }

        let mut trials = 0;
        while trials < config.network_trial_limit {
            if self.past_deadline() {
                return GrowthOutcome::BranchFailure;
            }
            let mut child = network.clone();
            let Some(pos) = self.extend(&mut child, &pool) else {
                break;
            };
            // Siblings must try a different vector.
            pool.remove(pos);
            trials += 1;

            match self.branch(child, pool.clone()) {
                GrowthOutcome::Complete(done) => return GrowthOutcome::Complete(done),
                GrowthOutcome::BranchFailure => {
                    if self.failures > config.max_branch_failures {
                        return GrowthOutcome::BranchFailure;
                    }
                }
            }
        }

        if trials >= config.network_trial_limit {
            self.failures += 1;
            debug!(
                "Branch at {} vectors exhausted its trials ({} failures)",
                network.len(),
                self.failures
            );
            self.remember(network);
            return GrowthOutcome::BranchFailure;
        }
        if network.len() >= config.minimum_network_size {
            GrowthOutcome::Complete(network)
        } else {
            self.remember(network);
            GrowthOutcome::BranchFailure
        }
    }

    /// Add the first pool vector consistent with the network's rotation.
    ///
    /// Returns the pool position of the vector added.
    fn extend(&self, network: &mut CandidateNetwork, pool: &[ObservedVector]) -> Option<usize> {
        let config = self.indexer.config();
        let table = self.indexer.table();
        let tol = config.distance_tolerance();
        let angle_tol = config.angle_tolerance();
        let inverse = network.orientation(self.indexer).matrix().try_inverse()?;

        for (pos, v) in pool.iter().enumerate() {
            if network.contains_observed(v) {
                continue;
            }
            let h = (inverse * v.vector).map(f64::round);
            if h == Vector3::zeros() {
                continue;
            }
            let Some(index) = table.index_of([h.x as i32, h.y as i32, h.z as i32]) else {
                continue;
            };
            if network.uses_theoretical(index) {
                continue;
            }
            let t = &table.vectors[index];
            if (t.length - v.length).abs() > tol {
                continue;
            }
            let predicted = network.rotation * t.vector();
            if angle_between(&predicted, &v.vector).is_none_or(|a| a > angle_tol) {
                continue;
            }
            network.push(
                NetworkMatch {
                    observed: v.clone(),
                    theoretical: index,
                },
                self.indexer,
            );
            return Some(pos);
        }
        None
    }
}
