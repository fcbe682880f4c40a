//! Observed vectors: pairwise spot differences in reciprocal space.
//!
//! Every pair of usable spots whose separation could be a lattice vector of
//! the target cell becomes one [`ObservedVector`]. The set is the pool the
//! network search draws from; accepted lattices shrink it.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use super::{StopReason, VectorSetConfig};
use crate::lattice::LatticeTable;
use crate::spot::Spot;
use crate::Vector3;

/// Close spots are those nearer than this fraction of the shortest
/// reciprocal axis.
const CLOSE_SPOT_FRACTION: f64 = 0.7;

/// The recurrence filter considers at most this many vectors.
const FILTER_CAP: usize = 12_000;

/// Difference between two spots, `second − first`.
#[derive(Debug, Clone)]
pub struct ObservedVector {
    /// Id of the spot the vector starts from.
    pub first: usize,
    /// Id of the spot the vector points to.
    pub second: usize,
    pub vector: Vector3,
    pub length: f64,
}

impl ObservedVector {
    pub fn new(first: &Spot, second: &Spot) -> Self {
        let vector = second.reciprocal - first.reciprocal;
        Self {
            first: first.id,
            second: second.id,
            vector,
            length: vector.norm(),
        }
    }

    /// Whether either end of the vector is one of `ids`.
    pub fn touches(&self, ids: &HashSet<usize>) -> bool {
        ids.contains(&self.first) || ids.contains(&self.second)
    }
}

/// Two observed vectors are the same only if they join the same spot pair.
impl PartialEq for ObservedVector {
    fn eq(&self, other: &Self) -> bool {
        self.first == other.first && self.second == other.second
    }
}

impl Eq for ObservedVector {}

/// Mark spots that sit too close to another spot.
///
/// Returns the number of spots newly rejected.
pub fn reject_close_spots(spots: &mut [Spot], min_separation: f64) -> usize {
    let mut close = vec![false; spots.len()];
    for i in 0..spots.len() {
        for j in (i + 1)..spots.len() {
            if (spots[i].reciprocal - spots[j].reciprocal).norm() < min_separation {
                close[i] = true;
                close[j] = true;
            }
        }
    }
    let mut rejected = 0;
    for (spot, is_close) in spots.iter_mut().zip(close) {
        if is_close && !spot.rejected {
            spot.rejected = true;
            rejected += 1;
        }
    }
    rejected
}

/// `min_resolution` is the coarse limit and `max_resolution` the fine one,
/// both as d-spacings in Å.
fn in_resolution_window(spot: &Spot, config: &VectorSetConfig) -> bool {
    let d = spot.resolution();
    config.min_resolution.is_none_or(|coarse| d <= coarse)
        && config.max_resolution.is_none_or(|fine| d >= fine)
}

fn past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// Fraction of vectors the recurrence filter keeps.
///
/// With `L` crystals of similar size on the image, about `1/L` of all spot
/// pairs join two spots of the same crystal.
pub fn expected_keep_fraction(spot_count: usize, spots_per_lattice: usize) -> f64 {
    let lattices = (spot_count as f64 / spots_per_lattice.max(1) as f64).round().max(1.0);
    1.0 / lattices
}

/// Build the observed-vector pool for one exposure.
///
/// Fails with [`StopReason::SpotLimits`] when the number of usable spots is
/// outside the configured limits, and with [`StopReason::TimeLimit`] when
/// `deadline` passes before the pool is complete.
pub fn compile_vectors(
    spots: &mut [Spot],
    config: &VectorSetConfig,
    table: &LatticeTable,
    deadline: Option<Instant>,
) -> Result<Vec<ObservedVector>, StopReason> {
    if config.reject_close_spots {
        let rejected = reject_close_spots(spots, CLOSE_SPOT_FRACTION * table.smallest_spacing);
        debug!("Rejected {} spots too close to a neighbour", rejected);
    }

    let usable: Vec<&Spot> = spots
        .iter()
        .filter(|s| !s.rejected && in_resolution_window(s, config))
        .collect();
    if usable.len() > config.max_spots || usable.len() < config.min_spots {
        warn!(
            "{} usable spots outside limits [{}, {}]; not indexing",
            usable.len(),
            config.min_spots,
            config.max_spots
        );
        return Err(StopReason::SpotLimits);
    }

    let max_distance = config.max_reciprocal_distance.unwrap_or(table.max_length);
    let mut vectors = Vec::new();
    for (i, first) in usable.iter().enumerate() {
        if past(deadline) {
            warn!("Time limit reached after {} of {} spots while compiling vectors", i, usable.len());
            return Err(StopReason::TimeLimit);
        }
        for second in &usable[i + 1..] {
            let v = ObservedVector::new(first, second);
            if v.length > 0.0 && v.length <= max_distance {
                vectors.push(v);
            }
        }
    }
    if past(deadline) {
        return Err(StopReason::TimeLimit);
    }
    vectors.sort_by(|a, b| a.length.total_cmp(&b.length));

    if config.filter {
        let keep_fraction = config
            .filter_keep_fraction
            .unwrap_or_else(|| expected_keep_fraction(usable.len(), config.spots_per_lattice));
        vectors = filter_recurring(vectors, config.reciprocal_tolerance, keep_fraction, deadline)
            .ok_or(StopReason::TimeLimit)?;
    }

    if config.scramble {
        let seed = config.seed.unwrap_or_else(rand::random);
        let mut rng = StdRng::seed_from_u64(seed);
        vectors.shuffle(&mut rng);
    }

    info!(
        "Compiled {} observed vectors from {} usable spots",
        vectors.len(),
        usable.len()
    );
    Ok(vectors)
}

/// Keep the vectors that recur most often.
///
/// A lattice vector appears many times among the spot differences of a
/// crystal; a random pair does not. Each vector is scored by how many other
/// vectors (or their negations) lie within `tolerance` of it, and the top
/// `keep_fraction` are kept, in their original order. Returns `None` if
/// `deadline` passes first.
pub fn filter_recurring(
    mut vectors: Vec<ObservedVector>,
    tolerance: f64,
    keep_fraction: f64,
    deadline: Option<Instant>,
) -> Option<Vec<ObservedVector>> {
    vectors.truncate(FILTER_CAP);
    let n = vectors.len();
    let mut counts = vec![0usize; n];
    for i in 0..n {
        if past(deadline) {
            return None;
        }
        for j in (i + 1)..n {
            if vectors[j].length - vectors[i].length > tolerance {
                // Sorted by length: no later vector can be close.
                break;
            }
            let (a, b) = (&vectors[i].vector, &vectors[j].vector);
            if (a - b).norm() < tolerance || (a + b).norm() < tolerance {
                counts[i] += 1;
                counts[j] += 1;
            }
        }
    }

    let keep = ((n as f64) * keep_fraction).ceil() as usize;
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| counts[b].cmp(&counts[a]).then(a.cmp(&b)));
    let mut kept = vec![false; n];
    for &i in order.iter().take(keep) {
        kept[i] = true;
    }
    debug!("Recurrence filter kept {} of {} vectors", keep.min(n), n);
    Some(
        vectors
            .into_iter()
            .zip(kept)
            .filter_map(|(v, k)| k.then_some(v))
            .collect(),
    )
}

/// Drop every vector that touches one of the removed spots.
pub fn purge_spots(vectors: &mut Vec<ObservedVector>, removed: &HashSet<usize>) {
    vectors.retain(|v| !v.touches(removed));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::spacegroup::SpaceGroup;
    use crate::lattice::UnitCell;
    use crate::spot::spots_from_reciprocal;

    fn table() -> LatticeTable {
        let cell = UnitCell::new([50.0, 50.0, 50.0, 90.0, 90.0, 90.0]).unwrap();
        LatticeTable::generate(&cell, &SpaceGroup::from_number(195).unwrap(), 4)
    }

    fn unscrambled() -> VectorSetConfig {
        VectorSetConfig {
            scramble: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_pairs_and_distance_cut() {
        let t = table();
        let mut spots = spots_from_reciprocal(&[
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.02, 0.0, 0.0),
            Vector3::new(0.04, 0.0, 0.0),
            // Far beyond the longest table vector
            Vector3::new(0.5, 0.0, 0.0),
        ]);
        let vectors = compile_vectors(&mut spots, &unscrambled(), &t, None).unwrap();
        assert_eq!(vectors.len(), 3);
        assert!(vectors.windows(2).all(|w| w[0].length <= w[1].length));
        assert!(vectors.iter().all(|v| v.first < v.second));
        assert!(vectors.iter().all(|v| v.first != 3 && v.second != 3));
    }

    #[test]
    fn test_zero_length_skipped() {
        let t = table();
        let q = Vector3::new(0.01, 0.01, 0.0);
        let mut spots = spots_from_reciprocal(&[q, q]);
        let vectors = compile_vectors(&mut spots, &unscrambled(), &t, None).unwrap();
        assert!(vectors.is_empty());
    }

    #[test]
    fn test_close_spots_rejected() {
        let t = table();
        let mut spots = spots_from_reciprocal(&[
            Vector3::new(0.0, 0.0, 0.05),
            Vector3::new(0.001, 0.0, 0.05),
            Vector3::new(0.04, 0.0, 0.05),
        ]);
        let config = VectorSetConfig {
            reject_close_spots: true,
            ..unscrambled()
        };
        let vectors = compile_vectors(&mut spots, &config, &t, None).unwrap();
        assert!(spots[0].rejected && spots[1].rejected && !spots[2].rejected);
        assert!(vectors.is_empty());
    }

    #[test]
    fn test_spot_limits_abort() {
        let t = table();
        let coords: Vec<Vector3> = (0..10).map(|i| Vector3::new(0.01 * i as f64, 0.0, 0.1)).collect();
        let mut spots = spots_from_reciprocal(&coords);
        let too_many = VectorSetConfig {
            max_spots: 5,
            ..unscrambled()
        };
        assert_eq!(
            compile_vectors(&mut spots, &too_many, &t, None),
            Err(StopReason::SpotLimits)
        );
        let too_few = VectorSetConfig {
            min_spots: 11,
            ..unscrambled()
        };
        assert_eq!(
            compile_vectors(&mut spots, &too_few, &t, None),
            Err(StopReason::SpotLimits)
        );
    }

    #[test]
    fn test_resolution_window() {
        let t = table();
        let mut spots = spots_from_reciprocal(&[
            Vector3::new(0.0, 0.0, 0.1),   // 10 Å
            Vector3::new(0.0, 0.02, 0.25), // ~3.9 Å
            Vector3::new(0.0, 0.0, 0.26),  // ~3.8 Å
            Vector3::new(0.0, 0.0, 0.5),   // 2 Å
        ]);
        // Coarse cut at 5 Å, fine cut at 3 Å
        let config = VectorSetConfig {
            min_resolution: Some(5.0),
            max_resolution: Some(3.0),
            ..unscrambled()
        };
        let vectors = compile_vectors(&mut spots, &config, &t, None).unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!((vectors[0].first, vectors[0].second), (1, 2));
    }

    #[test]
    fn test_compile_stops_at_deadline() {
        let t = table();
        let coords: Vec<Vector3> = (0..3000)
            .map(|i| Vector3::new(1e-5 * i as f64, 2e-5 * (i % 7) as f64, 0.1))
            .collect();
        let mut spots = spots_from_reciprocal(&coords);
        let expired = Instant::now() - Duration::from_millis(1);
        let t0 = Instant::now();
        let result = compile_vectors(&mut spots, &unscrambled(), &t, Some(expired));
        assert_eq!(result, Err(StopReason::TimeLimit));
        assert!(t0.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_expected_keep_fraction() {
        assert_eq!(expected_keep_fraction(40, 100), 1.0);
        assert_eq!(expected_keep_fraction(210, 100), 0.5);
        assert!((expected_keep_fraction(400, 100) - 0.25).abs() < 1e-12);
        assert_eq!(expected_keep_fraction(10, 0), 0.1);
    }

    #[test]
    fn test_filter_derives_fraction_from_spot_count() {
        let t = table();
        // Two rows of 20 spots: with 20 spots per lattice about half the
        // vectors are kept.
        let mut coords: Vec<Vector3> = (0..20).map(|i| Vector3::new(0.002 * i as f64, 0.0, 0.1)).collect();
        coords.extend((0..20).map(|i| Vector3::new(0.0, 0.0023 * i as f64, 0.13)));
        let config = VectorSetConfig {
            filter: true,
            spots_per_lattice: 20,
            ..unscrambled()
        };
        let unfiltered = compile_vectors(&mut spots_from_reciprocal(&coords), &unscrambled(), &t, None).unwrap();
        let filtered = compile_vectors(&mut spots_from_reciprocal(&coords), &config, &t, None).unwrap();
        let expected = (unfiltered.len() as f64 * 0.5).ceil() as usize;
        assert_eq!(filtered.len(), expected);
    }

    #[test]
    fn test_seeded_shuffle_is_reproducible() {
        let t = table();
        let coords: Vec<Vector3> = (0..12)
            .map(|i| Vector3::new(0.003 * i as f64, 0.002 * (i % 3) as f64, 0.1))
            .collect();
        let config = VectorSetConfig {
            seed: Some(42),
            ..Default::default()
        };
        let a = compile_vectors(&mut spots_from_reciprocal(&coords), &config, &t, None).unwrap();
        let b = compile_vectors(&mut spots_from_reciprocal(&coords), &config, &t, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_filter_prefers_recurring_vectors() {
        // A 1-D lattice row plus one stray spot: lattice differences recur.
        let mut coords: Vec<Vector3> = (0..6).map(|i| Vector3::new(0.02 * i as f64, 0.0, 0.1)).collect();
        coords.push(Vector3::new(0.013, 0.037, 0.1));
        let spots = spots_from_reciprocal(&coords);
        let mut vectors = Vec::new();
        for i in 0..spots.len() {
            for j in (i + 1)..spots.len() {
                vectors.push(ObservedVector::new(&spots[i], &spots[j]));
            }
        }
        vectors.sort_by(|a, b| a.length.total_cmp(&b.length));
        let kept = filter_recurring(vectors, 0.0015, 0.5, None).unwrap();
        assert!(kept.iter().all(|v| v.second != 6));
    }

    #[test]
    fn test_purge_and_equality() {
        let spots = spots_from_reciprocal(&[Vector3::x(), Vector3::y(), Vector3::z()]);
        let mut vectors = vec![
            ObservedVector::new(&spots[0], &spots[1]),
            ObservedVector::new(&spots[0], &spots[2]),
            ObservedVector::new(&spots[1], &spots[2]),
        ];
        assert_eq!(vectors[0], ObservedVector::new(&spots[0], &spots[1]));
        assert_ne!(vectors[0], vectors[1]);
        purge_spots(&mut vectors, &HashSet::from([0]));
        assert_eq!(vectors.len(), 1);
        assert_eq!((vectors[0].first, vectors[0].second), (1, 2));
    }
}
