//! Multi-lattice indexing of a single exposure.
//!
//! Given the spots of one exposure and a known cell and space group, the
//! indexer searches for every crystal orientation that explains a
//! sufficiently large subset of the spots:
//!
//! 1. **Vector compilation**: pairwise spot differences form the observed
//!    vectors ([`vectors`]).
//! 2. **Seeding**: two observed vectors are matched against pairs of
//!    theoretical vectors, giving a two-vector network and a rotation
//!    ([`network`]).
//! 3. **Growth**: the network adds one consistent vector at a time,
//!    branching depth-first over alternatives ([`network`]).
//! 4. **Validation**: complete networks become orientation matrices, are
//!    deduplicated against earlier solutions under symmetry and indexing
//!    ambiguity, and refined against the spot list ([`validate`]).
//! 5. **Commit**: the spots an accepted lattice explains leave the pool and
//!    the search repeats on what remains ([`driver`]).
//!
//! [`bulk`] is an alternative non-recursive search, and [`dispatch`] spreads
//! many exposures across worker threads.

pub mod bulk;
pub mod dispatch;
pub mod driver;
pub mod network;
pub mod validate;
pub mod vectors;

use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::error::ConfigError;
use crate::lattice::spacegroup::SpaceGroup;
use crate::lattice::symmetry::{ambiguity_operators, symmetry_operators, MillerOperator};
use crate::lattice::{LatticeTable, UnitCell, MAX_MILLER_INDEX_BOUND};
use crate::orientation::OrientationMatrix;
use crate::refine::{LatticeFitRefiner, OrientationRefiner};
use crate::spot::Spot;
use crate::Matrix3;

// ── Status codes ────────────────────────────────────────────────────────────

/// Outcome of one indexing trial (a seed pair, a fallback network or a bulk
/// candidate). None of these is an error; the driver branches on the tag.
#[derive(Debug, Clone, PartialEq)]
pub enum TrialStatus {
    /// A new lattice was accepted and its spots removed from the pool.
    Success(OrientationMatrix),
    /// The candidate was unique but refinement did not explain enough spots.
    Failure,
    /// The candidate matches an already accepted lattice.
    Duplicate,
    /// No network reached the minimum size; nothing was validated.
    BranchFailure,
}

impl TrialStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TrialStatus::Success(_))
    }

    /// Short name for log lines.
    pub fn label(&self) -> &'static str {
        match self {
            TrialStatus::Success(_) => "success",
            TrialStatus::Failure => "failure",
            TrialStatus::Duplicate => "duplicate",
            TrialStatus::BranchFailure => "branch failure",
        }
    }
}

/// Why the search on an exposure ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The configured number of lattices was found.
    MaxLattices,
    /// No observed vectors remain.
    PoolExhausted,
    /// Too many consecutive refinement failures.
    TooManyFailures,
    /// The per-exposure time limit elapsed.
    TimeLimit,
    /// Every seed pair (and the fallback network) was tried.
    SearchExhausted,
    /// The spot count was outside the configured limits; nothing was searched.
    SpotLimits,
}

/// Driver state for the trial currently in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Seeding,
    Growing,
    Validating,
    Refining,
    Committed,
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingStrategy {
    /// Recursive network growth from seed pairs.
    #[default]
    Network,
    /// Global pairwise-trust search only.
    Bulk,
    /// Network growth, then the bulk matcher if nothing was found.
    NetworkThenBulk,
}

// ── Configuration ───────────────────────────────────────────────────────────

/// How observed vectors are compiled from the spot list.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VectorSetConfig {
    /// Longest spot-difference vector kept (Å⁻¹). None = longest table vector.
    pub max_reciprocal_distance: Option<f64>,
    /// Low-resolution limit (Å): spots with a larger d-spacing are ignored.
    pub min_resolution: Option<f64>,
    /// High-resolution limit (Å): spots with a smaller d-spacing are ignored.
    pub max_resolution: Option<f64>,
    /// Exclude spots closer to another spot than 0.7 × the shortest
    /// reciprocal axis.
    pub reject_close_spots: bool,
    /// Abort the exposure if more spots than this are usable.
    pub max_spots: usize,
    /// Abort the exposure if fewer spots than this are usable.
    pub min_spots: usize,
    /// Keep only the vectors that recur most often in the set.
    pub filter: bool,
    /// Distance (Å⁻¹) within which two vectors count as the same recurrence.
    pub reciprocal_tolerance: f64,
    /// Fraction of vectors kept by the recurrence filter. None = derived
    /// from the number of crystals expected on the image.
    pub filter_keep_fraction: Option<f64>,
    /// Typical spot count of one crystal, used to estimate how many crystals
    /// an image holds.
    pub spots_per_lattice: usize,
    /// Shuffle the vectors before seeding; otherwise shortest first.
    pub scramble: bool,
    /// Shuffle seed. None = fresh entropy per exposure.
    pub seed: Option<u64>,
}

impl Default for VectorSetConfig {
    fn default() -> Self {
        Self {
            max_reciprocal_distance: None,
            min_resolution: None,
            max_resolution: None,
            reject_close_spots: false,
            max_spots: 4000,
            min_spots: 0,
            filter: false,
            reciprocal_tolerance: 0.0015,
            filter_keep_fraction: None,
            spots_per_lattice: 100,
            scramble: true,
            seed: None,
        }
    }
}

/// Parameters of the bulk matcher.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    /// Ceiling on observed/theoretical matches considered.
    pub max_search_matches: usize,
    /// Ceiling on candidate orientations generated.
    pub max_search_solutions: usize,
    /// Number of top-scoring distinct candidates passed to refinement.
    pub trial_count: usize,
    /// Keep pairing a match after it has produced a candidate.
    pub thorough: bool,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_search_matches: 5000,
            max_search_solutions: 8000,
            trial_count: 12,
            thorough: false,
        }
    }
}

/// Parameters controlling the indexing search.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Target cell `[a, b, c, α, β, γ]` in Å and degrees.
    pub unit_cell: Option<[f64; 6]>,
    /// International Tables space-group number. 0 = not set.
    pub space_group: u16,
    /// Bound on the Euclidean norm of enumerated Miller triples.
    pub max_miller_index: i32,
    /// Angular tolerance for vector matches in degrees.
    pub angle_tolerance_deg: f64,
    /// Inverse of the length tolerance in Å. A match whose length differs by
    /// δ has trust 1/δ.
    pub trust_tolerance: f64,
    /// Orientations closer than this (degrees) are the same solution.
    pub solution_angle_spread_deg: f64,
    /// Networks smaller than this are never turned into a matrix.
    pub minimum_network_size: usize,
    /// Growth stops once a network reaches this size.
    pub max_network_size: usize,
    /// Sibling alternatives tried at one recursion level.
    pub network_trial_limit: usize,
    /// Failed branches tolerated per seed.
    pub max_branch_failures: usize,
    /// Seeds grown from each pair of observed vectors.
    pub max_seeds_per_pair: usize,
    /// Only vectors below this index are used as the first seed vector.
    pub max_search_matches: usize,
    /// Stop after this many lattices.
    pub max_lattices: usize,
    /// Stop after more than this many consecutive refinement failures.
    pub max_consecutive_failures: usize,
    /// Per-exposure wall-clock limit in milliseconds. None = no limit.
    pub time_limit_ms: Option<u64>,
    /// Explained spots needed to accept a refined lattice.
    pub minimum_spots_explained: usize,
    /// Accept refined lattices even if the refiner rejects them.
    pub accept_all_solutions: bool,
    /// Run the orientation refiner; otherwise only count explained spots.
    pub refine_orientations: bool,
    pub strategy: IndexingStrategy,
    /// Share of `time_limit_ms` the network search may use before
    /// [`IndexingStrategy::NetworkThenBulk`] hands over to the bulk matcher.
    pub network_time_fraction: f64,
    /// Worker threads for [`dispatch::index_exposures`]. 0 = available parallelism.
    pub threads: usize,
    pub vectors: VectorSetConfig,
    pub bulk: BulkConfig,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            unit_cell: None,
            space_group: 0,
            max_miller_index: 4,
            angle_tolerance_deg: 1.0,
            trust_tolerance: 4000.0,
            solution_angle_spread_deg: 8.0,
            minimum_network_size: 20,
            max_network_size: 100,
            network_trial_limit: 3,
            max_branch_failures: 3,
            max_seeds_per_pair: 3,
            max_search_matches: 1000,
            max_lattices: 1,
            max_consecutive_failures: 10,
            time_limit_ms: Some(1_200_000),
            minimum_spots_explained: 20,
            accept_all_solutions: false,
            refine_orientations: true,
            strategy: IndexingStrategy::Network,
            network_time_fraction: 0.5,
            threads: 0,
            vectors: VectorSetConfig::default(),
            bulk: BulkConfig::default(),
        }
    }
}

impl IndexingConfig {
    /// Load a configuration from a JSON file; missing keys take their defaults.
    pub fn from_json_file(path: &str) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: IndexingConfig = serde_json::from_str(&data)
            .map_err(|e| anyhow::anyhow!("failed to parse indexing config {}: {}", path, e))?;
        Ok(config)
    }

    /// Angular match tolerance in radians.
    pub fn angle_tolerance(&self) -> f64 {
        self.angle_tolerance_deg.to_radians()
    }

    /// Length match tolerance in Å⁻¹.
    pub fn distance_tolerance(&self) -> f64 {
        1.0 / self.trust_tolerance
    }

    pub fn solution_angle_spread(&self) -> f64 {
        self.solution_angle_spread_deg.to_radians()
    }

    fn check_parameters(&self) -> Result<(), ConfigError> {
        let bad = |name: &'static str, reason: &str| {
            Err(ConfigError::InvalidParameter {
                name,
                reason: reason.to_string(),
            })
        };
        if !(1..=MAX_MILLER_INDEX_BOUND).contains(&self.max_miller_index) {
            return bad("max_miller_index", "must lie in [1, 64]");
        }
        if !(self.angle_tolerance_deg > 0.0) {
            return bad("angle_tolerance_deg", "must be positive");
        }
        if !(self.trust_tolerance > 0.0) || !self.trust_tolerance.is_finite() {
            return bad("trust_tolerance", "must be positive and finite");
        }
        if !(self.solution_angle_spread_deg > 0.0) {
            return bad("solution_angle_spread_deg", "must be positive");
        }
        if self.minimum_network_size < 2 {
            return bad("minimum_network_size", "must be at least 2");
        }
        if self.max_network_size < self.minimum_network_size {
            return bad("max_network_size", "must not be below minimum_network_size");
        }
        if !(self.network_time_fraction > 0.0 && self.network_time_fraction <= 1.0) {
            return bad("network_time_fraction", "must lie in (0, 1]");
        }
        if self.network_trial_limit == 0 {
            return bad("network_trial_limit", "must be at least 1");
        }
        if self
            .vectors
            .filter_keep_fraction
            .is_some_and(|f| !(0.0..=1.0).contains(&f))
        {
            return bad("vectors.filter_keep_fraction", "must lie in [0, 1]");
        }
        if self.vectors.spots_per_lattice == 0 {
            return bad("vectors.spots_per_lattice", "must be at least 1");
        }
        Ok(())
    }
}

// ── Results ─────────────────────────────────────────────────────────────────

/// One exposure's spot list, as handed over by the spot finder.
#[derive(Debug, Clone)]
pub struct Exposure {
    pub name: String,
    pub spots: Vec<Spot>,
}

/// An accepted crystal lattice and the spots it explains.
#[derive(Debug, Clone)]
pub struct AcceptedLattice {
    pub orientation: OrientationMatrix,
    pub spots: Vec<Spot>,
}

impl AcceptedLattice {
    /// Cell derived from the refined orientation.
    pub fn unit_cell(&self) -> Option<UnitCell> {
        self.orientation.unit_cell()
    }
}

/// Result of indexing one exposure.
#[derive(Debug, Clone)]
pub struct ExposureReport {
    pub name: String,
    pub lattices: Vec<AcceptedLattice>,
    /// Spots not explained by any accepted lattice.
    pub remaining_spots: Vec<Spot>,
    /// Unique candidates the refiner turned down.
    pub rejected: Vec<OrientationMatrix>,
    pub stop_reason: StopReason,
    /// Trials run (seed pairs, fallback networks and bulk candidates).
    pub trials: usize,
    pub elapsed_ms: f64,
}

impl ExposureReport {
    pub fn explained_spot_count(&self) -> usize {
        self.lattices.iter().map(|l| l.spots.len()).sum()
    }
}

// ── Shared context ──────────────────────────────────────────────────────────

/// Immutable indexing context, built once before any search and shared
/// read-only by every worker.
pub struct Indexer {
    config: IndexingConfig,
    space_group: SpaceGroup,
    table: LatticeTable,
    b: Matrix3,
    symmetry: Vec<MillerOperator>,
    ambiguities: Vec<MillerOperator>,
    /// Every product `M · S` of an ambiguity and a symmetry operator.
    equivalences: Vec<Matrix3>,
    /// Ambiguity operators alone, as matrices.
    ambiguity_matrices: Vec<Matrix3>,
    /// Whether a table entry is the first of its symmetry orbit.
    orbit_representative: Vec<bool>,
    refiner: Arc<dyn OrientationRefiner>,
}

impl Indexer {
    /// Validate the configuration and build the lattice table.
    pub fn new(config: IndexingConfig) -> Result<Self, ConfigError> {
        let (cell, space_group) = Self::check_config(&config)?;
        let table = LatticeTable::generate(&cell, &space_group, config.max_miller_index);
        Ok(Self::assemble(config, space_group, table))
    }

    /// Like [`Indexer::new`], reusing a previously saved lattice table.
    pub fn with_table(config: IndexingConfig, table: LatticeTable) -> Result<Self, ConfigError> {
        let (cell, space_group) = Self::check_config(&config)?;
        if table.cell != cell
            || table.space_group != space_group.number
            || table.max_miller_index != config.max_miller_index
        {
            return Err(ConfigError::InvalidParameter {
                name: "lattice_table",
                reason: format!(
                    "table was built for cell {:?}, space group {}, index bound {}",
                    table.cell.parameters(),
                    table.space_group,
                    table.max_miller_index
                ),
            });
        }
        Ok(Self::assemble(config, space_group, table))
    }

    /// Replace the built-in refiner.
    pub fn with_refiner(mut self, refiner: Arc<dyn OrientationRefiner>) -> Self {
        self.refiner = refiner;
        self
    }

    fn check_config(config: &IndexingConfig) -> Result<(UnitCell, SpaceGroup), ConfigError> {
        let params = config.unit_cell.ok_or(ConfigError::MissingUnitCell)?;
        let cell = UnitCell::new(params)?;
        if config.space_group == 0 {
            return Err(ConfigError::MissingSpaceGroup);
        }
        let space_group = SpaceGroup::from_number(config.space_group)
            .ok_or(ConfigError::UnsupportedSpaceGroup(config.space_group))?;
        let system = space_group.system();
        if !system.accepts_cell(&params) {
            return Err(ConfigError::IncompatibleCell {
                cell: params,
                space_group: space_group.number,
                system: system.name(),
            });
        }
        config.check_parameters()?;
        Ok((cell, space_group))
    }

    fn assemble(config: IndexingConfig, space_group: SpaceGroup, table: LatticeTable) -> Self {
        let b = table.cell.reciprocal_matrix();
        let symmetry = symmetry_operators(&space_group);
        let ambiguities = ambiguity_operators(&space_group);
        let equivalences = ambiguities
            .iter()
            .flat_map(|m| symmetry.iter().map(move |s| m.compose(s).as_matrix()))
            .collect();
        let ambiguity_matrices = ambiguities.iter().map(|m| m.as_matrix()).collect();

        let orbit_representative = table
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| {
                symmetry
                    .iter()
                    .filter_map(|op| table.index_of(op.apply(v.miller)))
                    .all(|j| j >= i)
            })
            .collect();

        info!(
            "Indexer ready: space group {} ({}), {} symmetry operators, {} ambiguities",
            space_group.number,
            space_group.symbol,
            symmetry.len(),
            ambiguities.len()
        );

        let refiner = Arc::new(LatticeFitRefiner::new(config.minimum_spots_explained));
        Self {
            config,
            space_group,
            table,
            b,
            symmetry,
            ambiguities,
            equivalences,
            ambiguity_matrices,
            orbit_representative,
            refiner,
        }
    }

    pub fn config(&self) -> &IndexingConfig {
        &self.config
    }

    pub fn space_group(&self) -> &SpaceGroup {
        &self.space_group
    }

    pub fn table(&self) -> &LatticeTable {
        &self.table
    }

    /// Reciprocal basis matrix B of the target cell.
    pub fn b_matrix(&self) -> &Matrix3 {
        &self.b
    }

    pub fn symmetry_operators(&self) -> &[MillerOperator] {
        &self.symmetry
    }

    pub fn ambiguity_operators(&self) -> &[MillerOperator] {
        &self.ambiguities
    }

    pub(crate) fn equivalences(&self) -> &[Matrix3] {
        &self.equivalences
    }

    pub(crate) fn ambiguity_matrices(&self) -> &[Matrix3] {
        &self.ambiguity_matrices
    }

    pub(crate) fn is_orbit_representative(&self, index: usize) -> bool {
        self.orbit_representative[index]
    }

    pub fn refiner(&self) -> &dyn OrientationRefiner {
        self.refiner.as_ref()
    }

    /// Orientation matrix for a crystal rotation.
    pub fn orientation(&self, rotation: Matrix3) -> OrientationMatrix {
        OrientationMatrix::new(rotation, &self.b)
    }
}
