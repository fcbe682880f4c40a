//! # lattice-indexer
//!
//! **Multi-lattice indexing** of serial crystallography exposures.
//!
//! Given the diffraction spots of a single still exposure and the known unit
//! cell and space group of the crystal, `lattice_indexer` finds every crystal
//! orientation present on the image, with no prior orientation estimate.
//! Spots explained by one lattice are removed before the search for the next,
//! so several crystals hit by the same pulse are indexed independently.
//!
//! ## Example
//!
//! ```no_run
//! use lattice_indexer::{index_exposures, Exposure, Indexer, IndexingConfig, DetectorGeometry};
//!
//! let config = IndexingConfig {
//!     unit_cell: Some([79.1, 79.1, 38.4, 90.0, 90.0, 90.0]),
//!     space_group: 96, // P 43 21 2
//!     max_lattices: 3,
//!     ..Default::default()
//! };
//! let indexer = Indexer::new(config).unwrap();
//!
//! // Spot positions in detector pixels, converted to reciprocal space
//! let detector = DetectorGeometry {
//!     beam_centre: [1024.0, 1024.0],
//!     pixel_size_mm: 0.11,
//!     distance_mm: 120.0,
//!     wavelength: 1.3,
//! };
//! let positions = [(1100.5, 980.2), (870.0, 1203.7) /* ... */];
//! let spots = positions
//!     .iter()
//!     .enumerate()
//!     .map(|(id, &(x, y))| detector.spot(id, x, y))
//!     .collect();
//!
//! let reports = index_exposures(&indexer, vec![Exposure { name: "shot_0001".into(), spots }]);
//! for lattice in &reports[0].lattices {
//!     println!("{} spots, cell {:?}", lattice.spots.len(), lattice.unit_cell());
//! }
//! ```
//!
//! ## Algorithm overview
//!
//! 1. **Lattice table**: enumerate the allowed reflections of the target cell
//!    up to an index bound, sorted by reciprocal length
//! 2. **Observed vectors**: difference every pair of spots in reciprocal space
//! 3. **Seeding**: match two observed vectors to two table vectors by length
//!    and mutual angle, and solve for the rotation that aligns them
//! 4. **Network growth**: add observed vectors that the current rotation
//!    indexes to unused table vectors, re-fitting the rotation (Wahba/SVD)
//!    after each addition and branching depth-first over alternatives
//! 5. **Validation**: reject orientations equivalent to an accepted one under
//!    space-group symmetry or indexing ambiguity, refine the rest against the
//!    spot list, and accept those that explain enough spots
//!

pub mod detector;
pub mod error;
pub mod indexer;
pub mod lattice;
pub mod orientation;
pub mod refine;
pub mod spot;

pub use detector::DetectorGeometry;
pub use error::ConfigError;
pub use indexer::dispatch::index_exposures;
pub use indexer::driver::index_exposure;
pub use indexer::{
    AcceptedLattice, BulkConfig, Exposure, ExposureReport, Indexer, IndexingConfig,
    IndexingStrategy, StopReason, TrialStatus, VectorSetConfig,
};
pub use lattice::{LatticeTable, UnitCell};
pub use orientation::OrientationMatrix;
pub use refine::{LatticeFitRefiner, OrientationRefiner, Refinement};
pub use spot::Spot;

// Reciprocal-space lengths are around 1e-2 Å⁻¹ and tolerances around 1e-4,
// so everything is computed in f64.
pub type Vector3 = nalgebra::Vector3<f64>;
pub type Matrix3 = nalgebra::Matrix3<f64>;
