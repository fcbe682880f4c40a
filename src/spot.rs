//! Define a diffraction spot as delivered by the spot finder.
//! Spots are the input to indexing: their reciprocal-space coordinates are
//! differenced pairwise to form the observed vectors the search works on.
//!

use crate::Vector3;

#[derive(Debug, Clone, PartialEq)]
pub struct Spot {
    /// Identifier that is stable for the lifetime of the exposure.
    /// Observed vectors and accepted lattices refer to spots by this id.
    pub id: usize,
    /// Detector position in pixels along columns.
    pub x: f64,
    /// Detector position in pixels along rows.
    pub y: f64,
    /// Reciprocal-space coordinate (Å⁻¹) derived from the detector position.
    pub reciprocal: Vector3,
    /// Set when the spot is excluded from vector compilation
    /// (e.g. it sits too close to another spot).
    pub rejected: bool,
}

impl Spot {
    pub fn new(id: usize, x: f64, y: f64, reciprocal: Vector3) -> Self {
        Self {
            id,
            x,
            y,
            reciprocal,
            rejected: false,
        }
    }

    /// Resolution of the spot in Å (infinite at the beam centre).
    pub fn resolution(&self) -> f64 {
        let len = self.reciprocal.norm();
        if len > 0.0 {
            1.0 / len
        } else {
            f64::INFINITY
        }
    }
}

/// Build spots from reciprocal coordinates alone, numbering them in order.
///
/// Detector positions are left at zero; useful when the spot finder already
/// produced reciprocal coordinates.
pub fn spots_from_reciprocal(coords: &[Vector3]) -> Vec<Spot> {
    coords
        .iter()
        .enumerate()
        .map(|(i, q)| Spot::new(i, 0.0, 0.0, *q))
        .collect()
}
