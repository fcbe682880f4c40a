//! Flat-detector geometry: maps detector pixels to reciprocal-space coordinates.
//!
//! Full multi-panel calibration lives outside this crate; this model is the
//! single-panel approximation the spot finder hands us (beam centre, pixel
//! size, sample-to-detector distance, wavelength).
//!
//! # Coordinate conventions
//!
//! - **Pixel coordinates**: raw detector columns / rows.
//! - **Lab frame**: beam along +Z, +X along detector columns, +Y along rows.
//! - **Reciprocal coordinate**: `q = (ŝ − ŝ₀) / λ` in Å⁻¹, where `ŝ` is the unit
//!   scattered direction and `ŝ₀ = +Z` the unit incident direction.
//!
//! ```text
//! pixel → subtract beam centre → scale to mm → direction from sample → Ewald sphere → q
//! ```

use serde::Deserialize;

use crate::spot::Spot;
use crate::Vector3;

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorGeometry {
    /// Beam centre in pixels `[x, y]`.
    pub beam_centre: [f64; 2],
    /// Pixel edge length in mm.
    pub pixel_size_mm: f64,
    /// Sample-to-detector distance in mm.
    pub distance_mm: f64,
    /// Incident wavelength in Å.
    pub wavelength: f64,
}

impl DetectorGeometry {
    /// Reciprocal-space coordinate of a detector pixel.
    pub fn reciprocal_coordinate(&self, x: f64, y: f64) -> Vector3 {
        let dx = (x - self.beam_centre[0]) * self.pixel_size_mm;
        let dy = (y - self.beam_centre[1]) * self.pixel_size_mm;
        let s = Vector3::new(dx, dy, self.distance_mm).normalize();
        (s - Vector3::z()) / self.wavelength
    }

    /// Detector pixel at which a reciprocal-lattice point in diffracting
    /// condition would be recorded.
    ///
    /// `q` is placed on the Ewald sphere by keeping its direction from the
    /// sphere centre; returns `None` if the scattered ray misses the detector
    /// plane (travels backwards).
    pub fn predict_pixel(&self, q: &Vector3) -> Option<(f64, f64)> {
        let s = (q * self.wavelength + Vector3::z()).try_normalize(1e-12)?;
        if s.z <= 1e-9 {
            return None;
        }
        let dx = s.x / s.z * self.distance_mm;
        let dy = s.y / s.z * self.distance_mm;
        Some((
            self.beam_centre[0] + dx / self.pixel_size_mm,
            self.beam_centre[1] + dy / self.pixel_size_mm,
        ))
    }

    /// Build a spot from its detector position.
    pub fn spot(&self, id: usize, x: f64, y: f64) -> Spot {
        Spot::new(id, x, y, self.reciprocal_coordinate(x, y))
    }
}
