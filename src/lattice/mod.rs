//! Unit cell and the theoretical reciprocal-lattice table.
//!
//! The table lists every Miller triple within an index bound that the space
//! group allows, together with its reciprocal length under the target cell.
//! It is built once before any search starts and shared read-only by every
//! worker.

pub mod spacegroup;
pub mod symmetry;

use rkyv::{Archive, Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::{Matrix3, Vector3};
use spacegroup::SpaceGroup;
use symmetry::symmetry_operators;

/// Largest Miller index bound a table may be built with.
pub const MAX_MILLER_INDEX_BOUND: i32 = 64;

/// Crystal unit cell: lengths in Å, angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
pub struct UnitCell {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl UnitCell {
    /// Build a cell from `[a, b, c, α, β, γ]`, rejecting non-physical values.
    pub fn new(params: [f64; 6]) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidUnitCell {
            cell: params,
            reason: reason.to_string(),
        };
        if params.iter().any(|p| !p.is_finite()) {
            return Err(invalid("parameters must be finite"));
        }
        if params[..3].iter().any(|&len| len <= 0.0) {
            return Err(invalid("axis lengths must be positive"));
        }
        if params[3..].iter().any(|&ang| ang <= 0.0 || ang >= 180.0) {
            return Err(invalid("angles must lie strictly between 0 and 180 degrees"));
        }
        let cell = UnitCell {
            a: params[0],
            b: params[1],
            c: params[2],
            alpha: params[3],
            beta: params[4],
            gamma: params[5],
        };
        if !(cell.volume() > 0.0) {
            return Err(invalid("angles do not describe a cell with positive volume"));
        }
        Ok(cell)
    }

    pub fn parameters(&self) -> [f64; 6] {
        [self.a, self.b, self.c, self.alpha, self.beta, self.gamma]
    }

    /// Real-space cell volume in Å³ (NaN for impossible angle combinations).
    pub fn volume(&self) -> f64 {
        let (ca, cb, cg) = (
            self.alpha.to_radians().cos(),
            self.beta.to_radians().cos(),
            self.gamma.to_radians().cos(),
        );
        let radicand = 1.0 - ca * ca - cb * cb - cg * cg + 2.0 * ca * cb * cg;
        self.a * self.b * self.c * radicand.sqrt()
    }

    /// Reciprocal basis matrix B (Busing & Levy convention).
    ///
    /// Columns are a*, b*, c* in a Cartesian frame with a* along x and c
    /// along z, so `q = U · B · h` for crystal rotation U.
    pub fn reciprocal_matrix(&self) -> Matrix3 {
        let (sa, ca) = self.alpha.to_radians().sin_cos();
        let (sb, cb) = self.beta.to_radians().sin_cos();
        let (sg, cg) = self.gamma.to_radians().sin_cos();
        let v = self.volume();

        let a_star = self.b * self.c * sa / v;
        let b_star = self.a * self.c * sb / v;
        let c_star = self.a * self.b * sg / v;

        let cos_beta_star = (ca * cg - cb) / (sa * sg);
        let cos_gamma_star = (ca * cb - cg) / (sa * sb);
        let sin_beta_star = (1.0 - cos_beta_star * cos_beta_star).max(0.0).sqrt();
        let sin_gamma_star = (1.0 - cos_gamma_star * cos_gamma_star).max(0.0).sqrt();

        Matrix3::new(
            a_star,
            b_star * cos_gamma_star,
            c_star * cos_beta_star,
            0.0,
            b_star * sin_gamma_star,
            -c_star * sin_beta_star * ca,
            0.0,
            0.0,
            1.0 / self.c,
        )
    }

    /// Recover the real-space cell described by an orientation matrix A.
    ///
    /// The rotation cancels in the reciprocal metric AᵀA, whose inverse is the
    /// real-space metric.
    pub fn from_orientation(a: &Matrix3) -> Option<UnitCell> {
        let metric = (a.transpose() * a).try_inverse()?;
        let len = |i: usize| metric[(i, i)].sqrt();
        let (la, lb, lc) = (len(0), len(1), len(2));
        let angle = |i: usize, j: usize, li: f64, lj: f64| {
            (metric[(i, j)] / (li * lj)).clamp(-1.0, 1.0).acos().to_degrees()
        };
        let cell = UnitCell {
            a: la,
            b: lb,
            c: lc,
            alpha: angle(1, 2, lb, lc),
            beta: angle(0, 2, la, lc),
            gamma: angle(0, 1, la, lb),
        };
        cell.parameters().iter().all(|p| p.is_finite()).then_some(cell)
    }
}

/// One allowed reflection of the target lattice.
#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
pub struct TheoreticalVector {
    pub miller: [i32; 3],
    /// Reciprocal length |B·h| in Å⁻¹.
    pub length: f64,
    /// B·h in the crystal Cartesian frame.
    pub reciprocal: [f64; 3],
}

impl TheoreticalVector {
    pub fn vector(&self) -> Vector3 {
        Vector3::from(self.reciprocal)
    }

    pub fn miller_vector(&self) -> Vector3 {
        Vector3::new(
            self.miller[0] as f64,
            self.miller[1] as f64,
            self.miller[2] as f64,
        )
    }
}

/// Theoretical reciprocal-lattice vectors for one cell and space group.
///
/// Entries are sorted by `(length, miller)`. Index positions are stable for
/// the lifetime of the table and are what candidate networks record.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub struct LatticeTable {
    pub cell: UnitCell,
    pub space_group: u16,
    pub max_miller_index: i32,
    pub vectors: Vec<TheoreticalVector>,
    /// Table positions sorted by Miller triple, for exact lookup.
    by_miller: Vec<u32>,
    /// Longest reciprocal length in the table.
    pub max_length: f64,
    /// Length of the shortest reciprocal basis vector.
    pub smallest_spacing: f64,
}

impl LatticeTable {
    /// Enumerate all non-absent triples with `|hkl| ≤ max_miller_index`.
    ///
    /// The enumeration is closed under the point-group rotations, so every
    /// symmetry image of an entry is itself an entry. The bound is clamped
    /// to [`MAX_MILLER_INDEX_BOUND`].
    pub fn generate(cell: &UnitCell, space_group: &SpaceGroup, max_miller_index: i32) -> Self {
        let ops = symmetry_operators(space_group);
        let b = cell.reciprocal_matrix();
        let n = max_miller_index.clamp(0, MAX_MILLER_INDEX_BOUND);
        let bound_sq = n * n;

        let mut triples = std::collections::BTreeSet::new();
        for h in -n..=n {
            for k in -n..=n {
                for l in -n..=n {
                    let hkl = [h, k, l];
                    if hkl == [0, 0, 0] || h * h + k * k + l * l > bound_sq {
                        continue;
                    }
                    if space_group.is_systematically_absent(hkl) {
                        continue;
                    }
                    for op in &ops {
                        triples.insert(op.apply(hkl));
                    }
                }
            }
        }

        let mut vectors: Vec<TheoreticalVector> = triples
            .into_iter()
            .map(|miller| {
                let q = b * Vector3::new(miller[0] as f64, miller[1] as f64, miller[2] as f64);
                TheoreticalVector {
                    miller,
                    length: q.norm(),
                    reciprocal: [q.x, q.y, q.z],
                }
            })
            .collect();
        vectors.sort_by(|x, y| x.length.total_cmp(&y.length).then(x.miller.cmp(&y.miller)));

        let mut by_miller: Vec<u32> = (0..vectors.len() as u32).collect();
        by_miller.sort_by_key(|&i| vectors[i as usize].miller);

        let max_length = vectors.last().map_or(0.0, |v| v.length);
        let smallest_spacing = (0..3)
            .map(|i| b.column(i).norm())
            .fold(f64::INFINITY, f64::min);

        info!(
            "Lattice table for space group {}: {} vectors up to {:.4} Å⁻¹",
            space_group.number,
            vectors.len(),
            max_length
        );

        LatticeTable {
            cell: *cell,
            space_group: space_group.number,
            max_miller_index: n,
            vectors,
            by_miller,
            max_length,
            smallest_spacing,
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Table position of a Miller triple, if present.
    pub fn index_of(&self, miller: [i32; 3]) -> Option<usize> {
        self.by_miller
            .binary_search_by_key(&miller, |&i| self.vectors[i as usize].miller)
            .ok()
            .map(|pos| self.by_miller[pos] as usize)
    }

    /// Table positions whose length lies within `tolerance` of `length`.
    pub fn within_length(&self, length: f64, tolerance: f64) -> std::ops::Range<usize> {
        let lo = self.vectors.partition_point(|v| v.length < length - tolerance);
        let hi = self.vectors.partition_point(|v| v.length <= length + tolerance);
        lo..hi.max(lo)
    }

    /// Serialize the table to bytes using rkyv.
    pub fn to_rkyv_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map_err(|e| anyhow::anyhow!("rkyv serialization failed: {}", e))?;
        Ok(bytes.to_vec())
    }

    /// Save the table to a file using rkyv.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let bytes = self.to_rkyv_bytes()?;
        std::fs::write(path, &bytes)?;
        info!("Saved lattice table to {} ({} bytes)", path, bytes.len());
        Ok(())
    }

    /// Load a table from an rkyv file.
    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        let table = rkyv::from_bytes::<Self, rkyv::rancor::Error>(&bytes)
            .map_err(|e| anyhow::anyhow!("rkyv deserialization failed: {}", e))?;
        info!(
            "Loaded lattice table: {} vectors, space group {}",
            table.len(),
            table.space_group
        );
        Ok(table)
    }
}
