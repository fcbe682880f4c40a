//! Integer operators acting on Miller indices.
//!
//! Two sets are derived from a space group:
//! - the **symmetry operators**: the rotational point group, closed under
//!   multiplication, used to map a reflection onto its equivalents;
//! - the **ambiguity operators**: coset representatives of the point group in
//!   the lattice holohedry that are not crystal symmetries. Two orientations
//!   related by one of these index the same spots equally well, so a solution
//!   that matches an earlier one under an ambiguity is the same lattice.

use super::spacegroup::{Centering, PointGroup, SpaceGroup};
use crate::Matrix3;

/// An integer 3×3 matrix acting on `[h, k, l]` column vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MillerOperator(pub [[i32; 3]; 3]);

impl MillerOperator {
    pub const IDENTITY: MillerOperator = MillerOperator([[1, 0, 0], [0, 1, 0], [0, 0, 1]]);

    pub fn apply(&self, hkl: [i32; 3]) -> [i32; 3] {
        let m = &self.0;
        [
            m[0][0] * hkl[0] + m[0][1] * hkl[1] + m[0][2] * hkl[2],
            m[1][0] * hkl[0] + m[1][1] * hkl[1] + m[1][2] * hkl[2],
            m[2][0] * hkl[0] + m[2][1] * hkl[1] + m[2][2] * hkl[2],
        ]
    }

    /// `self · other` (apply `other` first).
    pub fn compose(&self, other: &MillerOperator) -> MillerOperator {
        let mut out = [[0; 3]; 3];
        for (r, row) in out.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = (0..3).map(|k| self.0[r][k] * other.0[k][c]).sum();
            }
        }
        MillerOperator(out)
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// The operator as a floating-point matrix, for use with Miller vectors in ℝ³.
    pub fn as_matrix(&self) -> Matrix3 {
        Matrix3::from_fn(|r, c| self.0[r][c] as f64)
    }
}

// Generators, written as the image of (h, k, l).
const TWO_X: MillerOperator = MillerOperator([[1, 0, 0], [0, -1, 0], [0, 0, -1]]);
const TWO_Y: MillerOperator = MillerOperator([[-1, 0, 0], [0, 1, 0], [0, 0, -1]]);
const TWO_Z: MillerOperator = MillerOperator([[-1, 0, 0], [0, -1, 0], [0, 0, 1]]);
// (h, k, l) → (−k, h, l)
const FOUR_Z: MillerOperator = MillerOperator([[0, -1, 0], [1, 0, 0], [0, 0, 1]]);
// (h, k, l) → (k, −h−k, l)
const THREE_Z: MillerOperator = MillerOperator([[0, 1, 0], [-1, -1, 0], [0, 0, 1]]);
// (h, k, l) → (h+k, −h, l)
const SIX_Z: MillerOperator = MillerOperator([[1, 1, 0], [-1, 0, 0], [0, 0, 1]]);
// (h, k, l) → (k, h, −l)
const TWO_AB: MillerOperator = MillerOperator([[0, 1, 0], [1, 0, 0], [0, 0, -1]]);
// (h, k, l) → (−k, −h, −l)
const TWO_AB_PERP: MillerOperator = MillerOperator([[0, -1, 0], [-1, 0, 0], [0, 0, -1]]);
// (h, k, l) → (l, h, k)
const THREE_DIAG: MillerOperator = MillerOperator([[0, 0, 1], [1, 0, 0], [0, 1, 0]]);
// (h, k, l) → (−h, −k, l), same matrix as 2z
const TWIN_2Z: MillerOperator = TWO_Z;
// (h, k, l) → (−k, h, l)
const TWIN_4Z: MillerOperator = FOUR_Z;

fn generators(point_group: PointGroup) -> &'static [MillerOperator] {
    match point_group {
        PointGroup::PG1 => &[],
        PointGroup::PG2 => &[TWO_Y],
        PointGroup::PG222 => &[TWO_Z, TWO_Y],
        PointGroup::PG4 => &[FOUR_Z],
        PointGroup::PG422 => &[FOUR_Z, TWO_X],
        PointGroup::PG3 => &[THREE_Z],
        PointGroup::PG312 => &[THREE_Z, TWO_AB_PERP],
        PointGroup::PG321 => &[THREE_Z, TWO_AB],
        PointGroup::PG6 => &[SIX_Z],
        PointGroup::PG622 => &[SIX_Z, TWO_AB],
        PointGroup::PG23 => &[TWO_Z, TWO_X, THREE_DIAG],
        PointGroup::PG432 => &[FOUR_Z, THREE_DIAG],
    }
}

/// Close a set of generators under multiplication.
///
/// The result always contains the identity and is sorted, so the same point
/// group always yields the same operator order.
fn close_group(generators: &[MillerOperator]) -> Vec<MillerOperator> {
    let mut group = vec![MillerOperator::IDENTITY];
    let mut frontier = vec![MillerOperator::IDENTITY];
    while let Some(op) = frontier.pop() {
        for g in generators {
            let next = g.compose(&op);
            if !group.contains(&next) {
                group.push(next);
                frontier.push(next);
            }
        }
    }
    // Identity first.
    group.sort_by_key(|op| (!op.is_identity(), *op));
    group
}

/// Rotational symmetry operators of the space group's point group.
pub fn symmetry_operators(space_group: &SpaceGroup) -> Vec<MillerOperator> {
    close_group(generators(space_group.point_group))
}

/// Indexing-ambiguity operators for the space group, identity first.
pub fn ambiguity_operators(space_group: &SpaceGroup) -> Vec<MillerOperator> {
    let rhombohedral = space_group.centering == Centering::R;
    let mut ops = vec![MillerOperator::IDENTITY];
    match space_group.point_group {
        PointGroup::PG4 | PointGroup::PG6 => ops.push(TWO_AB),
        PointGroup::PG3 if rhombohedral => ops.push(TWO_AB),
        PointGroup::PG3 => ops.extend([TWIN_2Z, TWO_AB, TWO_AB_PERP]),
        PointGroup::PG312 | PointGroup::PG321 if !rhombohedral => ops.push(TWIN_2Z),
        PointGroup::PG23 => ops.push(TWIN_4Z),
        _ => {}
    }
    ops
}
