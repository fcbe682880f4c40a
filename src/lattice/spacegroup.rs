//! Chiral space groups: lattice centring, screw-axis absences and point group.
//!
//! Macromolecular crystals only ever crystallise in the 65 Sohncke (chiral)
//! space groups, so the table is restricted to those. Trigonal groups with
//! rhombohedral centring are described in the hexagonal setting (H3, H32).
//!
//! Systematic absences come from two sources:
//! - **centring**: integral conditions on all reflections (`h+k` even for C, ...);
//! - **screw axes**: serial conditions on axial reflections (`00l: l = 4n` for 4₁).
//!
//! Glide planes cannot occur in chiral groups, so zonal conditions never arise.

/// Lattice centring type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Centering {
    P,
    C,
    I,
    F,
    /// Rhombohedral, obverse setting on hexagonal axes.
    R,
}

impl Centering {
    /// Integral reflection condition for this centring.
    fn allows(&self, [h, k, l]: [i32; 3]) -> bool {
        match self {
            Centering::P => true,
            Centering::C => (h + k).rem_euclid(2) == 0,
            Centering::I => (h + k + l).rem_euclid(2) == 0,
            Centering::F => {
                let ph = h.rem_euclid(2);
                ph == k.rem_euclid(2) && ph == l.rem_euclid(2)
            }
            Centering::R => (-h + k + l).rem_euclid(3) == 0,
        }
    }
}

/// Rotational point group of a chiral space group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointGroup {
    PG1,
    PG2,
    PG222,
    PG4,
    PG422,
    PG3,
    PG312,
    PG321,
    PG6,
    PG622,
    PG23,
    PG432,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrystalSystem {
    Triclinic,
    Monoclinic,
    Orthorhombic,
    Tetragonal,
    Trigonal,
    Hexagonal,
    Cubic,
}

impl CrystalSystem {
    pub fn name(&self) -> &'static str {
        match self {
            CrystalSystem::Triclinic => "triclinic",
            CrystalSystem::Monoclinic => "monoclinic",
            CrystalSystem::Orthorhombic => "orthorhombic",
            CrystalSystem::Tetragonal => "tetragonal",
            CrystalSystem::Trigonal => "trigonal",
            CrystalSystem::Hexagonal => "hexagonal",
            CrystalSystem::Cubic => "cubic",
        }
    }

    /// Whether the six cell parameters respect the metric constraints of
    /// this system (b-unique monoclinic, hexagonal axes for trigonal).
    pub fn accepts_cell(&self, cell: &[f64; 6]) -> bool {
        const LEN_TOL: f64 = 1e-3;
        const ANGLE_TOL: f64 = 1e-2;
        let eq_len = |x: f64, y: f64| (x - y).abs() <= LEN_TOL * x.abs().max(y.abs());
        let eq_angle = |x: f64, target: f64| (x - target).abs() <= ANGLE_TOL;
        let [a, b, c, alpha, beta, gamma] = *cell;
        match self {
            CrystalSystem::Triclinic => true,
            CrystalSystem::Monoclinic => eq_angle(alpha, 90.0) && eq_angle(gamma, 90.0),
            CrystalSystem::Orthorhombic => {
                eq_angle(alpha, 90.0) && eq_angle(beta, 90.0) && eq_angle(gamma, 90.0)
            }
            CrystalSystem::Tetragonal => {
                eq_len(a, b) && eq_angle(alpha, 90.0) && eq_angle(beta, 90.0) && eq_angle(gamma, 90.0)
            }
            CrystalSystem::Trigonal | CrystalSystem::Hexagonal => {
                eq_len(a, b) && eq_angle(alpha, 90.0) && eq_angle(beta, 90.0) && eq_angle(gamma, 120.0)
            }
            CrystalSystem::Cubic => {
                eq_len(a, b)
                    && eq_len(a, c)
                    && eq_angle(alpha, 90.0)
                    && eq_angle(beta, 90.0)
                    && eq_angle(gamma, 90.0)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    A,
    B,
    C,
}

/// Serial condition on the reflections along one axis:
/// only multiples of `order` are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrewAxis {
    pub axis: Axis,
    pub order: i32,
}

impl ScrewAxis {
    fn allows(&self, [h, k, l]: [i32; 3]) -> bool {
        let on_axis = match self.axis {
            Axis::A => (k == 0 && l == 0).then_some(h),
            Axis::B => (h == 0 && l == 0).then_some(k),
            Axis::C => (h == 0 && k == 0).then_some(l),
        };
        match on_axis {
            Some(index) => index.rem_euclid(self.order) == 0,
            None => true,
        }
    }
}

const fn screw(axis: Axis, order: i32) -> ScrewAxis {
    ScrewAxis { axis, order }
}

const A2: ScrewAxis = screw(Axis::A, 2);
const B2: ScrewAxis = screw(Axis::B, 2);
const C2: ScrewAxis = screw(Axis::C, 2);
const C3: ScrewAxis = screw(Axis::C, 3);
const C4: ScrewAxis = screw(Axis::C, 4);
const C6: ScrewAxis = screw(Axis::C, 6);
const A4: ScrewAxis = screw(Axis::A, 4);
const B4: ScrewAxis = screw(Axis::B, 4);

/// One chiral space group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceGroup {
    pub number: u16,
    pub symbol: &'static str,
    pub centering: Centering,
    pub point_group: PointGroup,
    pub screw_axes: &'static [ScrewAxis],
}

const fn sg(
    number: u16,
    symbol: &'static str,
    centering: Centering,
    point_group: PointGroup,
    screw_axes: &'static [ScrewAxis],
) -> SpaceGroup {
    SpaceGroup {
        number,
        symbol,
        centering,
        point_group,
        screw_axes,
    }
}

use Centering::{C as Cc, F as Fc, I as Ic, P as Pc, R as Rc};
use PointGroup::*;

static SPACE_GROUPS: [SpaceGroup; 65] = [
    sg(1, "P 1", Pc, PG1, &[]),
    sg(3, "P 1 2 1", Pc, PG2, &[]),
    sg(4, "P 1 21 1", Pc, PG2, &[B2]),
    sg(5, "C 1 2 1", Cc, PG2, &[]),
    sg(16, "P 2 2 2", Pc, PG222, &[]),
    sg(17, "P 2 2 21", Pc, PG222, &[C2]),
    sg(18, "P 21 21 2", Pc, PG222, &[A2, B2]),
    sg(19, "P 21 21 21", Pc, PG222, &[A2, B2, C2]),
    sg(20, "C 2 2 21", Cc, PG222, &[C2]),
    sg(21, "C 2 2 2", Cc, PG222, &[]),
    sg(22, "F 2 2 2", Fc, PG222, &[]),
    sg(23, "I 2 2 2", Ic, PG222, &[]),
    sg(24, "I 21 21 21", Ic, PG222, &[]),
    sg(75, "P 4", Pc, PG4, &[]),
    sg(76, "P 41", Pc, PG4, &[C4]),
    sg(77, "P 42", Pc, PG4, &[C2]),
    sg(78, "P 43", Pc, PG4, &[C4]),
    sg(79, "I 4", Ic, PG4, &[]),
    sg(80, "I 41", Ic, PG4, &[C4]),
    sg(89, "P 4 2 2", Pc, PG422, &[]),
    sg(90, "P 4 21 2", Pc, PG422, &[A2, B2]),
    sg(91, "P 41 2 2", Pc, PG422, &[C4]),
    sg(92, "P 41 21 2", Pc, PG422, &[C4, A2, B2]),
    sg(93, "P 42 2 2", Pc, PG422, &[C2]),
    sg(94, "P 42 21 2", Pc, PG422, &[C2, A2, B2]),
    sg(95, "P 43 2 2", Pc, PG422, &[C4]),
    sg(96, "P 43 21 2", Pc, PG422, &[C4, A2, B2]),
    sg(97, "I 4 2 2", Ic, PG422, &[]),
    sg(98, "I 41 2 2", Ic, PG422, &[C4]),
    sg(143, "P 3", Pc, PG3, &[]),
    sg(144, "P 31", Pc, PG3, &[C3]),
    sg(145, "P 32", Pc, PG3, &[C3]),
    sg(146, "H 3", Rc, PG3, &[]),
    sg(149, "P 3 1 2", Pc, PG312, &[]),
    sg(150, "P 3 2 1", Pc, PG321, &[]),
    sg(151, "P 31 1 2", Pc, PG312, &[C3]),
    sg(152, "P 31 2 1", Pc, PG321, &[C3]),
    sg(153, "P 32 1 2", Pc, PG312, &[C3]),
    sg(154, "P 32 2 1", Pc, PG321, &[C3]),
    sg(155, "H 3 2", Rc, PG321, &[]),
    sg(168, "P 6", Pc, PG6, &[]),
    sg(169, "P 61", Pc, PG6, &[C6]),
    sg(170, "P 65", Pc, PG6, &[C6]),
    sg(171, "P 62", Pc, PG6, &[C3]),
    sg(172, "P 64", Pc, PG6, &[C3]),
    sg(173, "P 63", Pc, PG6, &[C2]),
    sg(177, "P 6 2 2", Pc, PG622, &[]),
    sg(178, "P 61 2 2", Pc, PG622, &[C6]),
    sg(179, "P 65 2 2", Pc, PG622, &[C6]),
    sg(180, "P 62 2 2", Pc, PG622, &[C3]),
    sg(181, "P 64 2 2", Pc, PG622, &[C3]),
    sg(182, "P 63 2 2", Pc, PG622, &[C2]),
    sg(195, "P 2 3", Pc, PG23, &[]),
    sg(196, "F 2 3", Fc, PG23, &[]),
    sg(197, "I 2 3", Ic, PG23, &[]),
    sg(198, "P 21 3", Pc, PG23, &[A2, B2, C2]),
    sg(199, "I 21 3", Ic, PG23, &[]),
    sg(207, "P 4 3 2", Pc, PG432, &[]),
    sg(208, "P 42 3 2", Pc, PG432, &[A2, B2, C2]),
    sg(209, "F 4 3 2", Fc, PG432, &[]),
    sg(210, "F 41 3 2", Fc, PG432, &[A4, B4, C4]),
    sg(211, "I 4 3 2", Ic, PG432, &[]),
    sg(212, "P 43 3 2", Pc, PG432, &[A4, B4, C4]),
    sg(213, "P 41 3 2", Pc, PG432, &[A4, B4, C4]),
    sg(214, "I 41 3 2", Ic, PG432, &[A4, B4, C4]),
];

impl SpaceGroup {
    /// Look up a space group by its International Tables number.
    pub fn from_number(number: u16) -> Option<SpaceGroup> {
        SPACE_GROUPS.iter().find(|g| g.number == number).copied()
    }

    /// All supported space groups, in numerical order.
    pub fn all() -> &'static [SpaceGroup] {
        &SPACE_GROUPS
    }

    pub fn system(&self) -> CrystalSystem {
        match self.point_group {
            PG1 => CrystalSystem::Triclinic,
            PG2 => CrystalSystem::Monoclinic,
            PG222 => CrystalSystem::Orthorhombic,
            PG4 | PG422 => CrystalSystem::Tetragonal,
            PG3 | PG312 | PG321 => CrystalSystem::Trigonal,
            PG6 | PG622 => CrystalSystem::Hexagonal,
            PG23 | PG432 => CrystalSystem::Cubic,
        }
    }

    /// Whether reflection `hkl` is systematically absent.
    pub fn is_systematically_absent(&self, hkl: [i32; 3]) -> bool {
        !self.centering.allows(hkl) || self.screw_axes.iter().any(|s| !s.allows(hkl))
    }
}
