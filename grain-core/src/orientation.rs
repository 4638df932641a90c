//! Crystal orientations, symmetry operators and misorientation binning.
//!
//! Orientations are Bunge Euler triples `(phi1, PHI, phi2)` in radians,
//! discretized into 5 degree bins for the ODF, and unit quaternions for
//! disorientation math. Misorientations are binned on an 18x18x18 grid of
//! homochoric-like coordinates (see [`misorientation_coords`]).

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI, TAU};

use glam::{DQuat, DVec3};

/// Angular width of one ODF / axis-ODF bin (5 degrees).
pub const BIN_WIDTH: f64 = 5.0 * PI / 180.0;

/// Bins per axis of the misorientation grid and the axis-orientation table.
pub const BINS_PER_AXIS: usize = 18;

/// Number of bins in an MDF or axis-ODF table.
pub const MDF_LEN: usize = BINS_PER_AXIS * BINS_PER_AXIS * BINS_PER_AXIS;

/// Crystal symmetry class of the matrix phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CrystalSymmetry {
    #[default]
    Cubic,
    Hexagonal,
}

impl CrystalSymmetry {
    /// Number of ODF bins along `(phi1, PHI, phi2)`.
    pub fn odf_dims(self) -> [usize; 3] {
        match self {
            CrystalSymmetry::Cubic => [18, 18, 18],
            CrystalSymmetry::Hexagonal => [36, 36, 12],
        }
    }

    /// Total number of ODF bins.
    pub fn odf_len(self) -> usize {
        self.odf_dims().iter().product()
    }

    /// Proper rotations of the point group, identity first.
    pub fn operators(self) -> Vec<DQuat> {
        match self {
            CrystalSymmetry::Cubic => cubic_operators(),
            CrystalSymmetry::Hexagonal => hexagonal_operators(),
        }
    }
}

fn cubic_operators() -> Vec<DQuat> {
    let mut ops = vec![DQuat::IDENTITY];
    for axis in [DVec3::X, DVec3::Y, DVec3::Z] {
        for k in 1..4 {
            ops.push(DQuat::from_axis_angle(axis, k as f64 * FRAC_PI_2));
        }
    }
    for axis in [
        DVec3::new(1.0, 1.0, 1.0),
        DVec3::new(-1.0, 1.0, 1.0),
        DVec3::new(1.0, -1.0, 1.0),
        DVec3::new(1.0, 1.0, -1.0),
    ] {
        for k in 1..3 {
            ops.push(DQuat::from_axis_angle(axis.normalize(), k as f64 * TAU / 3.0));
        }
    }
    for axis in [
        DVec3::new(1.0, 1.0, 0.0),
        DVec3::new(1.0, -1.0, 0.0),
        DVec3::new(1.0, 0.0, 1.0),
        DVec3::new(1.0, 0.0, -1.0),
        DVec3::new(0.0, 1.0, 1.0),
        DVec3::new(0.0, 1.0, -1.0),
    ] {
        ops.push(DQuat::from_axis_angle(axis.normalize(), PI));
    }
    ops
}

fn hexagonal_operators() -> Vec<DQuat> {
    let mut ops = Vec::with_capacity(12);
    for k in 0..6 {
        ops.push(DQuat::from_axis_angle(DVec3::Z, k as f64 * PI / 3.0));
    }
    for k in 0..6 {
        let t = k as f64 * PI / 6.0;
        ops.push(DQuat::from_axis_angle(DVec3::new(t.cos(), t.sin(), 0.0), PI));
    }
    ops
}

/// Converts Bunge Euler angles into the orientation quaternion.
///
/// Uses the half-angle form
/// `(sin(P/2)cos((p1-p2)/2), sin(P/2)sin((p1-p2)/2), cos(P/2)sin((p1+p2)/2), cos(P/2)cos((p1+p2)/2))`.
pub fn euler_to_quat(euler: DVec3) -> DQuat {
    let (s, c) = (0.5 * euler.y).sin_cos();
    let (s1, c1) = (0.5 * (euler.x - euler.z)).sin_cos();
    let (s2, c2) = (0.5 * (euler.x + euler.z)).sin_cos();
    DQuat::from_xyzw(s * c1, s * s1, c * s2, c * c2)
}

/// Returns the ODF bin holding `euler`, with each coordinate clamped to the grid.
pub fn odf_bin(euler: DVec3, symmetry: CrystalSymmetry) -> usize {
    let [n1, n2, n3] = symmetry.odf_dims();
    let b = |v: f64, n: usize| ((v / BIN_WIDTH).max(0.0) as usize).min(n - 1);
    let (b1, b2, b3) = (b(euler.x, n1), b(euler.y, n2), b(euler.z, n3));
    b3 * n1 * n2 + b2 * n1 + b1
}

/// Returns Euler angles inside `bin` of a grid with `dims` bins per axis.
///
/// ### Parameters
/// - `bin` - Linear bin index, `phi1` fastest.
/// - `dims` - Bins along `(phi1, PHI, phi2)`.
/// - `jitter` - Position inside the bin per axis, each in `[0, 1)`.
pub fn euler_in_bin(bin: usize, dims: [usize; 3], jitter: DVec3) -> DVec3 {
    let b1 = bin % dims[0];
    let b2 = (bin / dims[0]) % dims[1];
    let b3 = bin / (dims[0] * dims[1]);
    DVec3::new(
        (b1 as f64 + jitter.x) * BIN_WIDTH,
        (b2 as f64 + jitter.y) * BIN_WIDTH,
        (b3 as f64 + jitter.z) * BIN_WIDTH,
    )
}

/// Minimum-angle misorientation under a crystal symmetry.
///
/// Implementors return the disorientation angle in radians and its rotation
/// axis. The axis need not be normalized.
pub trait Disorientation {
    fn disorientation(&self, a: DQuat, b: DQuat, symmetry: CrystalSymmetry) -> (f64, DVec3);
}

/// [`Disorientation`] over the proper rotation group of each symmetry.
#[derive(Clone, Debug)]
pub struct SymmetryDisorientation {
    cubic: Vec<DQuat>,
    hexagonal: Vec<DQuat>,
}

impl SymmetryDisorientation {
    pub fn new() -> Self {
        Self {
            cubic: CrystalSymmetry::Cubic.operators(),
            hexagonal: CrystalSymmetry::Hexagonal.operators(),
        }
    }
}

impl Default for SymmetryDisorientation {
    fn default() -> Self {
        Self::new()
    }
}

impl Disorientation for SymmetryDisorientation {
    fn disorientation(&self, a: DQuat, b: DQuat, symmetry: CrystalSymmetry) -> (f64, DVec3) {
        let ops = match symmetry {
            CrystalSymmetry::Cubic => &self.cubic,
            CrystalSymmetry::Hexagonal => &self.hexagonal,
        };
        let delta = (a.conjugate() * b).normalize();

        let mut best_angle = f64::MAX;
        let mut best_axis = DVec3::Z;
        for op in ops {
            let q = *op * delta;
            let angle = 2.0 * q.w.abs().min(1.0).acos();
            if angle < best_angle {
                best_angle = angle;
                let axis = DVec3::new(q.x, q.y, q.z) * q.w.signum();
                best_axis = if axis.length_squared() > 0.0 {
                    axis
                } else {
                    DVec3::Z
                };
            }
        }
        (best_angle, best_axis)
    }
}

/// Orders the absolute axis components largest first.
///
/// Equal components keep the fixed precedence of the comparison chain, so
/// the result is reproducible for ties.
fn order_axis(n: DVec3) -> DVec3 {
    let (n1, n2, n3) = (n.x, n.y, n.z);
    if n1 >= n2 && n1 >= n3 {
        if n2 > n3 {
            DVec3::new(n1, n2, n3)
        } else {
            DVec3::new(n1, n3, n2)
        }
    } else if n2 >= n1 && n2 >= n3 {
        if n1 > n3 {
            DVec3::new(n2, n1, n3)
        } else {
            DVec3::new(n2, n3, n1)
        }
    } else if n1 >= n2 {
        DVec3::new(n3, n1, n2)
    } else {
        DVec3::new(n3, n2, n1)
    }
}

/// Maps a disorientation `(angle, axis)` into misorientation-space coordinates.
///
/// The axis is made positive and sorted largest first, then scaled by
/// `((3/4)(w - sin w))^(1/3)`. A zero angle maps to the origin.
pub fn misorientation_coords(angle: f64, axis: DVec3) -> DVec3 {
    if angle == 0.0 {
        return DVec3::ZERO;
    }
    let n = axis.abs().normalize_or_zero();
    let scale = (0.75 * (angle - angle.sin())).max(0.0).cbrt();
    order_axis(n) * scale
}

/// Edge length of the misorientation grid.
pub fn mdf_extent() -> f64 {
    (0.75 * (FRAC_PI_4 - FRAC_PI_4.sin())).cbrt()
}

/// Returns the MDF bin of misorientation coordinates.
///
/// Coordinates beyond the grid edge land in the last bin along that axis.
pub fn mdf_bin(coords: DVec3) -> usize {
    let dim = mdf_extent();
    let n = BINS_PER_AXIS;
    let b = |v: f64| ((v * n as f64 / dim).max(0.0) as usize).min(n - 1);
    n * n * b(coords.z) + n * b(coords.y) + b(coords.x)
}
