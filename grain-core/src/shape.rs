//! Point containment against rotated grain shapes.
//!
//! A [`ShapeFrame`] places a grain's shape in the domain:
//! 1. Semi-axes come from the grain volume, axis ratios and shape class
//!    ([`semi_axes`]).
//! 2. Points are rotated into the shape frame with the transpose of the
//!    Bunge matrix of the shape Euler angles and divided by the semi-axes.
//! 3. The normalized point is tested against the shape class and, when
//!    inside, scored with a soft overlap penalty used by packing.

use std::f64::consts::PI;

use glam::{DMat3, DVec3};

use crate::config::ShapeClass;
use crate::grain::Grain;
use crate::grid::Domain;
use crate::special::gamma;

/// Smallest shape norm used by the overlap penalty.
const MIN_NORM: f64 = 1e-2;
/// Squared norm at which the overlap penalty changes sign.
const PENALTY_EDGE2: f64 = 0.8 * 0.8;

/// How footprints treat the domain faces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Boundary {
    /// Voxels past a face wrap around to the opposite face.
    Periodic,
    /// Voxels past a face are dropped.
    Clamped,
}

/// Bunge (Z-X-Z) rotation matrix of `(phi1, PHI, phi2)`.
///
/// Row `i`, column `j` of the result is the usual `g_ij`, so
/// `g.transpose() * v` maps a sample-frame vector into the local frame.
pub fn bunge_matrix(euler: DVec3) -> DMat3 {
    let (s1, c1) = euler.x.sin_cos();
    let (s, c) = euler.y.sin_cos();
    let (s2, c2) = euler.z.sin_cos();
    let rows = [
        [c1 * c2 - s1 * s2 * c, s1 * c2 + c1 * s2 * c, s2 * s],
        [-c1 * s2 - s1 * c2 * c, -s1 * s2 + c1 * c2 * c, c2 * s],
        [s1 * s, -c1 * s, c],
    ];
    DMat3::from_cols_array_2d(&rows).transpose()
}

/// Semi-axes `(r1, r2, r3)` of a grain shape of the given volume.
///
/// ### Parameters
/// - `class` - Shape family.
/// - `volume` - Target volume.
/// - `b_over_a`, `c_over_a` - Axis ratios `r2 / r1` and `r3 / r1`.
/// - `omega3` - Exponent `N` (superellipsoid) or shape value `G` (superoctahedron).
///
/// ### Returns
/// `None` when any radius comes out non-positive or non-finite.
pub fn semi_axes(
    class: ShapeClass,
    volume: f64,
    b_over_a: f64,
    c_over_a: f64,
    omega3: f64,
) -> Option<DVec3> {
    let r1 = match class {
        ShapeClass::Ellipsoid => (volume * 3.0 / (4.0 * PI) / b_over_a / c_over_a).cbrt(),
        ShapeClass::Superellipsoid => {
            let n = omega3;
            let beta1 = gamma(1.0 / n) * gamma(1.0 / n) / gamma(2.0 / n);
            let beta2 = gamma(2.0 / n) * gamma(1.0 / n) / gamma(3.0 / n);
            (volume * 1.5 / b_over_a / c_over_a * (n * n / 4.0) / beta1 / beta2).cbrt()
        }
        ShapeClass::Superoctahedron => {
            let g = omega3;
            let scaled = if g <= 1.0 {
                volume * 6.0 / (6.0 - g * g * g)
            } else {
                volume * 6.0 / (3.0 + 9.0 * g - 9.0 * g * g + 2.0 * g * g * g)
            };
            scaled.cbrt() / 2.0
        }
    };
    let radii = DVec3::new(r1, r1 * b_over_a, r1 * c_over_a);
    (radii.is_finite() && radii.min_element() > 0.0).then_some(radii)
}

/// Soft overlap cost of a point with shape norm `s`.
///
/// Positive deep inside the shape, negative near its surface.
fn overlap_penalty(s: f64) -> f64 {
    let s = s.max(MIN_NORM);
    (-0.1 / (s * (1.0 - 1.0 / PENALTY_EDGE2))) * (1.0 - s * s / PENALTY_EDGE2)
}

/// A grain shape placed in the sample frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShapeFrame {
    pub class: ShapeClass,
    pub center: DVec3,
    pub rotation: DMat3,
    pub radii: DVec3,
    pub omega3: f64,
}

impl ShapeFrame {
    /// Places `grain`'s shape at its centroid.
    ///
    /// ### Returns
    /// `None` if the grain's semi-axes are degenerate.
    pub fn for_grain(class: ShapeClass, grain: &Grain) -> Option<Self> {
        let radii = semi_axes(
            class,
            grain.volume,
            grain.b_over_a,
            grain.c_over_a,
            grain.omega3,
        )?;
        Some(Self {
            class,
            center: grain.centroid,
            rotation: bunge_matrix(grain.shape_euler),
            radii,
            omega3: grain.omega3,
        })
    }

    /// Sample-frame point to local (unnormalized) coordinates.
    #[inline]
    pub fn to_local(&self, p: DVec3) -> DVec3 {
        self.rotation.transpose() * (p - self.center)
    }

    /// Local coordinates back to the sample frame.
    #[inline]
    pub fn to_world(&self, local: DVec3) -> DVec3 {
        self.center + self.rotation * local
    }

    /// Classifies a point given in local coordinates.
    ///
    /// ### Returns
    /// `Some(penalty)` if the point is inside the shape, `None` otherwise.
    pub fn classify_local(&self, local: DVec3) -> Option<f64> {
        let u = local / self.radii;
        let s = match self.class {
            ShapeClass::Ellipsoid => {
                let s = u.length_squared();
                if 1.0 - s < 0.0 {
                    return None;
                }
                s
            }
            ShapeClass::Superellipsoid => {
                let n = self.omega3;
                let a = u.abs();
                let s = a.x.powf(n) + a.y.powf(n) + a.z.powf(n);
                if 1.0 - s < 0.0 {
                    return None;
                }
                s
            }
            ShapeClass::Superoctahedron => {
                if u.abs().max_element() > 1.0 {
                    return None;
                }
                let v = u + DVec3::ONE;
                if outside_octahedron(v, self.omega3) {
                    return None;
                }
                v.x + v.y + v.z
            }
        };
        Some(overlap_penalty(s))
    }

    /// Classifies a sample-frame point, see [`ShapeFrame::classify_local`].
    #[inline]
    pub fn classify(&self, p: DVec3) -> Option<f64> {
        self.classify_local(self.to_local(p))
    }

    pub fn contains(&self, p: DVec3) -> bool {
        self.classify(p).is_some()
    }

    /// Collects the voxels of `domain` covered by this shape.
    ///
    /// Scans a cube of `r_max / res + 1` voxels around the center voxel,
    /// skips voxels farther than `r_max` from the center and classifies
    /// the rest. With [`Boundary::Periodic`] voxel positions past a face
    /// are taken unwrapped and their indices wrapped.
    ///
    /// ### Returns
    /// `(voxel_index, penalty)` pairs in scan order.
    pub fn footprint(&self, domain: &Domain, boundary: Boundary) -> Vec<(usize, f64)> {
        let dims = domain.dims.as_array();
        let res = domain.resolution;
        let reach = self.radii.max_element();

        let range = |axis: usize| -> (i64, i64) {
            let r = res[axis];
            let n = dims[axis] as i64;
            let column = ((self.center[axis] - 0.5 * r) / r) as i64;
            let span = reach / r + 1.0;
            let lo = (column as f64 - span) as i64;
            let hi = (column as f64 + span) as i64;
            match boundary {
                Boundary::Periodic => (lo, hi.min(lo + n - 1)),
                Boundary::Clamped => (lo.max(0), hi.min(n - 1)),
            }
        };
        let (xlo, xhi) = range(0);
        let (ylo, yhi) = range(1);
        let (zlo, zhi) = range(2);

        let mut out = Vec::new();
        for k in zlo..=zhi {
            for j in ylo..=yhi {
                for i in xlo..=xhi {
                    let p = DVec3::new(i as f64, j as f64, k as f64) * res;
                    if p.distance(self.center) >= reach {
                        continue;
                    }
                    if let Some(penalty) = self.classify(p) {
                        out.push((domain.dims.wrapped_index(i, j, k), penalty));
                    }
                }
            }
        }
        out
    }
}

/// Superoctahedron half-space tests on shifted components `v = u + 1`.
fn outside_octahedron(v: DVec3, g: f64) -> bool {
    let (a, b, c) = (v.x, v.y, v.z);
    let lo = -0.5 * g;
    let hi = 2.0 - 0.5 * g;
    (-a - b + c) - (lo + lo + 2.0) > 0.0
        || (a - b + c) - (hi + lo + 2.0) > 0.0
        || (a + b + c) - (hi + hi + 2.0) > 0.0
        || (-a + b + c) - (lo + hi + 2.0) > 0.0
        || (-a - b - c) - (lo + lo) > 0.0
        || (a - b - c) - (hi + lo) > 0.0
        || (a + b - c) - (hi + hi) > 0.0
        || (-a + b - c) - (lo + hi) > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Dims;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn sphere_at(diameter: f64, center: DVec3) -> ShapeFrame {
        ShapeFrame::for_grain(ShapeClass::Ellipsoid, &Grain::sphere(diameter).at(center)).unwrap()
    }

    #[test]
    fn sphere_contains_center_not_far_points() {
        let s = sphere_at(2.0, DVec3::new(5.0, 5.0, 5.0));
        assert_relative_eq!(s.radii.x, 1.0, epsilon = 1e-12);

        let center = s.classify(s.center);
        assert!(center.is_some_and(f64::is_finite));
        assert!(s.contains(DVec3::new(5.9, 5.0, 5.0)));
        assert!(!s.contains(DVec3::new(6.5, 5.0, 5.0)));
        assert!(!s.contains(DVec3::new(5.8, 5.8, 5.0)));
    }

    #[test]
    fn penalty_changes_sign_near_surface() {
        assert!(overlap_penalty(0.3) > 0.0);
        assert!(overlap_penalty(0.95) < 0.0);
        assert!(overlap_penalty(0.0).is_finite());
    }

    #[test]
    fn superellipsoid_with_exponent_two_is_ellipsoid() {
        let e = semi_axes(ShapeClass::Ellipsoid, 10.0, 0.8, 0.5, 2.0).unwrap();
        let s = semi_axes(ShapeClass::Superellipsoid, 10.0, 0.8, 0.5, 2.0).unwrap();
        assert_relative_eq!(e.x, s.x, epsilon = 1e-9);
        assert_relative_eq!(e.z, s.z, epsilon = 1e-9);
    }

    #[test]
    fn degenerate_axes_are_rejected() {
        assert!(semi_axes(ShapeClass::Ellipsoid, 10.0, 0.0, 0.5, 2.0).is_none());
        assert!(semi_axes(ShapeClass::Ellipsoid, -1.0, 1.0, 1.0, 2.0).is_none());
    }

    #[test]
    fn octahedron_center_inside_corner_outside() {
        let mut g = Grain::sphere(3.0);
        g.omega3 = 0.5;
        let frame = ShapeFrame::for_grain(ShapeClass::Superoctahedron, &g).unwrap();
        assert!(frame.classify_local(DVec3::ZERO).is_some());
        assert!(frame.classify_local(frame.radii * 0.99).is_none());
        assert!(frame.classify_local(DVec3::new(frame.radii.x * 1.01, 0.0, 0.0)).is_none());
    }

    #[test]
    fn bunge_matrix_is_a_rotation() {
        let g = bunge_matrix(DVec3::new(0.3, 1.2, 2.1));
        let id = g * g.transpose();
        assert!(id.abs_diff_eq(DMat3::IDENTITY, 1e-12));
        assert_relative_eq!(g.determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn classification_survives_frame_roundtrip() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut g = Grain::new(4.0, 0.7, 0.4, 3.0, DVec3::new(0.4, 1.0, 2.2));
        g.centroid = DVec3::new(1.0, -2.0, 0.5);

        for class in [
            ShapeClass::Ellipsoid,
            ShapeClass::Superellipsoid,
            ShapeClass::Superoctahedron,
        ] {
            let mut g = g.clone();
            if class == ShapeClass::Superoctahedron {
                g.omega3 = 0.7;
            }
            let frame = ShapeFrame::for_grain(class, &g).unwrap();
            for _ in 0..200 {
                let local = DVec3::new(
                    rng.random_range(-1.2..1.2),
                    rng.random_range(-1.2..1.2),
                    rng.random_range(-1.2..1.2),
                ) * frame.radii;
                let world = frame.to_world(local);
                let back = frame.to_local(world);
                assert!(back.abs_diff_eq(local, 1e-9));

                // Stay clear of the surface so rounding cannot flip the result.
                let direct = frame.classify_local(local);
                let scaled_in = frame.classify_local(local * 0.999).is_some();
                let scaled_out = frame.classify_local(local * 1.001).is_some();
                if scaled_in == scaled_out {
                    assert_eq!(frame.classify(world).is_some(), direct.is_some());
                }
            }
        }
    }

    #[test]
    fn periodic_footprint_wraps_across_faces() {
        let domain = Domain {
            dims: Dims::cube(10),
            resolution: DVec3::ONE,
        };
        let s = sphere_at(4.0, DVec3::splat(0.2));
        let far = domain.dims.index(9, 0, 0).unwrap();

        let periodic = s.footprint(&domain, Boundary::Periodic);
        assert!(periodic.iter().any(|&(idx, _)| idx == far));

        let clamped = s.footprint(&domain, Boundary::Clamped);
        assert!(clamped.iter().all(|&(idx, _)| idx != far));
        assert!(clamped.len() < periodic.len());
    }

    #[test]
    fn footprint_approximates_volume() {
        let domain = Domain {
            dims: Dims::cube(12),
            resolution: DVec3::ONE,
        };
        let s = sphere_at(6.0, DVec3::splat(6.0));
        let fp = s.footprint(&domain, Boundary::Periodic);
        // Exact sphere volume is ~113.
        assert!(fp.len() > 90 && fp.len() < 140, "got {}", fp.len());

        let mut ids: Vec<usize> = fp.iter().map(|&(i, _)| i).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), fp.len());
    }
}
