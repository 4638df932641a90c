use glam::{DQuat, DVec3};

use crate::types::GrainId;

/// Shared boundary between two grains.
///
/// ### Fields
/// - `grain` - The neighboring grain.
/// - `area` - Interface area.
/// - `misorientation` - Cached misorientation coordinates of the pair.
/// - `reverse` - Index of the matching link in the neighbor's list.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NeighborLink {
    pub grain: GrainId,
    pub area: f64,
    pub misorientation: DVec3,
    pub reverse: usize,
}

/// A grain candidate or placed grain.
///
/// Sampling fills the size, shape and shape-orientation fields; packing
/// sets `centroid`, `active` and `footprint`; voxelization and topology
/// fill `voxel_count`, `surface` and `neighbors`; texture matching owns
/// `euler`, `orientation` and `odf_bin`.
#[derive(Clone, Debug, PartialEq)]
pub struct Grain {
    pub volume: f64,
    pub diameter: f64,
    pub b_over_a: f64,
    pub c_over_a: f64,
    pub omega3: f64,
    pub shape_euler: DVec3,
    pub semi_axes: DVec3,

    pub euler: DVec3,
    pub orientation: DQuat,
    pub odf_bin: usize,

    pub centroid: DVec3,
    pub active: bool,
    /// Voxels covered on the current grid with their overlap penalty.
    pub footprint: Vec<(usize, f64)>,

    pub neighbors: Vec<NeighborLink>,
    pub surface: bool,
    pub voxel_count: usize,
}

impl Grain {
    /// Creates an unplaced grain with the given size and shape.
    pub fn new(diameter: f64, b_over_a: f64, c_over_a: f64, omega3: f64, shape_euler: DVec3) -> Self {
        let r = 0.5 * diameter;
        Self {
            volume: 4.0 / 3.0 * std::f64::consts::PI * r * r * r,
            diameter,
            b_over_a,
            c_over_a,
            omega3,
            shape_euler,
            semi_axes: DVec3::ZERO,
            euler: DVec3::ZERO,
            orientation: DQuat::IDENTITY,
            odf_bin: 0,
            centroid: DVec3::ZERO,
            active: false,
            footprint: Vec::new(),
            neighbors: Vec::new(),
            surface: false,
            voxel_count: 0,
        }
    }

    /// Creates a sphere of the given diameter with identity orientations.
    pub fn sphere(diameter: f64) -> Self {
        Self::new(diameter, 1.0, 1.0, 1.0, DVec3::ZERO)
    }

    pub fn at(mut self, centroid: DVec3) -> Self {
        self.centroid = centroid;
        self
    }

    /// Integer diameter bin, `floor(diameter)`.
    pub fn diameter_bin(&self) -> usize {
        self.diameter.max(0.0) as usize
    }

    /// Sum of shared interface area.
    pub fn boundary_area(&self) -> f64 {
        self.neighbors.iter().map(|n| n.area).sum()
    }
}
