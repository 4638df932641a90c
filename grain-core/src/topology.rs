//! Grain adjacency from a fully labeled grid.
//!
//! The scan is non-periodic:
//! 1. Grains owning a voxel on a domain face become surface grains.
//! 2. Every face between two different labels is a shared face; each voxel
//!    records how many of its faces are shared and the last label across one.
//! 3. Shared faces between matrix grains are summed into interface areas,
//!    turned into sorted neighbor links with reverse-link indices.

use std::collections::BTreeMap;

use glam::DVec3;
use tracing::debug;

use crate::grain::{Grain, NeighborLink};
use crate::grid::{Domain, VoxelGrid};
use crate::types::{Label, UNASSIGNED, grain_for};

/// Per-voxel boundary information.
#[derive(Clone, Debug)]
pub struct SurfaceVoxels {
    /// Number of faces shared with a different label.
    pub faces: VoxelGrid<u8>,
    /// Label across the last shared face, or [`UNASSIGNED`].
    pub nearest: VoxelGrid<Label>,
}

/// Output of [`build_topology`].
#[derive(Clone, Debug)]
pub struct Topology {
    pub voxels: SurfaceVoxels,
    /// Interface area summed over pairs with at least one interior grain.
    pub total_boundary_area: f64,
}

/// Marks voxels that touch a different label through a face.
pub fn surface_voxels(grid: &VoxelGrid<Label>) -> SurfaceVoxels {
    let dims = grid.dims();
    let mut faces = VoxelGrid::new(dims, 0u8);
    let mut nearest = VoxelGrid::new(dims, UNASSIGNED);

    for v in 0..grid.len() {
        let label = grid[v];
        for (_, n) in dims.face_neighbors(v) {
            let other = grid[n];
            if other >= 0 && other != label {
                faces[v] += 1;
                nearest[v] = other;
            }
        }
    }
    SurfaceVoxels { faces, nearest }
}

/// Builds surface flags, neighbor links and interface areas.
///
/// ### Parameters
/// - `grid` - Labels after gap filling.
/// - `grains` - Matrix grains owning labels `1..=grains.len()`; their
///   `surface` and `neighbors` fields are overwritten.
/// - `domain` - Supplies face areas per axis.
pub fn build_topology(grid: &VoxelGrid<Label>, grains: &mut [Grain], domain: &Domain) -> Topology {
    let dims = grid.dims();
    let k = grains.len();
    let matrix = |label: Label| grain_for(label).filter(|&g| g < k);

    let mut areas: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); k];
    for g in grains.iter_mut() {
        g.surface = false;
        g.neighbors.clear();
    }

    for v in 0..grid.len() {
        let Some(g) = matrix(grid[v]) else {
            continue;
        };
        if dims.on_boundary(v) {
            grains[g].surface = true;
        }
        for (axis, n) in dims.face_neighbors(v) {
            if let Some(h) = matrix(grid[n])
                && h != g
            {
                *areas[g].entry(h).or_insert(0.0) += domain.face_area(axis);
            }
        }
    }

    for (g, links) in areas.iter().enumerate() {
        grains[g].neighbors = links
            .iter()
            .map(|(&h, &area)| NeighborLink {
                grain: h,
                area,
                misorientation: DVec3::ZERO,
                reverse: 0,
            })
            .collect();
    }
    for g in 0..k {
        for i in 0..grains[g].neighbors.len() {
            let h = grains[g].neighbors[i].grain;
            if let Ok(r) = grains[h].neighbors.binary_search_by_key(&g, |l| l.grain) {
                grains[g].neighbors[i].reverse = r;
            }
        }
    }

    let total_boundary_area: f64 = grains
        .iter()
        .enumerate()
        .flat_map(|(g, grain)| {
            grain
                .neighbors
                .iter()
                .filter(move |l| l.grain > g)
                .map(move |l| (grain.surface, l))
        })
        .filter(|(surface, l)| !surface || !grains[l.grain].surface)
        .map(|(_, l)| l.area)
        .sum();

    let surface_grains = grains.iter().filter(|g| g.surface).count();
    debug!(
        grains = k,
        surface_grains,
        total_boundary_area,
        "topology built"
    );

    Topology {
        voxels: surface_voxels(grid),
        total_boundary_area,
    }
}
