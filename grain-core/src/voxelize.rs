//! Rasterizes packed grains onto the full-resolution grid.
//!
//! Grains are drawn in id order. A voxel claimed by a second grain is
//! marked [`CONFLICT`] and stays conflicted for every later grain, so the
//! result depends on the order of the grain list.

use tracing::{debug, warn};

use crate::config::{PACKING_COARSENING, ShapeClass};
use crate::grain::Grain;
use crate::grid::{Domain, VoxelGrid};
use crate::shape::{Boundary, ShapeFrame};
use crate::types::{CONFLICT, Label, UNASSIGNED, label_for};

/// Output of [`voxelize`].
#[derive(Clone, Debug)]
pub struct Rasterized {
    pub grid: VoxelGrid<Label>,
    pub domain: Domain,
    /// Voxels claimed by two or more grains.
    pub conflicts: usize,
    /// Voxels no grain claimed.
    pub unassigned: usize,
}

/// Draws every grain onto a grid [`PACKING_COARSENING`] times finer than `coarse`.
///
/// ### Parameters
/// - `grains` - Packed grains; grain `i` is drawn with label `i + 1`.
///   Each grain's `semi_axes` is refreshed from its shape.
/// - `coarse` - The packing domain.
/// - `class` - Shape family used during packing.
pub fn voxelize(grains: &mut [Grain], coarse: &Domain, class: ShapeClass) -> Rasterized {
    let domain = coarse.refined(PACKING_COARSENING as usize);
    let mut grid = VoxelGrid::new(domain.dims, UNASSIGNED);

    for (id, grain) in grains.iter_mut().enumerate() {
        let Some(frame) = ShapeFrame::for_grain(class, grain) else {
            warn!(grain = id, diameter = grain.diameter, "skipping grain with degenerate shape");
            continue;
        };
        grain.semi_axes = frame.radii;
        let label = label_for(id);
        for (v, _) in frame.footprint(&domain, Boundary::Periodic) {
            let cell = &mut grid[v];
            *cell = match *cell {
                UNASSIGNED => label,
                l if l > 0 => CONFLICT,
                l => l,
            };
        }
    }

    let conflicts = grid.iter().filter(|&&l| l < 0).count();
    let unassigned = grid.iter().filter(|&&l| l == UNASSIGNED).count();
    debug!(
        grains = grains.len(),
        voxels = domain.dims.len(),
        conflicts,
        unassigned,
        "grains rasterized"
    );

    Rasterized {
        grid,
        domain,
        conflicts,
        unassigned,
    }
}
