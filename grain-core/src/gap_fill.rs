//! Majority-vote resolution of conflicted and unassigned voxels.
//!
//! Three passes, each repeated until nothing is left to resolve:
//! 1. Conflicted voxels take the most common positive face-neighbor label.
//! 2. Unassigned voxels do the same, but only grains still below their
//!    target volume may vote. The pass ends quietly when it stalls.
//! 3. Remaining unassigned voxels, unconstrained.
//!
//! Votes of a sweep are collected first and applied after it. Neighbors
//! are the six face neighbors without periodic wrap; among tied labels the
//! first one to reach the top count wins.

use tracing::debug;

use crate::error::{Result, SynthError};
use crate::grain::Grain;
use crate::grid::{Domain, VoxelGrid};
use crate::types::{Label, UNASSIGNED, grain_for};

/// Resolves every non-positive voxel and refreshes grain voxel counts.
///
/// ### Parameters
/// - `grid` - Rasterized labels; holds only positive labels on return.
/// - `grains` - Grains owning labels `1..=grains.len()`.
/// - `domain` - Supplies the voxel volume for the pass 2 budget.
///
/// ### Returns
/// [`SynthError::UnresolvableVoxel`] if pass 1 or pass 3 stalls.
pub fn fill_gaps(grid: &mut VoxelGrid<Label>, grains: &mut [Grain], domain: &Domain) -> Result<()> {
    let conflicted: Vec<usize> = (0..grid.len()).filter(|&v| grid[v] < 0).collect();
    let remaining = resolve(grid, conflicted, 1, None)?;
    debug!(remaining, "conflicts resolved");

    recount(grid, grains);
    let mut budget = Budget::new(grains, domain.voxel_volume());
    let empty: Vec<usize> = (0..grid.len()).filter(|&v| grid[v] == UNASSIGNED).collect();
    let remaining = resolve(grid, empty, 2, Some(&mut budget))?;
    debug!(remaining, "gaps filled within grain budgets");

    let empty: Vec<usize> = (0..grid.len()).filter(|&v| grid[v] == UNASSIGNED).collect();
    resolve(grid, empty, 3, None)?;

    recount(grid, grains);
    debug!(voxels = grid.len(), "gap filling finished");
    Ok(())
}

/// Live voxel counts of the grains voting in pass 2.
///
/// A grain may vote while its voxel volume is below its target volume.
struct Budget {
    counts: Vec<usize>,
    limits: Vec<f64>,
}

impl Budget {
    fn new(grains: &[Grain], voxel_volume: f64) -> Self {
        Self {
            counts: grains.iter().map(|g| g.voxel_count).collect(),
            limits: grains.iter().map(|g| g.volume / voxel_volume).collect(),
        }
    }

    fn allows(&self, label: Label) -> bool {
        grain_for(label)
            .filter(|&g| g < self.counts.len())
            .is_some_and(|g| (self.counts[g] as f64) < self.limits[g])
    }

    fn record(&mut self, label: Label) {
        if let Some(c) = grain_for(label).and_then(|g| self.counts.get_mut(g)) {
            *c += 1;
        }
    }
}

/// Runs sweeps over `pending` until it is empty or a sweep changes nothing.
///
/// With a `budget`, only grains it allows may vote, and its counts grow
/// with every applied vote.
///
/// ### Returns
/// The number of voxels still unresolved. Passes 1 and 3 turn a stall into
/// [`SynthError::UnresolvableVoxel`].
fn resolve(
    grid: &mut VoxelGrid<Label>,
    mut pending: Vec<usize>,
    pass: u8,
    mut budget: Option<&mut Budget>,
) -> Result<usize> {
    let dims = grid.dims();
    let mut tally: Vec<(Label, u32)> = Vec::with_capacity(6);
    let mut votes: Vec<(usize, Label)> = Vec::new();

    while !pending.is_empty() {
        votes.clear();
        pending.retain(|&v| {
            tally.clear();
            let mut best: Option<(Label, u32)> = None;
            for (_, n) in dims.face_neighbors(v) {
                let label = grid[n];
                if label <= 0 || budget.as_ref().is_some_and(|b| !b.allows(label)) {
                    continue;
                }
                let count = match tally.iter_mut().find(|(l, _)| *l == label) {
                    Some((_, c)) => {
                        *c += 1;
                        *c
                    }
                    None => {
                        tally.push((label, 1));
                        1
                    }
                };
                if best.is_none_or(|(_, top)| count > top) {
                    best = Some((label, count));
                }
            }
            match best {
                Some((label, _)) => {
                    votes.push((v, label));
                    false
                }
                None => true,
            }
        });

        if votes.is_empty() {
            if pass == 2 {
                break;
            }
            return Err(SynthError::UnresolvableVoxel {
                pass,
                remaining: pending.len(),
            });
        }
        for &(v, label) in &votes {
            grid[v] = label;
            if let Some(b) = budget.as_deref_mut() {
                b.record(label);
            }
        }
    }
    Ok(pending.len())
}

/// Sets every grain's `voxel_count` from the grid.
pub(crate) fn recount(grid: &VoxelGrid<Label>, grains: &mut [Grain]) {
    for g in grains.iter_mut() {
        g.voxel_count = 0;
    }
    for &label in grid.iter() {
        if let Some(g) = grain_for(label).and_then(|id| grains.get_mut(id)) {
            g.voxel_count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Dims;
    use crate::types::CONFLICT;
    use glam::DVec3;

    fn unit_domain(dims: Dims) -> Domain {
        Domain {
            dims,
            resolution: DVec3::ONE,
        }
    }

    #[test]
    fn dominant_seed_fills_everything() {
        let dims = Dims::cube(10);
        let mut grid = VoxelGrid::new(dims, UNASSIGNED);
        for v in 0..dims.len() {
            let [i, j, _] = dims.coords(v);
            if i < 7 {
                grid[v] = 1;
            } else if j % 3 == 0 {
                grid[v] = CONFLICT;
            }
        }
        let mut grains = vec![Grain::sphere(20.0)];

        fill_gaps(&mut grid, &mut grains, &unit_domain(dims)).unwrap();
        assert!(grid.iter().all(|&l| l == 1));
        assert_eq!(grains[0].voxel_count, 1000);
    }

    #[test]
    fn voxel_counts_sum_to_total() {
        let dims = Dims::new(8, 4, 4);
        let mut grid = VoxelGrid::new(dims, UNASSIGNED);
        grid[0] = 1;
        grid[dims.len() - 1] = 2;
        let mut grains = vec![Grain::sphere(1.0), Grain::sphere(1.0)];

        fill_gaps(&mut grid, &mut grains, &unit_domain(dims)).unwrap();
        assert!(grid.iter().all(|&l| l > 0));
        let total: usize = grains.iter().map(|g| g.voxel_count).sum();
        assert_eq!(total, dims.len());
    }

    #[test]
    fn first_label_wins_ties() {
        let dims = Dims::new(3, 1, 1);
        let mut grid = VoxelGrid::new(dims, UNASSIGNED);
        grid[0] = 2;
        grid[1] = CONFLICT;
        grid[2] = 1;
        let mut grains = vec![Grain::sphere(5.0), Grain::sphere(5.0)];

        fill_gaps(&mut grid, &mut grains, &unit_domain(dims)).unwrap();
        assert_eq!(grid.as_slice(), &[2, 2, 1]);
    }

    #[test]
    fn budget_pass_skips_full_grains() {
        let dims = Dims::new(3, 1, 1);
        let mut grid = VoxelGrid::new(dims, UNASSIGNED);
        grid[0] = 1;
        grid[2] = 2;
        // Grain 1 already exceeds its volume, grain 2 does not.
        let mut grains = vec![Grain::sphere(0.5), Grain::sphere(5.0)];

        fill_gaps(&mut grid, &mut grains, &unit_domain(dims)).unwrap();
        assert_eq!(grid.as_slice(), &[1, 2, 2]);
        assert_eq!(grains[0].voxel_count, 1);
        assert_eq!(grains[1].voxel_count, 2);
    }

    #[test]
    fn budget_pass_stops_a_grain_at_its_volume() {
        let dims = Dims::new(12, 1, 1);
        let mut grid = VoxelGrid::new(dims, UNASSIGNED);
        grid[0] = 1;
        grid[11] = 2;
        // Grain 1 has room for one more voxel, grain 2 for none.
        let mut grains = vec![Grain::sphere(1.5), Grain::sphere(1.0)];

        fill_gaps(&mut grid, &mut grains, &unit_domain(dims)).unwrap();
        // Pass 2 stops grain 1 at two voxels; pass 3 then grows both
        // grains evenly and the lower label wins the middle voxel.
        assert_eq!(grid.as_slice(), &[1, 1, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2]);
        assert_eq!(grains[0].voxel_count, 7);
        assert_eq!(grains[1].voxel_count, 5);
    }

    #[test]
    fn isolated_conflicts_report_a_stall() {
        let dims = Dims::cube(2);
        let mut grid = VoxelGrid::new(dims, CONFLICT);
        let err = fill_gaps(&mut grid, &mut [], &unit_domain(dims)).unwrap_err();
        assert!(matches!(
            err,
            SynthError::UnresolvableVoxel {
                pass: 1,
                remaining: 8
            }
        ));
    }
}
