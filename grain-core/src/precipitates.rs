//! Second-phase particles stamped into a finished matrix.
//!
//! Precipitates are drawn with the truncated sampler until their volume
//! reaches the requested share of the domain, then placed largest first.
//! A placement site is rejected when too much of the shape already
//! overlaps earlier precipitates; a precipitate that runs out of sites is
//! skipped with a warning.

use rand::Rng;
use tracing::{info, warn};

use crate::config::{PrecipitateConfig, PrecipitatePlacement, ShapeClass};
use crate::error::Result;
use crate::gap_fill::recount;
use crate::grain::Grain;
use crate::grid::{Domain, VoxelGrid};
use crate::sampler::{GrainSampler, MAX_RETRIES, SamplingReport};
use crate::shape::{Boundary, ShapeFrame};
use crate::stats::PhaseStats;
use crate::types::{Label, label_for};

/// Largest share, in percent, of a precipitate's voxels that may already
/// belong to another precipitate.
const MAX_OVERLAP_PERCENT: f64 = 0.25;

/// Places precipitates of one phase.
pub struct PrecipitateInserter<'a> {
    pub phase: &'a PhaseStats,
    pub settings: PrecipitateConfig,
    pub class: ShapeClass,
}

impl PrecipitateInserter<'_> {
    /// Draws, places and labels precipitates.
    ///
    /// ### Parameters
    /// - `grid` - Fully labeled matrix; precipitate voxels get labels
    ///   `K + 1, K + 2, ...` in placement order.
    /// - `matrix` - The `K` matrix grains; voxel counts are refreshed.
    /// - `domain` - Geometry of `grid`.
    /// - `surface_faces` - Shared-face counts; nonzero voxels are boundary sites.
    /// - `rng` - The run's random number generator.
    /// - `report` - Receives the count of precipitates left unplaced.
    ///
    /// ### Returns
    /// The placed precipitates, with `voxel_count` set.
    pub fn insert<R: Rng + ?Sized>(
        &self,
        grid: &mut VoxelGrid<Label>,
        matrix: &mut [Grain],
        domain: &Domain,
        surface_faces: &VoxelGrid<u8>,
        rng: &mut R,
        report: &mut SamplingReport,
    ) -> Result<Vec<Grain>> {
        let sampler = GrainSampler::truncated(self.phase, self.class)?;
        let target = self.settings.volume_percent / 100.0 * domain.volume();
        let mut drawn = Vec::new();
        let mut total = 0.0;
        while total < target {
            let p = sampler.sample(rng, report);
            total += p.volume;
            drawn.push(p);
        }
        drawn.sort_by(|a, b| b.volume.total_cmp(&a.volume));

        let k = matrix.len();
        let first = label_for(k);
        let is_precipitate = |label: Label| label >= first;

        let mut pool: Vec<usize> = match self.settings.placement {
            PrecipitatePlacement::Boundary => (0..grid.len())
                .filter(|&v| surface_faces[v] > 0)
                .collect(),
            PrecipitatePlacement::Bulk => (0..grid.len()).collect(),
        };

        let mut placed: Vec<Grain> = Vec::new();
        let mut unplaced = 0;
        for mut p in drawn {
            let mut sites = pool.clone();
            let mut footprint = None;
            let mut attempts = 0;
            while !sites.is_empty() && attempts < MAX_RETRIES {
                attempts += 1;
                let site = sites.swap_remove(rng.random_range(0..sites.len()));
                p.centroid = domain.position(site);
                let Some(frame) = ShapeFrame::for_grain(self.class, &p) else {
                    break;
                };
                let fp = frame.footprint(domain, Boundary::Clamped);
                if fp.is_empty() {
                    continue;
                }
                let taken = fp.iter().filter(|&&(v, _)| is_precipitate(grid[v])).count();
                if 100.0 * taken as f64 / fp.len() as f64 > MAX_OVERLAP_PERCENT {
                    continue;
                }
                p.semi_axes = frame.radii;
                footprint = Some(fp);
                break;
            }

            let Some(fp) = footprint else {
                unplaced += 1;
                report.unplaced_precipitates += 1;
                warn!(
                    diameter = p.diameter,
                    attempts,
                    "no free site for precipitate"
                );
                continue;
            };

            let label = label_for(k + placed.len());
            let mut count = 0;
            for (v, _) in fp {
                let cell = &mut grid[v];
                if *cell > 0 && !is_precipitate(*cell) {
                    *cell = label;
                    count += 1;
                }
            }
            p.voxel_count = count;
            p.active = true;
            pool.retain(|&v| !is_precipitate(grid[v]));
            placed.push(p);
        }

        recount(grid, matrix);
        info!(
            placed = placed.len(),
            unplaced,
            target_volume = target,
            "precipitates inserted"
        );
        Ok(placed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Dims;
    use crate::topology::surface_voxels;
    use glam::DVec3;
    use rand::{SeedableRng, rngs::StdRng};

    fn phase() -> PhaseStats {
        PhaseStats::equiaxed(3.0f64.ln(), 0.1, 2, 4)
    }

    fn halves() -> (VoxelGrid<Label>, Vec<Grain>, Domain) {
        let dims = Dims::new(20, 10, 10);
        let mut grid = VoxelGrid::new(dims, 1);
        for v in 0..dims.len() {
            if dims.coords(v)[0] >= 10 {
                grid[v] = 2;
            }
        }
        let mut grains = vec![Grain::sphere(10.0), Grain::sphere(10.0)];
        recount(&grid, &mut grains);
        let domain = Domain {
            dims,
            resolution: DVec3::ONE,
        };
        (grid, grains, domain)
    }

    #[test]
    fn boundary_precipitates_sit_on_the_interface() {
        let (mut grid, mut grains, domain) = halves();
        let faces = surface_voxels(&grid).faces;
        let phase = phase();
        let inserter = PrecipitateInserter {
            phase: &phase,
            settings: PrecipitateConfig {
                placement: PrecipitatePlacement::Boundary,
                volume_percent: 2.0,
            },
            class: ShapeClass::Ellipsoid,
        };
        let mut report = SamplingReport::default();
        let placed = inserter
            .insert(
                &mut grid,
                &mut grains,
                &domain,
                &faces,
                &mut StdRng::seed_from_u64(6),
                &mut report,
            )
            .unwrap();

        assert!(!placed.is_empty());
        for (i, p) in placed.iter().enumerate() {
            assert!(p.centroid.x == 9.0 || p.centroid.x == 10.0);
            let label = label_for(2 + i);
            let voxels = grid.iter().filter(|&&l| l == label).count();
            assert_eq!(voxels, p.voxel_count);
            assert!(voxels > 0);
        }
        let matrix: usize = grains.iter().map(|g| g.voxel_count).sum();
        let precip: usize = placed.iter().map(|p| p.voxel_count).sum();
        assert_eq!(matrix + precip, domain.dims.len());
        assert_eq!(report.unplaced_precipitates, 0);
    }

    #[test]
    fn largest_precipitates_are_placed_first() {
        let (mut grid, mut grains, domain) = halves();
        let faces = surface_voxels(&grid).faces;
        let phase = phase();
        let inserter = PrecipitateInserter {
            phase: &phase,
            settings: PrecipitateConfig {
                placement: PrecipitatePlacement::Bulk,
                volume_percent: 5.0,
            },
            class: ShapeClass::Ellipsoid,
        };
        let placed = inserter
            .insert(
                &mut grid,
                &mut grains,
                &domain,
                &faces,
                &mut StdRng::seed_from_u64(8),
                &mut SamplingReport::default(),
            )
            .unwrap();
        assert!(placed.windows(2).all(|w| w[0].volume >= w[1].volume));
    }

    #[test]
    fn missing_sites_are_reported() {
        let dims = Dims::cube(8);
        let mut grid = VoxelGrid::new(dims, 1);
        let mut grains = vec![Grain::sphere(8.0)];
        let domain = Domain {
            dims,
            resolution: DVec3::ONE,
        };
        // A single grain has no boundary voxels.
        let faces = surface_voxels(&grid).faces;
        let phase = phase();
        let inserter = PrecipitateInserter {
            phase: &phase,
            settings: PrecipitateConfig {
                placement: PrecipitatePlacement::Boundary,
                volume_percent: 5.0,
            },
            class: ShapeClass::Ellipsoid,
        };
        let mut report = SamplingReport::default();
        let placed = inserter
            .insert(
                &mut grid,
                &mut grains,
                &domain,
                &faces,
                &mut StdRng::seed_from_u64(1),
                &mut report,
            )
            .unwrap();

        assert!(placed.is_empty());
        assert!(report.unplaced_precipitates > 0);
        assert!(grid.iter().all(|&l| l == 1));
        assert_eq!(grains[0].voxel_count, dims.len());
    }
}
