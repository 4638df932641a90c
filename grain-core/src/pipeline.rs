//! End-to-end synthesis run.
//!
//! [`synthesize`] drives the phases in order:
//! 1. Validation of the configuration and statistics tables.
//! 2. Candidate sampling and Monte Carlo packing on the coarse grid.
//! 3. Rasterization on the fine grid, then gap filling.
//! 4. Topology: surface grains, neighbor links, interface areas.
//! 5. Texture matching against the target ODF and MDF.
//! 6. Optional precipitate insertion.
//!
//! One [`StdRng`] seeded from [`SynthConfig::seed`] feeds every random draw,
//! so a run is reproducible from its configuration and tables.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::{SeedableRng, rngs::StdRng};
use tracing::info;

use crate::config::SynthConfig;
use crate::error::{Result, SynthError};
use crate::gap_fill::fill_gaps;
use crate::orientation::Disorientation;
use crate::output::{GrainRecord, Microstructure, PrecipitateRecord};
use crate::packing::{Packer, generate_candidates, packing_domain, scatter};
use crate::precipitates::PrecipitateInserter;
use crate::sampler::SamplingReport;
use crate::stats::StatsTable;
use crate::texture::TextureMatcher;
use crate::topology::{build_topology, surface_voxels};
use crate::types::label_for;
use crate::voxelize::voxelize;

/// Shared flag that stops a running synthesis.
///
/// Clones share the flag; both Monte Carlo loops check it between
/// iterations.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Builds a microstructure from statistics.
///
/// ### Parameters
/// - `cfg` - Run configuration.
/// - `stats` - Input tables; validated and normalized on a copy.
/// - `disorientation` - Misorientation routine used by texture matching.
/// - `cancel` - Checked between Monte Carlo iterations.
///
/// ### Returns
/// The finished [`Microstructure`], or the first fatal [`SynthError`].
pub fn synthesize(
    cfg: &SynthConfig,
    stats: &StatsTable,
    disorientation: &dyn Disorientation,
    cancel: &CancelToken,
) -> Result<Microstructure> {
    cfg.validate()?;
    let stats = stats.clone().validated(cfg.symmetry)?;
    let precipitate_phase = match (cfg.precipitates, stats.precipitates.as_ref()) {
        (Some(settings), Some(phase)) => Some((settings, phase)),
        (Some(_), None) => {
            return Err(SynthError::InputData {
                table: "precipitate",
                reason: "precipitates requested but no precipitate statistics given".into(),
            });
        }
        (None, _) => None,
    };

    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let mut sampling = SamplingReport::default();

    // Packing
    let mut candidates = generate_candidates(cfg, &stats.matrix, &mut rng, &mut sampling)?;
    let coarse = packing_domain(cfg, &candidates);
    scatter(&mut candidates, &coarse, &mut rng);
    info!(
        candidates = candidates.len(),
        dims = ?coarse.dims.as_array(),
        "packing started"
    );
    let mut packer = Packer::new(candidates, coarse, cfg, &stats.matrix);
    packer.activate_initial(&mut rng);
    packer.run(cfg.packing_iterations, &mut rng, cancel)?;
    let packed = packer.finish();
    let mut grains = packed.grains;

    // Voxels
    let raster = voxelize(&mut grains, &packed.domain, cfg.shape_class);
    let domain = raster.domain;
    let mut labels = raster.grid;
    fill_gaps(&mut labels, &mut grains, &domain)?;
    info!(
        grains = grains.len(),
        dims = ?domain.dims.as_array(),
        conflicts = raster.conflicts,
        unassigned = raster.unassigned,
        "grain structure voxelized"
    );
    let topology = build_topology(&labels, &mut grains, &domain);

    // Texture
    let texture = {
        let mut matcher = TextureMatcher::new(
            &mut grains,
            &stats,
            cfg.symmetry,
            disorientation,
            topology.total_boundary_area,
        );
        matcher.assign_initial(&mut rng);
        matcher.run(&cfg.texture, &mut rng, cancel)?;
        matcher.finish()
    };

    // Precipitates
    let k = grains.len();
    let mut surface = topology.voxels;
    let mut precipitates = Vec::new();
    if let Some((settings, phase)) = precipitate_phase {
        let inserter = PrecipitateInserter {
            phase,
            settings,
            class: cfg.shape_class,
        };
        let placed = inserter.insert(
            &mut labels,
            &mut grains,
            &domain,
            &surface.faces,
            &mut rng,
            &mut sampling,
        )?;
        precipitates = placed
            .iter()
            .enumerate()
            .map(|(i, p)| PrecipitateRecord {
                label: label_for(k + i),
                centroid: p.centroid,
                volume: p.volume,
                diameter: p.diameter,
                voxel_count: p.voxel_count,
            })
            .collect();
        surface = surface_voxels(&labels);
    }

    info!(
        grains = k,
        precipitates = precipitates.len(),
        filling_error = packed.errors.filling,
        odf_error = texture.odf_error,
        mdf_error = texture.mdf_error,
        "synthesis finished"
    );

    Ok(Microstructure {
        domain,
        labels,
        surface_faces: surface.faces,
        nearest: surface.nearest,
        grains: grains
            .iter()
            .enumerate()
            .map(|(id, g)| GrainRecord::from_grain(id, g))
            .collect(),
        precipitates,
        odf: texture.odf,
        mdf: texture.mdf,
        packing_errors: packed.errors,
        packing_trace: packed.trace,
        odf_error: texture.odf_error,
        mdf_error: texture.mdf_error,
        texture_trace: texture.trace,
        sampling,
    })
}
