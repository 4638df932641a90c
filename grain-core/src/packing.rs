//! Monte Carlo packing of grain candidates on the coarse grid.
//!
//! The typical sequence looks like:
//! 1. [`generate_candidates`] - draw `num_grains * candidate_multiplier`
//!    candidates from the matrix statistics.
//! 2. [`packing_domain`] and [`scatter`] - size the coarse grid and place
//!    every candidate centroid uniformly in it.
//! 3. [`Packer::new`] - precompute every candidate's footprint and, when
//!    the neighborhood term is weighted, the distance rings.
//! 4. [`Packer::activate_initial`] - activate `num_grains` random candidates.
//! 5. [`Packer::run`] - a fixed number of greedy add / remove / swap moves.
//! 6. [`Packer::finish`] - compact the active set into grains `0..K`.

use glam::DVec3;
use rand::Rng;
use tracing::{debug, info};

use crate::config::{ErrorWeights, SynthConfig};
use crate::error::{Result, SynthError};
use crate::grain::Grain;
use crate::grid::{Domain, VoxelGrid};
use crate::neighbor_histogram::NeighborHistogram;
use crate::pipeline::CancelToken;
use crate::rings::NeighborRings;
use crate::sampler::{GrainSampler, SamplingReport};
use crate::shape::{Boundary, ShapeFrame};
use crate::stats::{PhaseStats, RINGS};
use crate::types::GrainId;

/// Iterations between two trace samples.
pub const TRACE_INTERVAL: usize = 50;

/// Ring whose list feeds the swap-nearest move.
const NEAREST_RING: usize = 1;

/// Current values of the three packing error terms.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PackingErrors {
    pub filling: f64,
    pub size_distribution: f64,
    pub neighborhood: f64,
}

impl PackingErrors {
    /// Weighted sum of the relative changes from `self` to `next`.
    ///
    /// Terms with a zero weight are skipped.
    pub fn weighted_change(&self, next: &PackingErrors, weights: &ErrorWeights) -> f64 {
        let mut total = 0.0;
        if weights.filling > 0.0 {
            total += weights.filling * relative_change(self.filling, next.filling);
        }
        if weights.size_distribution > 0.0 {
            total += weights.size_distribution
                * relative_change(self.size_distribution, next.size_distribution);
        }
        if weights.neighborhood > 0.0 {
            total += weights.neighborhood * relative_change(self.neighborhood, next.neighborhood);
        }
        total
    }
}

/// `(new - old) / |old|`, or the plain difference when `old` is zero.
fn relative_change(old: f64, new: f64) -> f64 {
    if old == 0.0 {
        new - old
    } else {
        (new - old) / old.abs()
    }
}

/// Error state recorded every [`TRACE_INTERVAL`] iterations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PackingSample {
    pub iteration: usize,
    pub errors: PackingErrors,
    pub accepted: usize,
}

/// A proposed change of the active set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Move {
    Add(GrainId),
    Remove(GrainId),
    Swap { add: GrainId, remove: GrainId },
}

impl Move {
    fn parts(self) -> (Option<GrainId>, Option<GrainId>) {
        match self {
            Move::Add(a) => (Some(a), None),
            Move::Remove(r) => (None, Some(r)),
            Move::Swap { add, remove } => (Some(add), Some(remove)),
        }
    }
}

/// Result of one packing iteration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepOutcome {
    /// The evaluated move, or `None` if none was possible.
    pub proposed: Option<Move>,
    pub accepted: bool,
    pub weighted_change: f64,
}

/// Grains sharing one coarse voxel.
#[derive(Clone, Copy, Debug, Default)]
struct Occupancy {
    count: u32,
    penalty: f64,
}

/// Final state of a packing run.
#[derive(Clone, Debug)]
pub struct PackingOutcome {
    /// Active grains in ascending candidate order; grain `i` gets label `i + 1`.
    pub grains: Vec<Grain>,
    pub domain: Domain,
    pub errors: PackingErrors,
    pub accepted: usize,
    pub trace: Vec<PackingSample>,
}

/// Draws the candidate pool.
pub fn generate_candidates<R: Rng + ?Sized>(
    cfg: &SynthConfig,
    phase: &PhaseStats,
    rng: &mut R,
    report: &mut SamplingReport,
) -> Result<Vec<Grain>> {
    let sampler = GrainSampler::new(phase, cfg.shape_class)?;
    let count = cfg.num_grains * cfg.candidate_multiplier;
    Ok((0..count).map(|_| sampler.sample(rng, report)).collect())
}

/// Coarse packing grid for a candidate pool.
///
/// Without an explicit `domain_size` the domain is a cube holding the pool
/// volume divided by `candidate_multiplier`.
pub fn packing_domain(cfg: &SynthConfig, candidates: &[Grain]) -> Domain {
    let size = cfg.domain_size.unwrap_or_else(|| {
        let total: f64 = candidates.iter().map(|g| g.volume).sum();
        DVec3::splat((total / cfg.candidate_multiplier as f64).cbrt())
    });
    Domain::covering(size, cfg.packing_resolution())
}

/// Places every centroid uniformly inside the periodic box.
pub fn scatter<R: Rng + ?Sized>(grains: &mut [Grain], domain: &Domain, rng: &mut R) {
    let size = domain.size();
    for g in grains {
        g.centroid = DVec3::new(
            rng.random::<f64>() * size.x,
            rng.random::<f64>() * size.y,
            rng.random::<f64>() * size.z,
        );
    }
}

/// Greedy optimizer over the active subset of a candidate pool.
pub struct Packer {
    domain: Domain,
    weights: ErrorWeights,
    num_grains: usize,
    grains: Vec<Grain>,
    bins: Vec<usize>,
    occupancy: VoxelGrid<Occupancy>,
    active: Vec<GrainId>,
    inactive: Vec<GrainId>,
    /// Position of each candidate in `active` or `inactive`.
    slot: Vec<usize>,
    track_rings: bool,
    rings: NeighborRings,
    histogram: NeighborHistogram,
    size_counts: Vec<usize>,
    size_target: Vec<f64>,
    neighborhood_target: Vec<[f64; RINGS]>,
    errors: PackingErrors,
    accepted: usize,
    trace: Vec<PackingSample>,
}

impl Packer {
    /// Prepares a packer over placed candidates.
    ///
    /// Computes each candidate's periodic footprint on `domain` and, if the
    /// neighborhood weight is positive, the candidate distance rings. All
    /// candidates start inactive and the filling error starts at the voxel
    /// count (every voxel empty).
    ///
    /// ### Parameters
    /// - `grains` - Candidates with centroids set.
    /// - `domain` - Coarse packing grid.
    /// - `cfg` - Supplies the shape class, weights and target grain count.
    /// - `phase` - Matrix statistics for the size and neighborhood targets.
    pub fn new(mut grains: Vec<Grain>, domain: Domain, cfg: &SynthConfig, phase: &PhaseStats) -> Self {
        for g in &mut grains {
            g.active = false;
            match ShapeFrame::for_grain(cfg.shape_class, g) {
                Some(frame) => {
                    g.semi_axes = frame.radii;
                    g.footprint = frame.footprint(&domain, Boundary::Periodic);
                }
                None => g.footprint.clear(),
            }
        }

        let n = grains.len();
        let track_rings = cfg.weights.neighborhood > 0.0;
        let rings = if track_rings {
            NeighborRings::build(&grains)
        } else {
            NeighborRings::default()
        };
        let bins = grains
            .iter()
            .map(|g| phase.clamp_bin(g.diameter))
            .collect();
        let bin_count = phase.max_diameter + 1;

        debug!(
            candidates = n,
            voxels = domain.dims.len(),
            track_rings,
            "packing grid ready"
        );

        Self {
            domain,
            weights: cfg.weights,
            num_grains: cfg.num_grains,
            grains,
            bins,
            occupancy: VoxelGrid::new(domain.dims, Occupancy::default()),
            active: Vec::with_capacity(cfg.num_grains),
            inactive: (0..n).collect(),
            slot: (0..n).collect(),
            track_rings,
            rings,
            histogram: NeighborHistogram::with_len(bin_count),
            size_counts: vec![0; bin_count],
            size_target: phase.target_size_distribution(),
            neighborhood_target: phase.target_neighborhood(),
            errors: PackingErrors {
                filling: domain.dims.len() as f64,
                ..PackingErrors::default()
            },
            accepted: 0,
            trace: Vec::new(),
        }
    }

    pub fn errors(&self) -> PackingErrors {
        self.errors
    }

    pub fn active(&self) -> &[GrainId] {
        &self.active
    }

    pub fn grains(&self) -> &[Grain] {
        &self.grains
    }

    pub fn trace(&self) -> &[PackingSample] {
        &self.trace
    }

    /// Activates `num_grains` random candidates and measures the start errors.
    pub fn activate_initial<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let target = self.num_grains.min(self.grains.len());
        while self.active.len() < target {
            let Some(g) = self.random_inactive(rng) else {
                break;
            };
            self.errors.filling += self.add_cost(g);
            self.commit_add(g);
        }
        self.errors.size_distribution = self.size_error_with(None, None);
        if self.track_rings {
            self.errors.neighborhood = self.neighborhood_error_with(None, None);
        }
        debug!(
            active = self.active.len(),
            filling = self.errors.filling,
            size = self.errors.size_distribution,
            neighborhood = self.errors.neighborhood,
            "initial packing state"
        );
    }

    /// Runs `iterations` greedy moves.
    ///
    /// ### Returns
    /// [`SynthError::Cancelled`] if `cancel` fires between iterations.
    pub fn run<R: Rng + ?Sized>(
        &mut self,
        iterations: usize,
        rng: &mut R,
        cancel: &CancelToken,
    ) -> Result<()> {
        for iteration in 0..iterations {
            if cancel.is_cancelled() {
                return Err(SynthError::Cancelled);
            }
            if iteration % TRACE_INTERVAL == 0 {
                self.trace.push(PackingSample {
                    iteration,
                    errors: self.errors,
                    accepted: self.accepted,
                });
            }
            self.step(rng);
        }
        info!(
            iterations,
            accepted = self.accepted,
            active = self.active.len(),
            filling = self.errors.filling,
            size = self.errors.size_distribution,
            neighborhood = self.errors.neighborhood,
            "packing finished"
        );
        Ok(())
    }

    /// Proposes one move and applies it if the weighted change is `<= 0`.
    pub fn step<R: Rng + ?Sized>(&mut self, rng: &mut R) -> StepOutcome {
        let Some(mv) = self.propose(rng) else {
            return StepOutcome {
                proposed: None,
                accepted: false,
                weighted_change: 0.0,
            };
        };
        let (add, remove) = mv.parts();

        let mut next = self.errors;
        if self.weights.filling > 0.0 {
            next.filling = self.errors.filling + self.filling_delta(mv);
        }
        if self.weights.size_distribution > 0.0 {
            next.size_distribution = self.size_error_with(add, remove);
        }
        if self.weights.neighborhood > 0.0 {
            next.neighborhood = self.neighborhood_error_with(add, remove);
        }

        let change = self.errors.weighted_change(&next, &self.weights);
        let accepted = change <= 0.0;
        if accepted {
            if let Some(r) = remove {
                self.commit_remove(r);
            }
            if let Some(a) = add {
                self.commit_add(a);
            }
            self.errors = next;
            self.accepted += 1;
        }
        StepOutcome {
            proposed: Some(mv),
            accepted,
            weighted_change: change,
        }
    }

    fn propose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Move> {
        match rng.random_range(0..4) {
            0 => self.random_inactive(rng).map(Move::Add),
            1 => {
                if self.active.len() <= 1 {
                    return None;
                }
                self.random_active(rng).map(Move::Remove)
            }
            2 => {
                let remove = self.random_active(rng)?;
                let add = self.random_inactive(rng)?;
                Some(Move::Swap { add, remove })
            }
            _ => {
                if !self.track_rings {
                    return None;
                }
                let remove = self.random_active(rng)?;
                let add = self
                    .rings
                    .containing(remove, NEAREST_RING)
                    .iter()
                    .copied()
                    .find(|&g| !self.grains[g].active)?;
                Some(Move::Swap { add, remove })
            }
        }
    }

    fn random_active<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<GrainId> {
        if self.active.is_empty() {
            None
        } else {
            Some(self.active[rng.random_range(0..self.active.len())])
        }
    }

    fn random_inactive<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<GrainId> {
        if self.inactive.is_empty() {
            None
        } else {
            Some(self.inactive[rng.random_range(0..self.inactive.len())])
        }
    }

    /// Filling change of adding `g` to the current occupancy.
    fn add_cost(&self, g: GrainId) -> f64 {
        let mut cost = 0.0;
        for &(v, penalty) in &self.grains[g].footprint {
            let occ = self.occupancy[v];
            if occ.count == 0 {
                cost -= 1.0;
            } else {
                if occ.count == 1 {
                    cost += occ.penalty;
                }
                cost += penalty;
            }
        }
        cost
    }

    /// Filling change of removing `g` from the current occupancy.
    fn remove_cost(&self, g: GrainId) -> f64 {
        let mut cost = 0.0;
        for &(v, penalty) in &self.grains[g].footprint {
            let occ = self.occupancy[v];
            if occ.count == 1 {
                cost += 1.0;
            } else {
                if occ.count == 2 {
                    cost -= occ.penalty - penalty;
                }
                cost -= penalty;
            }
        }
        cost
    }

    fn filling_delta(&mut self, mv: Move) -> f64 {
        match mv {
            Move::Add(a) => self.add_cost(a),
            Move::Remove(r) => self.remove_cost(r),
            Move::Swap { add, remove } => {
                let cost = self.remove_cost(remove);
                self.lift(remove);
                let cost = cost + self.add_cost(add);
                self.place(remove);
                cost
            }
        }
    }

    fn size_error_with(&self, add: Option<GrainId>, remove: Option<GrainId>) -> f64 {
        let add_bin = add.map(|g| self.bins[g]);
        let remove_bin = remove.map(|g| self.bins[g]);
        let total = self.active.len() + add.is_some() as usize - remove.is_some() as usize;

        self.size_target
            .iter()
            .enumerate()
            .map(|(bin, target)| {
                let mut count = self.size_counts[bin] as f64;
                if add_bin == Some(bin) {
                    count += 1.0;
                }
                if remove_bin == Some(bin) {
                    count -= 1.0;
                }
                let sim = if total > 0 { count / total as f64 } else { 0.0 };
                (sim - target) * (sim - target)
            })
            .sum()
    }

    fn neighborhood_error_with(&mut self, add: Option<GrainId>, remove: Option<GrainId>) -> f64 {
        if let Some(a) = add {
            self.rings.activate(a);
        }
        if let Some(r) = remove {
            self.rings.deactivate(r);
        }

        self.histogram.clear();
        for &g in &self.active {
            if Some(g) != remove {
                self.histogram.add(self.bins[g], self.rings.counts(g));
            }
        }
        if let Some(a) = add {
            self.histogram.add(self.bins[a], self.rings.counts(a));
        }
        let error = self.histogram.squared_error(&self.neighborhood_target);

        if let Some(a) = add {
            self.rings.deactivate(a);
        }
        if let Some(r) = remove {
            self.rings.activate(r);
        }
        error
    }

    fn place(&mut self, g: GrainId) {
        for &(v, penalty) in &self.grains[g].footprint {
            let occ = &mut self.occupancy[v];
            occ.count += 1;
            occ.penalty += penalty;
        }
    }

    fn lift(&mut self, g: GrainId) {
        for &(v, penalty) in &self.grains[g].footprint {
            let occ = &mut self.occupancy[v];
            occ.count -= 1;
            occ.penalty = if occ.count == 0 {
                0.0
            } else {
                occ.penalty - penalty
            };
        }
    }

    fn commit_add(&mut self, g: GrainId) {
        self.place(g);
        let pos = self.slot[g];
        self.inactive.swap_remove(pos);
        if let Some(&moved) = self.inactive.get(pos) {
            self.slot[moved] = pos;
        }
        self.slot[g] = self.active.len();
        self.active.push(g);
        self.grains[g].active = true;
        self.size_counts[self.bins[g]] += 1;
        if self.track_rings {
            self.rings.activate(g);
        }
    }

    fn commit_remove(&mut self, g: GrainId) {
        self.lift(g);
        let pos = self.slot[g];
        self.active.swap_remove(pos);
        if let Some(&moved) = self.active.get(pos) {
            self.slot[moved] = pos;
        }
        self.slot[g] = self.inactive.len();
        self.inactive.push(g);
        self.grains[g].active = false;
        self.size_counts[self.bins[g]] -= 1;
        if self.track_rings {
            self.rings.deactivate(g);
        }
    }

    /// Filling error recomputed from the occupancy grid.
    ///
    /// Empty voxels count 1; voxels with two or more grains count the sum of
    /// their penalties.
    pub fn recompute_filling_error(&self) -> f64 {
        self.occupancy
            .iter()
            .map(|occ| match occ.count {
                0 => 1.0,
                1 => 0.0,
                _ => occ.penalty,
            })
            .sum()
    }

    /// Compacts the active candidates into the final grain list.
    pub fn finish(self) -> PackingOutcome {
        let mut ids = self.active.clone();
        ids.sort_unstable();

        let mut pool: Vec<Option<Grain>> = self.grains.into_iter().map(Some).collect();
        let grains = ids
            .iter()
            .filter_map(|&id| pool[id].take())
            .map(|mut g| {
                g.footprint = Vec::new();
                g
            })
            .collect();

        PackingOutcome {
            grains,
            domain: self.domain,
            errors: self.errors,
            accepted: self.accepted,
            trace: self.trace,
        }
    }
}
