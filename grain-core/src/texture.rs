//! Monte Carlo matching of crystal orientations to a target ODF and MDF.
//!
//! The typical sequence looks like:
//! 1. [`TextureMatcher::new`] - bind the grains, targets and disorientation.
//! 2. [`TextureMatcher::assign_initial`] - draw every grain's orientation
//!    from the target ODF and measure all boundary misorientations.
//! 3. [`TextureMatcher::run`] - greedy resample / swap moves until the
//!    rejection streak or iteration cap is reached.
//! 4. [`TextureMatcher::finish`] - hand back the simulated histograms.
//!
//! Grain weights in the ODF are voxel fractions. Boundary weights in the
//! MDF are interface area over the total boundary area, counted only for
//! pairs with at least one interior grain.

use glam::{DQuat, DVec3};
use rand::Rng;
use tracing::{debug, info};

use crate::config::TextureLimits;
use crate::error::{Result, SynthError};
use crate::grain::Grain;
use crate::orientation::{
    CrystalSymmetry, Disorientation, MDF_LEN, euler_in_bin, euler_to_quat, mdf_bin,
    misorientation_coords,
};
use crate::pipeline::CancelToken;
use crate::stats::{CumulativeTable, StatsTable};
use crate::types::GrainId;

/// Iterations between two trace samples.
pub const TRACE_INTERVAL: usize = 100;

/// Error state recorded every [`TRACE_INTERVAL`] iterations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextureSample {
    pub iteration: usize,
    pub odf_error: f64,
    pub mdf_error: f64,
    pub accepted: usize,
}

/// Final state of a texture run.
#[derive(Clone, Debug)]
pub struct TextureOutcome {
    pub odf: Vec<f64>,
    pub mdf: Vec<f64>,
    pub odf_error: f64,
    pub mdf_error: f64,
    pub accepted: usize,
    pub trace: Vec<TextureSample>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum TextureMove {
    Resample { grain: GrainId, euler: DVec3, bin: usize },
    Swap(GrainId, GrainId),
}

/// Sparse pending change of a histogram.
#[derive(Clone, Debug, Default)]
struct HistogramDelta {
    changes: Vec<(usize, f64)>,
}

impl HistogramDelta {
    fn clear(&mut self) {
        self.changes.clear();
    }

    fn push(&mut self, bin: usize, amount: f64) {
        self.changes.push((bin, amount));
    }

    /// Sorts by bin and folds repeated bins together.
    fn merge(&mut self) {
        self.changes.sort_unstable_by_key(|&(bin, _)| bin);
        let mut merged: Vec<(usize, f64)> = Vec::with_capacity(self.changes.len());
        for &(bin, amount) in &self.changes {
            match merged.last_mut() {
                Some(last) if last.0 == bin => last.1 += amount,
                _ => merged.push((bin, amount)),
            }
        }
        self.changes = merged;
    }

    /// Change of the squared error against `target` if applied to `sim`.
    ///
    /// Call [`HistogramDelta::merge`] first.
    fn cost(&self, sim: &[f64], target: &[f64]) -> f64 {
        self.changes
            .iter()
            .map(|&(bin, amount)| {
                let before = sim[bin] - target[bin];
                let after = before + amount;
                after * after - before * before
            })
            .sum()
    }

    fn apply(&self, sim: &mut [f64]) {
        for &(bin, amount) in &self.changes {
            sim[bin] += amount;
        }
    }
}

fn squared_error(sim: &[f64], target: &[f64]) -> f64 {
    sim.iter()
        .zip(target)
        .map(|(s, t)| (s - t) * (s - t))
        .sum()
}

/// Greedy optimizer over grain orientations.
pub struct TextureMatcher<'a, D: Disorientation + ?Sized> {
    grains: &'a mut [Grain],
    symmetry: CrystalSymmetry,
    disorientation: &'a D,
    target_odf: &'a [f64],
    target_mdf: &'a [f64],
    odf_table: CumulativeTable,
    odf: Vec<f64>,
    mdf: Vec<f64>,
    /// Voxel fraction of each grain.
    weights: Vec<f64>,
    total_area: f64,
    interior: Vec<GrainId>,
    odf_error: f64,
    mdf_error: f64,
    accepted: usize,
    trace: Vec<TextureSample>,
    odf_delta: HistogramDelta,
    mdf_delta: HistogramDelta,
    /// New misorientations of the links touched by the last evaluated move.
    pending: Vec<(GrainId, usize, DVec3)>,
}

impl<'a, D: Disorientation + ?Sized> TextureMatcher<'a, D> {
    /// Binds a matcher to grains with topology already built.
    ///
    /// ### Parameters
    /// - `grains` - Matrix grains with `neighbors`, `surface` and
    ///   `voxel_count` set.
    /// - `stats` - Validated table supplying the target ODF and MDF.
    /// - `symmetry` - Crystal symmetry of the ODF grid and disorientations.
    /// - `disorientation` - Minimum-angle misorientation routine.
    /// - `total_area` - Boundary area normalizing the MDF.
    pub fn new(
        grains: &'a mut [Grain],
        stats: &'a StatsTable,
        symmetry: CrystalSymmetry,
        disorientation: &'a D,
        total_area: f64,
    ) -> Self {
        let voxels: usize = grains.iter().map(|g| g.voxel_count).sum();
        let n = grains.len();
        let weights = grains
            .iter()
            .map(|g| {
                if voxels > 0 {
                    g.voxel_count as f64 / voxels as f64
                } else {
                    1.0 / n as f64
                }
            })
            .collect();
        let interior = (0..n).filter(|&g| !grains[g].surface).collect();

        Self {
            grains,
            symmetry,
            disorientation,
            target_odf: &stats.odf,
            target_mdf: &stats.mdf,
            odf_table: CumulativeTable::new(&stats.odf),
            odf: vec![0.0; symmetry.odf_len()],
            mdf: vec![0.0; MDF_LEN],
            weights,
            total_area,
            interior,
            odf_error: 0.0,
            mdf_error: 0.0,
            accepted: 0,
            trace: Vec::new(),
            odf_delta: HistogramDelta::default(),
            mdf_delta: HistogramDelta::default(),
            pending: Vec::new(),
        }
    }

    pub fn odf(&self) -> &[f64] {
        &self.odf
    }

    pub fn mdf(&self) -> &[f64] {
        &self.mdf
    }

    pub fn odf_error(&self) -> f64 {
        self.odf_error
    }

    pub fn mdf_error(&self) -> f64 {
        self.mdf_error
    }

    pub fn grains(&self) -> &[Grain] {
        &*self.grains
    }

    /// Recomputes both squared errors from the histograms.
    pub fn recompute_errors(&self) -> (f64, f64) {
        (
            squared_error(&self.odf, self.target_odf),
            squared_error(&self.mdf, self.target_mdf),
        )
    }

    /// Draws every grain's orientation and measures the boundary misorientations.
    pub fn assign_initial<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.odf.fill(0.0);
        for g in 0..self.grains.len() {
            let (bin, euler) = self.draw_orientation(rng);
            let grain = &mut self.grains[g];
            grain.euler = euler;
            grain.orientation = euler_to_quat(euler);
            grain.odf_bin = bin;
            self.odf[bin] += self.weights[g];
        }
        self.measure_misorientations();
        (self.odf_error, self.mdf_error) = self.recompute_errors();
        debug!(
            grains = self.grains.len(),
            interior = self.interior.len(),
            odf_error = self.odf_error,
            mdf_error = self.mdf_error,
            "initial orientations assigned"
        );
    }

    fn draw_orientation<R: Rng + ?Sized>(&self, rng: &mut R) -> (usize, DVec3) {
        let bin = self.odf_table.sample(rng.random::<f64>());
        let jitter = DVec3::new(rng.random(), rng.random(), rng.random());
        (bin, euler_in_bin(bin, self.symmetry.odf_dims(), jitter))
    }

    fn misorientation(&self, a: DQuat, b: DQuat) -> DVec3 {
        let (angle, axis) = self.disorientation.disorientation(a, b, self.symmetry);
        misorientation_coords(angle, axis)
    }

    /// MDF weight of a boundary, zero for pairs of surface grains.
    fn boundary_weight(&self, g: GrainId, h: GrainId, area: f64) -> f64 {
        let eligible = !self.grains[g].surface || !self.grains[h].surface;
        if eligible && self.total_area > 0.0 {
            area / self.total_area
        } else {
            0.0
        }
    }

    fn measure_misorientations(&mut self) {
        self.mdf.fill(0.0);
        for g in 0..self.grains.len() {
            for i in 0..self.grains[g].neighbors.len() {
                let link = self.grains[g].neighbors[i];
                if link.grain <= g {
                    continue;
                }
                let coords = self.misorientation(
                    self.grains[g].orientation,
                    self.grains[link.grain].orientation,
                );
                self.grains[g].neighbors[i].misorientation = coords;
                self.grains[link.grain].neighbors[link.reverse].misorientation = coords;
                let w = self.boundary_weight(g, link.grain, link.area);
                if w > 0.0 {
                    self.mdf[mdf_bin(coords)] += w;
                }
            }
        }
    }

    /// Runs moves until a stop condition holds.
    ///
    /// Stops after `limits.max_consecutive_rejections` rejections in a row
    /// or `limits.max_iterations` iterations.
    ///
    /// ### Returns
    /// [`SynthError::Cancelled`] if `cancel` fires between iterations.
    pub fn run<R: Rng + ?Sized>(
        &mut self,
        limits: &TextureLimits,
        rng: &mut R,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut rejections = 0;
        let mut iterations = 0;
        for iteration in 0..limits.max_iterations {
            if cancel.is_cancelled() {
                return Err(SynthError::Cancelled);
            }
            if iteration % TRACE_INTERVAL == 0 {
                self.trace.push(TextureSample {
                    iteration,
                    odf_error: self.odf_error,
                    mdf_error: self.mdf_error,
                    accepted: self.accepted,
                });
            }
            iterations = iteration + 1;
            if self.step(rng) {
                rejections = 0;
            } else {
                rejections += 1;
                if rejections >= limits.max_consecutive_rejections {
                    break;
                }
            }
        }
        info!(
            iterations,
            accepted = self.accepted,
            odf_error = self.odf_error,
            mdf_error = self.mdf_error,
            "texture matching finished"
        );
        Ok(())
    }

    /// Proposes one move and applies it if the error change is `<= 0`.
    ///
    /// ### Returns
    /// `true` if the move was accepted.
    pub fn step<R: Rng + ?Sized>(&mut self, rng: &mut R) -> bool {
        let Some(mv) = self.propose(rng) else {
            return false;
        };
        let (odf_change, mdf_change) = self.evaluate(mv);
        if odf_change + mdf_change > 0.0 {
            return false;
        }
        self.apply(mv);
        self.odf_error += odf_change;
        self.mdf_error += mdf_change;
        self.accepted += 1;
        true
    }

    fn propose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<TextureMove> {
        if rng.random::<bool>() {
            if self.grains.is_empty() {
                return None;
            }
            let grain = rng.random_range(0..self.grains.len());
            let (bin, euler) = self.draw_orientation(rng);
            Some(TextureMove::Resample { grain, euler, bin })
        } else {
            let n = self.interior.len();
            if n < 2 {
                return None;
            }
            let first = rng.random_range(0..n);
            let mut second = rng.random_range(0..n - 1);
            if second >= first {
                second += 1;
            }
            Some(TextureMove::Swap(self.interior[first], self.interior[second]))
        }
    }

    fn orientation_after(&self, mv: TextureMove, g: GrainId) -> DQuat {
        match mv {
            TextureMove::Resample { grain, euler, .. } if g == grain => euler_to_quat(euler),
            TextureMove::Swap(a, b) if g == a => self.grains[b].orientation,
            TextureMove::Swap(a, b) if g == b => self.grains[a].orientation,
            _ => self.grains[g].orientation,
        }
    }

    /// Fills the pending deltas for `mv`.
    ///
    /// ### Returns
    /// The ODF and MDF squared-error changes.
    fn evaluate(&mut self, mv: TextureMove) -> (f64, f64) {
        let mut odf_delta = std::mem::take(&mut self.odf_delta);
        let mut mdf_delta = std::mem::take(&mut self.mdf_delta);
        let mut pending = std::mem::take(&mut self.pending);
        odf_delta.clear();
        mdf_delta.clear();
        pending.clear();

        let moved: Vec<GrainId> = match mv {
            TextureMove::Resample { grain, bin, .. } => {
                let w = self.weights[grain];
                odf_delta.push(self.grains[grain].odf_bin, -w);
                odf_delta.push(bin, w);
                vec![grain]
            }
            TextureMove::Swap(a, b) => {
                let (wa, wb) = (self.weights[a], self.weights[b]);
                let (ba, bb) = (self.grains[a].odf_bin, self.grains[b].odf_bin);
                odf_delta.push(ba, wb - wa);
                odf_delta.push(bb, wa - wb);
                vec![a, b]
            }
        };

        for &m in &moved {
            for (i, link) in self.grains[m].neighbors.iter().enumerate() {
                let h = link.grain;
                if h < m && moved.contains(&h) {
                    continue;
                }
                let (lo, hi) = if m < h { (m, h) } else { (h, m) };
                let coords =
                    self.misorientation(self.orientation_after(mv, lo), self.orientation_after(mv, hi));
                let w = self.boundary_weight(m, h, link.area);
                if w > 0.0 {
                    mdf_delta.push(mdf_bin(link.misorientation), -w);
                    mdf_delta.push(mdf_bin(coords), w);
                }
                pending.push((m, i, coords));
            }
        }

        odf_delta.merge();
        mdf_delta.merge();
        let changes = (
            odf_delta.cost(&self.odf, self.target_odf),
            mdf_delta.cost(&self.mdf, self.target_mdf),
        );
        self.odf_delta = odf_delta;
        self.mdf_delta = mdf_delta;
        self.pending = pending;
        changes
    }

    fn apply(&mut self, mv: TextureMove) {
        self.odf_delta.apply(&mut self.odf);
        self.mdf_delta.apply(&mut self.mdf);

        match mv {
            TextureMove::Resample { grain, euler, bin } => {
                let g = &mut self.grains[grain];
                g.euler = euler;
                g.orientation = euler_to_quat(euler);
                g.odf_bin = bin;
            }
            TextureMove::Swap(a, b) => {
                let (ea, qa, ba) = {
                    let g = &self.grains[a];
                    (g.euler, g.orientation, g.odf_bin)
                };
                let (eb, qb, bb) = {
                    let g = &self.grains[b];
                    (g.euler, g.orientation, g.odf_bin)
                };
                let ga = &mut self.grains[a];
                (ga.euler, ga.orientation, ga.odf_bin) = (eb, qb, bb);
                let gb = &mut self.grains[b];
                (gb.euler, gb.orientation, gb.odf_bin) = (ea, qa, ba);
            }
        }

        for &(g, i, coords) in &self.pending {
            let link = self.grains[g].neighbors[i];
            self.grains[g].neighbors[i].misorientation = coords;
            self.grains[link.grain].neighbors[link.reverse].misorientation = coords;
        }
    }

    pub fn finish(self) -> TextureOutcome {
        TextureOutcome {
            odf: self.odf,
            mdf: self.mdf,
            odf_error: self.odf_error,
            mdf_error: self.mdf_error,
            accepted: self.accepted,
            trace: self.trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grain::NeighborLink;
    use crate::orientation::SymmetryDisorientation;
    use approx::assert_relative_eq;
    use rand::{SeedableRng, rngs::StdRng};

    fn table() -> StatsTable {
        StatsTable::equiaxed(CrystalSymmetry::Cubic, 1.5, 0.2, 2, 8)
            .validated(CrystalSymmetry::Cubic)
            .unwrap()
    }

    fn link(grains: &mut [Grain], a: GrainId, b: GrainId, area: f64) {
        let (ra, rb) = (grains[b].neighbors.len(), grains[a].neighbors.len());
        grains[a].neighbors.push(NeighborLink {
            grain: b,
            area,
            misorientation: DVec3::ZERO,
            reverse: ra,
        });
        grains[b].neighbors.push(NeighborLink {
            grain: a,
            area,
            misorientation: DVec3::ZERO,
            reverse: rb,
        });
    }

    /// Five grains in a row; the middle three are interior.
    fn chain() -> Vec<Grain> {
        let mut grains: Vec<Grain> = (0..5)
            .map(|i| {
                let mut g = Grain::sphere(2.0);
                g.voxel_count = 10 + i;
                g.surface = i == 0 || i == 4;
                g
            })
            .collect();
        for i in 0..4 {
            link(&mut grains, i, i + 1, 1.0 + i as f64);
        }
        grains
    }

    #[test]
    fn histogram_delta_merges_bins() {
        let mut d = HistogramDelta::default();
        d.push(3, 0.5);
        d.push(1, -0.25);
        d.push(3, -0.5);
        d.merge();
        assert_eq!(d.changes, vec![(1, -0.25), (3, 0.0)]);

        let sim = [0.0, 0.5, 0.0, 0.5];
        let target = [0.0, 0.25, 0.0, 0.5];
        // Bin 1 moves from 0.25 above target to exactly on it.
        assert_relative_eq!(d.cost(&sim, &target), -0.0625);
    }

    #[test]
    fn initial_histograms_are_normalized() {
        let stats = table();
        let dis = SymmetryDisorientation::new();
        let mut grains = chain();
        let mut m = TextureMatcher::new(&mut grains, &stats, CrystalSymmetry::Cubic, &dis, 10.0);
        m.assign_initial(&mut StdRng::seed_from_u64(4));

        assert_relative_eq!(m.odf().iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        // Every boundary touches an interior grain.
        assert_relative_eq!(m.mdf().iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        for g in m.grains() {
            assert_relative_eq!(g.orientation.length(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn two_surface_grains_never_increase_odf_error() {
        let stats = table();
        let dis = SymmetryDisorientation::new();
        let mut grains: Vec<Grain> = (0..2)
            .map(|_| {
                let mut g = Grain::sphere(3.0);
                g.voxel_count = 50;
                g.surface = true;
                g
            })
            .collect();
        link(&mut grains, 0, 1, 4.0);

        let mut m = TextureMatcher::new(&mut grains, &stats, CrystalSymmetry::Cubic, &dis, 0.0);
        let mut rng = StdRng::seed_from_u64(12);
        m.assign_initial(&mut rng);

        let mut last = m.recompute_errors().0;
        for _ in 0..2000 {
            m.step(&mut rng);
            let now = m.recompute_errors().0;
            assert!(now <= last + 1e-12);
            assert_relative_eq!(m.odf().iter().sum::<f64>(), 1.0, epsilon = 1e-9);
            last = now;
        }
        assert_relative_eq!(m.odf_error(), last, epsilon = 1e-9);
    }

    #[test]
    fn two_grains_spread_toward_a_uniform_odf() {
        let stats = table();
        let dis = SymmetryDisorientation::new();
        let mut grains: Vec<Grain> = (0..2)
            .map(|_| {
                let mut g = Grain::sphere(3.0);
                g.voxel_count = 50;
                g.surface = true;
                g
            })
            .collect();
        link(&mut grains, 0, 1, 4.0);

        let mut m = TextureMatcher::new(&mut grains, &stats, CrystalSymmetry::Cubic, &dis, 0.0);
        let mut rng = StdRng::seed_from_u64(21);
        m.assign_initial(&mut rng);

        // Start with both grains in the same ODF bin.
        let (euler, orientation, bin) = {
            let g = &m.grains[0];
            (g.euler, g.orientation, g.odf_bin)
        };
        let g = &mut m.grains[1];
        (g.euler, g.orientation, g.odf_bin) = (euler, orientation, bin);
        m.odf.fill(0.0);
        m.odf[bin] = 1.0;
        m.measure_misorientations();
        (m.odf_error, m.mdf_error) = m.recompute_errors();
        let initial = m.odf_error();

        let limits = TextureLimits {
            max_iterations: 2000,
            max_consecutive_rejections: 500,
        };
        m.run(&limits, &mut rng, &CancelToken::new()).unwrap();

        assert!(m.accepted > 0);
        assert!(m.odf_error() < initial);
        assert!(m.odf().iter().all(|&w| w < 1.0));
        // Two half-weight grains in distinct bins is the best a pair can do.
        let t = 1.0 / CrystalSymmetry::Cubic.odf_len() as f64;
        let best = 2.0 * (0.5 - t) * (0.5 - t) + (CrystalSymmetry::Cubic.odf_len() - 2) as f64 * t * t;
        assert_relative_eq!(m.odf_error(), best, epsilon = 1e-9);
        assert_relative_eq!(m.recompute_errors().0, m.odf_error(), epsilon = 1e-9);
    }

    #[test]
    fn caches_and_errors_stay_consistent() {
        let stats = table();
        let dis = SymmetryDisorientation::new();
        let mut grains = chain();
        let mut m = TextureMatcher::new(&mut grains, &stats, CrystalSymmetry::Cubic, &dis, 10.0);
        let mut rng = StdRng::seed_from_u64(33);
        m.assign_initial(&mut rng);
        for _ in 0..1500 {
            m.step(&mut rng);
        }

        let (odf_error, mdf_error) = m.recompute_errors();
        assert_relative_eq!(m.odf_error(), odf_error, epsilon = 1e-9);
        assert_relative_eq!(m.mdf_error(), mdf_error, epsilon = 1e-9);
        assert_relative_eq!(m.mdf().iter().sum::<f64>(), 1.0, epsilon = 1e-9);

        let grains = m.grains();
        for (g, grain) in grains.iter().enumerate() {
            for l in &grain.neighbors {
                let back = grains[l.grain].neighbors[l.reverse];
                assert_eq!(back.grain, g);
                assert_eq!(back.misorientation, l.misorientation);
            }
        }
    }

    #[test]
    fn run_respects_iteration_cap() {
        let stats = table();
        let dis = SymmetryDisorientation::new();
        let mut grains = chain();
        let mut m = TextureMatcher::new(&mut grains, &stats, CrystalSymmetry::Cubic, &dis, 10.0);
        let mut rng = StdRng::seed_from_u64(2);
        m.assign_initial(&mut rng);

        let limits = TextureLimits {
            max_iterations: 3000,
            max_consecutive_rejections: 5000,
        };
        m.run(&limits, &mut rng, &CancelToken::new()).unwrap();
        let outcome = m.finish();
        assert_eq!(outcome.trace.len(), 30);
        assert_eq!(outcome.odf.len(), CrystalSymmetry::Cubic.odf_len());
    }

    #[test]
    fn run_stops_on_rejection_streak() {
        let stats = table();
        let dis = SymmetryDisorientation::new();
        // Without grains no move can be proposed, so every iteration is a rejection.
        let mut grains: Vec<Grain> = Vec::new();
        let mut m = TextureMatcher::new(&mut grains, &stats, CrystalSymmetry::Cubic, &dis, 0.0);
        let mut rng = StdRng::seed_from_u64(2);
        m.assign_initial(&mut rng);

        let limits = TextureLimits {
            max_iterations: 100_000,
            max_consecutive_rejections: 50,
        };
        m.run(&limits, &mut rng, &CancelToken::new()).unwrap();
        let outcome = m.finish();
        assert_eq!(outcome.trace.len(), 1);
        assert_eq!(outcome.accepted, 0);
    }

    #[test]
    fn cancellation_stops_the_run() {
        let stats = table();
        let dis = SymmetryDisorientation::new();
        let mut grains = chain();
        let mut m = TextureMatcher::new(&mut grains, &stats, CrystalSymmetry::Cubic, &dis, 10.0);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = m
            .run(&TextureLimits::default(), &mut StdRng::seed_from_u64(0), &cancel)
            .unwrap_err();
        assert!(matches!(err, SynthError::Cancelled));
    }
}
