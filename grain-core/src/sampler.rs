//! Random grain candidates drawn from a phase's statistics.
//!
//! Every rejection loop is capped at [`MAX_RETRIES`]; on exhaustion the
//! sampler falls back to a clamped value, logs a warning and counts the
//! event in the [`SamplingReport`].

use glam::DVec3;
use rand::Rng;
use rand_distr::{Beta, Distribution, Normal};
use tracing::warn;

use crate::config::ShapeClass;
use crate::error::{Result, SynthError};
use crate::grain::Grain;
use crate::orientation::{BINS_PER_AXIS, euler_in_bin};
use crate::shape::semi_axes;
use crate::special::beta_pdf;
use crate::stats::{BetaParams, CumulativeTable, PhaseStats};

/// Retry cap of every rejection loop.
pub const MAX_RETRIES: usize = 1000;

/// Counts of recoverable sampling failures during a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SamplingReport {
    /// Rejection loops that hit [`MAX_RETRIES`].
    pub exhausted_draws: usize,
    /// Shapes replaced by a sphere after repeated degenerate draws.
    pub degenerate_shapes: usize,
    /// Precipitates that found no acceptable site.
    pub unplaced_precipitates: usize,
}

impl SamplingReport {
    pub fn merge(&mut self, other: SamplingReport) {
        self.exhausted_draws += other.exhausted_draws;
        self.degenerate_shapes += other.degenerate_shapes;
        self.unplaced_precipitates += other.unplaced_precipitates;
    }
}

struct BinLaws {
    b_over_a: Beta<f64>,
    c_over_a: Beta<f64>,
    c_over_b: BetaParams,
    omega3: Beta<f64>,
}

/// Draws unpositioned grains from one phase.
pub struct GrainSampler<'a> {
    phase: &'a PhaseStats,
    class: ShapeClass,
    log_diameter: Normal<f64>,
    /// Largest accepted `|ln d - mu| / sigma`, if any.
    tail_limit: Option<f64>,
    laws: Vec<BinLaws>,
    axis_table: CumulativeTable,
}

impl<'a> GrainSampler<'a> {
    /// Builds a sampler for the matrix phase.
    ///
    /// ### Returns
    /// [`SynthError::InputData`] if a distribution cannot be constructed.
    pub fn new(phase: &'a PhaseStats, class: ShapeClass) -> Result<Self> {
        let bad = |reason: String| SynthError::InputData {
            table: "size",
            reason,
        };
        let log_diameter = Normal::new(phase.mu, phase.sigma).map_err(|e| bad(e.to_string()))?;
        let beta = |p: BetaParams| Beta::new(p.alpha, p.beta).map_err(|e| bad(e.to_string()));
        let laws = phase
            .bins
            .iter()
            .map(|b| {
                Ok(BinLaws {
                    b_over_a: beta(b.b_over_a)?,
                    c_over_a: beta(b.c_over_a)?,
                    c_over_b: b.c_over_b,
                    omega3: beta(b.omega3)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            phase,
            class,
            log_diameter,
            tail_limit: None,
            laws,
            axis_table: CumulativeTable::new(&phase.axis_odf),
        })
    }

    /// Builds a sampler that also rejects sizes beyond two deviations in log space.
    pub fn truncated(phase: &'a PhaseStats, class: ShapeClass) -> Result<Self> {
        let mut sampler = Self::new(phase, class)?;
        sampler.tail_limit = Some(2.0);
        Ok(sampler)
    }

    fn laws(&self, diameter_bin: usize) -> &BinLaws {
        let i = self
            .phase
            .clamp_bin(diameter_bin as f64)
            .saturating_sub(self.phase.min_diameter)
            .min(self.laws.len() - 1);
        &self.laws[i]
    }

    /// Draws one grain.
    ///
    /// ### Parameters
    /// - `rng` - The run's random number generator.
    /// - `report` - Receives counts of exhausted or degenerate draws.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, report: &mut SamplingReport) -> Grain {
        for _ in 0..MAX_RETRIES {
            let grain = self.draw(rng, report);
            if semi_axes(
                self.class,
                grain.volume,
                grain.b_over_a,
                grain.c_over_a,
                grain.omega3,
            )
            .is_some()
            {
                return grain;
            }
        }

        report.degenerate_shapes += 1;
        let diameter = self.draw_diameter(rng, report);
        warn!(diameter, "degenerate grain shape, falling back to a sphere");
        let omega3 = match self.class {
            ShapeClass::Superellipsoid => 2.0,
            _ => 1.0,
        };
        Grain::new(diameter, 1.0, 1.0, omega3, DVec3::ZERO)
    }

    fn draw<R: Rng + ?Sized>(&self, rng: &mut R, report: &mut SamplingReport) -> Grain {
        let diameter = self.draw_diameter(rng, report);
        let laws = self.laws(diameter as usize);
        let (b_over_a, c_over_a) = self.draw_axis_ratios(laws, rng, report);
        let shape_euler = self.draw_shape_euler(rng);
        let omega3 = laws.omega3.sample(rng);
        Grain::new(diameter, b_over_a, c_over_a, omega3, shape_euler)
    }

    fn draw_diameter<R: Rng + ?Sized>(&self, rng: &mut R, report: &mut SamplingReport) -> f64 {
        let min = self.phase.min_diameter as f64;
        let max = self.phase.max_diameter as f64;
        for _ in 0..MAX_RETRIES {
            let ln_d = self.log_diameter.sample(rng);
            if let Some(limit) = self.tail_limit
                && ((ln_d - self.phase.mu) / self.phase.sigma).abs() > limit
            {
                continue;
            }
            let d = ln_d.exp();
            if d >= min && d < max {
                return d;
            }
        }

        report.exhausted_draws += 1;
        let fallback = self.phase.mu.exp().clamp(min, max - 1e-9);
        warn!(
            mu = self.phase.mu,
            sigma = self.phase.sigma,
            fallback,
            "diameter draw exhausted its retries"
        );
        fallback
    }

    fn draw_axis_ratios<R: Rng + ?Sized>(
        &self,
        laws: &BinLaws,
        rng: &mut R,
        report: &mut SamplingReport,
    ) -> (f64, f64) {
        let mut last = (1.0, 1.0);
        for _ in 0..MAX_RETRIES {
            let r2: f64 = laws.b_over_a.sample(rng);
            let r3: f64 = laws.c_over_a.sample(rng);
            last = (r2, r3);
            let c_over_b = r3 / r2;
            let prob = beta_pdf(c_over_b, laws.c_over_b.alpha, laws.c_over_b.beta);
            if prob > rng.random::<f64>() && c_over_b <= 1.0 {
                return (r2, r3);
            }
        }

        report.exhausted_draws += 1;
        warn!(
            b_over_a = last.0,
            c_over_a = last.1,
            "axis ratio draw exhausted its retries"
        );
        let b = last.0.clamp(f64::EPSILON, 1.0);
        (b, last.1.clamp(f64::EPSILON, b))
    }

    fn draw_shape_euler<R: Rng + ?Sized>(&self, rng: &mut R) -> DVec3 {
        let bin = self.axis_table.sample(rng.random::<f64>());
        let jitter = DVec3::new(rng.random(), rng.random(), rng.random());
        euler_in_bin(bin, [BINS_PER_AXIS; 3], jitter)
    }
}
