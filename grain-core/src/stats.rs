//! Input statistics: size, shape, neighborhood and texture distributions.
//!
//! A [`StatsTable`] is built by the caller, checked once by
//! [`StatsTable::validated`] (which also normalizes every density to unit
//! sum) and then only read. Size-dependent parameters live in one
//! [`SizeBin`] per integer diameter from `min_diameter` to `max_diameter`.

use crate::error::{Result, SynthError};
use crate::orientation::{CrystalSymmetry, MDF_LEN};
use crate::special::lognormal_pdf;

/// Number of neighbor rings tracked per grain.
pub const RINGS: usize = 3;

/// Parameters of a Beta law.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BetaParams {
    pub alpha: f64,
    pub beta: f64,
}

impl BetaParams {
    pub const fn new(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta }
    }

    fn is_valid(&self) -> bool {
        self.alpha.is_finite() && self.beta.is_finite() && self.alpha > 0.0 && self.beta > 0.0
    }
}

/// Neighbor-count fit `a * ring^k + b`.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PowerLaw {
    pub a: f64,
    pub b: f64,
    pub k: f64,
}

impl PowerLaw {
    /// Expected neighbor count in ring `ring` (1-based).
    pub fn eval(&self, ring: usize) -> f64 {
        self.a * (ring as f64).powf(self.k) + self.b
    }
}

/// Size-dependent shape and neighborhood statistics of one diameter bin.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SizeBin {
    pub b_over_a: BetaParams,
    pub c_over_a: BetaParams,
    pub c_over_b: BetaParams,
    pub omega3: BetaParams,
    pub neighbors: PowerLaw,
}

/// Statistics of one phase.
///
/// `ln(diameter)` is normal with mean `mu` and deviation `sigma`; diameters
/// are kept in `[min_diameter, max_diameter)`. `bins[d - min_diameter]`
/// holds the parameters for diameters in `[d, d + 1)`. `axis_odf` is the
/// 18x18x18 density of shape-axis orientations.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhaseStats {
    pub mu: f64,
    pub sigma: f64,
    pub min_diameter: usize,
    pub max_diameter: usize,
    pub bins: Vec<SizeBin>,
    pub axis_odf: Vec<f64>,
}

impl PhaseStats {
    /// Parameters for a diameter bin, clamped into the tabulated range.
    pub fn bin(&self, diameter_bin: usize) -> &SizeBin {
        let i = diameter_bin
            .clamp(self.min_diameter, self.max_diameter)
            .saturating_sub(self.min_diameter)
            .min(self.bins.len() - 1);
        &self.bins[i]
    }

    /// Clamps a diameter into its tabulated bin index.
    pub fn clamp_bin(&self, diameter: f64) -> usize {
        (diameter.max(0.0) as usize).clamp(self.min_diameter, self.max_diameter)
    }

    /// Target size histogram indexed by `floor(diameter)`, `0..=max_diameter`.
    ///
    /// Entry `i` is the lognormal density at `i + 0.5` for `i >= min_diameter`
    /// and zero below; the histogram is normalized to unit sum.
    pub fn target_size_distribution(&self) -> Vec<f64> {
        let mut dist: Vec<f64> = (0..=self.max_diameter)
            .map(|i| {
                if i < self.min_diameter {
                    0.0
                } else {
                    lognormal_pdf(i as f64 + 0.5, self.mu, self.sigma)
                }
            })
            .collect();
        let total: f64 = dist.iter().sum();
        if total > 0.0 {
            for v in &mut dist {
                *v /= total;
            }
        }
        dist
    }

    /// Target neighbor counts `[bin][ring]` for `bin` in `0..=max_diameter`.
    ///
    /// Bins below `min_diameter` hold no grains and get zero targets.
    pub fn target_neighborhood(&self) -> Vec<[f64; RINGS]> {
        (0..=self.max_diameter)
            .map(|d| {
                if d < self.min_diameter {
                    return [0.0; RINGS];
                }
                let fit = self.bin(d).neighbors;
                std::array::from_fn(|r| fit.eval(r + 1))
            })
            .collect()
    }

    fn validate(&mut self, table: &'static str) -> Result<()> {
        let fail = |reason: String| Err(SynthError::InputData { table, reason });

        if !self.mu.is_finite() || !self.sigma.is_finite() || self.sigma <= 0.0 {
            return fail(format!(
                "lognormal parameters must be finite with sigma > 0 (mu {}, sigma {})",
                self.mu, self.sigma
            ));
        }
        if self.min_diameter == 0 || self.min_diameter >= self.max_diameter {
            return fail(format!(
                "diameter range [{}, {}] is empty",
                self.min_diameter, self.max_diameter
            ));
        }
        let expected = self.max_diameter - self.min_diameter + 1;
        if self.bins.len() != expected {
            return fail(format!(
                "expected {expected} diameter bins, got {}",
                self.bins.len()
            ));
        }
        for (i, bin) in self.bins.iter().enumerate() {
            let laws = [bin.b_over_a, bin.c_over_a, bin.c_over_b, bin.omega3];
            if !laws.iter().all(BetaParams::is_valid) {
                return fail(format!("bin {} has a non-positive Beta parameter", i));
            }
            let n = bin.neighbors;
            if !(n.a.is_finite() && n.b.is_finite() && n.k.is_finite()) {
                return fail(format!("bin {} has a non-finite neighbor fit", i));
            }
        }
        normalize_density(&mut self.axis_odf, MDF_LEN, table)
    }
}

/// Complete input of a synthesis run.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatsTable {
    pub matrix: PhaseStats,
    /// Target ODF; length depends on the crystal symmetry.
    pub odf: Vec<f64>,
    /// Target MDF over the 18x18x18 misorientation grid.
    pub mdf: Vec<f64>,
    pub precipitates: Option<PhaseStats>,
}

impl StatsTable {
    /// Checks every table and normalizes all densities to unit sum.
    ///
    /// ### Parameters
    /// - `symmetry` - Crystal symmetry deciding the expected ODF length.
    ///
    /// ### Returns
    /// The normalized table, or [`SynthError::InputData`] naming the first
    /// malformed table.
    pub fn validated(mut self, symmetry: CrystalSymmetry) -> Result<Self> {
        self.matrix.validate("matrix")?;
        normalize_density(&mut self.odf, symmetry.odf_len(), "odf")?;
        normalize_density(&mut self.mdf, MDF_LEN, "mdf")?;
        if let Some(p) = self.precipitates.as_mut() {
            p.validate("precipitate")?;
        }
        Ok(self)
    }

    /// Demo table: lognormal sizes, near-equiaxed shapes, uniform texture.
    ///
    /// Used by the viewer and in tests.
    pub fn equiaxed(
        symmetry: CrystalSymmetry,
        mu: f64,
        sigma: f64,
        min_diameter: usize,
        max_diameter: usize,
    ) -> Self {
        let matrix = PhaseStats::equiaxed(mu, sigma, min_diameter, max_diameter);
        Self {
            matrix,
            odf: vec![1.0; symmetry.odf_len()],
            mdf: vec![1.0; MDF_LEN],
            precipitates: None,
        }
    }

    pub fn with_precipitates(mut self, precipitates: PhaseStats) -> Self {
        self.precipitates = Some(precipitates);
        self
    }
}

impl PhaseStats {
    /// Near-equiaxed phase with a uniform axis distribution.
    pub fn equiaxed(mu: f64, sigma: f64, min_diameter: usize, max_diameter: usize) -> Self {
        let bin = SizeBin {
            b_over_a: BetaParams::new(15.0, 1.5),
            c_over_a: BetaParams::new(15.0, 1.5),
            c_over_b: BetaParams::new(15.0, 1.5),
            omega3: BetaParams::new(10.0, 1.5),
            neighbors: PowerLaw {
                a: 14.0,
                b: 0.0,
                k: 2.0,
            },
        };
        let count = max_diameter.saturating_sub(min_diameter) + 1;
        Self {
            mu,
            sigma,
            min_diameter,
            max_diameter,
            bins: vec![bin; count],
            axis_odf: vec![1.0; MDF_LEN],
        }
    }
}

fn normalize_density(values: &mut [f64], expected: usize, table: &'static str) -> Result<()> {
    if values.len() != expected {
        return Err(SynthError::InputData {
            table,
            reason: format!("expected {expected} bins, got {}", values.len()),
        });
    }
    if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(SynthError::InputData {
            table,
            reason: "densities must be finite and non-negative".into(),
        });
    }
    let total: f64 = values.iter().sum();
    if total <= 0.0 {
        return Err(SynthError::InputData {
            table,
            reason: "density has zero total weight".into(),
        });
    }
    for v in values.iter_mut() {
        *v /= total;
    }
    Ok(())
}

/// Cumulative view of a density for inverse-transform sampling.
#[derive(Clone, Debug)]
pub struct CumulativeTable {
    cumulative: Vec<f64>,
}

impl CumulativeTable {
    pub fn new(density: &[f64]) -> Self {
        let mut acc = 0.0;
        let cumulative = density
            .iter()
            .map(|d| {
                acc += d;
                acc
            })
            .collect();
        Self { cumulative }
    }

    /// Returns the first bin whose cumulative density exceeds `u`.
    ///
    /// `u` at or above the total mass selects the last non-empty bin.
    pub fn sample(&self, u: f64) -> usize {
        let i = self.cumulative.partition_point(|&c| c <= u);
        if i < self.cumulative.len() {
            return i;
        }
        let total = self.cumulative.last().copied().unwrap_or(0.0);
        self.cumulative.partition_point(|&c| c < total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn table() -> StatsTable {
        StatsTable::equiaxed(CrystalSymmetry::Cubic, 1.5, 0.2, 2, 8)
    }

    #[test]
    fn validation_normalizes_densities() {
        let t = table().validated(CrystalSymmetry::Cubic).unwrap();
        assert_relative_eq!(t.odf.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(t.mdf.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(t.matrix.axis_odf.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn odf_length_must_match_symmetry() {
        let err = table().validated(CrystalSymmetry::Hexagonal).unwrap_err();
        assert!(matches!(err, SynthError::InputData { table: "odf", .. }));
    }

    #[test]
    fn bin_count_must_match_diameter_range() {
        let mut t = table();
        t.matrix.bins.pop();
        let err = t.validated(CrystalSymmetry::Cubic).unwrap_err();
        assert!(matches!(err, SynthError::InputData { table: "matrix", .. }));
    }

    #[test]
    fn negative_density_is_rejected() {
        let mut t = table();
        t.mdf[3] = -1.0;
        assert!(t.validated(CrystalSymmetry::Cubic).is_err());
    }

    #[test]
    fn bad_beta_parameters_are_rejected() {
        let mut t = table();
        t.matrix.bins[0].c_over_b = BetaParams::new(0.0, 1.0);
        assert!(t.validated(CrystalSymmetry::Cubic).is_err());
    }

    #[test]
    fn size_target_is_zero_below_min_and_normalized() {
        let dist = table().matrix.target_size_distribution();
        assert_eq!(dist.len(), 9);
        assert_eq!(dist[0], 0.0);
        assert_eq!(dist[1], 0.0);
        assert!(dist[4] > 0.0);
        assert_relative_eq!(dist.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn neighborhood_target_follows_power_law() {
        let n = table().matrix.target_neighborhood();
        assert_relative_eq!(n[4][0], 14.0);
        assert_relative_eq!(n[4][1], 56.0);
        assert_relative_eq!(n[4][2], 126.0);
        assert_eq!(n[1], [0.0; RINGS]);
    }

    #[test]
    fn empty_diameter_range_is_rejected() {
        let mut t = table();
        t.matrix.max_diameter = t.matrix.min_diameter;
        t.matrix.bins.truncate(1);
        assert!(t.validated(CrystalSymmetry::Cubic).is_err());
    }

    #[test]
    fn bin_lookup_clamps() {
        let p = &table().matrix;
        assert_eq!(p.bin(0), &p.bins[0]);
        assert_eq!(p.bin(100), p.bins.last().unwrap());
        assert_eq!(p.clamp_bin(0.4), 2);
        assert_eq!(p.clamp_bin(5.7), 5);
        assert_eq!(p.clamp_bin(30.0), 8);
    }

    #[test]
    fn cumulative_sampling() {
        let c = CumulativeTable::new(&[0.25, 0.0, 0.5, 0.25]);
        assert_eq!(c.sample(0.0), 0);
        assert_eq!(c.sample(0.24), 0);
        assert_eq!(c.sample(0.25), 2);
        assert_eq!(c.sample(0.8), 3);
        assert_eq!(c.sample(1.0), 3);
    }

    #[test]
    fn cumulative_sampling_skips_trailing_empty_bins() {
        let c = CumulativeTable::new(&[0.5, 0.5, 0.0]);
        assert_eq!(c.sample(1.0), 1);
    }
}
