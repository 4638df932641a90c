use glam::DVec3;

use crate::error::{Result, SynthError};
use crate::orientation::CrystalSymmetry;

/// Shape family used for every grain of a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ShapeClass {
    /// `x^2 + y^2 + z^2 <= 1` in the normalized local frame.
    #[default]
    Ellipsoid,
    /// `|x|^N + |y|^N + |z|^N <= 1` with `N = omega3`.
    Superellipsoid,
    /// Eight half-spaces parameterized by `G = omega3` in `[0, 2]`.
    Superoctahedron,
}

/// Relative weights of the three packing error terms.
///
/// A zero weight disables that term entirely.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorWeights {
    pub filling: f64,
    pub size_distribution: f64,
    pub neighborhood: f64,
}

impl Default for ErrorWeights {
    fn default() -> Self {
        Self {
            filling: 1.0,
            size_distribution: 1.0,
            neighborhood: 1.0,
        }
    }
}

/// Stopping rules of the texture matcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TextureLimits {
    pub max_iterations: usize,
    pub max_consecutive_rejections: usize,
}

impl Default for TextureLimits {
    fn default() -> Self {
        Self {
            max_iterations: 1_000_000,
            max_consecutive_rejections: 5000,
        }
    }
}

/// Where precipitates may be seeded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PrecipitatePlacement {
    /// Only on voxels that touch a different matrix grain.
    #[default]
    Boundary,
    /// Anywhere in the domain.
    Bulk,
}

/// Secondary-phase settings.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PrecipitateConfig {
    pub placement: PrecipitatePlacement,
    /// Target precipitate volume as a percentage of the domain volume.
    pub volume_percent: f64,
}

/// Configuration of one synthesis run.
///
/// ### Fields
/// - `num_grains` - Number of grains kept active during packing.
/// - `candidate_multiplier` - Candidate pool size as a multiple of `num_grains`.
/// - `shape_class` - Shape family of every grain.
/// - `symmetry` - Crystal symmetry of the matrix phase.
/// - `resolution` - Final voxel edge lengths. Packing runs at 4x this.
/// - `domain_size` - Explicit domain extent; derived from the candidate
///   volume when `None`.
/// - `weights` - Packing error weights.
/// - `packing_iterations` - Fixed packing iteration count.
/// - `texture` - Texture matcher stopping rules.
/// - `precipitates` - Optional second phase.
/// - `seed` - Seed of the run's only random number generator.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SynthConfig {
    pub num_grains: usize,
    pub candidate_multiplier: usize,
    pub shape_class: ShapeClass,
    pub symmetry: CrystalSymmetry,
    pub resolution: DVec3,
    pub domain_size: Option<DVec3>,
    pub weights: ErrorWeights,
    pub packing_iterations: usize,
    pub texture: TextureLimits,
    pub precipitates: Option<PrecipitateConfig>,
    pub seed: u64,
}

/// Ratio between the packing grid spacing and the final voxel spacing.
pub const PACKING_COARSENING: f64 = 4.0;

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            num_grains: 100,
            candidate_multiplier: 25,
            shape_class: ShapeClass::Ellipsoid,
            symmetry: CrystalSymmetry::Cubic,
            resolution: DVec3::splat(0.25),
            domain_size: None,
            weights: ErrorWeights::default(),
            packing_iterations: 250_000,
            texture: TextureLimits::default(),
            precipitates: None,
            seed: 0,
        }
    }
}

impl SynthConfig {
    pub fn with_grains(mut self, num_grains: usize) -> Self {
        self.num_grains = num_grains;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_shape_class(mut self, shape_class: ShapeClass) -> Self {
        self.shape_class = shape_class;
        self
    }

    pub fn with_symmetry(mut self, symmetry: CrystalSymmetry) -> Self {
        self.symmetry = symmetry;
        self
    }

    pub fn with_domain_size(mut self, size: DVec3) -> Self {
        self.domain_size = Some(size);
        self
    }

    pub fn with_precipitates(mut self, precipitates: PrecipitateConfig) -> Self {
        self.precipitates = Some(precipitates);
        self
    }

    /// Checks the configuration before any sampling starts.
    ///
    /// ### Returns
    /// [`SynthError::InvalidConfig`] describing the first rejected field.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| Err(SynthError::InvalidConfig(reason));

        if self.num_grains == 0 {
            return fail("num_grains must be at least 1".into());
        }
        if self.candidate_multiplier == 0 {
            return fail("candidate_multiplier must be at least 1".into());
        }
        if !self.resolution.is_finite() || self.resolution.min_element() <= 0.0 {
            return fail(format!("resolution must be positive, got {}", self.resolution));
        }
        if let Some(size) = self.domain_size
            && (!size.is_finite() || size.min_element() <= 0.0)
        {
            return fail(format!("domain_size must be positive, got {size}"));
        }
        let w = self.weights;
        for (name, value) in [
            ("filling", w.filling),
            ("size_distribution", w.size_distribution),
            ("neighborhood", w.neighborhood),
        ] {
            if !value.is_finite() || value < 0.0 {
                return fail(format!("{name} weight must be finite and >= 0, got {value}"));
            }
        }
        if let Some(p) = self.precipitates
            && !(p.volume_percent > 0.0 && p.volume_percent < 100.0)
        {
            return fail(format!(
                "precipitate volume_percent must be in (0, 100), got {}",
                p.volume_percent
            ));
        }
        Ok(())
    }

    /// Packing grid spacing.
    pub fn packing_resolution(&self) -> DVec3 {
        self.resolution * PACKING_COARSENING
    }
}
