//! Monte Carlo synthesis of voxelized polycrystalline grain structures.
//!
//! Main components:
//! - [`stats`], [`special`] - input statistics tables and the densities they use.
//! - [`sampler`] - draws grain candidates from a phase's statistics.
//! - [`shape`] - containment tests and overlap penalties of grain shapes.
//! - [`rings`], [`neighbor_histogram`] - neighbor-distance bookkeeping for packing.
//! - [`packing`] - greedy packing of candidates on the coarse grid.
//! - [`voxelize`], [`gap_fill`] - rasterization and majority-vote cleanup.
//! - [`topology`] - surface grains, neighbor links and interface areas.
//! - [`orientation`], [`texture`] - orientations and ODF/MDF matching.
//! - [`precipitates`] - optional second-phase particles.
//! - [`pipeline`] - the end-to-end run and its cancellation token.
//! - [`output`] - result records and the VTK writer.
//! - [`config`], [`error`], [`grid`], [`grain`], [`types`] - shared plumbing.

pub mod config;
pub mod error;
pub mod gap_fill;
pub mod grain;
pub mod grid;
pub mod neighbor_histogram;
pub mod orientation;
pub mod output;
pub mod packing;
pub mod pipeline;
pub mod precipitates;
pub mod rings;
pub mod sampler;
pub mod shape;
pub mod special;
pub mod stats;
pub mod texture;
pub mod topology;
pub mod types;
pub mod voxelize;

pub use config::SynthConfig;
pub use error::{Result, SynthError};
pub use orientation::{CrystalSymmetry, Disorientation, SymmetryDisorientation};
pub use output::Microstructure;
pub use pipeline::{CancelToken, synthesize};
pub use stats::StatsTable;
