//! Result records of a synthesis run and the legacy VTK writer.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use glam::{DQuat, DVec3};

use crate::error::{Result, SynthError};
use crate::grain::Grain;
use crate::grid::{Domain, VoxelGrid};
use crate::packing::{PackingErrors, PackingSample};
use crate::sampler::SamplingReport;
use crate::texture::TextureSample;
use crate::types::{Label, label_for};

/// Final state of one matrix grain.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GrainRecord {
    pub label: Label,
    pub centroid: DVec3,
    /// Target volume of the sampled shape.
    pub volume: f64,
    pub diameter: f64,
    pub semi_axes: DVec3,
    pub euler: DVec3,
    pub orientation: DQuat,
    pub neighbor_count: usize,
    pub surface: bool,
    pub voxel_count: usize,
}

impl GrainRecord {
    pub fn from_grain(id: usize, grain: &Grain) -> Self {
        Self {
            label: label_for(id),
            centroid: grain.centroid,
            volume: grain.volume,
            diameter: grain.diameter,
            semi_axes: grain.semi_axes,
            euler: grain.euler,
            orientation: grain.orientation,
            neighbor_count: grain.neighbors.len(),
            surface: grain.surface,
            voxel_count: grain.voxel_count,
        }
    }
}

/// A placed second-phase particle.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PrecipitateRecord {
    pub label: Label,
    pub centroid: DVec3,
    pub volume: f64,
    pub diameter: f64,
    pub voxel_count: usize,
}

/// Everything a synthesis run produces.
#[derive(Clone, Debug)]
pub struct Microstructure {
    pub domain: Domain,
    /// Grain labels; `1..=K` matrix grains, above `K` precipitates.
    pub labels: VoxelGrid<Label>,
    /// Faces each voxel shares with a different label.
    pub surface_faces: VoxelGrid<u8>,
    /// Label across each voxel's last shared face.
    pub nearest: VoxelGrid<Label>,
    pub grains: Vec<GrainRecord>,
    pub precipitates: Vec<PrecipitateRecord>,
    pub odf: Vec<f64>,
    pub mdf: Vec<f64>,
    pub packing_errors: PackingErrors,
    pub packing_trace: Vec<PackingSample>,
    pub odf_error: f64,
    pub mdf_error: f64,
    pub texture_trace: Vec<TextureSample>,
    pub sampling: SamplingReport,
}

impl Microstructure {
    pub fn grain_count(&self) -> usize {
        self.grains.len()
    }

    /// Phase of a voxel label: `1` matrix, `2` precipitate, `0` unassigned.
    pub fn phase_of(&self, label: Label) -> u8 {
        if label <= 0 {
            0
        } else if label as usize <= self.grains.len() {
            1
        } else {
            2
        }
    }

    /// Writes the grid as a legacy ASCII VTK structured-points file.
    ///
    /// ### Returns
    /// [`SynthError::IoWrite`] if the file cannot be created or written.
    pub fn write_vtk(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let io_err = |source| SynthError::IoWrite {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        self.write_vtk_to(&mut writer).map_err(io_err)?;
        writer.flush().map_err(io_err)
    }

    /// Writes the VTK text to any writer.
    ///
    /// Point data holds `GrainID`, `SurfaceVoxel` and `Phase` scalars, one
    /// grid row per line.
    pub fn write_vtk_to<W: Write>(&self, mut w: W) -> io::Result<()> {
        let d = self.domain.dims;
        let r = self.domain.resolution;
        writeln!(w, "# vtk DataFile Version 2.0")?;
        writeln!(w, "synthetic grain structure")?;
        writeln!(w, "ASCII")?;
        writeln!(w, "DATASET STRUCTURED_POINTS")?;
        writeln!(w, "DIMENSIONS {} {} {}", d.x, d.y, d.z)?;
        writeln!(w, "ORIGIN 0 0 0")?;
        writeln!(w, "SPACING {} {} {}", r.x, r.y, r.z)?;
        writeln!(w, "POINT_DATA {}", d.len())?;

        write_scalars(&mut w, "GrainID", d.x, self.labels.iter().copied())?;
        write_scalars(
            &mut w,
            "SurfaceVoxel",
            d.x,
            self.surface_faces.iter().map(|&f| f as i32),
        )?;
        write_scalars(
            &mut w,
            "Phase",
            d.x,
            self.labels.iter().map(|&l| self.phase_of(l) as i32),
        )
    }
}

fn write_scalars<W: Write>(
    w: &mut W,
    name: &str,
    row: usize,
    values: impl Iterator<Item = i32>,
) -> io::Result<()> {
    writeln!(w, "SCALARS {name} int 1")?;
    writeln!(w, "LOOKUP_TABLE default")?;
    for (i, v) in values.enumerate() {
        if i % row.max(1) > 0 {
            write!(w, " ")?;
        }
        write!(w, "{v}")?;
        if (i + 1) % row.max(1) == 0 {
            writeln!(w)?;
        }
    }
    Ok(())
}
