//! Interactive slice viewer for synthesized grain structures, built with eframe/egui.
//!
//! This module defines [`Viewer`], which owns the run configuration, the
//! worker thread of a running synthesis and the last finished
//! [`Microstructure`], and implements [`eframe::App`] to edit, run and
//! display it.

use std::thread::{self, JoinHandle};

use eframe::App;
use glam::Vec2;
use grain_core::{
    CancelToken, CrystalSymmetry, Microstructure, StatsTable, SymmetryDisorientation,
    SynthConfig, SynthError,
    config::ShapeClass,
    grid::{Axis, Dims},
    synthesize,
    types::Label,
};

/// A synthesis running on a worker thread.
struct Job {
    handle: JoinHandle<grain_core::Result<Microstructure>>,
    cancel: CancelToken,
    started: f64,
}

/// Parameters of the demo statistics table.
///
/// ### Fields
/// - `mu`, `sigma` - Lognormal parameters of the grain diameter.
/// - `min_diameter`, `max_diameter` - Tabulated diameter range.
#[derive(Clone, Copy, Debug, PartialEq)]
struct DemoStats {
    mu: f64,
    sigma: f64,
    min_diameter: usize,
    max_diameter: usize,
}

impl Default for DemoStats {
    fn default() -> Self {
        Self {
            mu: 2.0,
            sigma: 0.2,
            min_diameter: 4,
            max_diameter: 12,
        }
    }
}

/// Main application state for the viewer.
///
/// The typical per-frame update is:
/// 1. Poll the worker thread and take its result once it finishes.
/// 2. Handle UI interactions (configuration, slice selection, pan/zoom).
/// 3. Render the current slice of the last finished structure.
///
/// ### Fields
/// - `cfg` - Configuration of the next run.
/// - `stats` - Demo table parameters of the next run.
/// - `result` - Last finished structure.
/// - `job` - Running synthesis, if any.
/// - `status` - Outcome of the last run, shown in the status bar.
/// - `axis`, `slice` - Slice plane normal and its voxel index.
/// - `zoom`, `pan` - World-to-screen mapping; one world unit is one voxel.
pub struct Viewer {
    cfg: SynthConfig,
    stats: DemoStats,

    result: Option<Microstructure>,
    job: Option<Job>,
    status: String,
    last_run_secs: f64,

    axis: Axis,
    slice: usize,
    zoom: f32,
    pan: egui::Vec2,
}

impl Viewer {
    /// Creates a viewer with a demo-sized configuration and no structure.
    pub fn new() -> Self {
        let mut cfg = SynthConfig::default().with_grains(50);
        cfg.candidate_multiplier = 10;
        cfg.packing_iterations = 50_000;
        cfg.resolution = glam::DVec3::splat(0.5);

        Self {
            cfg,
            stats: DemoStats::default(),
            result: None,
            job: None,
            status: "idle".into(),
            last_run_secs: 0.0,
            axis: Axis::Z,
            slice: 0,
            zoom: 6.0,
            pan: egui::vec2(0.0, 0.0),
        }
    }

    fn is_running(&self) -> bool {
        self.job.is_some()
    }

    /// Starts a synthesis of the current configuration on a worker thread.
    fn start(&mut self, now: f64) {
        if self.is_running() {
            return;
        }
        let cfg = self.cfg.clone();
        let s = self.stats;
        let table = StatsTable::equiaxed(cfg.symmetry, s.mu, s.sigma, s.min_diameter, s.max_diameter);
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let handle = thread::spawn(move || {
            synthesize(&cfg, &table, &SymmetryDisorientation::new(), &token)
        });
        self.job = Some(Job {
            handle,
            cancel,
            started: now,
        });
        self.status = "running".into();
    }

    fn cancel(&self) {
        if let Some(job) = &self.job {
            job.cancel.cancel();
        }
    }

    /// Takes the worker's result once it has finished.
    ///
    /// ### Returns
    /// `true` if a job finished during this call.
    fn poll(&mut self, now: f64) -> bool {
        if !self.job.as_ref().is_some_and(|j| j.handle.is_finished()) {
            return false;
        }
        let Some(job) = self.job.take() else {
            return false;
        };
        self.last_run_secs = now - job.started;
        self.status = match job.handle.join() {
            Ok(Ok(m)) => {
                self.slice = slice_count(m.domain.dims, self.axis) / 2;
                self.result = Some(m);
                "done".into()
            }
            Ok(Err(SynthError::Cancelled)) => "cancelled".into(),
            Ok(Err(e)) => format!("failed: {e}"),
            Err(_) => "worker panicked".into(),
        };
        true
    }

    /// Converts a world-space position to screen-space.
    ///
    /// World coordinates are scaled by `zoom`, offset by `pan`, and then
    /// centered inside the given `rect`. The y-axis is flipped so that
    /// positive y goes up in world space.
    fn world_to_screen(&self, p: Vec2, rect: egui::Rect) -> egui::Pos2 {
        let center = rect.center();
        egui::pos2(
            center.x + p.x * self.zoom + self.pan.x,
            center.y - p.y * self.zoom + self.pan.y,
        )
    }

    /// Inverse of [`Viewer::world_to_screen`] up to rounding.
    fn screen_to_world(&self, p: egui::Pos2, rect: egui::Rect) -> Vec2 {
        let center = rect.center();
        let x = (p.x - center.x - self.pan.x) / self.zoom;
        let y = (center.y - p.y + self.pan.y) / self.zoom;
        Vec2::new(x, y)
    }

    /// Helper to draw a labeled `usize` [`egui::DragValue`].
    fn labeled_drag_usize(
        ui: &mut egui::Ui,
        label: &str,
        value: &mut usize,
        range: std::ops::RangeInclusive<usize>,
        speed: f64,
    ) {
        ui.horizontal(|ui| {
            ui.label(label);
            ui.add(egui::DragValue::new(value).range(range).speed(speed));
        });
    }

    /// Helper to draw a labeled `f64` [`egui::DragValue`].
    fn labeled_drag_f64(
        ui: &mut egui::Ui,
        label: &str,
        value: &mut f64,
        range: std::ops::RangeInclusive<f64>,
        speed: f64,
    ) {
        ui.horizontal(|ui| {
            ui.label(label);
            ui.add(egui::DragValue::new(value).range(range).speed(speed));
        });
    }

    /// Builds the top panel (run controls, slice selection, zoom).
    fn ui_top_panel(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            ui.horizontal(|ui| {
                let now = ctx.input(|i| i.time);
                if ui
                    .add_enabled(!self.is_running(), egui::Button::new("▶ Generate"))
                    .clicked()
                {
                    self.start(now);
                }
                if ui
                    .add_enabled(self.is_running(), egui::Button::new("⏹ Cancel"))
                    .clicked()
                {
                    self.cancel();
                }

                ui.separator();
                for (axis, name) in [(Axis::X, "X"), (Axis::Y, "Y"), (Axis::Z, "Z")] {
                    if ui.selectable_label(self.axis == axis, name).clicked() {
                        self.axis = axis;
                        if let Some(m) = &self.result {
                            self.slice = slice_count(m.domain.dims, axis) / 2;
                        }
                    }
                }
                if let Some(m) = &self.result {
                    let last = slice_count(m.domain.dims, self.axis).saturating_sub(1);
                    ui.add(egui::Slider::new(&mut self.slice, 0..=last).text("Slice"));
                }

                ui.separator();
                ui.add(egui::Slider::new(&mut self.zoom, 0.5..=40.0).text("Zoom"));
            });
        });
    }

    /// Builds the bottom status bar (run state, grain count, final errors).
    fn ui_status_bar(&self, ctx: &egui::Context) {
        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                ui.label(format!("last run = {:.2} s", self.last_run_secs));
                ui.label(format!("status = {}", self.status));
                if let Some(m) = &self.result {
                    ui.separator();
                    ui.label(format!("mdf error = {:.3e}", m.mdf_error));
                    ui.label(format!("odf error = {:.3e}", m.odf_error));
                    ui.label(format!("filling error = {:.1}", m.packing_errors.filling));
                    ui.separator();
                    ui.label(format!("precipitates = {}", m.precipitates.len()));
                    ui.label(format!("grains = {}", m.grain_count()));
                    let d = m.domain.dims;
                    ui.label(format!("grid = {}x{}x{}", d.x, d.y, d.z));
                }
            });
        });
    }

    /// Builds the right-hand configuration panel.
    fn ui_config_panel(&mut self, ctx: &egui::Context) {
        egui::SidePanel::right("config_panel")
            .resizable(true)
            .default_width(240.0)
            .show(ctx, |ui| {
                ui.heading("Config");
                ui.add_enabled_ui(!self.is_running(), |ui| {
                    ui.separator();
                    ui.label("Grains");
                    Self::labeled_drag_usize(ui, "num_grains:", &mut self.cfg.num_grains, 1..=2000, 1.0);
                    Self::labeled_drag_usize(
                        ui,
                        "candidate_multiplier:",
                        &mut self.cfg.candidate_multiplier,
                        1..=50,
                        1.0,
                    );
                    egui::ComboBox::from_label("shape")
                        .selected_text(format!("{:?}", self.cfg.shape_class))
                        .show_ui(ui, |ui| {
                            for class in [
                                ShapeClass::Ellipsoid,
                                ShapeClass::Superellipsoid,
                                ShapeClass::Superoctahedron,
                            ] {
                                ui.selectable_value(&mut self.cfg.shape_class, class, format!("{class:?}"));
                            }
                        });
                    egui::ComboBox::from_label("symmetry")
                        .selected_text(format!("{:?}", self.cfg.symmetry))
                        .show_ui(ui, |ui| {
                            for sym in [CrystalSymmetry::Cubic, CrystalSymmetry::Hexagonal] {
                                ui.selectable_value(&mut self.cfg.symmetry, sym, format!("{sym:?}"));
                            }
                        });

                    ui.separator();
                    ui.label("Size distribution");
                    Self::labeled_drag_f64(ui, "mu:", &mut self.stats.mu, 0.0..=4.0, 0.01);
                    Self::labeled_drag_f64(ui, "sigma:", &mut self.stats.sigma, 0.01..=1.0, 0.01);
                    Self::labeled_drag_usize(ui, "min diameter:", &mut self.stats.min_diameter, 1..=50, 1.0);
                    Self::labeled_drag_usize(ui, "max diameter:", &mut self.stats.max_diameter, 2..=60, 1.0);

                    ui.separator();
                    ui.label("Packing");
                    let mut res = self.cfg.resolution.x;
                    Self::labeled_drag_f64(ui, "resolution:", &mut res, 0.05..=2.0, 0.01);
                    self.cfg.resolution = glam::DVec3::splat(res);
                    Self::labeled_drag_usize(
                        ui,
                        "iterations:",
                        &mut self.cfg.packing_iterations,
                        0..=2_000_000,
                        100.0,
                    );
                    Self::labeled_drag_f64(ui, "w filling:", &mut self.cfg.weights.filling, 0.0..=10.0, 0.05);
                    Self::labeled_drag_f64(
                        ui,
                        "w size:",
                        &mut self.cfg.weights.size_distribution,
                        0.0..=10.0,
                        0.05,
                    );
                    Self::labeled_drag_f64(
                        ui,
                        "w neighborhood:",
                        &mut self.cfg.weights.neighborhood,
                        0.0..=10.0,
                        0.05,
                    );

                    ui.separator();
                    ui.label("Texture");
                    Self::labeled_drag_usize(
                        ui,
                        "max iterations:",
                        &mut self.cfg.texture.max_iterations,
                        0..=5_000_000,
                        100.0,
                    );
                    Self::labeled_drag_usize(
                        ui,
                        "max rejections:",
                        &mut self.cfg.texture.max_consecutive_rejections,
                        1..=100_000,
                        10.0,
                    );

                    ui.separator();
                    ui.horizontal(|ui| {
                        ui.label("seed:");
                        ui.add(egui::DragValue::new(&mut self.cfg.seed));
                        if ui.button("🎲").clicked() {
                            self.cfg.seed = rand::random();
                        }
                    });

                    ui.separator();
                    if ui.button("Reset cfg to default").clicked() {
                        *self = Self {
                            result: self.result.take(),
                            ..Self::new()
                        };
                    }
                });
            });
    }

    /// Builds the central panel where the current slice is drawn.
    fn ui_central_panel(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            let response = ui.allocate_response(ui.available_size(), egui::Sense::click_and_drag());
            let rect = response.rect;
            let painter = ui.painter_at(rect);

            if response.dragged() {
                self.pan += response.drag_delta();
            }

            // Zoom around the mouse cursor.
            let scroll = ui.ctx().input(|i| i.raw_scroll_delta.y);
            if scroll != 0.0 {
                let pointer_screen = response.hover_pos().unwrap_or(rect.center());
                let world_before = self.screen_to_world(pointer_screen, rect);
                let factor = (1.0 + scroll * 0.001).clamp(0.5, 2.0);
                self.zoom = (self.zoom * factor).clamp(0.5, 40.0);
                let screen_after = self.world_to_screen(world_before, rect);
                self.pan += pointer_screen - screen_after;
            }

            let Some(m) = &self.result else {
                painter.text(
                    rect.center(),
                    egui::Align2::CENTER_CENTER,
                    "press Generate",
                    egui::FontId::proportional(18.0),
                    egui::Color32::GRAY,
                );
                return;
            };

            let dims = m.domain.dims;
            let (w, h) = slice_extent(dims, self.axis);
            let offset = Vec2::new(w as f32, h as f32) * 0.5;
            for v in 0..h {
                for u in 0..w {
                    let Some(index) = slice_index(dims, self.axis, self.slice, u, v) else {
                        continue;
                    };
                    let lo = Vec2::new(u as f32, v as f32) - offset;
                    let a = self.world_to_screen(lo, rect);
                    let b = self.world_to_screen(lo + Vec2::ONE, rect);
                    let cell = egui::Rect::from_two_pos(a, b);
                    if !rect.intersects(cell) {
                        continue;
                    }
                    let mut color = grain_color(m.labels[index]);
                    if m.surface_faces[index] > 0 && self.zoom >= 4.0 {
                        color = color.gamma_multiply(0.7);
                    }
                    painter.rect_filled(cell, 0.0, color);
                }
            }

            if let Some(p) = response.hover_pos() {
                let world = self.screen_to_world(p, rect) + offset;
                if world.x >= 0.0
                    && world.y >= 0.0
                    && let Some(index) =
                        slice_index(dims, self.axis, self.slice, world.x as usize, world.y as usize)
                {
                    let label = m.labels[index];
                    painter.text(
                        rect.left_top() + egui::vec2(8.0, 8.0),
                        egui::Align2::LEFT_TOP,
                        format!("label {label} (phase {})", m.phase_of(label)),
                        egui::FontId::monospace(14.0),
                        egui::Color32::WHITE,
                    );
                }
            }
        });
    }
}

impl App for Viewer {
    /// eframe callback that polls the worker and builds all panels.
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = ctx.input(|i| i.time);
        self.poll(now);
        if self.is_running() {
            ctx.request_repaint();
        }

        self.ui_top_panel(ctx);
        self.ui_status_bar(ctx);
        self.ui_config_panel(ctx);
        self.ui_central_panel(ctx);
    }
}

/// Number of slices along `axis`.
fn slice_count(dims: Dims, axis: Axis) -> usize {
    match axis {
        Axis::X => dims.x,
        Axis::Y => dims.y,
        Axis::Z => dims.z,
    }
}

/// Width and height of a slice normal to `axis`.
fn slice_extent(dims: Dims, axis: Axis) -> (usize, usize) {
    match axis {
        Axis::X => (dims.y, dims.z),
        Axis::Y => (dims.x, dims.z),
        Axis::Z => (dims.x, dims.y),
    }
}

/// Voxel index of slice pixel `(u, v)`, or `None` outside the grid.
fn slice_index(dims: Dims, axis: Axis, slice: usize, u: usize, v: usize) -> Option<usize> {
    match axis {
        Axis::X => dims.index(slice, u, v),
        Axis::Y => dims.index(u, slice, v),
        Axis::Z => dims.index(u, v, slice),
    }
}

/// Stable pseudo-random color per label; non-positive labels are black.
fn grain_color(label: Label) -> egui::Color32 {
    if label <= 0 {
        return egui::Color32::BLACK;
    }
    let h = (label as u32).wrapping_mul(2_654_435_761);
    let channel = |shift: u32| 64 + ((h >> shift) & 0xff) as u8 / 4 * 3;
    egui::Color32::from_rgb(channel(0), channel(8), channel(16))
}
