//! Bounds-checked 3D voxel grids and the physical domain they cover.
//!
//! Voxels are stored in one linear buffer with x fastest:
//! `index = k * nx * ny + j * nx + i`.

use std::ops::{Index, IndexMut};

use glam::DVec3;

/// Cartesian axis of a voxel face.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

/// Voxel counts along each axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dims {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl Dims {
    pub const fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    pub const fn cube(n: usize) -> Self {
        Self::new(n, n, n)
    }

    /// Total number of voxels.
    pub const fn len(self) -> usize {
        self.x * self.y * self.z
    }

    pub const fn is_empty(self) -> bool {
        self.len() == 0
    }

    pub fn as_array(self) -> [usize; 3] {
        [self.x, self.y, self.z]
    }

    /// Linear index of `(i, j, k)`, or `None` when outside the grid.
    #[inline]
    pub fn index(self, i: usize, j: usize, k: usize) -> Option<usize> {
        (i < self.x && j < self.y && k < self.z).then(|| k * self.x * self.y + j * self.x + i)
    }

    /// Linear index of possibly out-of-range coordinates wrapped periodically.
    #[inline]
    pub fn wrapped_index(self, i: i64, j: i64, k: i64) -> usize {
        let w = |v: i64, n: usize| v.rem_euclid(n as i64) as usize;
        w(k, self.z) * self.x * self.y + w(j, self.y) * self.x + w(i, self.x)
    }

    /// Grid coordinates of a linear index.
    #[inline]
    pub fn coords(self, index: usize) -> [usize; 3] {
        let plane = self.x * self.y;
        [index % self.x, (index / self.x) % self.y, index / plane]
    }

    /// Returns `true` if the voxel lies on a face of the grid.
    pub fn on_boundary(self, index: usize) -> bool {
        let [i, j, k] = self.coords(index);
        i == 0 || j == 0 || k == 0 || i + 1 == self.x || j + 1 == self.y || k + 1 == self.z
    }

    /// Face neighbors of a voxel without periodic wrap, in ascending index order.
    ///
    /// ### Returns
    /// An iterator of `(axis, neighbor_index)` pairs; neighbors outside the
    /// grid are skipped.
    pub fn face_neighbors(self, index: usize) -> impl Iterator<Item = (Axis, usize)> {
        let [i, j, k] = self.coords(index);
        let plane = self.x * self.y;
        let candidates = [
            (Axis::Z, (k > 0).then(|| index - plane)),
            (Axis::Y, (j > 0).then(|| index - self.x)),
            (Axis::X, (i > 0).then(|| index - 1)),
            (Axis::X, (i + 1 < self.x).then(|| index + 1)),
            (Axis::Y, (j + 1 < self.y).then(|| index + self.x)),
            (Axis::Z, (k + 1 < self.z).then(|| index + plane)),
        ];
        candidates
            .into_iter()
            .filter_map(|(axis, n)| n.map(|n| (axis, n)))
    }
}

/// Dense 3D grid of values over a [`Dims`] layout.
#[derive(Clone, Debug, PartialEq)]
pub struct VoxelGrid<T> {
    dims: Dims,
    data: Vec<T>,
}

impl<T: Clone> VoxelGrid<T> {
    /// Creates a grid with every voxel set to `fill`.
    pub fn new(dims: Dims, fill: T) -> Self {
        Self {
            dims,
            data: vec![fill; dims.len()],
        }
    }

    /// Sets every voxel to `value`.
    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }
}

impl<T> VoxelGrid<T> {
    pub fn dims(&self) -> Dims {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, i: usize, j: usize, k: usize) -> Option<&T> {
        self.dims.index(i, j, k).map(|idx| &self.data[idx])
    }

    pub fn get_mut(&mut self, i: usize, j: usize, k: usize) -> Option<&mut T> {
        self.dims.index(i, j, k).map(|idx| &mut self.data[idx])
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.data.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.data.iter_mut()
    }
}

impl<T> Index<usize> for VoxelGrid<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: usize) -> &T {
        &self.data[index]
    }
}

impl<T> IndexMut<usize> for VoxelGrid<T> {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.data[index]
    }
}

/// Physical extent of a voxel grid.
///
/// Voxel `(i, j, k)` sits at `(i, j, k) * resolution`; the periodic box
/// length along each axis is `dims * resolution`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Domain {
    pub dims: Dims,
    pub resolution: DVec3,
}

impl Domain {
    /// Smallest grid of spacing `resolution` that covers `size`.
    ///
    /// Each axis gets `floor(size / resolution) + 1` voxels.
    pub fn covering(size: DVec3, resolution: DVec3) -> Self {
        let n = |s: f64, r: f64| (s / r).max(0.0) as usize + 1;
        Self {
            dims: Dims::new(
                n(size.x, resolution.x),
                n(size.y, resolution.y),
                n(size.z, resolution.z),
            ),
            resolution,
        }
    }

    /// Same extent, spacing divided by `factor` along every axis.
    pub fn refined(&self, factor: usize) -> Self {
        Self {
            dims: Dims::new(
                self.dims.x * factor,
                self.dims.y * factor,
                self.dims.z * factor,
            ),
            resolution: self.resolution / factor as f64,
        }
    }

    /// Periodic box length per axis.
    pub fn size(&self) -> DVec3 {
        DVec3::new(
            self.dims.x as f64,
            self.dims.y as f64,
            self.dims.z as f64,
        ) * self.resolution
    }

    pub fn volume(&self) -> f64 {
        let s = self.size();
        s.x * s.y * s.z
    }

    pub fn voxel_volume(&self) -> f64 {
        self.resolution.x * self.resolution.y * self.resolution.z
    }

    /// Area of a voxel face normal to `axis`.
    pub fn face_area(&self, axis: Axis) -> f64 {
        let r = self.resolution;
        match axis {
            Axis::X => r.y * r.z,
            Axis::Y => r.x * r.z,
            Axis::Z => r.x * r.y,
        }
    }

    /// Position of a voxel by linear index.
    pub fn position(&self, index: usize) -> DVec3 {
        let [i, j, k] = self.dims.coords(index);
        DVec3::new(i as f64, j as f64, k as f64) * self.resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_and_coords_roundtrip() {
        let d = Dims::new(4, 3, 2);
        for idx in 0..d.len() {
            let [i, j, k] = d.coords(idx);
            assert_eq!(d.index(i, j, k), Some(idx));
        }
        assert_eq!(d.index(4, 0, 0), None);
    }

    #[test]
    fn wrapped_index_is_periodic() {
        let d = Dims::cube(5);
        assert_eq!(d.wrapped_index(-1, 0, 0), d.index(4, 0, 0).unwrap());
        assert_eq!(d.wrapped_index(5, 6, -5), d.index(0, 1, 0).unwrap());
    }

    #[test]
    fn face_neighbors_skip_outside() {
        let d = Dims::cube(3);
        let corner: Vec<usize> = d.face_neighbors(0).map(|(_, n)| n).collect();
        assert_eq!(corner, vec![1, 3, 9]);

        let center = d.index(1, 1, 1).unwrap();
        assert_eq!(d.face_neighbors(center).count(), 6);
        assert!(!d.on_boundary(center));
        assert!(d.on_boundary(0));
    }

    #[test]
    fn grid_get_is_bounds_checked() {
        let mut g = VoxelGrid::new(Dims::new(2, 2, 2), 0i32);
        *g.get_mut(1, 1, 1).unwrap() = 7;
        assert_eq!(g[7], 7);
        assert_eq!(g.get(2, 0, 0), None);
    }

    #[test]
    fn refined_domain_keeps_size() {
        let coarse = Domain::covering(DVec3::splat(9.5), DVec3::splat(1.0));
        assert_eq!(coarse.dims, Dims::cube(10));
        let fine = coarse.refined(4);
        assert_eq!(fine.dims, Dims::cube(40));
        assert_eq!(fine.size(), coarse.size());
        assert_eq!(fine.voxel_volume(), 1.0 / 64.0);
    }
}
