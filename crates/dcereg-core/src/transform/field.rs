//! Dense displacement field on a voxel grid, as estimated by demons.

use ndarray::Array3;

use crate::image::interpolate::linear_sample;
use crate::image::{Image, ImageGeometry};

/// Per-voxel physical displacement `[dx, dy, dz]` on the grid of a fixed image.
#[derive(Clone, Debug)]
pub struct DisplacementField {
    pub components: [Array3<f32>; 3],
    pub geometry: ImageGeometry,
}

impl DisplacementField {
    /// Zero field on the voxel grid of `reference`.
    pub fn zeros_like(reference: &Image) -> Self {
        let dim = reference.data.dim();
        Self {
            components: [Array3::zeros(dim), Array3::zeros(dim), Array3::zeros(dim)],
            geometry: reference.geometry.clone(),
        }
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        self.components[0].dim()
    }

    /// Displacement at voxel `(z, y, x)`.
    pub fn at(&self, z: usize, y: usize, x: usize) -> [f64; 3] {
        [
            self.components[0][[z, y, x]] as f64,
            self.components[1][[z, y, x]] as f64,
            self.components[2][[z, y, x]] as f64,
        ]
    }

    /// Interpolated displacement at a physical point; zero outside the grid.
    pub fn displacement(&self, p: [f64; 3]) -> [f64; 3] {
        let index = self.geometry.physical_to_index(p);
        let mut u = [0.0; 3];
        for (ud, comp) in u.iter_mut().zip(self.components.iter()) {
            *ud = linear_sample(comp, index).unwrap_or(0.0);
        }
        u
    }

    pub fn transform_point(&self, p: [f64; 3]) -> [f64; 3] {
        let u = self.displacement(p);
        [p[0] + u[0], p[1] + u[1], p[2] + u[2]]
    }

    /// Resample onto the voxel grid of `reference` (used between pyramid levels).
    pub fn resampled_to(&self, reference: &Image) -> Self {
        let mut out = Self::zeros_like(reference);
        let (d, h, w) = reference.data.dim();
        for z in 0..d {
            for y in 0..h {
                for x in 0..w {
                    let p = reference
                        .geometry
                        .index_to_physical([x as f64, y as f64, z as f64]);
                    let u = self.displacement(p);
                    for (comp, ud) in out.components.iter_mut().zip(u.iter()) {
                        comp[[z, y, x]] = *ud as f32;
                    }
                }
            }
        }
        out
    }

    /// Root mean square displacement magnitude.
    pub fn rms(&self) -> f64 {
        let n = self.components[0].len();
        if n == 0 {
            return 0.0;
        }
        let sum: f64 = self
            .components
            .iter()
            .map(|c| c.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>())
            .sum();
        (sum / n as f64).sqrt()
    }
}
