pub mod interpolate;
pub mod series;

use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{RegistrationError, Result};

pub use interpolate::MovingImage;
pub use series::ImageSeries;

/// Spatial dimensionality of a registration problem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dimension {
    Two,
    Three,
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Two => write!(f, "2D"),
            Self::Three => write!(f, "3D"),
        }
    }
}

/// Physical placement of a voxel grid.
///
/// A continuous index `(x, y, z)` maps to the physical point
/// `origin + direction * (index * spacing)`. `direction` is assumed orthonormal.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageGeometry {
    pub origin: [f64; 3],
    pub spacing: [f64; 3],
    pub direction: [[f64; 3]; 3],
}

impl Default for ImageGeometry {
    fn default() -> Self {
        Self {
            origin: [0.0; 3],
            spacing: [1.0; 3],
            direction: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }
}

impl ImageGeometry {
    pub fn with_spacing(spacing: [f64; 3]) -> Self {
        Self {
            spacing,
            ..Default::default()
        }
    }

    pub fn index_to_physical(&self, index: [f64; 3]) -> [f64; 3] {
        let mut p = self.origin;
        for (i, pi) in p.iter_mut().enumerate() {
            for j in 0..3 {
                *pi += self.direction[i][j] * index[j] * self.spacing[j];
            }
        }
        p
    }

    pub fn physical_to_index(&self, point: [f64; 3]) -> [f64; 3] {
        let d = [
            point[0] - self.origin[0],
            point[1] - self.origin[1],
            point[2] - self.origin[2],
        ];
        let mut index = [0.0; 3];
        for (j, idx) in index.iter_mut().enumerate() {
            let mut v = 0.0;
            for (i, di) in d.iter().enumerate() {
                v += self.direction[i][j] * di;
            }
            *idx = v / self.spacing[j];
        }
        index
    }

    /// Convert a gradient taken along index axes into physical coordinates.
    pub fn index_gradient_to_physical(&self, gradient: [f64; 3]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for (i, o) in out.iter_mut().enumerate() {
            for j in 0..3 {
                *o += self.direction[i][j] * gradient[j] / self.spacing[j];
            }
        }
        out
    }
}

/// A scalar image, 2D (one slice) or 3D.
/// Pixel data is stored as `(depth, height, width)`.
#[derive(Clone, Debug)]
pub struct Image {
    pub data: Array3<f32>,
    pub geometry: ImageGeometry,
}

impl Image {
    pub fn new(data: Array3<f32>, geometry: ImageGeometry) -> Self {
        Self { data, geometry }
    }

    /// Wrap a single 2D slice with unit spacing.
    pub fn from_slice(slice: Array2<f32>) -> Self {
        Self::new(slice.insert_axis(Axis(0)), ImageGeometry::default())
    }

    /// Stack equally sized 2D slices into one volume.
    pub fn from_slices(slices: &[Array2<f32>], geometry: ImageGeometry) -> Result<Self> {
        let first = slices.first().ok_or(RegistrationError::EmptySeries)?;
        let (h, w) = first.dim();
        let mut data = Array3::<f32>::zeros((slices.len(), h, w));
        for (z, slice) in slices.iter().enumerate() {
            if slice.dim() != (h, w) {
                return Err(RegistrationError::DimensionMismatch {
                    expected: format!("{w}x{h}"),
                    actual: format!("{}x{}", slice.ncols(), slice.nrows()),
                });
            }
            data.index_axis_mut(Axis(0), z).assign(slice);
        }
        Ok(Self::new(data, geometry))
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn depth(&self) -> usize {
        self.data.dim().0
    }

    /// Size as `[x, y, z]`.
    pub fn size(&self) -> [usize; 3] {
        [self.width(), self.height(), self.depth()]
    }

    pub fn dimension(&self) -> Dimension {
        if self.depth() == 1 {
            Dimension::Two
        } else {
            Dimension::Three
        }
    }

    pub fn slice(&self, z: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(0), z)
    }

    pub fn voxel_count(&self) -> usize {
        self.data.len()
    }

    /// Physical point at the geometric center of the voxel grid.
    pub fn center(&self) -> [f64; 3] {
        let [w, h, d] = self.size();
        self.geometry.index_to_physical([
            (w as f64 - 1.0) / 2.0,
            (h as f64 - 1.0) / 2.0,
            (d as f64 - 1.0) / 2.0,
        ])
    }

    pub fn has_non_finite(&self) -> bool {
        self.data.iter().any(|v| !v.is_finite())
    }

    /// Copy of this image with every voxel replaced by `value`.
    pub fn filled(&self, value: f32) -> Self {
        Self::new(Array3::from_elem(self.data.dim(), value), self.geometry.clone())
    }

    pub fn ensure_same_size(&self, other: &Image) -> Result<()> {
        if self.data.dim() != other.data.dim() {
            let (d, h, w) = self.data.dim();
            let (od, oh, ow) = other.data.dim();
            return Err(RegistrationError::DimensionMismatch {
                expected: format!("{w}x{h}x{d}"),
                actual: format!("{ow}x{oh}x{od}"),
            });
        }
        Ok(())
    }

    /// Minimum and maximum pixel value, ignoring non-finite entries.
    pub fn min_max(&self) -> (f32, f32) {
        self.data
            .iter()
            .filter(|v| v.is_finite())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }
}
