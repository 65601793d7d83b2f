//! Linear interpolation of images at continuous positions.

use ndarray::{Array3, Zip};

use crate::consts::PARALLEL_PIXEL_THRESHOLD;

use super::Image;

/// How far outside the sampled grid a continuous index may fall and still be
/// treated as inside (absorbs round-off at the image border).
const BOUNDS_TOLERANCE: f64 = 1e-6;

fn axis_cell(coord: f64, len: usize) -> Option<(usize, usize, f64)> {
    let upper = len as f64 - 1.0;
    if !(coord >= -BOUNDS_TOLERANCE && coord <= upper + BOUNDS_TOLERANCE) {
        return None;
    }
    if len == 1 {
        return Some((0, 0, 0.0));
    }
    let c = coord.clamp(0.0, upper);
    let i0 = (c.floor() as usize).min(len - 2);
    Some((i0, i0 + 1, c - i0 as f64))
}

/// Trilinear sample at continuous index `(x, y, z)`.
///
/// Returns `None` when the index lies outside the voxel grid. Axes of length 1
/// are not interpolated, so single-slice volumes behave as 2D images.
pub fn linear_sample(data: &Array3<f32>, index: [f64; 3]) -> Option<f64> {
    let (d, h, w) = data.dim();
    let (x0, x1, fx) = axis_cell(index[0], w)?;
    let (y0, y1, fy) = axis_cell(index[1], h)?;
    let (z0, z1, fz) = axis_cell(index[2], d)?;

    let v = |z: usize, y: usize, x: usize| data[[z, y, x]] as f64;

    let c00 = v(z0, y0, x0) * (1.0 - fx) + v(z0, y0, x1) * fx;
    let c10 = v(z0, y1, x0) * (1.0 - fx) + v(z0, y1, x1) * fx;
    let c01 = v(z1, y0, x0) * (1.0 - fx) + v(z1, y0, x1) * fx;
    let c11 = v(z1, y1, x0) * (1.0 - fx) + v(z1, y1, x1) * fx;

    let c0 = c00 * (1.0 - fy) + c10 * fy;
    let c1 = c01 * (1.0 - fy) + c11 * fy;

    Some(c0 * (1.0 - fz) + c1 * fz)
}

/// Sample an image at a physical point.
pub fn sample_physical(image: &Image, point: [f64; 3]) -> Option<f64> {
    linear_sample(&image.data, image.geometry.physical_to_index(point))
}

/// Central-difference derivative of `data` along one index axis.
fn axis_derivative(data: &Array3<f32>, axis: usize) -> Array3<f32> {
    let (d, h, w) = data.dim();
    let len = [w, h, d][axis];
    let mut out = Array3::<f32>::zeros(data.dim());
    if len < 2 {
        return out;
    }

    let derivative = |(z, y, x): (usize, usize, usize)| -> f32 {
        let pos = [x, y, z][axis];
        let at = |p: usize| -> f32 {
            match axis {
                0 => data[[z, y, p]],
                1 => data[[z, p, x]],
                _ => data[[p, y, x]],
            }
        };
        if pos == 0 {
            at(1) - at(0)
        } else if pos == len - 1 {
            at(len - 1) - at(len - 2)
        } else {
            (at(pos + 1) - at(pos - 1)) * 0.5
        }
    };

    if data.len() >= PARALLEL_PIXEL_THRESHOLD {
        Zip::indexed(&mut out).par_for_each(|idx, v| *v = derivative(idx));
    } else {
        Zip::indexed(&mut out).for_each(|idx, v| *v = derivative(idx));
    }
    out
}

/// A moving image together with its physical-space gradient, ready for
/// repeated sampling by a metric.
#[derive(Clone, Debug)]
pub struct MovingImage {
    pub image: Image,
    gradient: [Array3<f32>; 3],
}

impl MovingImage {
    pub fn new(image: Image) -> Self {
        let gx = axis_derivative(&image.data, 0);
        let gy = axis_derivative(&image.data, 1);
        let gz = axis_derivative(&image.data, 2);
        Self {
            gradient: [gx, gy, gz],
            image,
        }
    }

    pub fn sample(&self, point: [f64; 3]) -> Option<f64> {
        sample_physical(&self.image, point)
    }

    /// Value and physical gradient at `point`, or `None` outside the image.
    pub fn sample_with_gradient(&self, point: [f64; 3]) -> Option<(f64, [f64; 3])> {
        let index = self.image.geometry.physical_to_index(point);
        let value = linear_sample(&self.image.data, index)?;
        let mut g = [0.0; 3];
        for (gi, comp) in g.iter_mut().zip(self.gradient.iter()) {
            *gi = linear_sample(comp, index)?;
        }
        Some((value, self.image.geometry.index_gradient_to_physical(g)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_linear_sample_midpoint() {
        let mut data = Array2::<f32>::zeros((2, 2));
        data[[0, 1]] = 1.0;
        let image = Image::from_slice(data);
        let v = linear_sample(&image.data, [0.5, 0.0, 0.0]).unwrap();
        assert!((v - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_linear_sample_outside_is_none() {
        let image = Image::from_slice(Array2::<f32>::zeros((4, 4)));
        assert!(linear_sample(&image.data, [3.5, 0.0, 0.0]).is_none());
        assert!(linear_sample(&image.data, [0.0, 0.0, 0.5]).is_none());
        assert!(linear_sample(&image.data, [f64::NAN, 0.0, 0.0]).is_none());
    }

    #[test]
    fn test_gradient_of_ramp() {
        let data = Array2::from_shape_fn((8, 8), |(_, c)| 2.0 * c as f32);
        let moving = MovingImage::new(Image::from_slice(data));
        let (v, g) = moving.sample_with_gradient([3.0, 4.0, 0.0]).unwrap();
        assert!((v - 6.0).abs() < 1e-9);
        assert!((g[0] - 2.0).abs() < 1e-9);
        assert!(g[1].abs() < 1e-9);
        assert!(g[2].abs() < 1e-9);
    }
}
