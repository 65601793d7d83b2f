//! Gaussian resolution pyramids for multi-resolution registration.
//!
//! Each coarser level is blurred with `PYRAMID_BLUR_SIGMA` and then decimated
//! by two in-plane. Volumes are only decimated along z while they still have
//! at least `MIN_PYRAMID_DEPTH` slices. Voxel 0 keeps its physical position
//! and spacing doubles, so every level covers the same physical extent.

use ndarray::Array3;

use crate::consts::{MIN_PYRAMID_DEPTH, PYRAMID_BLUR_SIGMA};
use crate::filters::gaussian_blur::gaussian_blur_volume;
use crate::image::Image;

#[derive(Clone, Debug)]
pub struct ImagePyramid {
    /// Index 0 is the coarsest level, the last entry is full resolution.
    levels: Vec<Image>,
}

impl ImagePyramid {
    /// Build a pyramid with `levels` entries (at least one).
    pub fn build(image: &Image, levels: usize) -> Self {
        let levels = levels.max(1);
        let mut fine_to_coarse = Vec::with_capacity(levels);
        fine_to_coarse.push(image.clone());

        let mut current = image.clone();
        for _ in 1..levels {
            current = downsample_2x(&current);
            fine_to_coarse.push(current.clone());
        }

        fine_to_coarse.reverse();
        Self {
            levels: fine_to_coarse,
        }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Image at schedule level `level` (0 = coarsest).
    pub fn level(&self, level: usize) -> &Image {
        &self.levels[level.min(self.levels.len() - 1)]
    }
}

/// Blur then take every other voxel.
fn downsample_2x(image: &Image) -> Image {
    let (d, h, w) = image.data.dim();
    let shrink_z = d >= MIN_PYRAMID_DEPTH;
    let z_sigma = if shrink_z { PYRAMID_BLUR_SIGMA } else { 0.0 };
    let blurred = gaussian_blur_volume(
        &image.data,
        [PYRAMID_BLUR_SIGMA, PYRAMID_BLUR_SIGMA, z_sigma],
    );

    let z_step = if shrink_z { 2 } else { 1 };
    let new_d = d.div_ceil(z_step);
    let new_h = h.div_ceil(2);
    let new_w = w.div_ceil(2);
    let data = Array3::from_shape_fn((new_d, new_h, new_w), |(z, y, x)| {
        blurred[[z * z_step, y * 2, x * 2]]
    });

    let mut geometry = image.geometry.clone();
    geometry.spacing[0] *= 2.0;
    geometry.spacing[1] *= 2.0;
    if shrink_z {
        geometry.spacing[2] *= 2.0;
    }

    Image::new(data, geometry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_pyramid_shapes_and_spacing() {
        let image = Image::from_slice(Array2::<f32>::zeros((128, 100)));
        let pyramid = ImagePyramid::build(&image, 3);
        assert_eq!(pyramid.len(), 3);
        assert_eq!(pyramid.level(0).size(), [25, 32, 1]);
        assert_eq!(pyramid.level(1).size(), [50, 64, 1]);
        assert_eq!(pyramid.level(2).size(), [100, 128, 1]);
        assert_eq!(pyramid.level(0).geometry.spacing, [4.0, 4.0, 1.0]);
    }

    #[test]
    fn test_thin_volume_keeps_depth() {
        let image = Image::new(Array3::<f32>::zeros((3, 16, 16)), Default::default());
        let pyramid = ImagePyramid::build(&image, 2);
        assert_eq!(pyramid.level(0).depth(), 3);
        assert_eq!(pyramid.level(0).geometry.spacing[2], 1.0);
    }

    #[test]
    fn test_single_level_is_original() {
        let image = Image::from_slice(Array2::<f32>::from_elem((8, 8), 0.25));
        let pyramid = ImagePyramid::build(&image, 1);
        assert_eq!(pyramid.len(), 1);
        assert_eq!(pyramid.level(0).data, image.data);
    }
}
