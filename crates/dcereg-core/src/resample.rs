//! Resampling a moving image onto the fixed voxel grid.

use ndarray::{Array3, Zip};
use rayon::ThreadPool;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::image::interpolate::sample_physical;
use crate::image::Image;
use crate::transform::PointMapping;

/// Sample `moving` at `mapping(p)` for every voxel centre `p` of
/// `reference`. Points mapping outside `moving` get `fill_value`.
pub fn resample(
    moving: &Image,
    reference: &Image,
    mapping: &dyn PointMapping,
    fill_value: f32,
    pool: &ThreadPool,
) -> Image {
    let geometry = &reference.geometry;
    let mut out = Array3::<f32>::zeros(reference.data.dim());

    let sample = |(z, y, x): (usize, usize, usize), v: &mut f32| {
        let p = geometry.index_to_physical([x as f64, y as f64, z as f64]);
        *v = sample_physical(moving, mapping.map_point(p))
            .map_or(fill_value, |s| s as f32);
    };

    if reference.voxel_count() >= PARALLEL_PIXEL_THRESHOLD {
        pool.install(|| Zip::indexed(&mut out).par_for_each(sample));
    } else {
        Zip::indexed(&mut out).for_each(sample);
    }

    Image::new(out, geometry.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageGeometry;

    struct Shift([f64; 3]);

    impl PointMapping for Shift {
        fn map_point(&self, p: [f64; 3]) -> [f64; 3] {
            [p[0] + self.0[0], p[1] + self.0[1], p[2] + self.0[2]]
        }
    }

    fn pool() -> ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap()
    }

    #[test]
    fn test_integer_shift_and_fill() {
        let data = Array3::from_shape_fn((1, 4, 6), |(_, y, x)| (y * 10 + x) as f32);
        let image = Image::new(data, ImageGeometry::default());
        let out = resample(&image, &image, &Shift([2.0, 0.0, 0.0]), -1.0, &pool());
        assert_eq!(out.data[[0, 1, 0]], 12.0);
        assert_eq!(out.data[[0, 3, 3]], 35.0);
        assert_eq!(out.data[[0, 0, 4]], -1.0);
        assert_eq!(out.data[[0, 2, 5]], -1.0);
    }
}
