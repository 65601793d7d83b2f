use ndarray::Array2;

use dcereg_core::image::{Image, ImageSeries};
use dcereg_core::metric::MetricKind;
use dcereg_core::optimizer::OptimizerKind;
use dcereg_core::params::RegistrationConfig;

/// A smooth synthetic slice: three Gaussian blobs on a flat background,
/// displaced by `shift` pixels. Sampling `blobs(.., shift)` at `p + shift`
/// gives `blobs(.., 0)` at `p`.
pub fn blobs(width: usize, height: usize, shift: [f64; 2]) -> Array2<f32> {
    let w = width as f64;
    let h = height as f64;
    let centres = [
        (0.40 * w, 0.45 * h, 0.09 * w, 900.0),
        (0.65 * w, 0.35 * h, 0.07 * w, 600.0),
        (0.55 * w, 0.70 * h, 0.11 * w, 750.0),
    ];
    Array2::from_shape_fn((height, width), |(y, x)| {
        let px = x as f64 - shift[0];
        let py = y as f64 - shift[1];
        let v: f64 = centres
            .iter()
            .map(|&(cx, cy, s, a)| {
                let d2 = (px - cx).powi(2) + (py - cy).powi(2);
                a * (-d2 / (2.0 * s * s)).exp()
            })
            .sum();
        (100.0 + v) as f32
    })
}

/// Series whose image 0 is unshifted and every other image is shifted by
/// `shift`.
pub fn shifted_series(width: usize, height: usize, count: usize, shift: [f64; 2]) -> ImageSeries {
    let images = (0..count)
        .map(|i| {
            let s = if i == 0 { [0.0, 0.0] } else { shift };
            Image::from_slice(blobs(width, height, s))
        })
        .collect();
    ImageSeries::from_images(images).unwrap()
}

/// Rigid-only mean squares + regular-step gradient descent.
pub fn rigid_config(num_images: usize, levels: usize) -> RegistrationConfig {
    let mut config = RegistrationConfig::default();
    config.general.num_images = num_images;
    config.general.slices_per_image = 1;
    config.general.fixed_image_number = 1;
    config.rigid.enabled = true;
    config.rigid.levels = levels;
    config.rigid.metric = MetricKind::MeanSquares;
    config.rigid.optimizer = OptimizerKind::RegularStepGradientDescent;
    config.bspline.enabled = false;
    config.demons.enabled = false;
    config.threads.use_default_number_of_threads = false;
    config.threads.number_of_threads = 2;
    config
}

pub fn mean_squared_difference(a: &Image, b: &Image) -> f64 {
    let n = a.data.len() as f64;
    a.data
        .iter()
        .zip(b.data.iter())
        .map(|(x, y)| ((*x - *y) as f64).powi(2))
        .sum::<f64>()
        / n
}

/// Mean squared difference over the interior, away from borders where
/// resampling fills in the default value.
pub fn interior_msd(a: &Image, b: &Image, margin: usize) -> f64 {
    let (_, h, w) = a.data.dim();
    let mut sum = 0.0;
    let mut n = 0usize;
    for y in margin..h - margin {
        for x in margin..w - margin {
            sum += ((a.data[[0, y, x]] - b.data[[0, y, x]]) as f64).powi(2);
            n += 1;
        }
    }
    sum / n as f64
}
