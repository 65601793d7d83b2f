use ndarray::{Array3, Axis, Zip};

use crate::consts::PARALLEL_PIXEL_THRESHOLD;

/// Separable Gaussian blur of a volume. `sigma` is given per axis as
/// `[x, y, z]` in voxels; an axis with sigma <= 0 is left untouched.
pub fn gaussian_blur_volume(data: &Array3<f32>, sigma: [f32; 3]) -> Array3<f32> {
    let mut result = data.clone();
    // Array axes are (z, y, x).
    for (axis, &s) in [2usize, 1, 0].iter().zip(sigma.iter()) {
        if s > 0.0 && data.len_of(Axis(*axis)) > 1 {
            let kernel = make_gaussian_kernel(s);
            result = convolve_axis(&result, &kernel, *axis);
        }
    }
    result
}

/// Blur every slice in-plane with the same sigma.
pub fn gaussian_blur_slices(data: &Array3<f32>, sigma: f32) -> Array3<f32> {
    gaussian_blur_volume(data, [sigma, sigma, 0.0])
}

fn make_gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (sigma * 3.0).ceil() as usize;
    let size = 2 * radius + 1;
    let mut kernel = vec![0.0f32; size];
    let s2 = 2.0 * sigma * sigma;
    let mut sum = 0.0f32;

    for (i, k) in kernel.iter_mut().enumerate() {
        let x = i as f32 - radius as f32;
        *k = (-x * x / s2).exp();
        sum += *k;
    }

    for v in &mut kernel {
        *v /= sum;
    }

    kernel
}

fn convolve_axis(data: &Array3<f32>, kernel: &[f32], axis: usize) -> Array3<f32> {
    let len = data.len_of(Axis(axis)) as isize;
    let radius = kernel.len() as isize / 2;
    let mut result = Array3::<f32>::zeros(data.dim());

    let tap = |(z, y, x): (usize, usize, usize)| -> f32 {
        let pos = [z, y, x][axis] as isize;
        let mut sum = 0.0f32;
        for (ki, &kv) in kernel.iter().enumerate() {
            let src = (pos + ki as isize - radius).clamp(0, len - 1) as usize;
            let v = match axis {
                0 => data[[src, y, x]],
                1 => data[[z, src, x]],
                _ => data[[z, y, src]],
            };
            sum += v * kv;
        }
        sum
    };

    if data.len() >= PARALLEL_PIXEL_THRESHOLD {
        Zip::indexed(&mut result).par_for_each(|idx, v| *v = tap(idx));
    } else {
        Zip::indexed(&mut result).for_each(|idx, v| *v = tap(idx));
    }
    result
}
