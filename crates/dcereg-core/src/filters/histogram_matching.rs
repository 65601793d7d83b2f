//! Intensity standardisation of one image against another by matching
//! histogram quantiles. Voxels darker than the image mean are treated as
//! background and excluded from the histograms.

use crate::consts::EPSILON;
use crate::error::{RegistrationError, Result};
use crate::image::Image;

/// Remap `source` intensities so its histogram matches `reference`.
pub fn match_histogram(
    source: &Image,
    reference: &Image,
    bins: usize,
    match_points: usize,
) -> Result<Image> {
    if bins == 0 || match_points == 0 {
        return Err(RegistrationError::invalid_config(
            "histogram matching needs at least one bin and one match point",
        ));
    }

    let src_table = quantile_table(source, bins, match_points);
    let ref_table = quantile_table(reference, bins, match_points);

    let mut out = source.clone();
    out.data
        .mapv_inplace(|v| map_intensity(v as f64, &src_table, &ref_table) as f32);
    Ok(out)
}

/// Intensities at `[threshold, q_1 .. q_n, max]` where `q_j` are evenly spaced
/// quantiles of the above-mean histogram.
fn quantile_table(image: &Image, bins: usize, match_points: usize) -> Vec<f64> {
    let values: Vec<f64> = image
        .data
        .iter()
        .filter(|v| v.is_finite())
        .map(|&v| v as f64)
        .collect();
    if values.is_empty() {
        return vec![0.0; match_points + 2];
    }

    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let lo = mean;
    let width = (max - lo) / bins as f64;
    if width <= EPSILON {
        return vec![lo; match_points + 2];
    }

    let mut histogram = vec![0usize; bins];
    let mut total = 0usize;
    for &v in values.iter().filter(|&&v| v >= lo) {
        let b = (((v - lo) / width) as usize).min(bins - 1);
        histogram[b] += 1;
        total += 1;
    }

    let mut table = Vec::with_capacity(match_points + 2);
    table.push(lo);
    for j in 1..=match_points {
        let target = j as f64 / (match_points + 1) as f64 * total as f64;
        let mut cumulative = 0.0;
        let mut value = max;
        for (b, &count) in histogram.iter().enumerate() {
            let next = cumulative + count as f64;
            if next >= target && count > 0 {
                let frac = (target - cumulative) / count as f64;
                value = lo + (b as f64 + frac) * width;
                break;
            }
            cumulative = next;
        }
        table.push(value);
    }
    table.push(max);
    table
}

fn map_intensity(v: f64, src: &[f64], dst: &[f64]) -> f64 {
    let last = src.len() - 1;
    let segment = if v < src[0] {
        0
    } else {
        (0..last).find(|&k| v < src[k + 1]).unwrap_or(last - 1)
    };
    let ds = src[segment + 1] - src[segment];
    if ds.abs() <= EPSILON {
        return dst[segment] + (v - src[segment]);
    }
    let slope = (dst[segment + 1] - dst[segment]) / ds;
    dst[segment] + (v - src[segment]) * slope
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn ramp(scale: f32, offset: f32) -> Image {
        Image::from_slice(Array2::from_shape_fn((16, 16), |(r, c)| {
            offset + scale * (r * 16 + c) as f32
        }))
    }

    #[test]
    fn test_linear_rescale_is_undone() {
        let reference = ramp(1.0, 0.0);
        let source = ramp(2.0, 10.0);
        let matched = match_histogram(&source, &reference, 64, 7).unwrap();
        for (m, r) in matched.data.iter().zip(reference.data.iter()) {
            if *r > 128.0 {
                assert!((m - r).abs() < 4.0, "matched {m} vs reference {r}");
            }
        }
    }

    #[test]
    fn test_zero_bins_rejected() {
        let img = ramp(1.0, 0.0);
        assert!(match_histogram(&img, &img, 0, 5).is_err());
    }
}
