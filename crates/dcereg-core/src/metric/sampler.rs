//! Fixed-image sample selection and parallel accumulation over samples.

use rand::prelude::IndexedRandom;
use rand::{rngs::StdRng, SeedableRng};
use rayon::prelude::*;
use rayon::ThreadPool;

use crate::consts::{MIN_VALID_SAMPLE_FRACTION, PARALLEL_SAMPLE_THRESHOLD};
use crate::error::{RegistrationError, Result};
use crate::image::Image;
use crate::region::SampleDomain;

/// A fixed-image voxel taking part in metric evaluation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FixedSample {
    pub point: [f64; 3],
    pub value: f64,
}

/// Collect the fixed voxels inside `domain`, keeping a reproducible random
/// fraction `rate` of them when `rate < 1`.
pub fn collect_samples(
    fixed: &Image,
    domain: &SampleDomain,
    rate: f64,
    seed: u64,
) -> Result<Vec<FixedSample>> {
    let (d, h, w) = fixed.data.dim();
    let mut candidates = Vec::new();
    for z in 0..d {
        for y in 0..h {
            for x in 0..w {
                let point = fixed
                    .geometry
                    .index_to_physical([x as f64, y as f64, z as f64]);
                if domain.contains_physical(point) {
                    candidates.push(FixedSample {
                        point,
                        value: fixed.data[[z, y, x]] as f64,
                    });
                }
            }
        }
    }

    if candidates.is_empty() {
        return Err(RegistrationError::invalid_config(
            "registration region and mask contain no fixed-image voxels",
        ));
    }
    if rate >= 1.0 {
        return Ok(candidates);
    }

    let count = ((candidates.len() as f64 * rate).ceil() as usize).clamp(1, candidates.len());
    let mut rng = StdRng::seed_from_u64(seed);
    Ok(candidates
        .as_slice()
        .choose_multiple(&mut rng, count)
        .copied()
        .collect())
}

/// Fold over samples, in parallel on `pool` when there are enough of them.
pub(crate) fn fold_samples<A, I, F, M>(
    pool: &ThreadPool,
    samples: &[FixedSample],
    init: I,
    fold: F,
    merge: M,
) -> A
where
    A: Send,
    I: Fn() -> A + Sync + Send,
    F: Fn(A, &FixedSample) -> A + Sync + Send,
    M: Fn(A, A) -> A + Sync + Send,
{
    if samples.len() >= PARALLEL_SAMPLE_THRESHOLD {
        pool.install(|| samples.par_iter().fold(&init, &fold).reduce(&init, &merge))
    } else {
        samples.iter().fold(init(), fold)
    }
}

/// Reject evaluations where too few samples landed inside the moving image.
pub(crate) fn check_valid_count(valid: usize, total: usize) -> Result<()> {
    if valid == 0 || (valid as f64) < MIN_VALID_SAMPLE_FRACTION * total as f64 {
        return Err(RegistrationError::numerical(format!(
            "too many samples map outside the moving image ({valid} of {total} valid)"
        )));
    }
    Ok(())
}

pub(crate) fn add_into(target: &mut [f64], source: &[f64]) {
    for (t, s) in target.iter_mut().zip(source) {
        *t += s;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageGeometry;
    use crate::region::Region;
    use ndarray::Array2;

    fn domain(w: usize, h: usize) -> SampleDomain {
        SampleDomain::new(Region::full(w, h), None, ImageGeometry::default(), 1)
    }

    #[test]
    fn test_full_rate_takes_every_voxel() {
        let fixed = Image::from_slice(Array2::<f32>::zeros((10, 12)));
        let samples = collect_samples(&fixed, &domain(12, 10), 1.0, 7).unwrap();
        assert_eq!(samples.len(), 120);
    }

    #[test]
    fn test_sampling_is_reproducible() {
        let fixed = Image::from_slice(Array2::from_shape_fn((20, 20), |(r, c)| (r * 20 + c) as f32));
        let a = collect_samples(&fixed, &domain(20, 20), 0.25, 42).unwrap();
        let b = collect_samples(&fixed, &domain(20, 20), 0.25, 42).unwrap();
        assert_eq!(a.len(), 100);
        assert_eq!(a, b);
    }

    #[test]
    fn test_region_restricts_samples() {
        let fixed = Image::from_slice(Array2::<f32>::zeros((10, 10)));
        let d = SampleDomain::new(Region::new(2, 3, 4, 5), None, ImageGeometry::default(), 1);
        let samples = collect_samples(&fixed, &d, 1.0, 0).unwrap();
        assert_eq!(samples.len(), 20);
    }
}
