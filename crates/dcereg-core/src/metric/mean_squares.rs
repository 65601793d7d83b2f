//! Mean of squared intensity differences over every sample in the domain.

use rayon::ThreadPool;

use crate::error::{RegistrationError, Result};
use crate::image::{Image, MovingImage};
use crate::region::SampleDomain;
use crate::transform::{PointMapping, Transform};

use super::sampler::{add_into, check_valid_count, collect_samples, fold_samples, FixedSample};

#[derive(Clone, Debug, Default)]
pub struct MeanSquaresMetric {
    samples: Vec<FixedSample>,
}

struct Accumulator {
    sum: f64,
    valid: usize,
    non_finite: bool,
    derivative: Vec<f64>,
}

impl Accumulator {
    fn new(n: usize) -> Self {
        Self {
            sum: 0.0,
            valid: 0,
            non_finite: false,
            derivative: vec![0.0; n],
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.sum += other.sum;
        self.valid += other.valid;
        self.non_finite |= other.non_finite;
        add_into(&mut self.derivative, &other.derivative);
        self
    }
}

impl MeanSquaresMetric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn number_of_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn initialize(&mut self, fixed: &Image, domain: &SampleDomain) -> Result<()> {
        self.samples = collect_samples(fixed, domain, 1.0, 0)?;
        Ok(())
    }

    pub fn value(
        &self,
        moving: &MovingImage,
        mapping: &dyn PointMapping,
        pool: &ThreadPool,
    ) -> Result<f64> {
        let acc = fold_samples(
            pool,
            &self.samples,
            || Accumulator::new(0),
            |mut acc, s| {
                if let Some(m) = moving.sample(mapping.map_point(s.point)) {
                    let diff = m - s.value;
                    acc.non_finite |= !diff.is_finite();
                    acc.sum += diff * diff;
                    acc.valid += 1;
                }
                acc
            },
            Accumulator::merge,
        );
        self.finish(acc).map(|(v, _)| v)
    }

    pub fn value_and_derivative(
        &self,
        moving: &MovingImage,
        transform: &Transform,
        pool: &ThreadPool,
    ) -> Result<(f64, Vec<f64>)> {
        let n = transform.number_of_parameters();
        let acc = fold_samples(
            pool,
            &self.samples,
            || Accumulator::new(n),
            |mut acc, s| {
                let q = transform.transform_point(s.point);
                if let Some((m, g)) = moving.sample_with_gradient(q) {
                    let diff = m - s.value;
                    if !diff.is_finite() || g.iter().any(|v| !v.is_finite()) {
                        acc.non_finite = true;
                        return acc;
                    }
                    acc.sum += diff * diff;
                    acc.valid += 1;
                    transform.accumulate_jacobian(s.point, g, 2.0 * diff, &mut acc.derivative);
                }
                acc
            },
            Accumulator::merge,
        );
        self.finish(acc)
    }

    fn finish(&self, acc: Accumulator) -> Result<(f64, Vec<f64>)> {
        if acc.non_finite {
            return Err(RegistrationError::numerical(
                "non-finite intensity in mean squares metric",
            ));
        }
        check_valid_count(acc.valid, self.samples.len())?;
        let scale = 1.0 / acc.valid as f64;
        let value = acc.sum * scale;
        let derivative: Vec<f64> = acc.derivative.into_iter().map(|d| d * scale).collect();
        if !value.is_finite() || derivative.iter().any(|d| !d.is_finite()) {
            return Err(RegistrationError::numerical("mean squares value is not finite"));
        }
        Ok((value, derivative))
    }
}
