//! Mattes mutual information.
//!
//! The joint histogram uses a zero-order (box) Parzen window on the fixed
//! intensity and a cubic B-spline window on the moving intensity, so the
//! metric is differentiable with respect to moving intensities. The value is
//! the negated mutual information, so lower is better as for mean squares.

use rayon::ThreadPool;

use crate::consts::{EPSILON, MATTES_PADDING_BINS, METRIC_SAMPLING_SEED};
use crate::error::{RegistrationError, Result};
use crate::image::{Image, MovingImage};
use crate::region::SampleDomain;
use crate::transform::kernel::{bspline3, bspline3_derivative};
use crate::transform::Transform;

use super::sampler::{add_into, check_valid_count, collect_samples, fold_samples, FixedSample};

#[derive(Clone, Debug)]
pub struct MattesMutualInformationMetric {
    bins: usize,
    sample_rate: f64,
    samples: Vec<FixedSample>,
    fixed_min: f64,
    fixed_bin_size: f64,
    moving_min: f64,
    moving_bin_size: f64,
}

/// Bin layout shared by both passes.
struct Binning {
    bins: usize,
    pad: f64,
    fixed_min: f64,
    fixed_bin_size: f64,
    moving_min: f64,
    moving_bin_size: f64,
}

impl Binning {
    fn fixed_bin(&self, f: f64) -> usize {
        let term = (f - self.fixed_min) / self.fixed_bin_size + self.pad;
        let hi = (self.bins - MATTES_PADDING_BINS - 1) as f64;
        term.clamp(self.pad, hi).floor() as usize
    }

    /// Continuous moving bin position and the first of its four supporting bins.
    /// Only the window is clamped; the term stays continuous so the value and
    /// its derivative agree at the top of the intensity range.
    fn moving_window(&self, m: f64) -> (f64, usize) {
        let term = (m - self.moving_min) / self.moving_bin_size + self.pad;
        let hi = (self.bins - MATTES_PADDING_BINS - 1) as f64;
        let index = term.floor().clamp(self.pad, hi) as usize;
        (term, index - 1)
    }
}

struct JointHistogram {
    joint: Vec<f64>,
    valid: usize,
    non_finite: bool,
}

impl JointHistogram {
    fn new(bins: usize) -> Self {
        Self {
            joint: vec![0.0; bins * bins],
            valid: 0,
            non_finite: false,
        }
    }

    fn merge(mut self, other: Self) -> Self {
        add_into(&mut self.joint, &other.joint);
        self.valid += other.valid;
        self.non_finite |= other.non_finite;
        self
    }
}

struct DerivativeSum {
    derivative: Vec<f64>,
}

impl MattesMutualInformationMetric {
    pub fn new(bins: usize, sample_rate: f64) -> Self {
        Self {
            bins,
            sample_rate,
            samples: Vec::new(),
            fixed_min: 0.0,
            fixed_bin_size: 1.0,
            moving_min: 0.0,
            moving_bin_size: 1.0,
        }
    }

    pub fn histogram_bins(&self) -> usize {
        self.bins
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn set_histogram_bins(&mut self, bins: usize) {
        self.bins = bins;
    }

    pub fn set_sample_rate(&mut self, rate: f64) {
        self.sample_rate = rate;
    }

    pub fn number_of_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn initialize(
        &mut self,
        fixed: &Image,
        moving: &MovingImage,
        domain: &SampleDomain,
    ) -> Result<()> {
        if self.bins <= 2 * MATTES_PADDING_BINS {
            return Err(RegistrationError::invalid_config(format!(
                "Mattes mutual information needs more than {} histogram bins, got {}",
                2 * MATTES_PADDING_BINS,
                self.bins
            )));
        }
        self.samples = collect_samples(fixed, domain, self.sample_rate, METRIC_SAMPLING_SEED)?;

        let (fmin, fmax) = self
            .samples
            .iter()
            .map(|s| s.value)
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });
        let (mmin, mmax) = moving.image.min_max();
        let (mmin, mmax) = (mmin as f64, mmax as f64);
        if !(fmin.is_finite() && fmax.is_finite() && mmin.is_finite() && mmax.is_finite()) {
            return Err(RegistrationError::numerical(
                "cannot derive histogram range from non-finite intensities",
            ));
        }

        let usable = (self.bins - 2 * MATTES_PADDING_BINS) as f64;
        self.fixed_min = fmin;
        self.fixed_bin_size = (fmax - fmin).max(EPSILON) / usable;
        self.moving_min = mmin;
        self.moving_bin_size = (mmax - mmin).max(EPSILON) / usable;
        Ok(())
    }

    fn binning(&self) -> Binning {
        Binning {
            bins: self.bins,
            pad: MATTES_PADDING_BINS as f64,
            fixed_min: self.fixed_min,
            fixed_bin_size: self.fixed_bin_size,
            moving_min: self.moving_min,
            moving_bin_size: self.moving_bin_size,
        }
    }

    pub fn value_and_derivative(
        &self,
        moving: &MovingImage,
        transform: &Transform,
        pool: &ThreadPool,
    ) -> Result<(f64, Vec<f64>)> {
        let bins = self.bins;
        let binning = self.binning();

        // Pass 1: joint histogram.
        let hist = fold_samples(
            pool,
            &self.samples,
            || JointHistogram::new(bins),
            |mut acc, s| {
                let q = transform.transform_point(s.point);
                let Some(m) = moving.sample(q) else {
                    return acc;
                };
                if !m.is_finite() || !s.value.is_finite() {
                    acc.non_finite = true;
                    return acc;
                }
                let fi = binning.fixed_bin(s.value);
                let (term, start) = binning.moving_window(m);
                for j in start..start + 4 {
                    acc.joint[fi * bins + j] += bspline3(j as f64 - term);
                }
                acc.valid += 1;
                acc
            },
            JointHistogram::merge,
        );

        if hist.non_finite {
            return Err(RegistrationError::numerical(
                "non-finite intensity in mutual information metric",
            ));
        }
        check_valid_count(hist.valid, self.samples.len())?;

        let n = hist.valid as f64;
        let joint: Vec<f64> = hist.joint.iter().map(|v| v / n).collect();
        let mut fixed_pdf = vec![0.0; bins];
        let mut moving_pdf = vec![0.0; bins];
        for i in 0..bins {
            for j in 0..bins {
                let p = joint[i * bins + j];
                fixed_pdf[i] += p;
                moving_pdf[j] += p;
            }
        }

        let mut mutual_information = 0.0;
        for i in 0..bins {
            for j in 0..bins {
                let p = joint[i * bins + j];
                if p > EPSILON && fixed_pdf[i] > EPSILON && moving_pdf[j] > EPSILON {
                    mutual_information += p * (p / (fixed_pdf[i] * moving_pdf[j])).ln();
                }
            }
        }

        // Pass 2: d(-MI)/dparams. Only the moving window depends on the
        // parameters, and the fixed marginal is constant.
        let log_ratio: Vec<f64> = (0..bins * bins)
            .map(|k| {
                let p = joint[k];
                let pm = moving_pdf[k % bins];
                if p > EPSILON && pm > EPSILON {
                    (p / pm).ln()
                } else {
                    0.0
                }
            })
            .collect();
        let np = transform.number_of_parameters();
        let norm = 1.0 / (n * self.moving_bin_size);
        let sum = fold_samples(
            pool,
            &self.samples,
            || DerivativeSum {
                derivative: vec![0.0; np],
            },
            |mut acc, s| {
                let q = transform.transform_point(s.point);
                let Some((m, g)) = moving.sample_with_gradient(q) else {
                    return acc;
                };
                let fi = binning.fixed_bin(s.value);
                let (term, start) = binning.moving_window(m);
                let mut coeff = 0.0;
                for j in start..start + 4 {
                    coeff += bspline3_derivative(j as f64 - term) * log_ratio[fi * bins + j];
                }
                if coeff != 0.0 {
                    transform.accumulate_jacobian(s.point, g, coeff * norm, &mut acc.derivative);
                }
                acc
            },
            |mut a, b| {
                add_into(&mut a.derivative, &b.derivative);
                a
            },
        );

        let value = -mutual_information;
        if !value.is_finite() || sum.derivative.iter().any(|d| !d.is_finite()) {
            return Err(RegistrationError::numerical(
                "mutual information value is not finite",
            ));
        }
        Ok((value, sum.derivative))
    }
}
