//! Image similarity metrics and the metric factory.

pub mod mattes;
pub mod mean_squares;
pub mod sampler;

use std::str::FromStr;

use rayon::ThreadPool;
use serde::{Deserialize, Serialize};

use crate::error::{RegistrationError, Result};
use crate::image::{Image, MovingImage};
use crate::observer::LevelConfigurable;
use crate::params::LevelParameters;
use crate::region::SampleDomain;
use crate::transform::{PointMapping, Transform};

pub use mattes::MattesMutualInformationMetric;
pub use mean_squares::MeanSquaresMetric;

/// Metric selector. Integer codes match the plugin settings: 0 and 1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricKind {
    #[default]
    MeanSquares,
    MattesMutualInformation,
}

impl MetricKind {
    pub fn code(&self) -> u32 {
        match self {
            Self::MeanSquares => 0,
            Self::MattesMutualInformation => 1,
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MeanSquares => write!(f, "Mean Squares"),
            Self::MattesMutualInformation => write!(f, "Mattes Mutual Information"),
        }
    }
}

impl TryFrom<u32> for MetricKind {
    type Error = RegistrationError;

    fn try_from(code: u32) -> Result<Self> {
        match code {
            0 => Ok(Self::MeanSquares),
            1 => Ok(Self::MattesMutualInformation),
            other => Err(RegistrationError::unsupported(format!(
                "unknown metric code {other}"
            ))),
        }
    }
}

impl FromStr for MetricKind {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ms" | "mean-squares" | "meansquares" => Ok(Self::MeanSquares),
            "mmi" | "mattes" | "mattes-mutual-information" | "mattesmutualinformation" => {
                Ok(Self::MattesMutualInformation)
            }
            other => Err(RegistrationError::unsupported(format!(
                "unknown metric '{other}'"
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub enum Metric {
    MeanSquares(MeanSquaresMetric),
    MattesMutualInformation(MattesMutualInformationMetric),
}

/// Build a metric configured with one level's parameters.
pub fn create_metric(kind: MetricKind, level: &LevelParameters) -> Metric {
    match kind {
        MetricKind::MeanSquares => Metric::MeanSquares(MeanSquaresMetric::new()),
        MetricKind::MattesMutualInformation => Metric::MattesMutualInformation(
            MattesMutualInformationMetric::new(level.histogram_bins, level.sample_rate),
        ),
    }
}

impl Metric {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::MeanSquares(_) => MetricKind::MeanSquares,
            Self::MattesMutualInformation(_) => MetricKind::MattesMutualInformation,
        }
    }

    /// Histogram bins; mean squares has none.
    pub fn set_histogram_bins(&mut self, bins: usize) {
        if let Self::MattesMutualInformation(m) = self {
            m.set_histogram_bins(bins);
        }
    }

    /// Fraction of domain voxels sampled; mean squares always uses them all.
    pub fn set_sample_rate(&mut self, rate: f64) {
        if let Self::MattesMutualInformation(m) = self {
            m.set_sample_rate(rate);
        }
    }

    pub fn number_of_samples(&self) -> usize {
        match self {
            Self::MeanSquares(m) => m.number_of_samples(),
            Self::MattesMutualInformation(m) => m.number_of_samples(),
        }
    }

    /// Select samples and intensity ranges for one pyramid level.
    pub fn initialize(
        &mut self,
        fixed: &Image,
        moving: &MovingImage,
        domain: &SampleDomain,
    ) -> Result<()> {
        match self {
            Self::MeanSquares(m) => m.initialize(fixed, domain),
            Self::MattesMutualInformation(m) => m.initialize(fixed, moving, domain),
        }
    }

    pub fn value_and_derivative(
        &self,
        moving: &MovingImage,
        transform: &Transform,
        pool: &ThreadPool,
    ) -> Result<(f64, Vec<f64>)> {
        match self {
            Self::MeanSquares(m) => m.value_and_derivative(moving, transform, pool),
            Self::MattesMutualInformation(m) => m.value_and_derivative(moving, transform, pool),
        }
    }

    pub fn value(
        &self,
        moving: &MovingImage,
        transform: &Transform,
        pool: &ThreadPool,
    ) -> Result<f64> {
        match self {
            Self::MeanSquares(m) => m.value(moving, transform as &dyn PointMapping, pool),
            Self::MattesMutualInformation(m) => {
                m.value_and_derivative(moving, transform, pool).map(|(v, _)| v)
            }
        }
    }
}

impl LevelConfigurable for Metric {
    fn apply_level(&mut self, level: &LevelParameters) -> Result<()> {
        self.set_histogram_bins(level.histogram_bins);
        self.set_sample_rate(level.sample_rate);
        Ok(())
    }
}
