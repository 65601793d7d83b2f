//! Series-level orchestration: registers every non-fixed image in order on
//! a worker thread and collects per-image results.

use std::sync::Arc;
use std::thread::JoinHandle;

use rayon::ThreadPool;
use tracing::{debug, info};

use crate::error::{RegistrationError, Result};
use crate::image::ImageSeries;
use crate::observer::CancelToken;
use crate::params::ParameterSet;
use crate::progress::ProgressReporter;
use crate::strategy::{RegisterOneImage, ResultCode};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageStatus {
    /// The reference image; never registered.
    Fixed,
    Registered(ResultCode),
    /// Registration was interrupted; the original image is kept.
    Cancelled,
    NotProcessed,
}

impl std::fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed => write!(f, "Fixed"),
            Self::Registered(code) => write!(f, "{code}"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::NotProcessed => write!(f, "Not processed"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManagerState {
    Idle,
    Running(usize),
    Completed,
    Cancelled,
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Running(i) => write!(f, "Running image {i}"),
            Self::Completed => write!(f, "Completed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// What happened to one image of the series.
#[derive(Clone, Debug)]
pub struct ImageReport {
    pub index: usize,
    pub status: ImageStatus,
    pub iterations: usize,
    pub final_value: f64,
    pub stop_condition: Option<String>,
    pub rigid_parameters: Option<Vec<f64>>,
}

impl ImageReport {
    fn pending(index: usize, status: ImageStatus) -> Self {
        Self {
            index,
            status,
            iterations: 0,
            final_value: f64::NAN,
            stop_condition: None,
            rigid_parameters: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RegistrationReport {
    /// The series with registered images in place of the originals.
    pub series: ImageSeries,
    pub images: Vec<ImageReport>,
    pub state: ManagerState,
}

impl RegistrationReport {
    pub fn statuses(&self) -> Vec<ImageStatus> {
        self.images.iter().map(|r| r.status).collect()
    }

    /// Worst code over all registered images, `None` if none was registered.
    pub fn worst_code(&self) -> Option<ResultCode> {
        self.images
            .iter()
            .filter_map(|r| match r.status {
                ImageStatus::Registered(code) => Some(code),
                _ => None,
            })
            .max()
    }

    pub fn count(&self, status: ImageStatus) -> usize {
        self.images.iter().filter(|r| r.status == status).count()
    }
}

/// Build the bounded pool used by metric evaluation, resampling and demons.
pub fn build_thread_pool(threads: usize) -> Result<ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|i| format!("dcereg-compute-{i}"))
        .build()
        .map_err(|e| RegistrationError::Worker(e.to_string()))
}

/// Check that `series` is what `params` was validated for.
fn validate_series(params: &ParameterSet, series: &ImageSeries) -> Result<()> {
    if series.is_empty() {
        return Err(RegistrationError::EmptySeries);
    }
    if series.len() != params.num_images {
        return Err(RegistrationError::invalid_config(format!(
            "series has {} images but num_images is {}",
            series.len(),
            params.num_images
        )));
    }
    if series.slices_per_image() != params.slices_per_image {
        return Err(RegistrationError::invalid_config(format!(
            "series images have {} slices but slices_per_image is {}",
            series.slices_per_image(),
            params.slices_per_image
        )));
    }
    let fixed = series.image(params.fixed_image_index)?;
    params.region.validate(fixed.width(), fixed.height())
}

pub struct RegistrationManager {
    params: ParameterSet,
    reporter: Arc<dyn ProgressReporter>,
    cancel: CancelToken,
    state: ManagerState,
}

impl RegistrationManager {
    pub fn new(params: ParameterSet, reporter: Arc<dyn ProgressReporter>) -> Self {
        Self::with_cancel_token(params, reporter, CancelToken::new())
    }

    /// Use an existing cancel flag, e.g. one shared with a UI.
    pub fn with_cancel_token(
        params: ParameterSet,
        reporter: Arc<dyn ProgressReporter>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            params,
            reporter,
            cancel,
            state: ManagerState::Idle,
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    /// Register the series on the calling thread.
    pub fn run(&mut self, mut series: ImageSeries) -> Result<RegistrationReport> {
        validate_series(&self.params, &series)?;
        let pool = build_thread_pool(self.params.number_of_threads)?;
        let total = series.len();
        let fixed_index = self.params.fixed_image_index;
        let fixed = series.extract(fixed_index)?;

        info!(
            images = total,
            fixed = fixed_index,
            sequence = %self.params.sequence(),
            threads = self.params.number_of_threads,
            "Starting series registration"
        );

        let mut images: Vec<ImageReport> = (0..total)
            .map(|i| {
                let status = if i == fixed_index {
                    ImageStatus::Fixed
                } else {
                    ImageStatus::NotProcessed
                };
                ImageReport::pending(i, status)
            })
            .collect();

        let strategy = RegisterOneImage::new(
            &self.params,
            &fixed,
            &pool,
            Arc::clone(&self.reporter),
            self.cancel.clone(),
        );

        self.state = ManagerState::Completed;
        for index in (0..total).filter(|&i| i != fixed_index) {
            if self.cancel.is_cancelled() {
                self.state = ManagerState::Cancelled;
                break;
            }
            self.state = ManagerState::Running(index);
            self.reporter.begin_image(index, total);

            let moving = series.extract(index)?;
            let outcome = strategy.register_image(moving, index);
            let status = if outcome.cancelled {
                ImageStatus::Cancelled
            } else {
                ImageStatus::Registered(outcome.code)
            };
            debug!(image = index, status = %status, "Image finished");

            images[index] = ImageReport {
                index,
                status,
                iterations: outcome.iterations,
                final_value: outcome.final_value,
                stop_condition: outcome.stop_condition,
                rigid_parameters: outcome.rigid_parameters,
            };
            if !outcome.cancelled {
                series.insert(index, outcome.image)?;
            }
            self.reporter.finish_image(index, status);

            if outcome.cancelled {
                self.state = ManagerState::Cancelled;
                break;
            }
            self.state = ManagerState::Completed;
        }

        info!(state = %self.state, "Series registration finished");
        Ok(RegistrationReport {
            series,
            images,
            state: self.state,
        })
    }

    /// Validate synchronously, then register the series on a worker thread.
    pub fn start(
        params: ParameterSet,
        series: ImageSeries,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<RegistrationHandle> {
        validate_series(&params, &series)?;
        let mut manager = Self::new(params, reporter);
        let cancel = manager.cancel_token();
        let join = std::thread::Builder::new()
            .name("dcereg-worker".into())
            .spawn(move || manager.run(series))?;
        Ok(RegistrationHandle { cancel, join })
    }
}

/// Caller-side handle of a registration running on the worker thread.
pub struct RegistrationHandle {
    cancel: CancelToken,
    join: JoinHandle<Result<RegistrationReport>>,
}

impl RegistrationHandle {
    /// Ask the worker to stop after the current optimizer iteration.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Block until the worker is done.
    pub fn wait(self) -> Result<RegistrationReport> {
        self.join
            .join()
            .map_err(|_| RegistrationError::Worker("registration worker panicked".into()))?
    }
}
