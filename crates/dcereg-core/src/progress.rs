//! Progress reporting from the registration worker to its caller.

use std::sync::mpsc;

use crate::manager::ImageStatus;
use crate::params::StageKind;

/// Snapshot of the optimization currently running, sent once per optimizer
/// iteration and once per resolution change.
#[derive(Clone, Debug, PartialEq)]
pub struct RegistrationProgress {
    pub current_image_index: usize,
    pub total_images: usize,
    pub stage: StageKind,
    /// Schedule level, 0 = coarsest.
    pub level: usize,
    pub num_levels: usize,
    pub iteration: usize,
    pub max_iterations: usize,
    pub metric_value: f64,
    pub step_size: f64,
    pub stop_condition: Option<String>,
}

/// Thread-safe progress reporting for a registration run.
///
/// All methods have default no-op implementations and must not block: they
/// are called from the worker thread between optimizer iterations.
pub trait ProgressReporter: Send + Sync {
    /// Registration of image `index` (of `total`) is starting.
    fn begin_image(&self, _index: usize, _total: usize) {}

    /// An optimizer iteration finished or the resolution level changed.
    fn update(&self, _progress: &RegistrationProgress) {}

    /// Image `index` is done.
    fn finish_image(&self, _index: usize, _status: ImageStatus) {}
}

pub struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}

#[derive(Clone, Debug)]
pub enum ProgressEvent {
    ImageStarted { index: usize, total: usize },
    Progress(RegistrationProgress),
    ImageFinished { index: usize, status: ImageStatus },
}

/// Progress reporter that forwards events over an mpsc channel.
pub struct ChannelProgressReporter {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelProgressReporter {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressReporter for ChannelProgressReporter {
    fn begin_image(&self, index: usize, total: usize) {
        let _ = self.tx.send(ProgressEvent::ImageStarted { index, total });
    }

    fn update(&self, progress: &RegistrationProgress) {
        let _ = self.tx.send(ProgressEvent::Progress(progress.clone()));
    }

    fn finish_image(&self, index: usize, status: ImageStatus) {
        let _ = self.tx.send(ProgressEvent::ImageFinished { index, status });
    }
}
