//! Iteration observer: reports progress, applies the per-level schedule and
//! carries cooperative cancellation into the running optimizer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{RegistrationError, Result};
use crate::optimizer::StopCondition;
use crate::params::{LevelParameters, Schedule, StageKind};
use crate::progress::{ProgressReporter, RegistrationProgress};
use crate::strategy::ResultCode;

/// Anything the observer can query after an iteration: optimizers and the
/// demons loop.
pub trait IterationSource {
    fn current_iteration(&self) -> usize;
    fn current_value(&self) -> f64;
    fn current_step_size(&self) -> f64;
    /// Make the next iteration the last one.
    fn request_stop(&mut self);
}

/// A component reconfigured at every resolution level.
pub trait LevelConfigurable {
    fn apply_level(&mut self, level: &LevelParameters) -> Result<()>;
}

/// Shared cancellation flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ObserverState {
    Idle,
    Running { level: usize },
    Converged,
    Cancelled,
    Failed(ResultCode),
}

impl std::fmt::Display for ObserverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Running { level } => write!(f, "Running (level {level})"),
            Self::Converged => write!(f, "Converged"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Failed(code) => write!(f, "Failed ({code})"),
        }
    }
}

/// One observer per stage of one image.
pub struct RegistrationObserver {
    schedule: Schedule,
    stage: StageKind,
    reporter: Arc<dyn ProgressReporter>,
    cancel: CancelToken,
    image_index: usize,
    total_images: usize,
    state: ObserverState,
    iteration: usize,
    total_iterations: usize,
    value: f64,
    step_size: f64,
    stop_condition: Option<String>,
}

impl RegistrationObserver {
    pub fn new(
        schedule: Schedule,
        stage: StageKind,
        reporter: Arc<dyn ProgressReporter>,
        cancel: CancelToken,
        image_index: usize,
        total_images: usize,
    ) -> Self {
        Self {
            schedule,
            stage,
            reporter,
            cancel,
            image_index,
            total_images,
            state: ObserverState::Idle,
            iteration: 0,
            total_iterations: 0,
            value: f64::NAN,
            step_size: 0.0,
            stop_condition: None,
        }
    }

    pub fn state(&self) -> &ObserverState {
        &self.state
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Current level, if running.
    pub fn level(&self) -> Option<usize> {
        match self.state {
            ObserverState::Running { level } => Some(level),
            _ => None,
        }
    }

    /// Parameters of the level being run.
    pub fn level_parameters(&self) -> Option<&LevelParameters> {
        self.level().and_then(|l| self.schedule.level(l))
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == ObserverState::Cancelled || self.cancel.is_cancelled()
    }

    pub fn total_iterations(&self) -> usize {
        self.total_iterations
    }

    pub fn last_value(&self) -> f64 {
        self.value
    }

    pub fn stop_condition(&self) -> Option<&str> {
        self.stop_condition.as_deref()
    }

    /// `None` until a terminal state other than cancellation is reached.
    pub fn result_code(&self) -> Option<ResultCode> {
        match self.state {
            ObserverState::Converged => Some(ResultCode::Success),
            ObserverState::Failed(code) => Some(code),
            _ => None,
        }
    }

    fn report(&self, level: usize) {
        let max_iterations = self
            .schedule
            .level(level)
            .map_or(0, |l| l.max_iterations);
        self.reporter.update(&RegistrationProgress {
            current_image_index: self.image_index,
            total_images: self.total_images,
            stage: self.stage,
            level,
            num_levels: self.schedule.num_levels(),
            iteration: self.iteration,
            max_iterations,
            metric_value: self.value,
            step_size: self.step_size,
            stop_condition: self.stop_condition.clone(),
        });
    }

    fn push_level(&mut self, level: usize, targets: &mut [&mut dyn LevelConfigurable]) -> Result<()> {
        let params = self.schedule.level(level).ok_or_else(|| {
            RegistrationError::invalid_config(format!(
                "level {level} outside a {}-level schedule",
                self.schedule.num_levels()
            ))
        })?;
        for target in targets.iter_mut() {
            target.apply_level(params)?;
        }
        self.state = ObserverState::Running { level };
        self.iteration = 0;
        debug!(stage = %self.stage, level, "Level parameters applied");
        self.report(level);
        Ok(())
    }

    /// Wire level 0 into the live components: `Idle -> Running(0)`.
    pub fn begin(&mut self, targets: &mut [&mut dyn LevelConfigurable]) -> Result<()> {
        if self.state != ObserverState::Idle {
            return Err(RegistrationError::Worker(format!(
                "observer started twice (state {})",
                self.state
            )));
        }
        self.push_level(0, targets)
    }

    /// Advance to the next finer level and push its parameters.
    pub fn resolution_changed(&mut self, targets: &mut [&mut dyn LevelConfigurable]) -> Result<()> {
        let ObserverState::Running { level } = self.state else {
            return Err(RegistrationError::Worker(format!(
                "resolution change while {}",
                self.state
            )));
        };
        info!(stage = %self.stage, from = level, to = level + 1, "Resolution changed");
        self.push_level(level + 1, targets)
    }

    /// Record one finished iteration of `source` and forward it to the
    /// reporter. Polls the cancel flag and stops `source` if it is set.
    pub fn iteration_event(&mut self, source: &mut dyn IterationSource) {
        let Some(level) = self.level() else {
            return;
        };
        self.iteration += 1;
        self.total_iterations += 1;
        self.value = source.current_value();
        self.step_size = source.current_step_size();
        self.report(level);
        if self.cancel.is_cancelled() {
            self.request_stop(source);
        }
    }

    /// Report the state a source stopped in when its last step still
    /// completed an iteration, e.g. demons converging on the update it just
    /// applied.
    pub fn stopping_iteration_event(&mut self, source: &mut dyn IterationSource, before: usize) {
        if source.current_iteration() > before {
            self.iteration_event(source);
        }
    }

    /// Cancel: `Running -> Cancelled`. The optimizer finishes its current
    /// iteration and then stops.
    pub fn request_stop(&mut self, source: &mut dyn IterationSource) {
        self.cancel.cancel();
        source.request_stop();
        if matches!(self.state, ObserverState::Running { .. } | ObserverState::Idle) {
            info!(stage = %self.stage, image = self.image_index, "Registration cancelled");
            self.stop_condition = Some("Cancelled by user".into());
            self.state = ObserverState::Cancelled;
        }
    }

    /// Enter the terminal state for an optimizer that stopped on its own.
    pub fn finish(&mut self, condition: StopCondition) {
        if self.state == ObserverState::Cancelled || self.cancel.is_cancelled() {
            self.state = ObserverState::Cancelled;
            return;
        }
        let level = self.level().unwrap_or(0);
        self.stop_condition = Some(condition.to_string());
        self.state = if condition.is_convergence() {
            ObserverState::Converged
        } else {
            ObserverState::Failed(ResultCode::Failure)
        };
        self.report(level);
    }

    /// Enter the terminal state for a numerical or setup failure.
    pub fn fail(&mut self, reason: &RegistrationError) {
        self.stop_condition = Some(reason.to_string());
        self.state = ObserverState::Failed(ResultCode::Disaster);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoOpReporter;

    struct Counter {
        applied: Vec<usize>,
    }

    impl LevelConfigurable for Counter {
        fn apply_level(&mut self, level: &LevelParameters) -> Result<()> {
            self.applied.push(level.level);
            Ok(())
        }
    }

    struct FakeSource {
        stopped: bool,
    }

    impl IterationSource for FakeSource {
        fn current_iteration(&self) -> usize {
            0
        }
        fn current_value(&self) -> f64 {
            1.5
        }
        fn current_step_size(&self) -> f64 {
            0.25
        }
        fn request_stop(&mut self) {
            self.stopped = true;
        }
    }

    fn observer(levels: usize, cancel: CancelToken) -> RegistrationObserver {
        let schedule = Schedule::from_fine_to_coarse(vec![LevelParameters::default(); levels]);
        RegistrationObserver::new(schedule, StageKind::Rigid, Arc::new(NoOpReporter), cancel, 1, 3)
    }

    #[test]
    fn test_levels_pushed_once_each() {
        let mut obs = observer(3, CancelToken::new());
        let mut counter = Counter { applied: vec![] };
        obs.begin(&mut [&mut counter]).unwrap();
        obs.resolution_changed(&mut [&mut counter]).unwrap();
        obs.resolution_changed(&mut [&mut counter]).unwrap();
        assert_eq!(counter.applied, vec![0, 1, 2]);
        assert!(obs.resolution_changed(&mut [&mut counter]).is_err());
    }

    #[test]
    fn test_cancel_flag_stops_source() {
        let cancel = CancelToken::new();
        let mut obs = observer(1, cancel.clone());
        obs.begin(&mut []).unwrap();
        let mut source = FakeSource { stopped: false };
        obs.iteration_event(&mut source);
        assert!(!source.stopped);
        cancel.cancel();
        obs.iteration_event(&mut source);
        assert!(source.stopped);
        assert_eq!(obs.state(), &ObserverState::Cancelled);
        obs.finish(StopCondition::MaximumIterations);
        assert_eq!(obs.state(), &ObserverState::Cancelled);
        assert_eq!(obs.result_code(), None);
    }

    #[test]
    fn test_finish_classifies_stop() {
        let mut obs = observer(1, CancelToken::new());
        obs.begin(&mut []).unwrap();
        obs.finish(StopCondition::StepTooSmall);
        assert_eq!(obs.result_code(), Some(ResultCode::Success));

        let mut obs = observer(1, CancelToken::new());
        obs.begin(&mut []).unwrap();
        obs.finish(StopCondition::MaximumIterations);
        assert_eq!(obs.result_code(), Some(ResultCode::Failure));
    }
}
