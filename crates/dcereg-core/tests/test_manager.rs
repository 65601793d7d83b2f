#[allow(dead_code)]
mod common;

use std::sync::{mpsc, Arc};

use dcereg_core::error::RegistrationError;
use dcereg_core::manager::{ImageStatus, ManagerState, RegistrationManager};
use dcereg_core::observer::CancelToken;
use dcereg_core::params::ParameterSet;
use dcereg_core::progress::{
    ChannelProgressReporter, NoOpReporter, ProgressEvent, ProgressReporter, RegistrationProgress,
};
use dcereg_core::strategy::ResultCode;

/// Pulls the cancel flag as soon as `target` reports progress.
struct CancelOnImage {
    target: usize,
    token: CancelToken,
}

impl ProgressReporter for CancelOnImage {
    fn update(&self, progress: &RegistrationProgress) {
        if progress.current_image_index == self.target {
            self.token.cancel();
        }
    }
}

#[test]
fn test_cancel_keeps_original_and_skips_the_rest() {
    let config = common::rigid_config(4, 2);
    let params = ParameterSet::build(&config, [96, 96, 1]).unwrap();
    let token = CancelToken::new();
    let reporter = Arc::new(CancelOnImage {
        target: 2,
        token: token.clone(),
    });
    let mut manager = RegistrationManager::with_cancel_token(params, reporter, token.clone());

    let series = common::shifted_series(96, 96, 4, [2.0, 1.0]);
    let original = series.image(2).unwrap().clone();
    let report = manager.run(series).unwrap();

    assert!(token.is_cancelled());
    assert_eq!(manager.state(), ManagerState::Cancelled);
    assert_eq!(report.state, ManagerState::Cancelled);
    assert_eq!(
        report.statuses(),
        vec![
            ImageStatus::Fixed,
            ImageStatus::Registered(ResultCode::Success),
            ImageStatus::Cancelled,
            ImageStatus::NotProcessed,
        ]
    );
    assert_eq!(report.images[2].stop_condition.as_deref(), Some("Cancelled by user"));
    assert_eq!(report.series.image(2).unwrap().data, original.data);
    assert_eq!(report.count(ImageStatus::NotProcessed), 1);
}

#[test]
fn test_cancel_before_run_processes_nothing() {
    let config = common::rigid_config(3, 1);
    let params = ParameterSet::build(&config, [64, 64, 1]).unwrap();
    let mut manager = RegistrationManager::new(params, Arc::new(NoOpReporter));
    manager.cancel_token().cancel();

    let report = manager.run(common::shifted_series(64, 64, 3, [1.0, 0.0])).unwrap();
    assert_eq!(report.state, ManagerState::Cancelled);
    assert_eq!(report.count(ImageStatus::NotProcessed), 2);
    assert_eq!(report.worst_code(), None);
}

#[test]
fn test_worker_thread_reports_events() {
    let config = common::rigid_config(3, 1);
    let params = ParameterSet::build(&config, [64, 64, 1]).unwrap();
    let (tx, rx) = mpsc::channel();
    let handle = RegistrationManager::start(
        params,
        common::shifted_series(64, 64, 3, [1.0, -1.0]),
        Arc::new(ChannelProgressReporter::new(tx)),
    )
    .unwrap();

    let report = handle.wait().unwrap();
    assert_eq!(report.state, ManagerState::Completed);
    assert_eq!(report.count(ImageStatus::Registered(ResultCode::Success)), 2);

    let events: Vec<ProgressEvent> = rx.try_iter().collect();
    let started: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::ImageStarted { index, total } => {
                assert_eq!(*total, 3);
                Some(*index)
            }
            _ => None,
        })
        .collect();
    assert_eq!(started, vec![1, 2]);
    let finished = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::ImageFinished { .. }))
        .count();
    assert_eq!(finished, 2);
    assert!(events.iter().any(|e| matches!(e, ProgressEvent::Progress(_))));
}

#[test]
fn test_start_validates_before_spawning() {
    let config = common::rigid_config(4, 1);
    let params = ParameterSet::build(&config, [64, 64, 1]).unwrap();
    let result = RegistrationManager::start(
        params,
        common::shifted_series(64, 64, 3, [1.0, 0.0]),
        Arc::new(NoOpReporter),
    );
    assert!(matches!(result, Err(RegistrationError::InvalidConfiguration(_))));
}
