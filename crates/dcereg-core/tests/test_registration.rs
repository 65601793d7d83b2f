#[allow(dead_code)]
mod common;

use std::sync::Arc;

use approx::assert_abs_diff_eq;
use ndarray::{Array3, Axis};

use dcereg_core::image::{Image, ImageGeometry, ImageSeries, MovingImage};
use dcereg_core::manager::{
    build_thread_pool, ImageStatus, ManagerState, RegistrationManager, RegistrationReport,
};
use dcereg_core::metric::{create_metric, MetricKind};
use dcereg_core::optimizer::OptimizerKind;
use dcereg_core::params::{
    LevelParameters, ParameterSet, RegistrationConfig, RegistrationSequence,
};
use dcereg_core::progress::NoOpReporter;
use dcereg_core::region::{Region, SampleDomain};
use dcereg_core::strategy::ResultCode;
use dcereg_core::transform::{CenteredRigid2d, Transform};

fn run(config: &RegistrationConfig, series: ImageSeries) -> RegistrationReport {
    let size = series.images()[0].size();
    let params = ParameterSet::build(config, size).unwrap();
    let mut manager = RegistrationManager::new(params, Arc::new(NoOpReporter));
    manager.run(series).unwrap()
}

#[test]
fn test_rigid_recovers_translation() {
    let config = common::rigid_config(5, 2);
    let series = common::shifted_series(128, 128, 5, [3.0, -2.0]);
    let report = run(&config, series);

    assert_eq!(report.state, ManagerState::Completed);
    assert_eq!(report.images[0].status, ImageStatus::Fixed);
    for image in &report.images[1..] {
        assert_eq!(image.status, ImageStatus::Registered(ResultCode::Success));
        let p = image.rigid_parameters.as_ref().unwrap();
        assert_abs_diff_eq!(p[1], 3.0, epsilon = 0.5);
        assert_abs_diff_eq!(p[2], -2.0, epsilon = 0.5);
        assert!(p[0].abs() < 0.05, "rotation drifted to {}", p[0]);
    }

    // The registered images now line up with the fixed one.
    let fixed = report.series.image(0).unwrap();
    let registered = report.series.image(3).unwrap();
    let original = Image::from_slice(common::blobs(128, 128, [3.0, -2.0]));
    let before = common::interior_msd(fixed, &original, 8);
    let after = common::interior_msd(fixed, registered, 8);
    assert!(after < 0.1 * before, "mismatch {after} vs {before} before registration");
}

#[test]
fn test_rigid_mattes_recovers_translation() {
    let mut config = common::rigid_config(3, 2);
    config.rigid.metric = MetricKind::MattesMutualInformation;
    config.rigid.mmi_sample_rate = vec![1.0; 4];
    let series = common::shifted_series(128, 128, 3, [3.0, -2.0]);
    let report = run(&config, series);

    assert_eq!(report.state, ManagerState::Completed);
    for image in &report.images[1..] {
        assert_eq!(image.status, ImageStatus::Registered(ResultCode::Success));
        let p = image.rigid_parameters.as_ref().unwrap();
        assert_abs_diff_eq!(p[1], 3.0, epsilon = 0.5);
        assert_abs_diff_eq!(p[2], -2.0, epsilon = 0.5);
        assert!(p[0].abs() < 0.05, "rotation drifted to {}", p[0]);
    }
}

#[test]
fn test_fixed_image_in_the_middle() {
    let mut config = common::rigid_config(3, 1);
    config.general.fixed_image_number = 2;
    let images = vec![
        Image::from_slice(common::blobs(96, 96, [1.5, 0.0])),
        Image::from_slice(common::blobs(96, 96, [0.0, 0.0])),
        Image::from_slice(common::blobs(96, 96, [0.0, 1.5])),
    ];
    let report = run(&config, ImageSeries::from_images(images).unwrap());

    assert_eq!(report.images[1].status, ImageStatus::Fixed);
    let p0 = report.images[0].rigid_parameters.as_ref().unwrap();
    let p2 = report.images[2].rigid_parameters.as_ref().unwrap();
    assert_abs_diff_eq!(p0[1], 1.5, epsilon = 0.5);
    assert_abs_diff_eq!(p2[2], 1.5, epsilon = 0.5);
}

#[test]
fn test_identical_images_converge_immediately() {
    let config = common::rigid_config(3, 2);
    let series = common::shifted_series(96, 96, 3, [0.0, 0.0]);
    let report = run(&config, series);

    for image in &report.images[1..] {
        assert_eq!(image.status, ImageStatus::Registered(ResultCode::Success));
        assert!(image.iterations <= 2, "took {} iterations", image.iterations);
        let p = image.rigid_parameters.as_ref().unwrap();
        assert!(p.iter().all(|v| v.abs() < 1e-3));
    }
}

#[test]
fn test_mean_squares_at_identity_is_zero() {
    let fixed = Image::from_slice(common::blobs(64, 64, [0.0, 0.0]));
    let moving = MovingImage::new(fixed.clone());
    let domain = SampleDomain::new(Region::full(64, 64), None, fixed.geometry.clone(), 1);
    let pool = build_thread_pool(2).unwrap();

    let mut metric = create_metric(MetricKind::MeanSquares, &LevelParameters::default());
    metric.initialize(&fixed, &moving, &domain).unwrap();
    assert_eq!(metric.number_of_samples(), 64 * 64);

    let transform = Transform::Rigid2d(CenteredRigid2d::new([31.5, 31.5]));
    let value = metric.value(&moving, &transform, &pool).unwrap();
    assert_abs_diff_eq!(value, 0.0, epsilon = 1e-9);
}

#[test]
fn test_bad_image_is_a_disaster_for_that_image_only() {
    let config = common::rigid_config(4, 1);
    let mut images: Vec<Image> = (0..4)
        .map(|i| {
            let shift = if i == 0 { [0.0, 0.0] } else { [1.0, 1.0] };
            Image::from_slice(common::blobs(96, 96, shift))
        })
        .collect();
    images[2].data[[0, 40, 40]] = f32::NAN;
    let poisoned = images[2].clone();
    let report = run(&config, ImageSeries::from_images(images).unwrap());

    assert_eq!(report.state, ManagerState::Completed);
    assert_eq!(report.images[2].status, ImageStatus::Registered(ResultCode::Disaster));
    assert!(report.images[2].stop_condition.is_some());
    assert_eq!(report.images[1].status, ImageStatus::Registered(ResultCode::Success));
    assert_eq!(report.images[3].status, ImageStatus::Registered(ResultCode::Success));
    assert_eq!(report.worst_code(), Some(ResultCode::Disaster));

    // The failed image is passed through unchanged.
    let kept = report.series.image(2).unwrap();
    assert!(kept.data[[0, 40, 40]].is_nan());
    assert_eq!(kept.data[[0, 10, 10]], poisoned.data[[0, 10, 10]]);
}

#[test]
fn test_region_limits_the_samples() {
    let mut config = common::rigid_config(2, 1);
    config.general.region = Some(Region::new(16, 16, 64, 64));
    let report = run(&config, common::shifted_series(96, 96, 2, [2.0, 0.0]));

    let p = report.images[1].rigid_parameters.as_ref().unwrap();
    assert_abs_diff_eq!(p[1], 2.0, epsilon = 0.5);
}

#[test]
fn test_bspline_reduces_mismatch() {
    let mut config = common::rigid_config(2, 1);
    config.rigid.enabled = false;
    config.bspline.enabled = true;
    config.bspline.levels = 1;
    config.bspline.metric = MetricKind::MeanSquares;
    config.bspline.optimizer = OptimizerKind::Lbfgsb;
    config.bspline.grid_size = vec![[6, 6, 1]];
    config.bspline.max_iterations = vec![30];
    let series = common::shifted_series(64, 64, 2, [1.5, 1.0]);
    let fixed = series.image(0).unwrap().clone();
    let original = series.image(1).unwrap().clone();

    let params = ParameterSet::build(&config, [64, 64, 1]).unwrap();
    assert_eq!(params.sequence(), RegistrationSequence::BSpline);
    let report = run(&config, series);

    assert!(matches!(
        report.images[1].status,
        ImageStatus::Registered(code) if code != ResultCode::Disaster
    ));
    assert!(report.images[1].rigid_parameters.is_none());
    let registered = report.series.image(1).unwrap();
    let before = common::interior_msd(&fixed, &original, 10);
    let after = common::interior_msd(&fixed, registered, 10);
    assert!(after < before, "mismatch {after} vs {before} before registration");
}

#[test]
fn test_demons_reduces_mismatch() {
    let mut config = common::rigid_config(2, 2);
    config.rigid.enabled = false;
    config.demons.enabled = true;
    config.demons.levels = 2;
    let series = common::shifted_series(64, 64, 2, [1.5, -1.0]);
    let fixed = series.image(0).unwrap().clone();
    let original = series.image(1).unwrap().clone();

    let report = run(&config, series);

    assert!(matches!(
        report.images[1].status,
        ImageStatus::Registered(code) if code != ResultCode::Disaster
    ));
    assert!(report.images[1].iterations > 0);
    let registered = report.series.image(1).unwrap();
    let before = common::interior_msd(&fixed, &original, 10);
    let after = common::interior_msd(&fixed, registered, 10);
    assert!(after < before, "mismatch {after} vs {before} before registration");
}

#[test]
fn test_show_field_tags_deformed_images() {
    let mut config = common::rigid_config(2, 1);
    config.rigid.enabled = false;
    config.demons.enabled = true;
    config.demons.levels = 1;
    config.general.deform_show_field = true;
    let report = run(&config, common::shifted_series(64, 64, 2, [0.0, 0.0]));

    let registered = report.series.image(1).unwrap();
    let (_, hi) = registered.min_max();
    assert!(hi > 1500.0, "expected grid pixels, max is {hi}");
    // The fixed image is never tagged.
    let (_, fixed_hi) = report.series.image(0).unwrap().min_max();
    assert!(fixed_hi < 1500.0);
}

#[test]
fn test_versor_rigid_3d_recovers_translation() {
    let mut config = common::rigid_config(2, 1);
    config.general.slices_per_image = 8;
    config.rigid.optimizer = OptimizerKind::Versor;
    config.rigid.versor_max_step_size = vec![0.5];
    let volume = |shift: [f64; 2]| {
        let slice = common::blobs(48, 48, shift);
        let mut data = Array3::<f32>::zeros((8, 48, 48));
        for mut s in data.axis_iter_mut(Axis(0)) {
            s.assign(&slice);
        }
        Image::new(data, ImageGeometry::default())
    };
    let series = ImageSeries::from_images(vec![volume([0.0, 0.0]), volume([2.0, 0.0])]).unwrap();
    let report = run(&config, series);

    assert!(matches!(
        report.images[1].status,
        ImageStatus::Registered(code) if code != ResultCode::Disaster
    ));
    let p = report.images[1].rigid_parameters.as_ref().unwrap();
    assert_eq!(p.len(), 6);
    assert_abs_diff_eq!(p[3], 2.0, epsilon = 1.0);
}
