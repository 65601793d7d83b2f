#[allow(dead_code)]
mod common;

use dcereg_core::error::RegistrationError;
use dcereg_core::metric::MetricKind;
use dcereg_core::optimizer::OptimizerKind;
use dcereg_core::params::{ParameterSet, RegistrationConfig, RegistrationSequence};
use dcereg_core::region::Region;

const SIZE_2D: [usize; 3] = [128, 128, 1];

#[test]
fn test_default_rigid_config_is_valid() {
    let config = common::rigid_config(5, 2);
    let params = ParameterSet::build(&config, SIZE_2D).unwrap();
    assert_eq!(params.fixed_image_index, 0);
    assert_eq!(params.sequence(), RegistrationSequence::Rigid);
    assert_eq!(params.region, Region::full(128, 128));
    assert_eq!(params.number_of_threads, 2);
    assert_eq!(params.stages().count(), 1);
}

#[test]
fn test_schedule_is_reversed_from_user_order() {
    let mut config = common::rigid_config(3, 3);
    config.rigid.max_iterations = vec![10, 20, 30, 40];
    config.rigid.rsgd_max_step_size = vec![0.5, 1.0, 2.0, 4.0];
    let params = ParameterSet::build(&config, SIZE_2D).unwrap();
    let schedule = &params.rigid.as_ref().unwrap().schedule;
    assert_eq!(schedule.num_levels(), 3);
    // Level 0 is the coarsest, fed from the last used user entry.
    assert_eq!(schedule.level(0).unwrap().max_iterations, 30);
    assert_eq!(schedule.level(0).unwrap().max_step_size, 2.0);
    assert_eq!(schedule.level(2).unwrap().max_iterations, 10);
    assert_eq!(schedule.finest().unwrap().max_step_size, 0.5);
}

#[test]
fn test_region_outside_bounds_is_invalid() {
    let mut config = common::rigid_config(5, 2);
    config.general.region = Some(Region::new(100, 100, 40, 40));
    assert!(matches!(
        ParameterSet::build(&config, SIZE_2D),
        Err(RegistrationError::InvalidConfiguration(_))
    ));
}

#[test]
fn test_short_level_array_is_invalid() {
    let mut config = common::rigid_config(5, 3);
    config.rigid.max_iterations = vec![100, 100];
    assert!(matches!(
        ParameterSet::build(&config, SIZE_2D),
        Err(RegistrationError::InvalidConfiguration(_))
    ));
}

#[test]
fn test_level_count_bounds() {
    for levels in [0, 5] {
        let config = common::rigid_config(5, levels);
        assert!(matches!(
            ParameterSet::build(&config, SIZE_2D),
            Err(RegistrationError::InvalidConfiguration(_))
        ));
    }
}

#[test]
fn test_degenerate_mask_is_invalid() {
    let mut config = common::rigid_config(5, 1);
    config.general.mask = vec![10.0, 10.0, 50.0, 10.0];
    assert!(ParameterSet::build(&config, SIZE_2D).is_err());

    config.general.mask = vec![10.0, 10.0, 50.0, 10.0, 30.0, 60.0];
    let params = ParameterSet::build(&config, SIZE_2D).unwrap();
    assert_eq!(params.mask.unwrap().points().len(), 3);
}

#[test]
fn test_mask_outside_region_is_invalid() {
    let mut config = common::rigid_config(3, 1);
    config.general.region = Some(Region::new(0, 0, 20, 20));
    config.general.mask = vec![200.0, 200.0, 210.0, 200.0, 205.0, 210.0];
    assert!(matches!(
        ParameterSet::build(&config, [64, 64, 1]),
        Err(RegistrationError::InvalidConfiguration(_))
    ));

    // Inside the image but away from the region.
    config.general.mask = vec![30.0, 30.0, 50.0, 30.0, 40.0, 50.0];
    assert!(matches!(
        ParameterSet::build(&config, [64, 64, 1]),
        Err(RegistrationError::InvalidConfiguration(_))
    ));

    config.general.mask = vec![2.0, 2.0, 18.0, 2.0, 10.0, 18.0];
    assert!(ParameterSet::build(&config, [64, 64, 1]).is_ok());
}

#[test]
fn test_overflowing_region_is_invalid() {
    let mut config = common::rigid_config(5, 2);
    config.general.region = Some(Region::new(usize::MAX, 0, 2, 10));
    assert!(matches!(
        ParameterSet::build(&config, SIZE_2D),
        Err(RegistrationError::InvalidConfiguration(_))
    ));
}

#[test]
fn test_stage_combinations() {
    let mut config = common::rigid_config(5, 1);
    config.rigid.enabled = false;
    assert!(matches!(
        ParameterSet::build(&config, SIZE_2D),
        Err(RegistrationError::InvalidConfiguration(_))
    ));

    config.bspline.enabled = true;
    config.demons.enabled = true;
    assert!(ParameterSet::build(&config, SIZE_2D).is_err());

    config.demons.enabled = false;
    let params = ParameterSet::build(&config, SIZE_2D).unwrap();
    assert_eq!(params.sequence(), RegistrationSequence::BSpline);

    config.rigid.enabled = true;
    config.bspline.enabled = false;
    config.demons.enabled = true;
    let params = ParameterSet::build(&config, SIZE_2D).unwrap();
    assert_eq!(params.sequence(), RegistrationSequence::RigidDemons);
    assert!(params.deformable.as_ref().unwrap().optimizer.is_none());
}

#[test]
fn test_versor_needs_3d() {
    let mut config = common::rigid_config(5, 1);
    config.rigid.optimizer = OptimizerKind::Versor;
    assert!(matches!(
        ParameterSet::build(&config, SIZE_2D),
        Err(RegistrationError::UnsupportedAlgorithm(_))
    ));

    config.general.slices_per_image = 8;
    let params = ParameterSet::build(&config, [64, 64, 8]).unwrap();
    let level = params.rigid.unwrap().schedule.level(0).cloned().unwrap();
    assert_eq!(level.max_step_size, config.rigid.versor_max_step_size[0]);
}

#[test]
fn test_mattes_needs_enough_bins() {
    let mut config = common::rigid_config(5, 1);
    config.rigid.metric = MetricKind::MattesMutualInformation;
    config.rigid.mmi_histogram_bins = vec![4, 50, 50, 50];
    assert!(ParameterSet::build(&config, SIZE_2D).is_err());
    config.rigid.mmi_histogram_bins = vec![5, 50, 50, 50];
    assert!(ParameterSet::build(&config, SIZE_2D).is_ok());
}

#[test]
fn test_step_sizes_and_fractions() {
    let mut config = common::rigid_config(5, 1);
    config.rigid.rsgd_min_step_size = vec![2.0, 1e-3, 1e-3, 1e-3];
    assert!(ParameterSet::build(&config, SIZE_2D).is_err());

    let mut config = common::rigid_config(5, 1);
    config.rigid.rsgd_relaxation_factor = vec![1.0, 0.5, 0.5, 0.5];
    assert!(ParameterSet::build(&config, SIZE_2D).is_err());

    let mut config = common::rigid_config(5, 1);
    config.rigid.mmi_sample_rate = vec![1.5, 0.2, 0.2, 0.2];
    assert!(ParameterSet::build(&config, SIZE_2D).is_err());
}

#[test]
fn test_fixed_image_numbering() {
    let mut config = common::rigid_config(5, 1);
    config.general.fixed_image_number = 2;
    let params = ParameterSet::build(&config, SIZE_2D).unwrap();
    assert_eq!(params.fixed_image_index, 1);
    assert_eq!(params.index_to_slice_number(1), 2);

    config.general.flipped_data = true;
    let params = ParameterSet::build(&config, SIZE_2D).unwrap();
    assert_eq!(params.fixed_image_index, 3);
    assert_eq!(params.index_to_slice_number(3), 2);

    config.general.fixed_image_number = 6;
    assert!(ParameterSet::build(&config, SIZE_2D).is_err());
    config.general.fixed_image_number = 0;
    assert!(ParameterSet::build(&config, SIZE_2D).is_err());
}

#[test]
fn test_slice_count_must_match_images() {
    let mut config = common::rigid_config(5, 1);
    config.general.slices_per_image = 4;
    assert!(ParameterSet::build(&config, SIZE_2D).is_err());
}

#[test]
fn test_thread_count_bounds() {
    let mut config = common::rigid_config(5, 1);
    config.threads.number_of_threads = 0;
    assert!(ParameterSet::build(&config, SIZE_2D).is_err());

    config.threads.number_of_threads = 64;
    let params = ParameterSet::build(&config, SIZE_2D).unwrap();
    assert_eq!(params.number_of_threads, 8);

    config.threads.use_default_number_of_threads = true;
    let params = ParameterSet::build(&config, SIZE_2D).unwrap();
    assert!((1..=8).contains(&params.number_of_threads));
}

#[test]
fn test_bspline_grid_too_coarse() {
    let mut config = RegistrationConfig::default();
    config.general.num_images = 2;
    config.rigid.enabled = false;
    config.bspline.enabled = true;
    config.bspline.levels = 1;
    config.bspline.grid_size = vec![[3, 8, 1]];
    assert!(ParameterSet::build(&config, SIZE_2D).is_err());
    config.bspline.grid_size = vec![[4, 4, 1]];
    assert!(ParameterSet::build(&config, SIZE_2D).is_ok());
}
