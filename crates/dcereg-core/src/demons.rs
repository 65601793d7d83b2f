//! Thirion demons: dense deformable registration by repeated
//! optical-flow-like force updates followed by Gaussian field smoothing.

use ndarray::Array3;
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, info};

use crate::consts::{
    DEMONS_DENOMINATOR_THRESHOLD, DEMONS_INTENSITY_THRESHOLD, PARALLEL_PIXEL_THRESHOLD,
};
use crate::error::{RegistrationError, Result};
use crate::filters::gaussian_blur::gaussian_blur_volume;
use crate::image::{Image, MovingImage};
use crate::multires::StageOutcome;
use crate::observer::{IterationSource, LevelConfigurable, RegistrationObserver};
use crate::optimizer::{StepResult, StopCondition};
use crate::params::{DemonsSettings, LevelParameters, StageParameters};
use crate::pyramid::ImagePyramid;
use crate::transform::DisplacementField;

/// The demons iteration state for one image across all levels.
#[derive(Clone, Debug)]
pub struct DemonsRegistration {
    field: DisplacementField,
    standard_deviations: f64,
    max_iterations: usize,
    max_rms_error: f64,
    iteration: usize,
    metric_value: f64,
    rms_change: f64,
    stop: Option<StopCondition>,
}

impl DemonsRegistration {
    /// Start with a zero field on the grid of `fixed` (the coarsest level).
    pub fn new(fixed: &Image, settings: &DemonsSettings, level: &LevelParameters) -> Self {
        Self {
            field: DisplacementField::zeros_like(fixed),
            standard_deviations: settings.standard_deviations,
            max_iterations: level.max_iterations,
            max_rms_error: level.max_rms_error,
            iteration: 0,
            metric_value: f64::NAN,
            rms_change: 0.0,
            stop: None,
        }
    }

    pub fn field(&self) -> &DisplacementField {
        &self.field
    }

    pub fn into_field(self) -> DisplacementField {
        self.field
    }

    pub fn stop_condition(&self) -> Option<StopCondition> {
        self.stop
    }

    /// Move the field onto the grid of `fixed` and reset per-level counters.
    pub fn start_level(&mut self, fixed: &Image) {
        if self.field.dim() != fixed.data.dim() {
            self.field = self.field.resampled_to(fixed);
        }
        self.iteration = 0;
        self.stop = None;
    }

    fn finish(&mut self, condition: StopCondition) -> StepResult {
        self.stop = Some(condition);
        StepResult::Stop(condition)
    }

    /// One demons update. `fixed` carries the fixed image of this level with
    /// its gradient.
    pub fn step(
        &mut self,
        fixed: &MovingImage,
        moving: &MovingImage,
        pool: &ThreadPool,
    ) -> Result<StepResult> {
        if let Some(condition) = self.stop {
            return Ok(StepResult::Stop(condition));
        }
        if self.iteration >= self.max_iterations {
            return Ok(self.finish(StopCondition::MaximumIterations));
        }

        let geometry = &fixed.image.geometry;
        let spacing = geometry.spacing;
        let dims = if fixed.image.depth() > 1 { 3 } else { 2 };
        // Mean squared spacing normalizes the intensity term.
        let normalizer = spacing[..dims].iter().map(|s| s * s).sum::<f64>() / dims as f64;

        let (d, h, w) = self.field.dim();
        let field = &self.field;
        let update_voxel = |i: usize| -> ([f64; 3], Option<f64>) {
            let (z, y, x) = (i / (h * w), (i / w) % h, i % w);
            let p = geometry.index_to_physical([x as f64, y as f64, z as f64]);
            let Some((f, grad)) = fixed.sample_with_gradient(p) else {
                return ([0.0; 3], None);
            };
            let Some(m) = moving.sample(field.transform_point(p)) else {
                return ([0.0; 3], None);
            };
            let speed = f - m;
            let grad2: f64 = grad[..dims].iter().map(|g| g * g).sum();
            let denominator = grad2 + speed * speed / normalizer;
            if speed.abs() < DEMONS_INTENSITY_THRESHOLD || denominator < DEMONS_DENOMINATOR_THRESHOLD {
                return ([0.0; 3], Some(speed * speed));
            }
            let mut u = [0.0; 3];
            for (k, uk) in u.iter_mut().enumerate().take(dims) {
                *uk = speed * grad[k] / denominator;
            }
            (u, Some(speed * speed))
        };

        let n = d * h * w;
        let updates: Vec<([f64; 3], Option<f64>)> = if n >= PARALLEL_PIXEL_THRESHOLD {
            pool.install(|| (0..n).into_par_iter().map(update_voxel).collect())
        } else {
            (0..n).map(update_voxel).collect()
        };

        let (mut sq_sum, mut valid, mut update_sq) = (0.0, 0usize, 0.0);
        let mut components = self.field.components.clone();
        for (i, (u, diff2)) in updates.iter().enumerate() {
            let (z, y, x) = (i / (h * w), (i / w) % h, i % w);
            for (comp, uk) in components.iter_mut().zip(u) {
                comp[[z, y, x]] += *uk as f32;
            }
            update_sq += u.iter().map(|v| v * v).sum::<f64>();
            if let Some(diff2) = diff2 {
                sq_sum += diff2;
                valid += 1;
            }
        }
        if valid == 0 {
            return Err(RegistrationError::numerical(
                "demons: no voxel of the warped moving image overlaps the fixed image",
            ));
        }

        let sigma = self.standard_deviations as f32;
        let sigma_xyz = [sigma, sigma, if dims == 3 { sigma } else { 0.0 }];
        let smoothed: [Array3<f32>; 3] = pool.install(|| {
            let [cx, cy, cz] = &components;
            [
                gaussian_blur_volume(cx, sigma_xyz),
                gaussian_blur_volume(cy, sigma_xyz),
                gaussian_blur_volume(cz, sigma_xyz),
            ]
        });
        self.field.components = smoothed;

        self.metric_value = sq_sum / valid as f64;
        self.rms_change = (update_sq / n as f64).sqrt();
        if !(self.metric_value.is_finite() && self.rms_change.is_finite()) {
            return Err(RegistrationError::numerical("demons update is not finite"));
        }
        self.iteration += 1;

        if self.rms_change < self.max_rms_error {
            return Ok(self.finish(StopCondition::RmsConvergence));
        }
        Ok(StepResult::Continue)
    }
}

impl IterationSource for DemonsRegistration {
    fn current_iteration(&self) -> usize {
        self.iteration
    }

    fn current_value(&self) -> f64 {
        self.metric_value
    }

    fn current_step_size(&self) -> f64 {
        self.rms_change
    }

    fn request_stop(&mut self) {
        self.max_iterations = 1;
    }
}

impl LevelConfigurable for DemonsRegistration {
    fn apply_level(&mut self, level: &LevelParameters) -> Result<()> {
        self.max_iterations = level.max_iterations;
        self.max_rms_error = level.max_rms_error;
        Ok(())
    }
}

/// Run demons over every level, coarse to fine, and return the field on
/// the full-resolution fixed grid.
pub fn run_demons_stage(
    stage: &StageParameters,
    fixed: &ImagePyramid,
    moving: &ImagePyramid,
    observer: &mut RegistrationObserver,
    pool: &ThreadPool,
) -> Result<(DisplacementField, StageOutcome)> {
    let first = stage
        .schedule
        .level(0)
        .ok_or_else(|| RegistrationError::invalid_config("stage has an empty schedule"))?;
    let settings = stage
        .demons
        .as_ref()
        .ok_or_else(|| RegistrationError::invalid_config("demons stage without settings"))?;

    let mut demons = DemonsRegistration::new(fixed.level(0), settings, first);
    observer.begin(&mut [&mut demons])?;

    let mut last_stop = None;
    for level in 0..stage.num_levels() {
        if level > 0 {
            observer.resolution_changed(&mut [&mut demons])?;
        }
        if observer.is_cancelled() {
            break;
        }
        let fixed_level = MovingImage::new(fixed.level(level).clone());
        let moving_level = MovingImage::new(moving.level(level).clone());
        demons.start_level(&fixed_level.image);
        debug!(level, voxels = fixed_level.image.voxel_count(), "Demons level started");

        let stop = loop {
            let before = demons.current_iteration();
            match demons.step(&fixed_level, &moving_level, pool)? {
                StepResult::Continue => observer.iteration_event(&mut demons),
                StepResult::Stop(condition) => {
                    observer.stopping_iteration_event(&mut demons, before);
                    break condition;
                }
            }
        };
        info!(
            level,
            iterations = demons.current_iteration(),
            mse = demons.current_value(),
            stop = %stop,
            "Demons level finished"
        );
        last_stop = Some(stop);
        if observer.is_cancelled() {
            break;
        }
    }

    if let Some(stop) = last_stop {
        observer.finish(stop);
    }
    let finest = fixed.level(fixed.len() - 1);
    let mut field = demons.into_field();
    if field.dim() != finest.data.dim() {
        field = field.resampled_to(finest);
    }
    Ok((
        field,
        StageOutcome {
            stop_condition: last_stop,
            iterations: observer.total_iterations(),
            final_value: observer.last_value(),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::image::ImageGeometry;
    use crate::metric::MetricKind;
    use crate::observer::CancelToken;
    use crate::params::{Schedule, StageKind};
    use crate::progress::{ProgressReporter, RegistrationProgress};

    fn blob(cx: f64, cy: f64) -> Image {
        let data = Array3::from_shape_fn((1, 32, 32), |(_, y, x)| {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            (100.0 * (-(dx * dx + dy * dy) / 40.0).exp()) as f32
        });
        Image::new(data, ImageGeometry::default())
    }

    #[test]
    fn test_demons_reduces_mismatch() {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let fixed = blob(16.0, 16.0);
        let moving = blob(17.5, 16.0);
        let settings = DemonsSettings {
            histogram_bins: 256,
            histogram_match_points: 7,
            standard_deviations: 1.0,
        };
        let level = LevelParameters {
            max_iterations: 30,
            max_rms_error: 1e-4,
            ..Default::default()
        };
        let fixed_m = MovingImage::new(fixed.clone());
        let moving_m = MovingImage::new(moving);
        let mut demons = DemonsRegistration::new(&fixed, &settings, &level);
        demons.start_level(&fixed);

        demons.step(&fixed_m, &moving_m, &pool).unwrap();
        let first = demons.current_value();
        for _ in 0..20 {
            if let StepResult::Stop(_) = demons.step(&fixed_m, &moving_m, &pool).unwrap() {
                break;
            }
        }
        assert!(demons.current_value() < first);
        // The field points from fixed towards the moving blob.
        assert!(demons.field().at(0, 16, 12)[0] > 0.0);
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<RegistrationProgress>>);

    impl ProgressReporter for Recorder {
        fn update(&self, progress: &RegistrationProgress) {
            self.0.lock().unwrap().push(progress.clone());
        }
    }

    #[test]
    fn test_converging_update_is_reported() {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let fixed = ImagePyramid::build(&blob(16.0, 16.0), 1);
        let moving = ImagePyramid::build(&blob(17.5, 16.0), 1);
        // A loose RMS bound converges on the first applied update.
        let stage = StageParameters {
            kind: StageKind::Demons,
            metric: MetricKind::MeanSquares,
            optimizer: None,
            schedule: Schedule::from_fine_to_coarse(vec![LevelParameters {
                max_iterations: 30,
                max_rms_error: 1e6,
                ..Default::default()
            }]),
            demons: Some(DemonsSettings {
                histogram_bins: 256,
                histogram_match_points: 7,
                standard_deviations: 1.0,
            }),
        };
        let recorder = Arc::new(Recorder::default());
        let mut observer = RegistrationObserver::new(
            stage.schedule.clone(),
            StageKind::Demons,
            recorder.clone(),
            CancelToken::new(),
            1,
            2,
        );

        let (_, outcome) = run_demons_stage(&stage, &fixed, &moving, &mut observer, &pool).unwrap();
        assert_eq!(outcome.stop_condition, Some(StopCondition::RmsConvergence));
        assert_eq!(outcome.iterations, 1);
        assert!(outcome.final_value.is_finite());

        let updates = recorder.0.lock().unwrap();
        assert!(updates.iter().any(|p| p.iteration == 1 && p.metric_value.is_finite()));
    }
}
