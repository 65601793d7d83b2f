//! Registration of one moving image against the fixed image: runs the
//! enabled stages in order and classifies the outcome.

use std::sync::Arc;

use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::demons::run_demons_stage;
use crate::error::{RegistrationError, Result};
use crate::filters::histogram_matching::match_histogram;
use crate::image::{Dimension, Image};
use crate::multires::run_parametric_stage;
use crate::observer::{CancelToken, RegistrationObserver};
use crate::params::{ParameterSet, StageKind, StageParameters};
use crate::progress::ProgressReporter;
use crate::pyramid::ImagePyramid;
use crate::region::SampleDomain;
use crate::resample::resample;
use crate::tag::tag_grid;
use crate::transform::{BSplineTransform, CenteredRigid2d, PointMapping, Transform, VersorRigid3d};

/// Per-image outcome. Codes match the plugin: 0, 1 and 2.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResultCode {
    /// The optimizer converged.
    Success,
    /// The optimizer ran out of iterations; the result may be suboptimal.
    Failure,
    /// Registration broke down; the unregistered image is kept.
    Disaster,
}

impl ResultCode {
    pub fn code(&self) -> u32 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Disaster => 2,
        }
    }

    /// The more severe of two codes.
    pub fn worst(self, other: Self) -> Self {
        self.max(other)
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::Failure => write!(f, "Failure"),
            Self::Disaster => write!(f, "Disaster"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ImageOutcome {
    /// Registered image on the fixed grid, or the original on cancellation
    /// and disaster.
    pub image: Image,
    pub code: ResultCode,
    pub cancelled: bool,
    pub stop_condition: Option<String>,
    pub iterations: usize,
    pub final_value: f64,
    /// Final rigid transform parameters, if a rigid stage ran.
    pub rigid_parameters: Option<Vec<f64>>,
}

impl ImageOutcome {
    fn unregistered(image: Image, code: ResultCode, cancelled: bool, reason: String) -> Self {
        Self {
            image,
            code,
            cancelled,
            stop_condition: Some(reason),
            iterations: 0,
            final_value: f64::NAN,
            rigid_parameters: None,
        }
    }
}

/// One strategy for every dimension, transform, metric and optimizer
/// combination. The fixed image and its pyramids are shared read-only by
/// all moving images.
pub struct RegisterOneImage<'a> {
    params: &'a ParameterSet,
    fixed: &'a Image,
    rigid_pyramid: Option<ImagePyramid>,
    deformable_pyramid: Option<ImagePyramid>,
    domain: SampleDomain,
    pool: &'a ThreadPool,
    reporter: Arc<dyn ProgressReporter>,
    cancel: CancelToken,
}

impl<'a> RegisterOneImage<'a> {
    pub fn new(
        params: &'a ParameterSet,
        fixed: &'a Image,
        pool: &'a ThreadPool,
        reporter: Arc<dyn ProgressReporter>,
        cancel: CancelToken,
    ) -> Self {
        let rigid_pyramid = params
            .rigid
            .as_ref()
            .map(|s| ImagePyramid::build(fixed, s.num_levels()));
        let deformable_pyramid = params
            .deformable
            .as_ref()
            .map(|s| ImagePyramid::build(fixed, s.num_levels()));
        let domain = SampleDomain::new(
            params.region,
            params.mask.clone(),
            fixed.geometry.clone(),
            fixed.depth(),
        );
        Self {
            params,
            fixed,
            rigid_pyramid,
            deformable_pyramid,
            domain,
            pool,
            reporter,
            cancel,
        }
    }

    /// Register `moving`. Never fails: errors become [`ResultCode::Disaster`]
    /// with the unregistered image substituted.
    pub fn register_image(&self, moving: Image, image_index: usize) -> ImageOutcome {
        match self.try_register(&moving, image_index) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(image = image_index, error = %e, "Registration failed, keeping original");
                ImageOutcome::unregistered(moving, ResultCode::Disaster, false, e.to_string())
            }
        }
    }

    fn observer(&self, stage: &StageParameters, image_index: usize) -> RegistrationObserver {
        RegistrationObserver::new(
            stage.schedule.clone(),
            stage.kind,
            Arc::clone(&self.reporter),
            self.cancel.clone(),
            image_index,
            self.params.num_images,
        )
    }

    fn warp(&self, source: &Image, mapping: &dyn PointMapping, tag: bool) -> Image {
        if tag {
            let mut tagged = source.clone();
            tag_grid(&mut tagged);
            resample(&tagged, self.fixed, mapping, self.params.fill_value, self.pool)
        } else {
            resample(source, self.fixed, mapping, self.params.fill_value, self.pool)
        }
    }

    fn initial_rigid_transform(&self) -> Transform {
        let c = self.fixed.center();
        match self.params.dimension() {
            Dimension::Two => Transform::Rigid2d(CenteredRigid2d::new([c[0], c[1]])),
            Dimension::Three => Transform::VersorRigid3d(VersorRigid3d::new(c)),
        }
    }

    fn try_register(&self, moving: &Image, image_index: usize) -> Result<ImageOutcome> {
        self.fixed.ensure_same_size(moving)?;
        if moving.has_non_finite() {
            return Err(RegistrationError::numerical(
                "moving image contains non-finite pixels",
            ));
        }

        let mut current = moving.clone();
        let mut code = ResultCode::Success;
        let mut iterations = 0;
        let mut final_value = f64::NAN;
        let mut stop_condition = None;
        let mut rigid_parameters = None;

        if let (Some(stage), Some(fixed_pyramid)) = (&self.params.rigid, &self.rigid_pyramid) {
            let mut transform = self.initial_rigid_transform();
            let moving_pyramid = ImagePyramid::build(&current, stage.num_levels());
            let mut observer = self.observer(stage, image_index);
            let outcome = run_parametric_stage(
                stage,
                fixed_pyramid,
                &moving_pyramid,
                &self.domain,
                &mut transform,
                &mut observer,
                self.pool,
            );
            let outcome = settle(&mut observer, outcome)?;
            if observer.is_cancelled() {
                return Ok(self.cancelled(moving));
            }
            code = code.worst(observer.result_code().unwrap_or(ResultCode::Failure));
            iterations += outcome.iterations;
            final_value = outcome.final_value;
            stop_condition = observer.stop_condition().map(str::to_owned);
            info!(
                image = image_index,
                transform = transform.name(),
                parameters = ?transform.parameters(),
                "Rigid stage done"
            );
            rigid_parameters = Some(transform.parameters().to_vec());
            current = self.warp(&current, &transform, false);
        }

        if let (Some(stage), Some(fixed_pyramid)) =
            (&self.params.deformable, &self.deformable_pyramid)
        {
            let mut observer = self.observer(stage, image_index);
            let (warped, outcome) = match stage.kind {
                StageKind::Demons => {
                    let settings = stage.demons.as_ref().ok_or_else(|| {
                        RegistrationError::invalid_config("demons stage without settings")
                    })?;
                    let matched = match_histogram(
                        &current,
                        self.fixed,
                        settings.histogram_bins,
                        settings.histogram_match_points,
                    )?;
                    let moving_pyramid = ImagePyramid::build(&matched, stage.num_levels());
                    let result = run_demons_stage(
                        stage,
                        fixed_pyramid,
                        &moving_pyramid,
                        &mut observer,
                        self.pool,
                    );
                    let (field, outcome) = settle(&mut observer, result)?;
                    (self.warp(&current, &field, self.params.show_field), outcome)
                }
                StageKind::BSpline | StageKind::Rigid => {
                    let first = stage.schedule.level(0).ok_or_else(|| {
                        RegistrationError::invalid_config("stage has an empty schedule")
                    })?;
                    let dims = match self.params.dimension() {
                        Dimension::Two => 2,
                        Dimension::Three => 3,
                    };
                    let mut transform = Transform::BSpline(BSplineTransform::new(
                        self.domain.physical_bounds(),
                        first.grid_size,
                        dims,
                    )?);
                    let moving_pyramid = ImagePyramid::build(&current, stage.num_levels());
                    let result = run_parametric_stage(
                        stage,
                        fixed_pyramid,
                        &moving_pyramid,
                        &self.domain,
                        &mut transform,
                        &mut observer,
                        self.pool,
                    );
                    let outcome = settle(&mut observer, result)?;
                    (self.warp(&current, &transform, self.params.show_field), outcome)
                }
            };
            if observer.is_cancelled() {
                return Ok(self.cancelled(moving));
            }
            code = code.worst(observer.result_code().unwrap_or(ResultCode::Failure));
            iterations += outcome.iterations;
            final_value = outcome.final_value;
            stop_condition = observer.stop_condition().map(str::to_owned);
            current = warped;
        }

        info!(image = image_index, code = %code, iterations, "Image registered");
        Ok(ImageOutcome {
            image: current,
            code,
            cancelled: false,
            stop_condition,
            iterations,
            final_value,
            rigid_parameters,
        })
    }

    fn cancelled(&self, original: &Image) -> ImageOutcome {
        ImageOutcome::unregistered(
            original.clone(),
            ResultCode::Failure,
            true,
            "Cancelled by user".into(),
        )
    }
}

/// Record a stage error on its observer before propagating it.
fn settle<T>(observer: &mut RegistrationObserver, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        observer.fail(e);
    }
    result
}
