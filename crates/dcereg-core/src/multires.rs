//! Multi-resolution driver for parametric (rigid and B-spline) stages.

use rayon::ThreadPool;
use tracing::{debug, info};

use crate::error::{RegistrationError, Result};
use crate::image::MovingImage;
use crate::metric::{create_metric, Metric};
use crate::observer::{IterationSource, LevelConfigurable, RegistrationObserver};
use crate::optimizer::{create_optimizer, CostFunction, StepResult, StopCondition};
use crate::params::StageParameters;
use crate::pyramid::ImagePyramid;
use crate::region::SampleDomain;
use crate::transform::Transform;

/// Metric evaluated at candidate parameters of a transform.
struct MetricCost<'a> {
    metric: &'a Metric,
    moving: &'a MovingImage,
    transform: &'a Transform,
    pool: &'a ThreadPool,
}

impl CostFunction for MetricCost<'_> {
    fn value_and_derivative(&self, parameters: &[f64]) -> Result<(f64, Vec<f64>)> {
        let mut candidate = self.transform.clone();
        candidate.set_parameters(parameters)?;
        self.metric
            .value_and_derivative(self.moving, &candidate, self.pool)
    }
}

/// How a stage's optimization ended.
#[derive(Clone, Debug)]
pub struct StageOutcome {
    pub stop_condition: Option<StopCondition>,
    pub iterations: usize,
    pub final_value: f64,
}

/// Optimize `transform` over every level of the stage's schedule, coarse to
/// fine. The observer pushes each level's parameters into the metric,
/// optimizer and transform exactly once.
pub fn run_parametric_stage(
    stage: &StageParameters,
    fixed: &ImagePyramid,
    moving: &ImagePyramid,
    domain: &SampleDomain,
    transform: &mut Transform,
    observer: &mut RegistrationObserver,
    pool: &ThreadPool,
) -> Result<StageOutcome> {
    let first = stage
        .schedule
        .level(0)
        .ok_or_else(|| RegistrationError::invalid_config("stage has an empty schedule"))?;
    let kind = stage.optimizer.ok_or_else(|| {
        RegistrationError::invalid_config(format!("{} stage has no optimizer", stage.kind))
    })?;
    let mut metric = create_metric(stage.metric, first);
    let mut optimizer = create_optimizer(kind, first, transform)?;

    observer.begin(&mut [
        &mut metric as &mut dyn LevelConfigurable,
        &mut optimizer,
        &mut *transform,
    ])?;

    let mut last_stop = None;
    for level in 0..stage.num_levels() {
        if level > 0 {
            observer.resolution_changed(&mut [
                &mut metric as &mut dyn LevelConfigurable,
                &mut optimizer,
                &mut *transform,
            ])?;
            // Refinement can change the parameter count.
            let params = observer
                .level_parameters()
                .ok_or_else(|| RegistrationError::Worker("observer lost its level".into()))?;
            optimizer.set_scales(transform.optimizer_scales(params.translation_scale));
        }
        if observer.is_cancelled() {
            break;
        }

        let moving_level = MovingImage::new(moving.level(level).clone());
        metric.initialize(fixed.level(level), &moving_level, domain)?;
        debug!(
            level,
            samples = metric.number_of_samples(),
            parameters = transform.number_of_parameters(),
            "Level initialized"
        );

        let cost = MetricCost {
            metric: &metric,
            moving: &moving_level,
            transform: &*transform,
            pool,
        };
        optimizer.start(&cost, transform.parameters())?;
        let stop = loop {
            let before = optimizer.current_iteration();
            match optimizer.step(&cost)? {
                StepResult::Continue => observer.iteration_event(&mut optimizer),
                StepResult::Stop(condition) => {
                    observer.stopping_iteration_event(&mut optimizer, before);
                    break condition;
                }
            }
        };
        let position = optimizer.current_position();
        transform.set_parameters(&position)?;
        info!(
            level,
            iterations = optimizer.current_iteration(),
            value = optimizer.current_value(),
            stop = %stop,
            "Level finished"
        );
        last_stop = Some(stop);

        if observer.is_cancelled() {
            break;
        }
    }

    if let Some(stop) = last_stop {
        observer.finish(stop);
    }
    Ok(StageOutcome {
        stop_condition: last_stop,
        iterations: observer.total_iterations(),
        final_value: observer.last_value(),
    })
}
