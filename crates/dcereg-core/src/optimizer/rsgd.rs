//! Regular-step gradient descent.
//!
//! The step length starts at the maximum and is multiplied by the
//! relaxation factor every time the gradient direction reverses. The run
//! ends once the step drops below the minimum.

use crate::error::{RegistrationError, Result};

use super::lbfgs_core::{dot, norm};
use super::{CostFunction, StepResult, StopCondition};

/// Gradient magnitude below which descent is considered converged.
pub const GRADIENT_MAGNITUDE_TOLERANCE: f64 = 1e-4;

/// State shared by plain and versor regular-step descent. The two differ
/// only in how a step is applied to the parameters.
#[derive(Clone, Debug)]
pub(crate) struct RegularStepCore {
    pub maximum_step_length: f64,
    pub minimum_step_length: f64,
    pub relaxation_factor: f64,
    pub gradient_magnitude_tolerance: f64,
    pub number_of_iterations: usize,
    pub scales: Vec<f64>,
    pub current_iteration: usize,
    pub current_step_length: f64,
    pub position: Vec<f64>,
    pub value: f64,
    gradient: Vec<f64>,
    previous_gradient: Vec<f64>,
    pub stop: Option<StopCondition>,
}

impl RegularStepCore {
    pub fn new(min_step: f64, max_step: f64, relaxation: f64, iterations: usize) -> Self {
        Self {
            maximum_step_length: max_step,
            minimum_step_length: min_step,
            relaxation_factor: relaxation,
            gradient_magnitude_tolerance: GRADIENT_MAGNITUDE_TOLERANCE,
            number_of_iterations: iterations,
            scales: Vec::new(),
            current_iteration: 0,
            current_step_length: max_step,
            position: Vec::new(),
            value: 0.0,
            gradient: Vec::new(),
            previous_gradient: Vec::new(),
            stop: None,
        }
    }

    fn evaluate(&mut self, cost: &dyn CostFunction) -> Result<()> {
        let (value, gradient) = cost.value_and_derivative(&self.position)?;
        if gradient.len() != self.position.len() {
            return Err(RegistrationError::DimensionMismatch {
                expected: format!("{} derivative entries", self.position.len()),
                actual: gradient.len().to_string(),
            });
        }
        if !value.is_finite() || gradient.iter().any(|g| !g.is_finite()) {
            return Err(RegistrationError::numerical("cost function is not finite"));
        }
        self.value = value;
        self.gradient = gradient;
        Ok(())
    }

    pub fn start(&mut self, cost: &dyn CostFunction, initial: &[f64]) -> Result<()> {
        if self.scales.len() != initial.len() {
            self.scales = vec![1.0; initial.len()];
        }
        self.position = initial.to_vec();
        self.current_iteration = 0;
        self.current_step_length = self.maximum_step_length;
        self.previous_gradient = vec![0.0; initial.len()];
        self.stop = None;
        self.evaluate(cost)
    }

    fn finish(&mut self, condition: StopCondition) -> StepResult {
        self.stop = Some(condition);
        StepResult::Stop(condition)
    }

    /// One descent iteration. `advance(position, direction, factor)`
    /// returns the new position for a move of `factor * direction`.
    pub fn step<F>(&mut self, cost: &dyn CostFunction, advance: F) -> Result<StepResult>
    where
        F: Fn(&[f64], &[f64], f64) -> Vec<f64>,
    {
        if let Some(condition) = self.stop {
            return Ok(StepResult::Stop(condition));
        }
        if self.current_iteration >= self.number_of_iterations {
            return Ok(self.finish(StopCondition::MaximumIterations));
        }

        let transformed: Vec<f64> = self
            .gradient
            .iter()
            .zip(&self.scales)
            .map(|(g, s)| g / s)
            .collect();
        let magnitude = norm(&transformed);
        if magnitude < self.gradient_magnitude_tolerance {
            return Ok(self.finish(StopCondition::GradientMagnitudeTolerance));
        }
        if dot(&transformed, &self.previous_gradient) < 0.0 {
            self.current_step_length *= self.relaxation_factor;
        }
        if self.current_step_length < self.minimum_step_length {
            return Ok(self.finish(StopCondition::StepTooSmall));
        }

        let factor = -self.current_step_length / magnitude;
        self.position = advance(&self.position, &transformed, factor);
        self.previous_gradient = transformed;
        self.evaluate(cost)?;
        self.current_iteration += 1;
        Ok(StepResult::Continue)
    }
}

#[derive(Clone, Debug)]
pub struct RegularStepGradientDescentOptimizer {
    core: RegularStepCore,
}

impl RegularStepGradientDescentOptimizer {
    pub fn new(min_step: f64, max_step: f64, relaxation: f64, iterations: usize) -> Self {
        Self {
            core: RegularStepCore::new(min_step, max_step, relaxation, iterations),
        }
    }

    pub fn set_scales(&mut self, scales: Vec<f64>) {
        self.core.scales = scales;
    }

    pub fn set_minimum_step_length(&mut self, length: f64) {
        self.core.minimum_step_length = length;
    }

    pub fn set_maximum_step_length(&mut self, length: f64) {
        self.core.maximum_step_length = length;
    }

    pub fn set_relaxation_factor(&mut self, factor: f64) {
        self.core.relaxation_factor = factor;
    }

    pub fn set_gradient_magnitude_tolerance(&mut self, tolerance: f64) {
        self.core.gradient_magnitude_tolerance = tolerance;
    }

    pub fn set_number_of_iterations(&mut self, n: usize) {
        self.core.number_of_iterations = n;
    }

    pub fn number_of_iterations(&self) -> usize {
        self.core.number_of_iterations
    }

    pub fn current_iteration(&self) -> usize {
        self.core.current_iteration
    }

    pub fn value(&self) -> f64 {
        self.core.value
    }

    pub fn current_step_length(&self) -> f64 {
        self.core.current_step_length
    }

    pub fn position(&self) -> Vec<f64> {
        self.core.position.clone()
    }

    pub fn stop_condition(&self) -> Option<StopCondition> {
        self.core.stop
    }

    pub fn start(&mut self, cost: &dyn CostFunction, initial: &[f64]) -> Result<()> {
        self.core.start(cost, initial)
    }

    pub fn step(&mut self, cost: &dyn CostFunction) -> Result<StepResult> {
        self.core.step(cost, |position, direction, factor| {
            position
                .iter()
                .zip(direction)
                .map(|(p, d)| p + factor * d)
                .collect()
        })
    }
}
