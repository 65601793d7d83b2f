//! Unbounded limited-memory BFGS, budgeted by function evaluations.

use crate::consts::LBFGS_LINE_SEARCH_ACCURACY;
use crate::error::Result;

use super::lbfgs_core::{norm, LbfgsState};
use super::{CostFunction, StepResult, StopCondition};

#[derive(Clone, Debug)]
pub struct LbfgsOptimizer {
    gradient_convergence_tolerance: f64,
    default_step_length: f64,
    line_search_accuracy: f64,
    maximum_number_of_function_evaluations: usize,
    scales: Vec<f64>,
    state: LbfgsState,
    stop: Option<StopCondition>,
}

impl LbfgsOptimizer {
    pub fn new(gradient_tolerance: f64, default_step_length: f64, max_evaluations: usize) -> Self {
        Self {
            gradient_convergence_tolerance: gradient_tolerance,
            default_step_length,
            line_search_accuracy: LBFGS_LINE_SEARCH_ACCURACY,
            maximum_number_of_function_evaluations: max_evaluations,
            scales: Vec::new(),
            state: LbfgsState::new(),
            stop: None,
        }
    }

    pub fn set_scales(&mut self, scales: Vec<f64>) {
        self.scales = scales;
    }

    pub fn set_gradient_convergence_tolerance(&mut self, tolerance: f64) {
        self.gradient_convergence_tolerance = tolerance;
    }

    pub fn set_default_step_length(&mut self, length: f64) {
        self.default_step_length = length;
    }

    pub fn set_line_search_accuracy(&mut self, accuracy: f64) {
        self.line_search_accuracy = accuracy;
    }

    pub fn set_maximum_number_of_function_evaluations(&mut self, n: usize) {
        self.maximum_number_of_function_evaluations = n;
    }

    pub fn maximum_number_of_function_evaluations(&self) -> usize {
        self.maximum_number_of_function_evaluations
    }

    /// Completed line searches.
    pub fn num_iterations(&self) -> usize {
        self.state.iteration
    }

    pub fn cached_value(&self) -> f64 {
        self.state.value
    }

    pub fn last_step_length(&self) -> f64 {
        self.state.last_step
    }

    pub fn position(&self) -> Vec<f64> {
        self.state.parameters()
    }

    pub fn stop_condition(&self) -> Option<StopCondition> {
        self.stop
    }

    pub fn start(&mut self, cost: &dyn CostFunction, initial: &[f64]) -> Result<()> {
        self.stop = None;
        self.state.start(cost, initial, &self.scales)
    }

    fn finish(&mut self, condition: StopCondition) -> StepResult {
        self.stop = Some(condition);
        StepResult::Stop(condition)
    }

    pub fn step(&mut self, cost: &dyn CostFunction) -> Result<StepResult> {
        if let Some(condition) = self.stop {
            return Ok(StepResult::Stop(condition));
        }
        if self.state.evaluations >= self.maximum_number_of_function_evaluations {
            return Ok(self.finish(StopCondition::MaximumEvaluations));
        }
        let gnorm = norm(&self.state.gradient);
        let xnorm = norm(&self.state.position).max(1.0);
        if gnorm / xnorm <= self.gradient_convergence_tolerance {
            return Ok(self.finish(StopCondition::GradientConvergence));
        }

        let moved = self.state.iterate(
            cost,
            self.default_step_length,
            self.maximum_number_of_function_evaluations,
            self.line_search_accuracy,
        )?;
        if !moved {
            return Ok(
                if self.state.evaluations >= self.maximum_number_of_function_evaluations {
                    self.finish(StopCondition::MaximumEvaluations)
                } else {
                    self.finish(StopCondition::LineSearchFailed)
                },
            );
        }
        Ok(StepResult::Continue)
    }
}
