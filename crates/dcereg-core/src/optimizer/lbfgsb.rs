//! Limited-memory BFGS with the stopping rules of the bounded variant.
//! Bounds are never set by the registration stages, so the projection
//! step reduces to the identity.

use crate::consts::{LBFGSB_EVALUATIONS_PER_ITERATION, LBFGS_LINE_SEARCH_ACCURACY};
use crate::error::Result;

use super::lbfgs_core::LbfgsState;
use super::{CostFunction, StepResult, StopCondition};

#[derive(Clone, Debug)]
pub struct LbfgsbOptimizer {
    cost_function_convergence_factor: f64,
    projected_gradient_tolerance: f64,
    maximum_number_of_iterations: usize,
    maximum_number_of_evaluations: usize,
    scales: Vec<f64>,
    state: LbfgsState,
    stop: Option<StopCondition>,
}

impl LbfgsbOptimizer {
    pub fn new(factr: f64, pgtol: f64, max_iterations: usize) -> Self {
        Self {
            cost_function_convergence_factor: factr,
            projected_gradient_tolerance: pgtol,
            maximum_number_of_iterations: max_iterations,
            maximum_number_of_evaluations: max_iterations * LBFGSB_EVALUATIONS_PER_ITERATION,
            scales: Vec::new(),
            state: LbfgsState::new(),
            stop: None,
        }
    }

    pub fn set_scales(&mut self, scales: Vec<f64>) {
        self.scales = scales;
    }

    pub fn set_cost_function_convergence_factor(&mut self, factr: f64) {
        self.cost_function_convergence_factor = factr;
    }

    pub fn set_projected_gradient_tolerance(&mut self, pgtol: f64) {
        self.projected_gradient_tolerance = pgtol;
    }

    pub fn set_maximum_number_of_iterations(&mut self, n: usize) {
        self.maximum_number_of_iterations = n;
    }

    pub fn set_maximum_number_of_evaluations(&mut self, n: usize) {
        self.maximum_number_of_evaluations = n;
    }

    pub fn maximum_number_of_iterations(&self) -> usize {
        self.maximum_number_of_iterations
    }

    pub fn current_iteration(&self) -> usize {
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
        if self.state.iteration >= self.maximum_number_of_iterations {
            return Ok(self.finish(StopCondition::MaximumIterations));
        }
        let projected = self
            .state
            .gradient
            .iter()
            .fold(0.0f64, |acc, g| acc.max(g.abs()));
        if projected <= self.projected_gradient_tolerance {
            return Ok(self.finish(StopCondition::ProjectedGradientTolerance));
        }
        if self.state.evaluations >= self.maximum_number_of_evaluations {
            return Ok(self.finish(StopCondition::MaximumEvaluations));
        }

        let previous = self.state.value;
        let moved = self.state.iterate(
            cost,
            1.0,
            self.maximum_number_of_evaluations,
            LBFGS_LINE_SEARCH_ACCURACY,
        )?;
        if !moved {
            return Ok(if self.state.evaluations >= self.maximum_number_of_evaluations {
                self.finish(StopCondition::MaximumEvaluations)
            } else {
                self.finish(StopCondition::LineSearchFailed)
            });
        }

        let current = self.state.value;
        let scale = previous.abs().max(current.abs()).max(1.0);
        if (previous - current) / scale <= self.cost_function_convergence_factor * f64::EPSILON {
            return Ok(self.finish(StopCondition::CostConvergence));
        }
        Ok(StepResult::Continue)
    }
}
