//! Regular-step descent on the versor rigid transform. Rotation updates
//! are composed as versors so the parameters stay a valid rotation.

use crate::error::Result;
use crate::transform::versor3d::{compose_versors, normalized_versor, versor_from_rotation_vector};

use super::rsgd::RegularStepCore;
use super::{CostFunction, StepResult, StopCondition};

#[derive(Clone, Debug)]
pub struct VersorRigid3dOptimizer {
    core: RegularStepCore,
}

/// Apply `factor * direction` to versor rigid parameters
/// `[vx, vy, vz, tx, ty, tz]`.
fn step_along_gradient(position: &[f64], direction: &[f64], factor: f64) -> Vec<f64> {
    let current = normalized_versor([position[0], position[1], position[2]]);
    let rotation = versor_from_rotation_vector([
        factor * direction[0],
        factor * direction[1],
        factor * direction[2],
    ]);
    let (v, _) = compose_versors(current, rotation);

    let mut next = Vec::with_capacity(position.len());
    next.extend_from_slice(&v);
    next.extend(
        position[3..]
            .iter()
            .zip(&direction[3..])
            .map(|(p, d)| p + factor * d),
    );
    next
}

impl VersorRigid3dOptimizer {
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
        self.core.step(cost, step_along_gradient)
    }
}
