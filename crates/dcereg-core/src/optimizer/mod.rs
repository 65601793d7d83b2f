//! Optimizers and the optimizer factory.
//!
//! Each optimizer keeps its own native vocabulary (`cached_value`,
//! `num_iterations`, ...). [`Optimizer`] maps those onto the uniform
//! contract the observer and multi-resolution driver rely on.

mod lbfgs_core;

pub mod lbfgs;
pub mod lbfgsb;
pub mod rsgd;
pub mod versor;

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RegistrationError, Result};
use crate::observer::{IterationSource, LevelConfigurable};
use crate::params::LevelParameters;
use crate::transform::Transform;

pub use lbfgs::LbfgsOptimizer;
pub use lbfgsb::LbfgsbOptimizer;
pub use rsgd::RegularStepGradientDescentOptimizer;
pub use versor::VersorRigid3dOptimizer;

/// Optimizer selector. Integer codes match the plugin settings: 0 to 3.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerKind {
    Lbfgsb,
    Lbfgs,
    #[default]
    RegularStepGradientDescent,
    Versor,
}

impl OptimizerKind {
    pub fn code(&self) -> u32 {
        match self {
            Self::Lbfgsb => 0,
            Self::Lbfgs => 1,
            Self::RegularStepGradientDescent => 2,
            Self::Versor => 3,
        }
    }
}

impl std::fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lbfgsb => write!(f, "L-BFGS-B"),
            Self::Lbfgs => write!(f, "L-BFGS"),
            Self::RegularStepGradientDescent => write!(f, "Regular Step Gradient Descent"),
            Self::Versor => write!(f, "Versor Rigid 3D"),
        }
    }
}

impl TryFrom<u32> for OptimizerKind {
    type Error = RegistrationError;

    fn try_from(code: u32) -> Result<Self> {
        match code {
            0 => Ok(Self::Lbfgsb),
            1 => Ok(Self::Lbfgs),
            2 => Ok(Self::RegularStepGradientDescent),
            3 => Ok(Self::Versor),
            other => Err(RegistrationError::unsupported(format!(
                "unknown optimizer code {other}"
            ))),
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lbfgsb" | "l-bfgs-b" => Ok(Self::Lbfgsb),
            "lbfgs" | "l-bfgs" => Ok(Self::Lbfgs),
            "rsgd" | "regular-step-gradient-descent" | "regularstepgradientdescent" => {
                Ok(Self::RegularStepGradientDescent)
            }
            "versor" | "versor-rigid-3d" => Ok(Self::Versor),
            other => Err(RegistrationError::unsupported(format!(
                "unknown optimizer '{other}'"
            ))),
        }
    }
}

/// A differentiable objective to minimize.
pub trait CostFunction {
    fn value_and_derivative(&self, parameters: &[f64]) -> Result<(f64, Vec<f64>)>;
}

/// Why an optimizer stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopCondition {
    MaximumIterations,
    MaximumEvaluations,
    StepTooSmall,
    GradientMagnitudeTolerance,
    CostConvergence,
    ProjectedGradientTolerance,
    GradientConvergence,
    LineSearchFailed,
    /// Demons displacement field stopped changing.
    RmsConvergence,
}

impl StopCondition {
    /// Whether the stop means the optimum was reached, as opposed to the
    /// budget running out or the search breaking down.
    pub fn is_convergence(&self) -> bool {
        !matches!(
            self,
            Self::MaximumIterations | Self::MaximumEvaluations | Self::LineSearchFailed
        )
    }
}

impl std::fmt::Display for StopCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaximumIterations => write!(f, "Maximum number of iterations reached"),
            Self::MaximumEvaluations => write!(f, "Maximum number of function evaluations reached"),
            Self::StepTooSmall => write!(f, "Step too small"),
            Self::GradientMagnitudeTolerance => write!(f, "Gradient magnitude tolerance met"),
            Self::CostConvergence => write!(f, "Cost function converged"),
            Self::ProjectedGradientTolerance => write!(f, "Projected gradient tolerance met"),
            Self::GradientConvergence => write!(f, "Gradient converged"),
            Self::LineSearchFailed => write!(f, "Line search failed"),
            Self::RmsConvergence => write!(f, "RMS change below threshold"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepResult {
    Continue,
    Stop(StopCondition),
}

#[derive(Clone, Debug)]
pub enum Optimizer {
    Lbfgsb(LbfgsbOptimizer),
    Lbfgs(LbfgsOptimizer),
    RegularStepGradientDescent(RegularStepGradientDescentOptimizer),
    Versor(VersorRigid3dOptimizer),
}

/// Build an optimizer configured with one level's parameters, with
/// parameter scales taken from `transform`.
pub fn create_optimizer(
    kind: OptimizerKind,
    level: &LevelParameters,
    transform: &Transform,
) -> Result<Optimizer> {
    let mut optimizer = match kind {
        OptimizerKind::Lbfgsb => Optimizer::Lbfgsb(LbfgsbOptimizer::new(
            level.lbfgsb_cost_convergence,
            level.lbfgsb_gradient_tolerance,
            level.max_iterations,
        )),
        OptimizerKind::Lbfgs => Optimizer::Lbfgs(LbfgsOptimizer::new(
            level.lbfgs_gradient_convergence,
            level.lbfgs_default_step_size,
            level.max_iterations,
        )),
        OptimizerKind::RegularStepGradientDescent => {
            Optimizer::RegularStepGradientDescent(RegularStepGradientDescentOptimizer::new(
                level.min_step_size,
                level.max_step_size,
                level.relaxation_factor,
                level.max_iterations,
            ))
        }
        OptimizerKind::Versor => {
            if !transform.is_versor() {
                return Err(RegistrationError::unsupported(format!(
                    "the Versor optimizer cannot drive a {} transform",
                    transform.name()
                )));
            }
            Optimizer::Versor(VersorRigid3dOptimizer::new(
                level.min_step_size,
                level.max_step_size,
                level.relaxation_factor,
                level.max_iterations,
            ))
        }
    };
    optimizer.set_scales(transform.optimizer_scales(level.translation_scale));
    Ok(optimizer)
}

impl Optimizer {
    pub fn kind(&self) -> OptimizerKind {
        match self {
            Self::Lbfgsb(_) => OptimizerKind::Lbfgsb,
            Self::Lbfgs(_) => OptimizerKind::Lbfgs,
            Self::RegularStepGradientDescent(_) => OptimizerKind::RegularStepGradientDescent,
            Self::Versor(_) => OptimizerKind::Versor,
        }
    }

    pub fn set_scales(&mut self, scales: Vec<f64>) {
        match self {
            Self::Lbfgsb(o) => o.set_scales(scales),
            Self::Lbfgs(o) => o.set_scales(scales),
            Self::RegularStepGradientDescent(o) => o.set_scales(scales),
            Self::Versor(o) => o.set_scales(scales),
        }
    }

    /// Evaluate the cost at `initial` and reset iteration state.
    pub fn start(&mut self, cost: &dyn CostFunction, initial: &[f64]) -> Result<()> {
        match self {
            Self::Lbfgsb(o) => o.start(cost, initial),
            Self::Lbfgs(o) => o.start(cost, initial),
            Self::RegularStepGradientDescent(o) => o.start(cost, initial),
            Self::Versor(o) => o.start(cost, initial),
        }
    }

    pub fn step(&mut self, cost: &dyn CostFunction) -> Result<StepResult> {
        match self {
            Self::Lbfgsb(o) => o.step(cost),
            Self::Lbfgs(o) => o.step(cost),
            Self::RegularStepGradientDescent(o) => o.step(cost),
            Self::Versor(o) => o.step(cost),
        }
    }

    pub fn current_position(&self) -> Vec<f64> {
        match self {
            Self::Lbfgsb(o) => o.position(),
            Self::Lbfgs(o) => o.position(),
            Self::RegularStepGradientDescent(o) => o.position(),
            Self::Versor(o) => o.position(),
        }
    }

    pub fn stop_condition(&self) -> Option<StopCondition> {
        match self {
            Self::Lbfgsb(o) => o.stop_condition(),
            Self::Lbfgs(o) => o.stop_condition(),
            Self::RegularStepGradientDescent(o) => o.stop_condition(),
            Self::Versor(o) => o.stop_condition(),
        }
    }

    /// Iteration budget for the level about to run. L-BFGS counts it in
    /// function evaluations.
    pub fn set_max_iterations_for_this_level(&mut self, n: usize) {
        match self {
            Self::Lbfgsb(o) => {
                o.set_maximum_number_of_iterations(n);
                o.set_maximum_number_of_evaluations(
                    n * crate::consts::LBFGSB_EVALUATIONS_PER_ITERATION,
                );
            }
            Self::Lbfgs(o) => o.set_maximum_number_of_function_evaluations(n),
            Self::RegularStepGradientDescent(o) => o.set_number_of_iterations(n),
            Self::Versor(o) => o.set_number_of_iterations(n),
        }
    }

    pub fn max_iterations(&self) -> usize {
        match self {
            Self::Lbfgsb(o) => o.maximum_number_of_iterations(),
            Self::Lbfgs(o) => o.maximum_number_of_function_evaluations(),
            Self::RegularStepGradientDescent(o) => o.number_of_iterations(),
            Self::Versor(o) => o.number_of_iterations(),
        }
    }
}

impl IterationSource for Optimizer {
    fn current_iteration(&self) -> usize {
        match self {
            Self::Lbfgsb(o) => o.current_iteration(),
            Self::Lbfgs(o) => o.num_iterations(),
            Self::RegularStepGradientDescent(o) => o.current_iteration(),
            Self::Versor(o) => o.current_iteration(),
        }
    }

    fn current_value(&self) -> f64 {
        match self {
            Self::Lbfgsb(o) => o.cached_value(),
            Self::Lbfgs(o) => o.cached_value(),
            Self::RegularStepGradientDescent(o) => o.value(),
            Self::Versor(o) => o.value(),
        }
    }

    fn current_step_size(&self) -> f64 {
        match self {
            Self::Lbfgsb(o) => o.last_step_length(),
            Self::Lbfgs(o) => o.last_step_length(),
            Self::RegularStepGradientDescent(o) => o.current_step_length(),
            Self::Versor(o) => o.current_step_length(),
        }
    }

    /// Force the next step to stop by shrinking the optimizer's own
    /// terminal budget to one.
    fn request_stop(&mut self) {
        match self {
            Self::Lbfgsb(o) => o.set_maximum_number_of_iterations(1),
            Self::Lbfgs(o) => o.set_maximum_number_of_function_evaluations(1),
            Self::RegularStepGradientDescent(o) => o.set_number_of_iterations(1),
            Self::Versor(o) => o.set_number_of_iterations(1),
        }
    }
}

impl LevelConfigurable for Optimizer {
    fn apply_level(&mut self, level: &LevelParameters) -> Result<()> {
        match self {
            Self::Lbfgsb(o) => {
                o.set_cost_function_convergence_factor(level.lbfgsb_cost_convergence);
                o.set_projected_gradient_tolerance(level.lbfgsb_gradient_tolerance);
            }
            Self::Lbfgs(o) => {
                o.set_gradient_convergence_tolerance(level.lbfgs_gradient_convergence);
                o.set_default_step_length(level.lbfgs_default_step_size);
            }
            Self::RegularStepGradientDescent(o) => {
                o.set_minimum_step_length(level.min_step_size);
                o.set_maximum_step_length(level.max_step_size);
                o.set_relaxation_factor(level.relaxation_factor);
            }
            Self::Versor(o) => {
                o.set_minimum_step_length(level.min_step_size);
                o.set_maximum_step_length(level.max_step_size);
                o.set_relaxation_factor(level.relaxation_factor);
            }
        }
        self.set_max_iterations_for_this_level(level.max_iterations);
        Ok(())
    }
}
