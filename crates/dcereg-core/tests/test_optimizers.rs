use approx::assert_abs_diff_eq;

use dcereg_core::error::{RegistrationError, Result};
use dcereg_core::observer::IterationSource;
use dcereg_core::optimizer::{
    create_optimizer, CostFunction, LbfgsOptimizer, LbfgsbOptimizer, OptimizerKind,
    RegularStepGradientDescentOptimizer, StepResult, StopCondition,
};
use dcereg_core::params::LevelParameters;
use dcereg_core::transform::{CenteredRigid2d, Transform, VersorRigid3d};

/// `sum a_i (x_i - c_i)^2`, minimum 0 at `c`.
struct Quadratic {
    a: Vec<f64>,
    c: Vec<f64>,
}

impl Quadratic {
    fn new() -> Self {
        Self {
            a: vec![1.0, 4.0],
            c: vec![1.5, -2.0],
        }
    }
}

impl CostFunction for Quadratic {
    fn value_and_derivative(&self, x: &[f64]) -> Result<(f64, Vec<f64>)> {
        let mut value = 0.0;
        let mut grad = vec![0.0; x.len()];
        for i in 0..x.len() {
            let d = x[i] - self.c[i];
            value += self.a[i] * d * d;
            grad[i] = 2.0 * self.a[i] * d;
        }
        Ok((value, grad))
    }
}

/// Drive an optimizer to completion, returning the stop condition and the
/// number of steps that continued.
fn run_to_stop<F>(mut step: F) -> (StopCondition, usize)
where
    F: FnMut() -> Result<StepResult>,
{
    let mut steps = 0;
    loop {
        match step().unwrap() {
            StepResult::Continue => steps += 1,
            StepResult::Stop(condition) => return (condition, steps),
        }
        assert!(steps < 10_000, "optimizer never stopped");
    }
}

#[test]
fn test_lbfgsb_minimizes_quadratic() {
    let cost = Quadratic::new();
    let mut opt = LbfgsbOptimizer::new(1e7, 1e-5, 100);
    opt.start(&cost, &[0.0, 0.0]).unwrap();
    let (stop, _) = run_to_stop(|| opt.step(&cost));
    assert!(stop.is_convergence(), "stopped with {stop}");
    let x = opt.position();
    assert_abs_diff_eq!(x[0], 1.5, epsilon = 1e-3);
    assert_abs_diff_eq!(x[1], -2.0, epsilon = 1e-3);
    assert!(opt.cached_value() < 1e-5);
}

#[test]
fn test_lbfgs_minimizes_quadratic() {
    let cost = Quadratic::new();
    let mut opt = LbfgsOptimizer::new(1e-6, 1.0, 200);
    opt.start(&cost, &[0.0, 0.0]).unwrap();
    let (stop, _) = run_to_stop(|| opt.step(&cost));
    assert!(stop.is_convergence(), "stopped with {stop}");
    let x = opt.position();
    assert_abs_diff_eq!(x[0], 1.5, epsilon = 1e-3);
    assert_abs_diff_eq!(x[1], -2.0, epsilon = 1e-3);
}

#[test]
fn test_rsgd_minimizes_quadratic() {
    let cost = Quadratic::new();
    let mut opt = RegularStepGradientDescentOptimizer::new(1e-5, 1.0, 0.5, 2000);
    opt.start(&cost, &[0.0, 0.0]).unwrap();
    let (stop, steps) = run_to_stop(|| opt.step(&cost));
    assert!(stop.is_convergence(), "stopped with {stop}");
    assert_eq!(steps, opt.current_iteration());
    let x = opt.position();
    assert_abs_diff_eq!(x[0], 1.5, epsilon = 1e-2);
    assert_abs_diff_eq!(x[1], -2.0, epsilon = 1e-2);
}

#[test]
fn test_rsgd_iteration_budget() {
    let cost = Quadratic::new();
    let mut opt = RegularStepGradientDescentOptimizer::new(1e-9, 0.01, 0.5, 5);
    opt.start(&cost, &[0.0, 0.0]).unwrap();
    let (stop, steps) = run_to_stop(|| opt.step(&cost));
    assert_eq!(stop, StopCondition::MaximumIterations);
    assert_eq!(steps, 5);
    // A stopped optimizer keeps reporting the same condition.
    assert_eq!(opt.step(&cost).unwrap(), StepResult::Stop(stop));
}

#[test]
fn test_request_stop_ends_each_kind_after_one_step() {
    let level = LevelParameters {
        max_iterations: 500,
        min_step_size: 1e-9,
        max_step_size: 0.01,
        relaxation_factor: 0.5,
        lbfgsb_cost_convergence: 1.0,
        lbfgsb_gradient_tolerance: 1e-12,
        lbfgs_gradient_convergence: 1e-12,
        lbfgs_default_step_size: 0.01,
        translation_scale: 1.0,
        ..Default::default()
    };
    let transform = Transform::Rigid2d(CenteredRigid2d::new([0.0, 0.0]));
    let far = Quadratic {
        a: vec![1.0, 1.0, 1.0],
        c: vec![0.5, 40.0, -30.0],
    };

    for kind in [
        OptimizerKind::Lbfgsb,
        OptimizerKind::Lbfgs,
        OptimizerKind::RegularStepGradientDescent,
    ] {
        let mut opt = create_optimizer(kind, &level, &transform).unwrap();
        assert_eq!(opt.kind(), kind);
        opt.start(&far, transform.parameters()).unwrap();
        opt.request_stop();
        let (stop, steps) = run_to_stop(|| opt.step(&far));
        assert!(steps <= 1, "{kind} took {steps} steps after a stop request");
        assert!(!stop.is_convergence(), "{kind} stopped with {stop}");
        assert_eq!(opt.stop_condition(), Some(stop));
    }
}

#[test]
fn test_level_budget_is_applied_per_kind() {
    let level = LevelParameters {
        max_iterations: 30,
        ..Default::default()
    };
    let transform = Transform::Rigid2d(CenteredRigid2d::new([0.0, 0.0]));
    let mut opt = create_optimizer(OptimizerKind::Lbfgs, &level, &transform).unwrap();
    assert_eq!(opt.max_iterations(), 30);
    opt.set_max_iterations_for_this_level(7);
    assert_eq!(opt.max_iterations(), 7);
}

#[test]
fn test_versor_needs_versor_transform() {
    let level = LevelParameters::default();
    let rigid2d = Transform::Rigid2d(CenteredRigid2d::new([0.0, 0.0]));
    assert!(matches!(
        create_optimizer(OptimizerKind::Versor, &level, &rigid2d),
        Err(RegistrationError::UnsupportedAlgorithm(_))
    ));

    let versor = Transform::VersorRigid3d(VersorRigid3d::new([0.0; 3]));
    let opt = create_optimizer(OptimizerKind::Versor, &level, &versor).unwrap();
    assert_eq!(opt.kind(), OptimizerKind::Versor);
}

#[test]
fn test_kind_codes_and_names() {
    for code in 0..4 {
        let kind = OptimizerKind::try_from(code).unwrap();
        assert_eq!(kind.code(), code);
    }
    assert!(OptimizerKind::try_from(7).is_err());
    assert_eq!(
        "rsgd".parse::<OptimizerKind>().unwrap(),
        OptimizerKind::RegularStepGradientDescent
    );
    assert_eq!("L-BFGS-B".parse::<OptimizerKind>().unwrap(), OptimizerKind::Lbfgsb);
    assert!("simplex".parse::<OptimizerKind>().is_err());
    assert_eq!(OptimizerKind::default(), OptimizerKind::RegularStepGradientDescent);
}

#[test]
fn test_stop_condition_classification() {
    assert!(StopCondition::StepTooSmall.is_convergence());
    assert!(StopCondition::RmsConvergence.is_convergence());
    assert!(!StopCondition::MaximumIterations.is_convergence());
    assert!(!StopCondition::LineSearchFailed.is_convergence());
}
