//! Limited-memory BFGS machinery shared by the L-BFGS and L-BFGS-B
//! optimizers: two-loop recursion and a backtracking line search.
//!
//! The search runs in scaled coordinates `y = x * scale`, so parameters
//! with very different units (angles and millimetres) are conditioned alike.

use std::collections::VecDeque;

use crate::consts::{EPSILON, LBFGS_MEMORY, LINE_SEARCH_ARMIJO, LINE_SEARCH_MAX_TRIALS};
use crate::error::{RegistrationError, Result};

use super::CostFunction;

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub(crate) fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

#[derive(Clone, Debug, Default)]
pub(crate) struct LbfgsState {
    pub scales: Vec<f64>,
    /// Scaled position.
    pub position: Vec<f64>,
    pub value: f64,
    /// Gradient with respect to the scaled position.
    pub gradient: Vec<f64>,
    pub iteration: usize,
    pub evaluations: usize,
    /// Length of the last accepted step, in unscaled parameter units.
    pub last_step: f64,
    s_history: VecDeque<Vec<f64>>,
    y_history: VecDeque<Vec<f64>>,
}

struct Trial {
    position: Vec<f64>,
    value: f64,
    gradient: Vec<f64>,
}

impl LbfgsState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unscaled parameters.
    pub fn parameters(&self) -> Vec<f64> {
        self.position
            .iter()
            .zip(&self.scales)
            .map(|(y, s)| y / s)
            .collect()
    }

    fn evaluate(&self, cost: &dyn CostFunction, scaled: &[f64]) -> Result<(f64, Vec<f64>)> {
        let x: Vec<f64> = scaled.iter().zip(&self.scales).map(|(y, s)| y / s).collect();
        let (value, gradient) = cost.value_and_derivative(&x)?;
        if gradient.len() != x.len() {
            return Err(RegistrationError::DimensionMismatch {
                expected: format!("{} derivative entries", x.len()),
                actual: gradient.len().to_string(),
            });
        }
        if !value.is_finite() || gradient.iter().any(|g| !g.is_finite()) {
            return Err(RegistrationError::numerical("cost function is not finite"));
        }
        let scaled_gradient = gradient
            .iter()
            .zip(&self.scales)
            .map(|(g, s)| g / s)
            .collect();
        Ok((value, scaled_gradient))
    }

    pub fn start(&mut self, cost: &dyn CostFunction, initial: &[f64], scales: &[f64]) -> Result<()> {
        self.scales = if scales.len() == initial.len() {
            scales.to_vec()
        } else {
            vec![1.0; initial.len()]
        };
        self.position = initial.iter().zip(&self.scales).map(|(x, s)| x * s).collect();
        let (value, gradient) = self.evaluate(cost, &self.position)?;
        self.value = value;
        self.gradient = gradient;
        self.iteration = 0;
        self.evaluations = 1;
        self.last_step = 0.0;
        self.s_history.clear();
        self.y_history.clear();
        Ok(())
    }

    /// Quasi-Newton descent direction `-H g`.
    fn direction(&self) -> Vec<f64> {
        let k = self.s_history.len();
        let mut q = self.gradient.clone();
        let mut alphas = vec![0.0; k];
        let mut rhos = vec![0.0; k];
        for i in (0..k).rev() {
            let s = &self.s_history[i];
            let y = &self.y_history[i];
            rhos[i] = 1.0 / dot(y, s);
            alphas[i] = rhos[i] * dot(s, &q);
            for (qj, yj) in q.iter_mut().zip(y) {
                *qj -= alphas[i] * yj;
            }
        }
        let gamma = match (self.s_history.back(), self.y_history.back()) {
            (Some(s), Some(y)) => dot(s, y) / dot(y, y),
            _ => 1.0,
        };
        let mut r: Vec<f64> = q.iter().map(|v| gamma * v).collect();
        for i in 0..k {
            let s = &self.s_history[i];
            let y = &self.y_history[i];
            let beta = rhos[i] * dot(y, &r);
            for (rj, sj) in r.iter_mut().zip(s) {
                *rj += sj * (alphas[i] - beta);
            }
        }
        r.iter().map(|v| -v).collect()
    }

    /// Take one quasi-Newton iteration. `first_step` is the trial step
    /// length (in scaled units) used when there is no curvature history.
    /// Returns `false` if the line search found no acceptable point.
    pub fn iterate(
        &mut self,
        cost: &dyn CostFunction,
        first_step: f64,
        max_evaluations: usize,
        curvature: f64,
    ) -> Result<bool> {
        let mut d = self.direction();
        let mut gd = dot(&self.gradient, &d);
        if gd >= 0.0 {
            self.s_history.clear();
            self.y_history.clear();
            d = self.gradient.iter().map(|g| -g).collect();
            gd = -dot(&self.gradient, &self.gradient);
        }
        if gd.abs() <= EPSILON * EPSILON {
            return Ok(false);
        }

        let mut alpha = if self.s_history.is_empty() {
            first_step / norm(&d)
        } else {
            1.0
        };
        let mut best: Option<Trial> = None;
        let mut expanding = false;

        for trial in 0..LINE_SEARCH_MAX_TRIALS {
            if self.evaluations >= max_evaluations {
                break;
            }
            let position: Vec<f64> = self
                .position
                .iter()
                .zip(&d)
                .map(|(y, dj)| y + alpha * dj)
                .collect();
            let (value, gradient) = self.evaluate(cost, &position)?;
            self.evaluations += 1;

            if value <= self.value + LINE_SEARCH_ARMIJO * alpha * gd {
                let steep = dot(&gradient, &d) < curvature * gd;
                best = Some(Trial {
                    position,
                    value,
                    gradient,
                });
                if steep && (expanding || trial == 0) {
                    expanding = true;
                    alpha *= 2.0;
                    continue;
                }
                break;
            } else if best.is_some() {
                break;
            } else {
                alpha *= 0.5;
            }
        }

        let Some(trial) = best else {
            return Ok(false);
        };

        let s: Vec<f64> = trial.position.iter().zip(&self.position).map(|(a, b)| a - b).collect();
        let y: Vec<f64> = trial.gradient.iter().zip(&self.gradient).map(|(a, b)| a - b).collect();
        if dot(&s, &y) > EPSILON {
            if self.s_history.len() == LBFGS_MEMORY {
                self.s_history.pop_front();
                self.y_history.pop_front();
            }
            self.s_history.push_back(s.clone());
            self.y_history.push_back(y);
        }
        self.last_step = s
            .iter()
            .zip(&self.scales)
            .map(|(sj, sc)| (sj / sc).powi(2))
            .sum::<f64>()
            .sqrt();
        self.position = trial.position;
        self.value = trial.value;
        self.gradient = trial.gradient;
        self.iteration += 1;
        Ok(true)
    }
}
