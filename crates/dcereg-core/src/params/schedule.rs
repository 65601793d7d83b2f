//! Per-level parameter schedules, stored coarse to fine.

/// Everything a stage needs to reconfigure its metric, optimizer and
/// transform for one resolution level.
#[derive(Clone, Debug, PartialEq)]
pub struct LevelParameters {
    /// Schedule position, 0 = coarsest.
    pub level: usize,
    pub max_iterations: usize,
    pub histogram_bins: usize,
    pub sample_rate: f64,
    pub lbfgsb_cost_convergence: f64,
    pub lbfgsb_gradient_tolerance: f64,
    pub lbfgs_gradient_convergence: f64,
    pub lbfgs_default_step_size: f64,
    pub min_step_size: f64,
    pub max_step_size: f64,
    pub relaxation_factor: f64,
    pub translation_scale: f64,
    /// B-spline control points per axis `[x, y, z]`.
    pub grid_size: [usize; 3],
    pub max_rms_error: f64,
}

impl Default for LevelParameters {
    fn default() -> Self {
        Self {
            level: 0,
            max_iterations: 100,
            histogram_bins: 50,
            sample_rate: 1.0,
            lbfgsb_cost_convergence: 1e7,
            lbfgsb_gradient_tolerance: 1e-4,
            lbfgs_gradient_convergence: 1e-4,
            lbfgs_default_step_size: 1.0,
            min_step_size: 1e-3,
            max_step_size: 1.0,
            relaxation_factor: 0.5,
            translation_scale: crate::consts::DEFAULT_TRANSLATION_SCALE,
            grid_size: [8, 8, 5],
            max_rms_error: 0.01,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Schedule {
    levels: Vec<LevelParameters>,
}

impl Schedule {
    /// Build from levels listed fine to coarse (the user-facing order).
    ///
    /// Entry `i` of the input becomes schedule level `len - 1 - i`.
    pub fn from_fine_to_coarse(fine_to_coarse: Vec<LevelParameters>) -> Self {
        let n = fine_to_coarse.len();
        let mut levels = fine_to_coarse;
        levels.reverse();
        for (i, level) in levels.iter_mut().enumerate() {
            level.level = i;
        }
        debug_assert_eq!(levels.len(), n);
        Self { levels }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Parameters of schedule level `level`, 0 = coarsest.
    pub fn level(&self, level: usize) -> Option<&LevelParameters> {
        self.levels.get(level)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LevelParameters> {
        self.levels.iter()
    }

    pub fn finest(&self) -> Option<&LevelParameters> {
        self.levels.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_indexing() {
        let input: Vec<LevelParameters> = (0..3)
            .map(|i| LevelParameters {
                max_iterations: 10 * (i + 1),
                ..Default::default()
            })
            .collect();
        let schedule = Schedule::from_fine_to_coarse(input);
        assert_eq!(schedule.num_levels(), 3);
        assert_eq!(schedule.level(0).unwrap().max_iterations, 30);
        assert_eq!(schedule.level(2).unwrap().max_iterations, 10);
        assert_eq!(schedule.level(1).unwrap().level, 1);
        assert!(schedule.level(3).is_none());
    }
}
