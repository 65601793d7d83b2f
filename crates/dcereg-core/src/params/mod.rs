//! Validated, immutable registration parameters.

pub mod config;
pub mod schedule;

use tracing::{debug, warn};

use crate::consts::{BSPLINE_ORDER, MATTES_PADDING_BINS, MAX_LEVELS, MAX_THREADS};
use crate::error::{RegistrationError, Result};
use crate::image::Dimension;
use crate::metric::MetricKind;
use crate::optimizer::OptimizerKind;
use crate::region::{Region, SpatialMask};

pub use config::{
    BSplineStageConfig, DemonsStageConfig, GeneralConfig, RegistrationConfig, RigidStageConfig,
    ThreadConfig,
};
pub use schedule::{LevelParameters, Schedule};

/// Kind of transform a stage estimates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageKind {
    Rigid,
    BSpline,
    Demons,
}

impl StageKind {
    pub fn is_deformable(&self) -> bool {
        !matches!(self, Self::Rigid)
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rigid => write!(f, "Rigid"),
            Self::BSpline => write!(f, "B-spline"),
            Self::Demons => write!(f, "Demons"),
        }
    }
}

/// The enabled stages, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationSequence {
    Rigid,
    BSpline,
    Demons,
    RigidBSpline,
    RigidDemons,
}

impl std::fmt::Display for RegistrationSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rigid => write!(f, "Rigid"),
            Self::BSpline => write!(f, "B-spline"),
            Self::Demons => write!(f, "Demons"),
            Self::RigidBSpline => write!(f, "Rigid + B-spline"),
            Self::RigidDemons => write!(f, "Rigid + Demons"),
        }
    }
}

/// Demons-only settings shared by every level.
#[derive(Clone, Debug, PartialEq)]
pub struct DemonsSettings {
    pub histogram_bins: usize,
    pub histogram_match_points: usize,
    pub standard_deviations: f64,
}

#[derive(Clone, Debug)]
pub struct StageParameters {
    pub kind: StageKind,
    /// Demons always compares intensities by mean squares.
    pub metric: MetricKind,
    /// `None` for demons, which updates its field directly.
    pub optimizer: Option<OptimizerKind>,
    pub schedule: Schedule,
    pub demons: Option<DemonsSettings>,
}

impl StageParameters {
    pub fn num_levels(&self) -> usize {
        self.schedule.num_levels()
    }
}

/// The validated bundle every registration component reads from.
#[derive(Clone, Debug)]
pub struct ParameterSet {
    pub num_images: usize,
    pub slices_per_image: usize,
    pub fixed_image_index: usize,
    pub flipped_data: bool,
    pub series_name: String,
    pub region: Region,
    pub mask: Option<SpatialMask>,
    pub rigid: Option<StageParameters>,
    pub deformable: Option<StageParameters>,
    pub show_field: bool,
    pub fill_value: f32,
    pub number_of_threads: usize,
}

impl ParameterSet {
    /// Validate `config` against images of `image_size` (`[width, height, slices]`).
    pub fn build(config: &RegistrationConfig, image_size: [usize; 3]) -> Result<Self> {
        let general = &config.general;
        let [width, height, depth] = image_size;

        if general.num_images == 0 {
            return Err(RegistrationError::invalid_config("series has no images"));
        }
        if general.slices_per_image == 0 {
            return Err(RegistrationError::invalid_config(
                "slices_per_image must be at least 1",
            ));
        }
        if general.slices_per_image != depth {
            return Err(RegistrationError::invalid_config(format!(
                "slices_per_image is {} but images have {} slices",
                general.slices_per_image, depth
            )));
        }
        let fixed_image_index = slice_number_to_index(
            general.fixed_image_number,
            general.num_images,
            general.flipped_data,
        )?;

        let region = general.region.unwrap_or_else(|| Region::full(width, height));
        region.validate(width, height)?;
        let mask = if general.mask.is_empty() {
            None
        } else {
            let mask = SpatialMask::from_flat(&general.mask)?;
            mask.validate(&region, width, height)?;
            Some(mask)
        };
        if !general.fill_value.is_finite() {
            return Err(RegistrationError::invalid_config("fill_value must be finite"));
        }

        let dimension = if depth == 1 {
            Dimension::Two
        } else {
            Dimension::Three
        };

        if config.bspline.enabled && config.demons.enabled {
            return Err(RegistrationError::invalid_config(
                "only one deformable method (B-spline or Demons) may be enabled",
            ));
        }
        if !config.rigid.enabled && !config.bspline.enabled && !config.demons.enabled {
            return Err(RegistrationError::invalid_config(
                "no registration stage is enabled",
            ));
        }

        let rigid = if config.rigid.enabled {
            Some(build_rigid(&config.rigid, dimension)?)
        } else {
            None
        };
        let deformable = if config.bspline.enabled {
            Some(build_bspline(&config.bspline, dimension)?)
        } else if config.demons.enabled {
            Some(build_demons(&config.demons)?)
        } else {
            None
        };

        let number_of_threads = resolve_threads(&config.threads)?;

        debug!(
            num_images = general.num_images,
            fixed = fixed_image_index,
            threads = number_of_threads,
            "Parameter set validated"
        );

        Ok(Self {
            num_images: general.num_images,
            slices_per_image: general.slices_per_image,
            fixed_image_index,
            flipped_data: general.flipped_data,
            series_name: general.series_description.clone(),
            region,
            mask,
            rigid,
            deformable,
            show_field: general.deform_show_field,
            fill_value: general.fill_value,
            number_of_threads,
        })
    }

    pub fn dimension(&self) -> Dimension {
        if self.slices_per_image == 1 {
            Dimension::Two
        } else {
            Dimension::Three
        }
    }

    /// Enabled stages in execution order: rigid first, then deformable.
    pub fn stages(&self) -> impl Iterator<Item = &StageParameters> {
        self.rigid.iter().chain(self.deformable.iter())
    }

    pub fn sequence(&self) -> RegistrationSequence {
        match (
            self.rigid.is_some(),
            self.deformable.as_ref().map(|s| s.kind),
        ) {
            (true, Some(StageKind::Demons)) => RegistrationSequence::RigidDemons,
            (true, Some(_)) => RegistrationSequence::RigidBSpline,
            (false, Some(StageKind::Demons)) => RegistrationSequence::Demons,
            (false, Some(_)) => RegistrationSequence::BSpline,
            _ => RegistrationSequence::Rigid,
        }
    }

    /// Convert a viewer image number (1-based) into a series index.
    pub fn slice_number_to_index(&self, number: usize) -> Result<usize> {
        slice_number_to_index(number, self.num_images, self.flipped_data)
    }

    /// Convert a series index back into the viewer's 1-based image number.
    pub fn index_to_slice_number(&self, index: usize) -> usize {
        if self.flipped_data {
            self.num_images - index
        } else {
            index + 1
        }
    }
}

fn slice_number_to_index(number: usize, count: usize, flipped: bool) -> Result<usize> {
    if number == 0 || number > count {
        return Err(RegistrationError::invalid_config(format!(
            "fixed image number {number} outside 1..={count}"
        )));
    }
    Ok(if flipped { count - number } else { number - 1 })
}

fn resolve_threads(threads: &ThreadConfig) -> Result<usize> {
    if threads.use_default_number_of_threads {
        return Ok(rayon::current_num_threads().clamp(1, MAX_THREADS));
    }
    if threads.number_of_threads == 0 {
        return Err(RegistrationError::invalid_config(
            "number_of_threads must be at least 1",
        ));
    }
    if threads.number_of_threads > MAX_THREADS {
        warn!(
            requested = threads.number_of_threads,
            max = MAX_THREADS,
            "Thread count clamped"
        );
    }
    Ok(threads.number_of_threads.min(MAX_THREADS))
}

fn check_levels(stage: &str, levels: usize) -> Result<()> {
    if levels == 0 || levels > MAX_LEVELS {
        return Err(RegistrationError::invalid_config(format!(
            "{stage}: levels must be in 1..={MAX_LEVELS}, got {levels}"
        )));
    }
    Ok(())
}

fn check_len<T>(stage: &str, name: &str, values: &[T], levels: usize) -> Result<()> {
    if values.len() < levels {
        return Err(RegistrationError::invalid_config(format!(
            "{stage}: {name} has {} entries but {levels} levels are used",
            values.len()
        )));
    }
    Ok(())
}

/// Every used entry finite and strictly positive.
fn check_positive(stage: &str, name: &str, values: &[f64], levels: usize) -> Result<()> {
    check_len(stage, name, values, levels)?;
    if let Some(v) = values[..levels].iter().find(|v| !(v.is_finite() && **v > 0.0)) {
        return Err(RegistrationError::invalid_config(format!(
            "{stage}: {name} must be positive, got {v}"
        )));
    }
    Ok(())
}

/// Every used entry inside the open interval `(0, hi)`, or `(0, hi]` when
/// `inclusive`.
fn check_fraction(
    stage: &str,
    name: &str,
    values: &[f64],
    levels: usize,
    hi: f64,
    inclusive: bool,
) -> Result<()> {
    check_positive(stage, name, values, levels)?;
    let bad = values[..levels]
        .iter()
        .find(|&&v| if inclusive { v > hi } else { v >= hi });
    if let Some(v) = bad {
        return Err(RegistrationError::invalid_config(format!(
            "{stage}: {name} out of range, got {v}"
        )));
    }
    Ok(())
}

fn check_nonzero(stage: &str, name: &str, values: &[usize], levels: usize) -> Result<()> {
    check_len(stage, name, values, levels)?;
    if values[..levels].contains(&0) {
        return Err(RegistrationError::invalid_config(format!(
            "{stage}: {name} entries must be non-zero"
        )));
    }
    Ok(())
}

/// Mattes needs room for its padding bins on both sides of the histogram.
fn check_histogram_bins(stage: &str, metric: MetricKind, bins: &[usize], levels: usize) -> Result<()> {
    check_nonzero(stage, "mmi_histogram_bins", bins, levels)?;
    if metric != MetricKind::MattesMutualInformation {
        return Ok(());
    }
    if let Some(b) = bins[..levels].iter().find(|&&b| b <= 2 * MATTES_PADDING_BINS) {
        return Err(RegistrationError::invalid_config(format!(
            "{stage}: mmi_histogram_bins must exceed {}, got {b}",
            2 * MATTES_PADDING_BINS
        )));
    }
    Ok(())
}

fn check_step_order(stage: &str, min: &[f64], max: &[f64], levels: usize) -> Result<()> {
    for i in 0..levels {
        if min[i] > max[i] {
            return Err(RegistrationError::invalid_config(format!(
                "{stage}: minimum step {} exceeds maximum step {} at level {i}",
                min[i], max[i]
            )));
        }
    }
    Ok(())
}

fn build_rigid(cfg: &RigidStageConfig, dimension: Dimension) -> Result<StageParameters> {
    const STAGE: &str = "rigid";
    let n = cfg.levels;
    check_levels(STAGE, n)?;
    if cfg.optimizer == OptimizerKind::Versor && dimension == Dimension::Two {
        return Err(RegistrationError::unsupported(
            "the Versor optimizer needs a 3D versor rigid transform",
        ));
    }

    check_histogram_bins(STAGE, cfg.metric, &cfg.mmi_histogram_bins, n)?;
    check_fraction(STAGE, "mmi_sample_rate", &cfg.mmi_sample_rate, n, 1.0, true)?;
    check_positive(STAGE, "lbfgsb_cost_convergence", &cfg.lbfgsb_cost_convergence, n)?;
    check_positive(STAGE, "lbfgsb_gradient_tolerance", &cfg.lbfgsb_gradient_tolerance, n)?;
    check_positive(STAGE, "lbfgs_gradient_convergence", &cfg.lbfgs_gradient_convergence, n)?;
    check_positive(STAGE, "lbfgs_default_step_size", &cfg.lbfgs_default_step_size, n)?;
    check_positive(STAGE, "rsgd_min_step_size", &cfg.rsgd_min_step_size, n)?;
    check_positive(STAGE, "rsgd_max_step_size", &cfg.rsgd_max_step_size, n)?;
    check_step_order(STAGE, &cfg.rsgd_min_step_size, &cfg.rsgd_max_step_size, n)?;
    check_fraction(STAGE, "rsgd_relaxation_factor", &cfg.rsgd_relaxation_factor, n, 1.0, false)?;
    check_positive(STAGE, "translation_scale", &cfg.translation_scale, n)?;
    check_positive(STAGE, "versor_min_step_size", &cfg.versor_min_step_size, n)?;
    check_positive(STAGE, "versor_max_step_size", &cfg.versor_max_step_size, n)?;
    check_step_order(STAGE, &cfg.versor_min_step_size, &cfg.versor_max_step_size, n)?;
    check_fraction(
        STAGE,
        "versor_relaxation_factor",
        &cfg.versor_relaxation_factor,
        n,
        1.0,
        false,
    )?;
    check_nonzero(STAGE, "max_iterations", &cfg.max_iterations, n)?;

    let versor = cfg.optimizer == OptimizerKind::Versor;
    let fine_to_coarse = (0..n)
        .map(|i| {
            let (min_step, max_step, relax) = if versor {
                (
                    cfg.versor_min_step_size[i],
                    cfg.versor_max_step_size[i],
                    cfg.versor_relaxation_factor[i],
                )
            } else {
                (
                    cfg.rsgd_min_step_size[i],
                    cfg.rsgd_max_step_size[i],
                    cfg.rsgd_relaxation_factor[i],
                )
            };
            LevelParameters {
                level: 0,
                max_iterations: cfg.max_iterations[i],
                histogram_bins: cfg.mmi_histogram_bins[i],
                sample_rate: cfg.mmi_sample_rate[i],
                lbfgsb_cost_convergence: cfg.lbfgsb_cost_convergence[i],
                lbfgsb_gradient_tolerance: cfg.lbfgsb_gradient_tolerance[i],
                lbfgs_gradient_convergence: cfg.lbfgs_gradient_convergence[i],
                lbfgs_default_step_size: cfg.lbfgs_default_step_size[i],
                min_step_size: min_step,
                max_step_size: max_step,
                relaxation_factor: relax,
                translation_scale: cfg.translation_scale[i],
                ..Default::default()
            }
        })
        .collect();

    Ok(StageParameters {
        kind: StageKind::Rigid,
        metric: cfg.metric,
        optimizer: Some(cfg.optimizer),
        schedule: Schedule::from_fine_to_coarse(fine_to_coarse),
        demons: None,
    })
}

fn build_bspline(cfg: &BSplineStageConfig, dimension: Dimension) -> Result<StageParameters> {
    const STAGE: &str = "bspline";
    let n = cfg.levels;
    check_levels(STAGE, n)?;
    if cfg.optimizer == OptimizerKind::Versor {
        return Err(RegistrationError::unsupported(
            "the Versor optimizer cannot drive a B-spline transform",
        ));
    }

    check_len(STAGE, "grid_size", &cfg.grid_size, n)?;
    let axes = if dimension == Dimension::Two { 2 } else { 3 };
    for (i, grid) in cfg.grid_size[..n].iter().enumerate() {
        if grid[..axes].iter().any(|&g| g <= BSPLINE_ORDER) {
            return Err(RegistrationError::invalid_config(format!(
                "{STAGE}: grid_size at level {i} needs more than {BSPLINE_ORDER} nodes per axis, got {grid:?}"
            )));
        }
    }
    check_histogram_bins(STAGE, cfg.metric, &cfg.mmi_histogram_bins, n)?;
    check_fraction(STAGE, "mmi_sample_rate", &cfg.mmi_sample_rate, n, 1.0, true)?;
    check_positive(STAGE, "lbfgsb_cost_convergence", &cfg.lbfgsb_cost_convergence, n)?;
    check_positive(STAGE, "lbfgsb_gradient_tolerance", &cfg.lbfgsb_gradient_tolerance, n)?;
    check_positive(STAGE, "lbfgs_gradient_convergence", &cfg.lbfgs_gradient_convergence, n)?;
    check_positive(STAGE, "lbfgs_default_step_size", &cfg.lbfgs_default_step_size, n)?;
    check_positive(STAGE, "rsgd_min_step_size", &cfg.rsgd_min_step_size, n)?;
    check_positive(STAGE, "rsgd_max_step_size", &cfg.rsgd_max_step_size, n)?;
    check_step_order(STAGE, &cfg.rsgd_min_step_size, &cfg.rsgd_max_step_size, n)?;
    check_fraction(STAGE, "rsgd_relaxation_factor", &cfg.rsgd_relaxation_factor, n, 1.0, false)?;
    check_nonzero(STAGE, "max_iterations", &cfg.max_iterations, n)?;

    let fine_to_coarse = (0..n)
        .map(|i| LevelParameters {
            level: 0,
            max_iterations: cfg.max_iterations[i],
            histogram_bins: cfg.mmi_histogram_bins[i],
            sample_rate: cfg.mmi_sample_rate[i],
            lbfgsb_cost_convergence: cfg.lbfgsb_cost_convergence[i],
            lbfgsb_gradient_tolerance: cfg.lbfgsb_gradient_tolerance[i],
            lbfgs_gradient_convergence: cfg.lbfgs_gradient_convergence[i],
            lbfgs_default_step_size: cfg.lbfgs_default_step_size[i],
            min_step_size: cfg.rsgd_min_step_size[i],
            max_step_size: cfg.rsgd_max_step_size[i],
            relaxation_factor: cfg.rsgd_relaxation_factor[i],
            translation_scale: 1.0,
            grid_size: cfg.grid_size[i],
            ..Default::default()
        })
        .collect();

    Ok(StageParameters {
        kind: StageKind::BSpline,
        metric: cfg.metric,
        optimizer: Some(cfg.optimizer),
        schedule: Schedule::from_fine_to_coarse(fine_to_coarse),
        demons: None,
    })
}

fn build_demons(cfg: &DemonsStageConfig) -> Result<StageParameters> {
    const STAGE: &str = "demons";
    let n = cfg.levels;
    check_levels(STAGE, n)?;
    check_positive(STAGE, "max_rms_error", &cfg.max_rms_error, n)?;
    check_nonzero(STAGE, "max_iterations", &cfg.max_iterations, n)?;
    if cfg.histogram_bins == 0 || cfg.histogram_match_points == 0 {
        return Err(RegistrationError::invalid_config(format!(
            "{STAGE}: histogram_bins and histogram_match_points must be non-zero"
        )));
    }
    if !(cfg.standard_deviations.is_finite() && cfg.standard_deviations > 0.0) {
        return Err(RegistrationError::invalid_config(format!(
            "{STAGE}: standard_deviations must be positive, got {}",
            cfg.standard_deviations
        )));
    }

    let fine_to_coarse = (0..n)
        .map(|i| LevelParameters {
            level: 0,
            max_iterations: cfg.max_iterations[i],
            max_rms_error: cfg.max_rms_error[i],
            ..Default::default()
        })
        .collect();

    Ok(StageParameters {
        kind: StageKind::Demons,
        metric: MetricKind::MeanSquares,
        optimizer: None,
        schedule: Schedule::from_fine_to_coarse(fine_to_coarse),
        demons: Some(DemonsSettings {
            histogram_bins: cfg.histogram_bins,
            histogram_match_points: cfg.histogram_match_points,
            standard_deviations: cfg.standard_deviations,
        }),
    })
}
