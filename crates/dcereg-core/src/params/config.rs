//! User-facing registration configuration, as loaded from TOML.
//!
//! Per-level arrays are ordered the way a user edits them: index 0 is the
//! full-resolution level, the last used index is the coarsest.

use serde::{Deserialize, Serialize};

use crate::consts::DEFAULT_FILL_VALUE;
use crate::metric::MetricKind;
use crate::optimizer::OptimizerKind;
use crate::region::Region;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub general: GeneralConfig,
    pub rigid: RigidStageConfig,
    pub bspline: BSplineStageConfig,
    pub demons: DemonsStageConfig,
    pub threads: ThreadConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Number of images (2D or 3D) in the series.
    pub num_images: usize,
    /// Number of 2D slices in each image. 1 selects 2D registration.
    pub slices_per_image: usize,
    /// Fixed image as the viewer numbers it, starting at 1.
    pub fixed_image_number: usize,
    /// Viewer stores the series in reverse order.
    pub flipped_data: bool,
    /// Description attached to the registered series.
    pub series_description: String,
    /// Registration region in the slice plane. Whole slice when absent.
    pub region: Option<Region>,
    /// Mask polygon as `x0, y0, x1, y1, ...`. Empty disables the mask.
    pub mask: Vec<f64>,
    /// Overlay a grid on deformably registered images.
    pub deform_show_field: bool,
    /// Value for resampled pixels that map outside the moving image.
    pub fill_value: f32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            num_images: 1,
            slices_per_image: 1,
            fixed_image_number: 1,
            flipped_data: false,
            series_description: "Registered".into(),
            region: None,
            mask: Vec::new(),
            deform_show_field: false,
            fill_value: DEFAULT_FILL_VALUE,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RigidStageConfig {
    pub enabled: bool,
    pub levels: usize,
    pub metric: MetricKind,
    pub optimizer: OptimizerKind,
    pub mmi_histogram_bins: Vec<usize>,
    pub mmi_sample_rate: Vec<f64>,
    pub lbfgsb_cost_convergence: Vec<f64>,
    pub lbfgsb_gradient_tolerance: Vec<f64>,
    pub lbfgs_gradient_convergence: Vec<f64>,
    pub lbfgs_default_step_size: Vec<f64>,
    pub rsgd_min_step_size: Vec<f64>,
    pub rsgd_max_step_size: Vec<f64>,
    pub rsgd_relaxation_factor: Vec<f64>,
    pub translation_scale: Vec<f64>,
    pub versor_min_step_size: Vec<f64>,
    pub versor_max_step_size: Vec<f64>,
    pub versor_relaxation_factor: Vec<f64>,
    pub max_iterations: Vec<usize>,
}

impl Default for RigidStageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            levels: 2,
            metric: MetricKind::MattesMutualInformation,
            optimizer: OptimizerKind::RegularStepGradientDescent,
            mmi_histogram_bins: vec![50; 4],
            mmi_sample_rate: vec![0.2; 4],
            lbfgsb_cost_convergence: vec![1e7; 4],
            lbfgsb_gradient_tolerance: vec![1e-4; 4],
            lbfgs_gradient_convergence: vec![1e-4; 4],
            lbfgs_default_step_size: vec![1.0; 4],
            rsgd_min_step_size: vec![1e-3; 4],
            rsgd_max_step_size: vec![1.0, 2.0, 4.0, 4.0],
            rsgd_relaxation_factor: vec![0.5; 4],
            translation_scale: vec![1e-3; 4],
            versor_min_step_size: vec![1e-3; 4],
            versor_max_step_size: vec![0.5, 1.0, 2.0, 2.0],
            versor_relaxation_factor: vec![0.5; 4],
            max_iterations: vec![200; 4],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BSplineStageConfig {
    pub enabled: bool,
    pub levels: usize,
    pub metric: MetricKind,
    pub optimizer: OptimizerKind,
    /// Control points per axis `[x, y, z]` for each level.
    pub grid_size: Vec<[usize; 3]>,
    pub mmi_histogram_bins: Vec<usize>,
    pub mmi_sample_rate: Vec<f64>,
    pub lbfgsb_cost_convergence: Vec<f64>,
    pub lbfgsb_gradient_tolerance: Vec<f64>,
    pub lbfgs_gradient_convergence: Vec<f64>,
    pub lbfgs_default_step_size: Vec<f64>,
    pub rsgd_min_step_size: Vec<f64>,
    pub rsgd_max_step_size: Vec<f64>,
    pub rsgd_relaxation_factor: Vec<f64>,
    pub max_iterations: Vec<usize>,
}

impl Default for BSplineStageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            levels: 2,
            metric: MetricKind::MattesMutualInformation,
            optimizer: OptimizerKind::Lbfgsb,
            grid_size: vec![[12, 12, 5], [8, 8, 5], [6, 6, 5], [6, 6, 5]],
            mmi_histogram_bins: vec![50; 4],
            mmi_sample_rate: vec![0.2; 4],
            lbfgsb_cost_convergence: vec![1e7; 4],
            lbfgsb_gradient_tolerance: vec![1e-4; 4],
            lbfgs_gradient_convergence: vec![1e-4; 4],
            lbfgs_default_step_size: vec![1.0; 4],
            rsgd_min_step_size: vec![1e-3; 4],
            rsgd_max_step_size: vec![1.0; 4],
            rsgd_relaxation_factor: vec![0.5; 4],
            max_iterations: vec![100; 4],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DemonsStageConfig {
    pub enabled: bool,
    pub levels: usize,
    /// Stop a level once the RMS field change drops below this.
    pub max_rms_error: Vec<f64>,
    pub histogram_bins: usize,
    pub histogram_match_points: usize,
    /// Gaussian smoothing of the displacement field, in voxels.
    pub standard_deviations: f64,
    pub max_iterations: Vec<usize>,
}

impl Default for DemonsStageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            levels: 2,
            max_rms_error: vec![0.01; 4],
            histogram_bins: 256,
            histogram_match_points: 7,
            standard_deviations: 1.0,
            max_iterations: vec![50; 4],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadConfig {
    /// Let the thread pool pick its size (still bounded by `MAX_THREADS`).
    pub use_default_number_of_threads: bool,
    pub number_of_threads: usize,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            use_default_number_of_threads: true,
            number_of_threads: 4,
        }
    }
}
