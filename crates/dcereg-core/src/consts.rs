/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Minimum number of metric samples to evaluate in parallel.
pub const PARALLEL_SAMPLE_THRESHOLD: usize = 4_096;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f64 = 1e-10;

/// Maximum number of multi-resolution levels a stage may use.
pub const MAX_LEVELS: usize = 4;

/// Order of the B-spline deformable transform.
pub const BSPLINE_ORDER: usize = 3;

/// Upper bound on worker threads used by the numeric core.
pub const MAX_THREADS: usize = 8;

/// Gaussian blur sigma (in pixels) used for building the resolution pyramid.
pub const PYRAMID_BLUR_SIGMA: f32 = 1.0;

/// A volume is only shrunk along z while it has at least this many slices.
pub const MIN_PYRAMID_DEPTH: usize = 4;

/// Number of grid cells per axis drawn by the debug grid tagger.
pub const TAG_GRID_DIVISIONS: usize = 10;

/// Intensity written into tagged grid pixels.
pub const TAG_PIXEL_VALUE: f32 = 2048.0;

/// Pixel value used where a resampled point maps outside the moving image.
pub const DEFAULT_FILL_VALUE: f32 = 0.0;

/// Default optimizer scale for translation parameters of rigid transforms.
/// Rotation parameters use a scale of 1.
pub const DEFAULT_TRANSLATION_SCALE: f64 = 1e-3;

/// Seed for the reproducible voxel subset drawn by sampled metrics.
pub const METRIC_SAMPLING_SEED: u64 = 0x5eed_dce;

/// Histogram padding (bins) on each side of the Mattes joint PDF.
pub const MATTES_PADDING_BINS: usize = 2;

/// Minimum fraction of metric samples that must map inside the moving image.
pub const MIN_VALID_SAMPLE_FRACTION: f64 = 0.25;

/// Number of correction pairs kept by the L-BFGS family of optimizers.
pub const LBFGS_MEMORY: usize = 5;

/// Armijo sufficient-decrease constant for the L-BFGS line search.
pub const LINE_SEARCH_ARMIJO: f64 = 1e-4;

/// Maximum trial steps in one line search.
pub const LINE_SEARCH_MAX_TRIALS: usize = 20;

/// Wolfe curvature constant used by the L-BFGS line search.
pub const LBFGS_LINE_SEARCH_ACCURACY: f64 = 0.9;

/// Function evaluations allowed per L-BFGS-B iteration budget entry.
pub const LBFGSB_EVALUATIONS_PER_ITERATION: usize = 2;

/// Intensity differences below this are treated as matched by demons.
pub const DEMONS_INTENSITY_THRESHOLD: f64 = 1e-3;

/// Demons denominators below this produce a zero update.
pub const DEMONS_DENOMINATOR_THRESHOLD: f64 = 1e-9;
