/// Working-set multiple of a raw frame buffer held per in-flight frame
/// (raw + calibrated + background + aligned + scratch).
pub const WORKING_SET_FACTOR: usize = 6;

/// Maximum sample size drawn by the sampled location/scale estimators.
pub const MAX_SAMPLE_SIZE: usize = 128 * 1024;

/// Iteration cap for the iterative sigma-clipped location estimator.
pub const LOCATION_MAX_ITERATIONS: usize = 8;

/// Iteration cap for per-pixel sigma-clip rejection.
pub const SIGMA_CLIP_MAX_ITERATIONS: usize = 5;

/// Iteration cap for the adaptive sigma bisection.
pub const ADAPTIVE_MAX_ITERATIONS: usize = 8;

/// Convergence tolerance of the adaptive sigma search, in percentage points.
pub const ADAPTIVE_TOLERANCE_PERCENT: f32 = 0.05;

/// Fraction of pixels sampled for adaptive sigma trial stacks.
pub const ADAPTIVE_SAMPLE_FRACTION: f64 = 0.01;

/// Consistency factor relating MAD to the standard deviation of a normal
/// distribution.
pub const MAD_TO_SIGMA: f32 = 1.4826;

/// Consistency factor for the Qn scale estimator.
pub const QN_TO_SIGMA: f32 = 2.2219;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f32 = 1e-10;

/// Seed for the deterministic batch shuffle.
pub const BATCH_SHUFFLE_SEED: u64 = 0x5741_u64;
