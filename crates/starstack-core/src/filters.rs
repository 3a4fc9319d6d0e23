use ndarray::Array2;

use crate::consts::EPSILON;
use crate::stats;

/// Apply output gamma over the observed range; 1.0 is a no-op.
///
/// Values are mapped through `((v - min) / range) ^ (1/gamma)` and scaled
/// back, keeping the data range while lifting (or compressing) midtones.
pub fn apply_gamma(data: &mut Array2<f32>, gamma: f32) {
    if (gamma - 1.0).abs() < EPSILON {
        return;
    }
    let (min, max, _, _) = stats::basic(data.as_slice().expect("buffer is contiguous"));
    let range = max - min;
    if range < EPSILON {
        return;
    }
    let exponent = 1.0 / gamma;
    data.mapv_inplace(|v| {
        if v.is_finite() {
            ((v - min) / range).clamp(0.0, 1.0).powf(exponent) * range + min
        } else {
            v
        }
    });
}

/// Automatic stretch: normalize to [0, 1], then shift the black point so
/// the histogram peak lands at `target_percent` of the range.
pub fn auto_stretch(data: &mut Array2<f32>, target_percent: f32) {
    crate::calibrate::normalize_range(data);
    let peak = stats::histogram_peak(data.as_slice().expect("buffer is contiguous"));
    let target = target_percent / 100.0;
    if peak.value <= target {
        return;
    }
    let shift = peak.value - target;
    data.mapv_inplace(|v| {
        if v.is_finite() {
            (v - shift).max(0.0)
        } else {
            v
        }
    });
}
