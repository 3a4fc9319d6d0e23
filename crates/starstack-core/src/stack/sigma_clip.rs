use ndarray::Array2;
use rayon::prelude::*;

use crate::consts::{EPSILON, SIGMA_CLIP_MAX_ITERATIONS};

/// Per-pixel iterative sigma-clipped mean, plain or winsorized.
///
/// Plain clipping drops samples outside `[mu - sig_low*sigma,
/// mu + sig_high*sigma]` and averages the survivors. Winsorizing pulls
/// outliers to the nearest bound instead, anchored on the reference
/// location for the first iteration when one is given.
pub(super) fn stack(
    views: &[&[f32]],
    dim: (usize, usize),
    weights: Option<&[f32]>,
    sig_low: f32,
    sig_high: f32,
    winsorize: bool,
    anchor: Option<f32>,
) -> (Array2<f32>, u64, u64, u64) {
    let (h, w) = dim;
    let n = views.len();
    let mut out = Array2::zeros((h, w));
    let out_slice = out.as_slice_mut().expect("stack buffer is contiguous");

    let (low, high, samples) = out_slice
        .par_chunks_mut(w)
        .enumerate()
        .map(|(row, out_row)| {
            let offset = row * w;
            let mut values = Vec::with_capacity(n);
            let mut pixel_weights = Vec::with_capacity(n);
            let mut low = 0u64;
            let mut high = 0u64;
            let mut samples = 0u64;

            for (col, out_pixel) in out_row.iter_mut().enumerate() {
                values.clear();
                pixel_weights.clear();
                for (i, view) in views.iter().enumerate() {
                    let v = view[offset + col];
                    if v.is_finite() {
                        values.push(v);
                        pixel_weights.push(weights.map_or(1.0, |ws| ws[i]));
                    }
                }
                samples += values.len() as u64;

                let (value, pixel_low, pixel_high) = clip_samples(
                    &mut values,
                    &pixel_weights,
                    sig_low,
                    sig_high,
                    winsorize,
                    anchor,
                );
                low += pixel_low as u64;
                high += pixel_high as u64;
                *out_pixel = value;
            }
            (low, high, samples)
        })
        .reduce(
            || (0, 0, 0),
            |a, b| (a.0 + b.0, a.1 + b.1, a.2 + b.2),
        );

    (out, low, high, samples)
}

/// Clip one pixel's finite samples. Returns the combined value and the
/// number of samples rejected below and above the bounds.
///
/// `values` and `weights` are parallel; `values` is mutated in place when
/// winsorizing.
pub(super) fn clip_samples(
    values: &mut [f32],
    weights: &[f32],
    sig_low: f32,
    sig_high: f32,
    winsorize: bool,
    anchor: Option<f32>,
) -> (f32, u32, u32) {
    let n = values.len();
    if n < 2 {
        return (f32::NAN, 0, 0);
    }

    // 0 = active, -1 = rejected low, +1 = rejected high.
    let mut state = vec![0i8; n];
    let mut low = 0u32;
    let mut high = 0u32;

    for iteration in 0..SIGMA_CLIP_MAX_ITERATIONS {
        let center = if iteration == 0 && winsorize && anchor.is_some() {
            anchor.expect("anchor checked above")
        } else {
            active_mean(values, &state, winsorize)
        };
        // Winsorizing seeds from a robust sigma: the plain stddev is
        // inflated by the very outliers the bounds are meant to pull in,
        // and would let extreme samples escape the first clamp.
        let sigma = if winsorize && iteration == 0 {
            mad_sigma_about(values, center)
        } else {
            stddev_about(values, &state, winsorize, center)
        };
        if sigma < EPSILON {
            break;
        }
        let lo = center - sig_low * sigma;
        let hi = center + sig_high * sigma;

        let mut changes = 0usize;
        for i in 0..n {
            if winsorize {
                if values[i] < lo {
                    values[i] = lo;
                    if state[i] == 0 {
                        state[i] = -1;
                        low += 1;
                    }
                    changes += 1;
                } else if values[i] > hi {
                    values[i] = hi;
                    if state[i] == 0 {
                        state[i] = 1;
                        high += 1;
                    }
                    changes += 1;
                }
            } else if state[i] == 0 {
                if values[i] < lo {
                    state[i] = -1;
                    low += 1;
                    changes += 1;
                } else if values[i] > hi {
                    state[i] = 1;
                    high += 1;
                    changes += 1;
                }
            }
        }
        if changes == 0 {
            break;
        }
    }

    let mut sum = 0.0f64;
    let mut weight_sum = 0.0f64;
    let mut survivors = 0usize;
    for i in 0..n {
        if winsorize || state[i] == 0 {
            sum += values[i] as f64 * weights[i] as f64;
            weight_sum += weights[i] as f64;
            survivors += 1;
        }
    }
    if survivors < 2 || weight_sum <= 0.0 {
        return (f32::NAN, low, high);
    }
    ((sum / weight_sum) as f32, low, high)
}

fn active_mean(values: &[f32], state: &[i8], winsorize: bool) -> f32 {
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for (i, &v) in values.iter().enumerate() {
        if winsorize || state[i] == 0 {
            sum += v as f64;
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        (sum / count as f64) as f32
    }
}

fn mad_sigma_about(values: &[f32], center: f32) -> f32 {
    let mut deviations: Vec<f32> = values.iter().map(|&v| (v - center).abs()).collect();
    crate::consts::MAD_TO_SIGMA * crate::stats::median_in_place(&mut deviations)
}

fn stddev_about(values: &[f32], state: &[i8], winsorize: bool, center: f32) -> f32 {
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for (i, &v) in values.iter().enumerate() {
        if winsorize || state[i] == 0 {
            let d = (v - center) as f64;
            sum += d * d;
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        ((sum / count as f64).sqrt()) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples_with_outlier() -> Vec<f32> {
        // A lone outlier only exceeds 3 sigma once the sample count is
        // large enough (max z-score is (n-1)/sqrt(n)).
        vec![
            1.0, 1.01, 0.99, 1.02, 0.98, 1.0, 1.01, 0.99, 1.02, 0.98, 1.0, 50.0,
        ]
    }

    #[test]
    fn outlier_is_rejected() {
        let mut values = samples_with_outlier();
        let weights = vec![1.0; values.len()];
        let (result, low, high) = clip_samples(&mut values, &weights, 3.0, 3.0, false, None);
        assert!(high >= 1);
        assert_eq!(low, 0);
        assert!((result - 1.0).abs() < 0.05, "result {result}");
    }

    #[test]
    fn winsorizing_pulls_outlier_to_bound() {
        let mut values = samples_with_outlier();
        let weights = vec![1.0; values.len()];
        let (result, _, high) = clip_samples(&mut values, &weights, 3.0, 3.0, true, Some(1.0));
        assert!(high >= 1);
        // The outlier contributes its clamped value, not 50.
        assert!(result < 10.0, "result {result}");
    }

    #[test]
    fn raising_sig_high_never_rejects_more() {
        let base = vec![1.0, 1.1, 0.9, 1.2, 0.8, 3.0, 1.05];
        let weights = vec![1.0; 7];
        let mut previous = u32::MAX;
        for sig in [1.0f32, 2.0, 3.0, 4.0, 5.0] {
            let mut values = base.clone();
            let (_, _, high) = clip_samples(&mut values, &weights, 100.0, sig, false, None);
            assert!(high <= previous, "sig {sig} rejected {high} > {previous}");
            previous = high;
        }
    }
}
