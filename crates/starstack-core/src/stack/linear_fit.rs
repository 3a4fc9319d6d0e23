use ndarray::Array2;
use rayon::prelude::*;

use crate::consts::{EPSILON, SIGMA_CLIP_MAX_ITERATIONS};
use crate::stats::median_in_place;

/// Per-pixel robust linear fit over the frame sequence.
///
/// Fits a least-squares line through (frame index, value), rejects points
/// whose residual exceeds the sigma multiple of the residual MAD, refits,
/// and evaluates the final line at the midpoint index.
pub(super) fn stack(
    views: &[&[f32]],
    dim: (usize, usize),
    sig_low: f32,
    sig_high: f32,
) -> (Array2<f32>, u64, u64, u64) {
    let (h, w) = dim;
    let n = views.len();
    let midpoint = (n.saturating_sub(1)) as f32 * 0.5;
    let mut out = Array2::zeros((h, w));
    let out_slice = out.as_slice_mut().expect("stack buffer is contiguous");

    let (low, high, samples) = out_slice
        .par_chunks_mut(w)
        .enumerate()
        .map(|(row, out_row)| {
            let offset = row * w;
            let mut points: Vec<(f32, f32)> = Vec::with_capacity(n);
            let mut residuals: Vec<f32> = Vec::with_capacity(n);
            let mut low = 0u64;
            let mut high = 0u64;
            let mut samples = 0u64;

            for (col, out_pixel) in out_row.iter_mut().enumerate() {
                points.clear();
                for (i, view) in views.iter().enumerate() {
                    let v = view[offset + col];
                    if v.is_finite() {
                        points.push((i as f32, v));
                    }
                }
                samples += points.len() as u64;

                let (value, pixel_low, pixel_high) =
                    fit_samples(&mut points, &mut residuals, sig_low, sig_high, midpoint);
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

/// Robust line fit over one pixel's (index, value) points, evaluated at
/// `at`. Rejected points are removed from `points` in place.
pub(super) fn fit_samples(
    points: &mut Vec<(f32, f32)>,
    residuals: &mut Vec<f32>,
    sig_low: f32,
    sig_high: f32,
    at: f32,
) -> (f32, u32, u32) {
    if points.len() < 2 {
        return (f32::NAN, 0, 0);
    }

    let mut low = 0u32;
    let mut high = 0u32;
    let mut line = fit_line(points);

    for _ in 0..SIGMA_CLIP_MAX_ITERATIONS {
        let (intercept, slope) = line;
        residuals.clear();
        residuals.extend(points.iter().map(|&(x, v)| (v - (intercept + slope * x)).abs()));
        let mad = median_in_place(residuals);
        if mad < EPSILON {
            break;
        }

        let before = points.len();
        points.retain(|&(x, v)| {
            let r = v - (intercept + slope * x);
            if r > sig_high * mad {
                high += 1;
                false
            } else if -r > sig_low * mad {
                low += 1;
                false
            } else {
                true
            }
        });
        if points.len() == before || points.len() < 3 {
            break;
        }
        line = fit_line(points);
    }

    if points.len() < 2 {
        return (f32::NAN, low, high);
    }
    let (intercept, slope) = line;
    (intercept + slope * at, low, high)
}

/// Least-squares line (intercept, slope).
fn fit_line(points: &[(f32, f32)]) -> (f32, f32) {
    let n = points.len() as f64;
    let mut sx = 0.0f64;
    let mut sy = 0.0f64;
    let mut sxx = 0.0f64;
    let mut sxy = 0.0f64;
    for &(x, y) in points {
        sx += x as f64;
        sy += y as f64;
        sxx += x as f64 * x as f64;
        sxy += x as f64 * y as f64;
    }
    let denom = n * sxx - sx * sx;
    if denom.abs() < EPSILON as f64 {
        return ((sy / n) as f32, 0.0);
    }
    let slope = (n * sxy - sx * sy) / denom;
    let intercept = (sy - slope * sx) / n;
    (intercept as f32, slope as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_clean_ramp() {
        let mut points: Vec<(f32, f32)> = (0..8).map(|i| (i as f32, 2.0 + 0.5 * i as f32)).collect();
        let mut residuals = Vec::new();
        let (value, low, high) = fit_samples(&mut points, &mut residuals, 3.0, 3.0, 3.5);
        assert!((value - 3.75).abs() < 1e-4);
        assert_eq!(low + high, 0);
    }

    #[test]
    fn rejects_spike_on_line() {
        let mut points: Vec<(f32, f32)> = (0..12)
            .map(|i| {
                let base = 1.0 + 0.01 * i as f32 + if i % 3 == 0 { 0.001 } else { -0.001 };
                (i as f32, base)
            })
            .collect();
        points[5].1 = 30.0;
        let mut residuals = Vec::new();
        let (value, _, high) = fit_samples(&mut points, &mut residuals, 4.0, 4.0, 5.5);
        assert!(high >= 1);
        assert!((value - 1.055).abs() < 0.05, "value {value}");
    }
}
