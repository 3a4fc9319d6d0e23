use ndarray::Array2;
use rayon::prelude::*;

use crate::stats::median_in_place;

/// Per-pixel median, skipping non-finite samples.
///
/// Unweighted pixels use the classic median (middle pair averaged for even
/// counts); with weights the lower weighted median is taken.
pub(super) fn stack(
    views: &[&[f32]],
    dim: (usize, usize),
    weights: Option<&[f32]>,
) -> (Array2<f32>, u64, u64, u64) {
    let (h, w) = dim;
    let n = views.len();
    let mut out = Array2::zeros((h, w));
    let out_slice = out.as_slice_mut().expect("stack buffer is contiguous");

    let samples: u64 = out_slice
        .par_chunks_mut(w)
        .enumerate()
        .map(|(row, out_row)| {
            let offset = row * w;
            let mut values = vec![0.0f32; n];
            let mut pairs: Vec<(f32, f32)> = Vec::with_capacity(n);
            let mut row_samples = 0u64;

            for (col, out_pixel) in out_row.iter_mut().enumerate() {
                match weights {
                    None => {
                        let mut count = 0;
                        for view in views {
                            let v = view[offset + col];
                            if v.is_finite() {
                                values[count] = v;
                                count += 1;
                            }
                        }
                        row_samples += count as u64;
                        *out_pixel = if count == 0 {
                            f32::NAN
                        } else {
                            median_in_place(&mut values[..count])
                        };
                    }
                    Some(ws) => {
                        pairs.clear();
                        let mut total = 0.0f64;
                        for (i, view) in views.iter().enumerate() {
                            let v = view[offset + col];
                            if v.is_finite() {
                                pairs.push((v, ws[i]));
                                total += ws[i] as f64;
                            }
                        }
                        row_samples += pairs.len() as u64;
                        *out_pixel = weighted_median(&mut pairs, total);
                    }
                }
            }
            row_samples
        })
        .sum();

    (out, 0, 0, samples)
}

/// Smallest value whose cumulative weight reaches half the total.
fn weighted_median(pairs: &mut [(f32, f32)], total_weight: f64) -> f32 {
    if pairs.is_empty() || total_weight <= 0.0 {
        return f32::NAN;
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    let half = total_weight * 0.5;
    let mut cumulative = 0.0f64;
    for &(v, weight) in pairs.iter() {
        cumulative += weight as f64;
        if cumulative >= half {
            return v;
        }
    }
    pairs[pairs.len() - 1].0
}
