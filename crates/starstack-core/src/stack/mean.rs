use ndarray::Array2;
use rayon::prelude::*;

/// Weighted per-pixel mean, skipping non-finite samples.
pub(super) fn stack(
    views: &[&[f32]],
    dim: (usize, usize),
    weights: Option<&[f32]>,
) -> (Array2<f32>, u64, u64, u64) {
    let (h, w) = dim;
    let mut out = Array2::zeros((h, w));
    let out_slice = out.as_slice_mut().expect("stack buffer is contiguous");

    let samples: u64 = out_slice
        .par_chunks_mut(w)
        .enumerate()
        .map(|(row, out_row)| {
            let offset = row * w;
            let mut row_samples = 0u64;
            for (col, out_pixel) in out_row.iter_mut().enumerate() {
                let mut sum = 0.0f64;
                let mut weight_sum = 0.0f64;
                for (i, view) in views.iter().enumerate() {
                    let v = view[offset + col];
                    if !v.is_finite() {
                        continue;
                    }
                    let weight = weights.map_or(1.0, |ws| ws[i] as f64);
                    sum += v as f64 * weight;
                    weight_sum += weight;
                    row_samples += 1;
                }
                *out_pixel = if weight_sum > 0.0 {
                    (sum / weight_sum) as f32
                } else {
                    f32::NAN
                };
            }
            row_samples
        })
        .sum();

    (out, 0, 0, samples)
}
