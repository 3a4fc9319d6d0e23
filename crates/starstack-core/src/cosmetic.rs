use ndarray::Array2;
use rayon::prelude::*;

use crate::consts::{EPSILON, MAD_TO_SIGMA};
use crate::stats::{mad, median_in_place};

/// Replace hot and cold pixels with their 3x3 neighborhood median.
///
/// A pixel is hot when it exceeds the neighborhood median by more than
/// `sig_high` local sigmas, cold when it falls below by more than
/// `sig_low`. Local sigma is 1.4826 * MAD of the neighborhood. Edges use
/// reflect padding. Non-finite pixels are always repaired.
///
/// Returns the cleaned copy and the number of replaced pixels.
pub fn remove_bad_pixels(
    data: &Array2<f32>,
    sig_low: f32,
    sig_high: f32,
) -> (Array2<f32>, usize) {
    let (h, w) = data.dim();
    let src = data.as_slice().expect("frame buffer is contiguous");
    let mut out = data.clone();
    let out_slice = out.as_slice_mut().expect("frame buffer is contiguous");

    let replaced: usize = out_slice
        .par_chunks_mut(w)
        .enumerate()
        .map(|(row, out_row)| {
            let mut neighborhood = [0.0f32; 9];
            let mut finite = [0.0f32; 9];
            let mut count = 0usize;

            for (col, out_pixel) in out_row.iter_mut().enumerate() {
                let mut k = 0;
                for dr in -1i64..=1 {
                    for dc in -1i64..=1 {
                        let r = reflect(row as i64 + dr, h);
                        let c = reflect(col as i64 + dc, w);
                        neighborhood[k] = src[r * w + c];
                        k += 1;
                    }
                }

                let mut n_finite = 0;
                for &v in &neighborhood {
                    if v.is_finite() {
                        finite[n_finite] = v;
                        n_finite += 1;
                    }
                }
                if n_finite == 0 {
                    continue;
                }

                let m = median_in_place(&mut finite[..n_finite]);
                let p = *out_pixel;

                if !p.is_finite() {
                    *out_pixel = m;
                    count += 1;
                    continue;
                }

                let s = MAD_TO_SIGMA * mad(&finite[..n_finite], m);
                if s < EPSILON {
                    // Flat neighborhood: any deviation is an outlier.
                    if (p - m).abs() > EPSILON {
                        *out_pixel = m;
                        count += 1;
                    }
                    continue;
                }
                if p - m > sig_high * s || m - p > sig_low * s {
                    *out_pixel = m;
                    count += 1;
                }
            }
            count
        })
        .sum();

    (out, replaced)
}

fn reflect(i: i64, n: usize) -> usize {
    let n = n as i64;
    let r = if i < 0 {
        -i
    } else if i >= n {
        2 * n - 2 - i
    } else {
        i
    };
    r.clamp(0, n - 1) as usize
}
