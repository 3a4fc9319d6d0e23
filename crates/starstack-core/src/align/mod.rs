pub mod transform;
pub mod triangle;

use std::collections::HashMap;

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::detect::Star;

pub use transform::{AlignResult, Similarity};

/// Alignment settings.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AlignConfig {
    /// Align frames to the reference at all.
    pub enabled: bool,
    /// Number of brightest stars used for triangle matching.
    pub k: usize,
    /// Maximum accepted residual RMS in pixels.
    pub threshold: f32,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            k: 20,
            threshold: 1.0,
        }
    }
}

/// Value used for output samples that fall outside the source frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutOfBounds {
    /// Fill with the frame's own background location (channel combination).
    OwnLocation,
    /// Fill with NaN so the stacker ignores the sample (light stacking).
    Nan,
}

/// Voting bin resolutions in transform parameter space.
const SCALE_BIN: f32 = 0.01;
const ROTATION_BIN: f32 = 0.01;
const TRANSLATION_BIN: f32 = 1.0;

/// Nearest-neighbor acceptance radius for inlier matching, pixels.
const INLIER_RADIUS: f32 = 2.0;

/// Estimate the similarity transform mapping `stars` onto `reference`.
///
/// Triangle fingerprints propose candidate transforms, the densest cluster
/// in parameter space seeds nearest-neighbor matching, and a least-squares
/// refinement over the inlier pairs produces the final transform. Returns
/// None when fewer than 3 inliers support any candidate; the caller applies
/// the residual threshold.
pub fn compute_transform(reference: &[Star], stars: &[Star], k: usize) -> Option<AlignResult> {
    let ref_positions: Vec<(f32, f32)> =
        reference.iter().take(k).map(|s| (s.x, s.y)).collect();
    let frame_positions: Vec<(f32, f32)> = stars.iter().take(k).map(|s| (s.x, s.y)).collect();
    if ref_positions.len() < 3 || frame_positions.len() < 3 {
        return None;
    }

    let ref_triangles: Vec<_> = triangle::form_triangles(&ref_positions)
        .into_iter()
        .filter(triangle::is_well_conditioned)
        .collect();
    let frame_triangles: Vec<_> = triangle::form_triangles(&frame_positions)
        .into_iter()
        .filter(triangle::is_well_conditioned)
        .collect();
    if ref_triangles.is_empty() || frame_triangles.is_empty() {
        return None;
    }
    let index = triangle::fingerprint_index(&ref_triangles);

    // Vote candidate transforms into quantized parameter-space bins.
    let mut votes: HashMap<(i32, i32, i32, i32), (usize, f64, f64, f64, f64)> = HashMap::new();
    for frame_tri in &frame_triangles {
        for ref_idx in triangle::candidates(frame_tri, &index) {
            let ref_tri = &ref_triangles[ref_idx];
            if !frame_tri.matches(ref_tri) {
                continue;
            }
            let pairs: Vec<((f32, f32), (f32, f32))> = (0..3)
                .map(|i| {
                    (
                        frame_positions[frame_tri.vertices[i]],
                        ref_positions[ref_tri.vertices[i]],
                    )
                })
                .collect();
            let Some(t) = Similarity::from_pairs(&pairs) else {
                continue;
            };
            if !(0.25..=4.0).contains(&t.scale) {
                continue;
            }
            let key = (
                (t.scale / SCALE_BIN).round() as i32,
                (t.rotation / ROTATION_BIN).round() as i32,
                (t.tx / TRANSLATION_BIN).round() as i32,
                (t.ty / TRANSLATION_BIN).round() as i32,
            );
            let entry = votes.entry(key).or_insert((0, 0.0, 0.0, 0.0, 0.0));
            entry.0 += 1;
            entry.1 += t.scale as f64;
            entry.2 += t.rotation as f64;
            entry.3 += t.tx as f64;
            entry.4 += t.ty as f64;
        }
    }

    let (_, &(count, s, r, tx, ty)) = votes.iter().max_by_key(|(_, v)| v.0)?;
    // A lone candidate is no cluster: chance fingerprint collisions land
    // in singleton bins, agreeing triangles pile up.
    if count < 2 {
        return None;
    }
    let n = count as f64;
    let candidate = Similarity {
        scale: (s / n) as f32,
        rotation: (r / n) as f32,
        tx: (tx / n) as f32,
        ty: (ty / n) as f32,
    };

    // Nearest-neighbor inlier matching under the candidate transform.
    let pairs = match_inliers(&frame_positions, &ref_positions, &candidate);
    if pairs.len() < 3 {
        return None;
    }

    let refined = Similarity::from_pairs(&pairs)?;
    let pairs = match_inliers(&frame_positions, &ref_positions, &refined);
    if pairs.len() < 3 {
        return None;
    }
    let transform = Similarity::from_pairs(&pairs)?;

    Some(AlignResult {
        transform,
        residual_px: transform.rms_residual(&pairs),
        match_count: pairs.len(),
    })
}

fn match_inliers(
    frame_positions: &[(f32, f32)],
    ref_positions: &[(f32, f32)],
    transform: &Similarity,
) -> Vec<((f32, f32), (f32, f32))> {
    let mut used = vec![false; ref_positions.len()];
    let mut pairs = Vec::new();
    for &(x, y) in frame_positions {
        let (mx, my) = transform.apply(x, y);
        let mut best: Option<(usize, f32)> = None;
        for (i, &(rx, ry)) in ref_positions.iter().enumerate() {
            if used[i] {
                continue;
            }
            let dx = rx - mx;
            let dy = ry - my;
            let dist_sq = dx * dx + dy * dy;
            if dist_sq <= INLIER_RADIUS * INLIER_RADIUS
                && best.map_or(true, |(_, d)| dist_sq < d)
            {
                best = Some((i, dist_sq));
            }
        }
        if let Some((i, _)) = best {
            used[i] = true;
            pairs.push(((x, y), ref_positions[i]));
        }
    }
    pairs
}

/// Resample a frame onto the reference grid by bilinear interpolation.
///
/// `transform` maps frame coordinates onto reference coordinates; each
/// output pixel samples the source at the inverse-mapped position. Samples
/// outside the source take the configured out-of-bounds value; non-finite
/// source pixels propagate so the stacker can skip them.
pub fn resample(
    data: &Array2<f32>,
    transform: &Similarity,
    oob: OutOfBounds,
    own_location: f32,
) -> Array2<f32> {
    let (h, w) = data.dim();
    let inverse = transform.inverse();
    let fill = match oob {
        OutOfBounds::OwnLocation => own_location,
        OutOfBounds::Nan => f32::NAN,
    };

    let mut out = Array2::zeros((h, w));
    let out_slice = out.as_slice_mut().expect("frame buffer is contiguous");
    out_slice
        .par_chunks_mut(w)
        .enumerate()
        .for_each(|(row, out_row)| {
            for (col, out_pixel) in out_row.iter_mut().enumerate() {
                let (sx, sy) = inverse.apply(col as f32, row as f32);
                *out_pixel = sample_bilinear(data, sx, sy).unwrap_or(fill);
            }
        });
    out
}

fn sample_bilinear(data: &Array2<f32>, x: f32, y: f32) -> Option<f32> {
    let (h, w) = data.dim();
    if x < 0.0 || y < 0.0 || x > (w - 1) as f32 || y > (h - 1) as f32 {
        return None;
    }
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let top = data[[y0, x0]] * (1.0 - fx) + data[[y0, x1]] * fx;
    let bottom = data[[y1, x0]] * (1.0 - fx) + data[[y1, x1]] * fx;
    Some(top * (1.0 - fy) + bottom * fy)
}
