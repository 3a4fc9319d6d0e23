use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::consts::MAD_TO_SIGMA;
use crate::stats::{mad, median_in_place};

/// Gridded background extraction settings.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BackgroundConfig {
    /// Tile side in pixels, 0 disables extraction.
    pub grid: usize,
    /// Sigma threshold rejecting foreground pixels from tile statistics.
    pub sigma: f32,
    /// Number of brightest tiles to clip to their neighborhood median.
    pub clip: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            grid: 0,
            sigma: 1.5,
            clip: 0,
        }
    }
}

/// Estimate the smooth sky background of a frame.
///
/// The frame is tiled into `grid`-sized cells; each cell contributes a
/// robust location with pixels more than `sigma` local sigmas above it
/// rejected as foreground. The tile grid is then interpolated back to a
/// per-pixel map, bilinear between tile centers with smoothstep blending
/// so cell boundaries stay continuous in the first derivative.
pub fn extract_background(data: &Array2<f32>, config: &BackgroundConfig) -> Array2<f32> {
    let (h, w) = data.dim();
    let g = config.grid;
    let tiles_x = w.div_ceil(g);
    let tiles_y = h.div_ceil(g);

    let mut tiles = vec![0.0f32; tiles_x * tiles_y];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * g;
            let y0 = ty * g;
            let x1 = (x0 + g).min(w);
            let y1 = (y0 + g).min(h);

            let mut values: Vec<f32> = (y0..y1)
                .flat_map(|r| (x0..x1).map(move |c| (r, c)))
                .map(|(r, c)| data[[r, c]])
                .filter(|v| v.is_finite())
                .collect();
            tiles[ty * tiles_x + tx] = robust_tile_location(&mut values, config.sigma);
        }
    }

    if config.clip > 0 {
        clip_brightest_tiles(&mut tiles, tiles_x, tiles_y, config.clip);
    }

    interpolate_tiles(&tiles, tiles_x, tiles_y, g, h, w)
}

/// Subtract the extracted background in place and return the map.
pub fn subtract_background(data: &mut Array2<f32>, config: &BackgroundConfig) -> Array2<f32> {
    let map = extract_background(data, config);
    data.zip_mut_with(&map, |p, &b| *p -= b);
    map
}

/// Tile location with foreground rejection: pixels above
/// median + sigma * (1.4826 * MAD) are excluded, then the median of the
/// survivors is taken.
fn robust_tile_location(values: &mut Vec<f32>, sigma: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let med = median_in_place(values);
    let spread = MAD_TO_SIGMA * mad(values, med);
    let ceiling = med + sigma * spread;
    values.retain(|&v| v <= ceiling);
    if values.is_empty() {
        med
    } else {
        median_in_place(values)
    }
}

/// Replace the k brightest tiles with the median of their 8 neighbors.
fn clip_brightest_tiles(tiles: &mut [f32], tiles_x: usize, tiles_y: usize, k: usize) {
    let mut order: Vec<usize> = (0..tiles.len()).collect();
    order.sort_by(|&a, &b| tiles[b].total_cmp(&tiles[a]));

    let original = tiles.to_vec();
    for &idx in order.iter().take(k) {
        let ty = idx / tiles_x;
        let tx = idx % tiles_x;
        let mut neighbors = Vec::with_capacity(8);
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                if dy == 0 && dx == 0 {
                    continue;
                }
                let ny = ty as i64 + dy;
                let nx = tx as i64 + dx;
                if ny < 0 || nx < 0 || ny >= tiles_y as i64 || nx >= tiles_x as i64 {
                    continue;
                }
                neighbors.push(original[ny as usize * tiles_x + nx as usize]);
            }
        }
        if !neighbors.is_empty() {
            tiles[idx] = median_in_place(&mut neighbors);
        }
    }
}

fn interpolate_tiles(
    tiles: &[f32],
    tiles_x: usize,
    tiles_y: usize,
    g: usize,
    h: usize,
    w: usize,
) -> Array2<f32> {
    let half = g as f32 * 0.5;
    let mut map = Array2::zeros((h, w));
    let slice = map.as_slice_mut().expect("map buffer is contiguous");

    slice
        .par_chunks_mut(w)
        .enumerate()
        .for_each(|(row, out_row)| {
            let fy = ((row as f32 - half) / g as f32).clamp(0.0, (tiles_y - 1) as f32);
            let ty = (fy as usize).min(tiles_y.saturating_sub(2).max(0));
            let vy = smoothstep((fy - ty as f32).clamp(0.0, 1.0));
            let ty1 = (ty + 1).min(tiles_y - 1);

            for (col, out) in out_row.iter_mut().enumerate() {
                let fx = ((col as f32 - half) / g as f32).clamp(0.0, (tiles_x - 1) as f32);
                let tx = (fx as usize).min(tiles_x.saturating_sub(2).max(0));
                let vx = smoothstep((fx - tx as f32).clamp(0.0, 1.0));
                let tx1 = (tx + 1).min(tiles_x - 1);

                let top = lerp(tiles[ty * tiles_x + tx], tiles[ty * tiles_x + tx1], vx);
                let bottom = lerp(tiles[ty1 * tiles_x + tx], tiles[ty1 * tiles_x + tx1], vx);
                *out = lerp(top, bottom, vy);
            }
        });

    map
}

fn smoothstep(t: f32) -> f32 {
    t * t * (3.0 - 2.0 * t)
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_frame_yields_uniform_background() {
        let data = Array2::from_elem((64, 64), 0.5f32);
        let config = BackgroundConfig {
            grid: 16,
            sigma: 1.5,
            clip: 0,
        };
        let map = extract_background(&data, &config);
        for &v in map.iter() {
            assert!((v - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn gradient_is_tracked() {
        let data = Array2::from_shape_fn((64, 64), |(r, _)| r as f32 / 64.0);
        let config = BackgroundConfig {
            grid: 16,
            sigma: 3.0,
            clip: 0,
        };
        let mut frame = data.clone();
        subtract_background(&mut frame, &config);
        // Interior residual should be much smaller than the gradient span.
        let interior = frame[[32, 32]].abs();
        assert!(interior < 0.2, "residual {interior}");
    }
}
