use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cosmetic;
use crate::stats::median_in_place;

/// A detected star: sub-pixel centroid, integrated mass above background,
/// and half-flux radius.
#[derive(Clone, Copy, Debug)]
pub struct Star {
    pub x: f32,
    pub y: f32,
    pub mass: f32,
    pub hfr: f32,
}

/// Star detection settings.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct StarDetectConfig {
    /// Detection threshold in sigmas above the frame location.
    pub sigma: f32,
    /// Sigma for the cosmetic pre-pass removing salt-and-pepper false
    /// positives. 0 skips the pass; negative values are resolved to a
    /// per-command default before detection runs.
    pub bad_pixel_sigma: f32,
    /// Candidate window and aperture radius in pixels.
    pub radius: usize,
}

impl Default for StarDetectConfig {
    fn default() -> Self {
        Self {
            sigma: 10.0,
            bad_pixel_sigma: -1.0,
            radius: 16,
        }
    }
}

/// Detect stars above `location + sigma * scale`.
///
/// Local maxima within a `radius` window are measured with an expanding
/// circular aperture: mass sums background-subtracted flux of pixels above
/// the threshold, and the half-flux radius is the distance enclosing half
/// the total aperture flux. Overlapping detections are suppressed, keeping
/// the more massive star. Returns the list ordered by descending mass and
/// the median HFR (0 when no stars were found).
pub fn find_stars(
    data: &Array2<f32>,
    location: f32,
    scale: f32,
    config: &StarDetectConfig,
) -> (Vec<Star>, f32) {
    let threshold = location + config.sigma * scale;

    let cleaned;
    let pixels = if config.bad_pixel_sigma > 0.0 {
        cleaned = cosmetic::remove_bad_pixels(data, config.bad_pixel_sigma, config.bad_pixel_sigma).0;
        &cleaned
    } else {
        data
    };

    let (h, w) = pixels.dim();
    let r = config.radius as i64;

    let candidates: Vec<(usize, usize)> = (0..h)
        .into_par_iter()
        .map(|row| {
            let mut row_hits = Vec::new();
            for col in 0..w {
                let v = pixels[[row, col]];
                if !v.is_finite() || v <= threshold {
                    continue;
                }
                if is_local_maximum(pixels, row, col, r) {
                    row_hits.push((row, col));
                }
            }
            row_hits
        })
        .flatten()
        .collect();

    let mut stars: Vec<Star> = candidates
        .into_par_iter()
        .filter_map(|(row, col)| measure_star(pixels, row, col, location, threshold, r))
        .collect();

    // Non-maximum suppression: keep the most massive star of any pair
    // closer than the detection radius.
    stars.sort_by(|a, b| b.mass.total_cmp(&a.mass));
    let mut accepted: Vec<Star> = Vec::with_capacity(stars.len());
    let min_dist_sq = (config.radius * config.radius) as f32;
    for star in stars {
        let overlaps = accepted.iter().any(|s| {
            let dx = s.x - star.x;
            let dy = s.y - star.y;
            dx * dx + dy * dy < min_dist_sq
        });
        if !overlaps {
            accepted.push(star);
        }
    }

    let mut hfrs: Vec<f32> = accepted.iter().map(|s| s.hfr).collect();
    let median_hfr = median_in_place(&mut hfrs);
    (accepted, median_hfr)
}

fn is_local_maximum(pixels: &Array2<f32>, row: usize, col: usize, r: i64) -> bool {
    let (h, w) = pixels.dim();
    let v = pixels[[row, col]];
    for dr in -r..=r {
        for dc in -r..=r {
            if dr == 0 && dc == 0 {
                continue;
            }
            let nr = row as i64 + dr;
            let nc = col as i64 + dc;
            if nr < 0 || nc < 0 || nr >= h as i64 || nc >= w as i64 {
                continue;
            }
            let n = pixels[[nr as usize, nc as usize]];
            if n.is_finite() && n > v {
                return false;
            }
        }
    }
    true
}

/// Measure centroid, mass and half-flux radius within the circular
/// aperture around a candidate peak.
fn measure_star(
    pixels: &Array2<f32>,
    row: usize,
    col: usize,
    location: f32,
    threshold: f32,
    r: i64,
) -> Option<Star> {
    let (h, w) = pixels.dim();
    let r_sq = (r * r) as f32;

    // Flux-weighted centroid over the aperture.
    let mut flux_sum = 0.0f32;
    let mut cx = 0.0f32;
    let mut cy = 0.0f32;
    let mut mass = 0.0f32;
    for dr in -r..=r {
        for dc in -r..=r {
            let nr = row as i64 + dr;
            let nc = col as i64 + dc;
            if nr < 0 || nc < 0 || nr >= h as i64 || nc >= w as i64 {
                continue;
            }
            if (dr * dr + dc * dc) as f32 > r_sq {
                continue;
            }
            let v = pixels[[nr as usize, nc as usize]];
            if !v.is_finite() {
                continue;
            }
            let flux = (v - location).max(0.0);
            flux_sum += flux;
            cx += flux * nc as f32;
            cy += flux * nr as f32;
            if v > threshold {
                mass += v - location;
            }
        }
    }
    if flux_sum <= 0.0 || mass <= 0.0 {
        return None;
    }
    cx /= flux_sum;
    cy /= flux_sum;

    // Half-flux radius: walk aperture samples by distance from the
    // centroid until half the total flux is enclosed.
    let mut samples: Vec<(f32, f32)> = Vec::new();
    for dr in -r..=r {
        for dc in -r..=r {
            let nr = row as i64 + dr;
            let nc = col as i64 + dc;
            if nr < 0 || nc < 0 || nr >= h as i64 || nc >= w as i64 {
                continue;
            }
            if (dr * dr + dc * dc) as f32 > r_sq {
                continue;
            }
            let v = pixels[[nr as usize, nc as usize]];
            if !v.is_finite() {
                continue;
            }
            let flux = (v - location).max(0.0);
            if flux > 0.0 {
                let dx = nc as f32 - cx;
                let dy = nr as f32 - cy;
                samples.push(((dx * dx + dy * dy).sqrt(), flux));
            }
        }
    }
    samples.sort_by(|a, b| a.0.total_cmp(&b.0));

    let half = flux_sum * 0.5;
    let mut enclosed = 0.0f32;
    let mut hfr = 0.0f32;
    let mut previous_dist = 0.0f32;
    for (dist, flux) in samples {
        let next = enclosed + flux;
        if next >= half {
            let t = if flux > 0.0 { (half - enclosed) / flux } else { 0.0 };
            hfr = previous_dist + (dist - previous_dist) * t;
            break;
        }
        enclosed = next;
        previous_dist = dist;
    }

    let x = cx.clamp(0.0, (w - 1) as f32);
    let y = cy.clamp(0.0, (h - 1) as f32);
    Some(Star { x, y, mass, hfr })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaussian_field(h: usize, w: usize, stars: &[(f32, f32, f32)]) -> Array2<f32> {
        Array2::from_shape_fn((h, w), |(r, c)| {
            let mut v = 0.1f32;
            for &(x, y, amp) in stars {
                let dx = c as f32 - x;
                let dy = r as f32 - y;
                v += amp * (-(dx * dx + dy * dy) / 4.0).exp();
            }
            v
        })
    }

    #[test]
    fn detects_isolated_star() {
        let data = gaussian_field(64, 64, &[(32.0, 20.0, 1.0)]);
        let config = StarDetectConfig {
            sigma: 10.0,
            bad_pixel_sigma: 0.0,
            radius: 8,
        };
        let (stars, hfr) = find_stars(&data, 0.1, 0.01, &config);
        assert_eq!(stars.len(), 1);
        assert!((stars[0].x - 32.0).abs() < 0.5);
        assert!((stars[0].y - 20.0).abs() < 0.5);
        assert!(hfr > 0.0);
    }

    #[test]
    fn suppresses_overlapping_detections() {
        let data = gaussian_field(64, 64, &[(30.0, 30.0, 1.0), (33.0, 30.0, 0.8)]);
        let config = StarDetectConfig {
            sigma: 10.0,
            bad_pixel_sigma: 0.0,
            radius: 8,
        };
        let (stars, _) = find_stars(&data, 0.1, 0.01, &config);
        assert_eq!(stars.len(), 1);
    }
}
