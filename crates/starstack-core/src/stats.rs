use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::consts::{
    EPSILON, LOCATION_MAX_ITERATIONS, MAD_TO_SIGMA, MAX_SAMPLE_SIZE, QN_TO_SIGMA,
};

/// Location and scale estimator selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LocationScaleMode {
    /// Mean and standard deviation.
    MeanStdDev,
    /// Median and 1.4826 * MAD.
    MedianMad,
    /// Iterative k-sigma clipped median and MAD.
    Ikss,
    /// Iterative sigma-clipped sampled median and sampled Qn.
    #[default]
    SampledSigmaClip,
}

impl LocationScaleMode {
    pub fn from_flag(flag: i64) -> Self {
        match flag {
            0 => LocationScaleMode::MeanStdDev,
            1 => LocationScaleMode::MedianMad,
            2 => LocationScaleMode::Ikss,
            _ => LocationScaleMode::SampledSigmaClip,
        }
    }
}

/// Summary statistics of a pixel buffer.
///
/// `location` and `scale` come from the configured robust estimator,
/// `noise` from the Laplacian high-pass estimate.
#[derive(Clone, Copy, Debug, Default)]
pub struct Stats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub stddev: f32,
    pub location: f32,
    pub scale: f32,
    pub noise: f32,
    pub peak: Option<HistogramPeak>,
}

impl std::fmt::Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "min {:.4} max {:.4} mean {:.4} location {:.4} scale {:.4} noise {:.4e}",
            self.min, self.max, self.mean, self.location, self.scale, self.noise
        )
    }
}

/// Mode of a pixel histogram: bin center and bin count.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HistogramPeak {
    pub value: f32,
    pub count: u32,
}

/// Min, max, mean and standard deviation in a single pass.
///
/// Non-finite samples are skipped; an all-non-finite buffer yields zeros.
pub fn basic(pixels: &[f32]) -> (f32, f32, f32, f32) {
    let mut min = f32::MAX;
    let mut max = f32::MIN;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;

    for &v in pixels {
        if !v.is_finite() {
            continue;
        }
        if v < min {
            min = v;
        }
        if v > max {
            max = v;
        }
        sum += v as f64;
        sum_sq += (v as f64) * (v as f64);
        count += 1;
    }

    if count == 0 {
        return (0.0, 0.0, 0.0, 0.0);
    }
    let mean = sum / count as f64;
    let var = (sum_sq / count as f64 - mean * mean).max(0.0);
    (min, max, mean as f32, var.sqrt() as f32)
}

/// Robust location and scale of a pixel buffer.
///
/// Deterministic for a fixed `seed`; the sampled estimators draw their
/// subsets from a ChaCha stream seeded with it.
pub fn location_scale(pixels: &[f32], mode: LocationScaleMode, seed: u64) -> (f32, f32) {
    match mode {
        LocationScaleMode::MeanStdDev => {
            let (_, _, mean, stddev) = basic(pixels);
            (mean, stddev)
        }
        LocationScaleMode::MedianMad => {
            let mut values = finite_values(pixels);
            if values.is_empty() {
                return (0.0, 0.0);
            }
            let med = median_in_place(&mut values);
            let s = MAD_TO_SIGMA * mad(&values, med);
            (med, s)
        }
        LocationScaleMode::Ikss => iterative_clipped(pixels, 4.0, 4.0),
        LocationScaleMode::SampledSigmaClip => sampled_sigma_clip(pixels, seed),
    }
}

/// Full statistics for a frame buffer: basic single-pass stats, the
/// configured robust location/scale, and the high-pass noise estimate.
pub fn compute_stats(data: &Array2<f32>, mode: LocationScaleMode, seed: u64) -> Stats {
    let pixels = data.as_slice().expect("frame buffer is contiguous");
    let (min, max, mean, stddev) = basic(pixels);
    let (location, scale) = location_scale(pixels, mode, seed);
    let noise = estimate_noise(data);
    Stats {
        min,
        max,
        mean,
        stddev,
        location,
        scale,
        noise,
        peak: Some(histogram_peak(pixels)),
    }
}

/// Iterative sigma-clipped sampled median with a sampled Qn scale.
///
/// Draws a uniform sample of at most [`MAX_SAMPLE_SIZE`] values, then
/// alternates median/MAD estimation with clipping at 3 sigma (first pass)
/// and 2.5 sigma thereafter, until the retained set changes by less than
/// 0.1% or the iteration cap is reached.
fn sampled_sigma_clip(pixels: &[f32], seed: u64) -> (f32, f32) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut retained = finite_sample(pixels, MAX_SAMPLE_SIZE, &mut rng);
    if retained.is_empty() {
        return (0.0, 0.0);
    }

    let mut location = median_in_place(&mut retained);
    for iteration in 0..LOCATION_MAX_ITERATIONS {
        let spread = MAD_TO_SIGMA * mad(&retained, location);
        if spread < EPSILON {
            break;
        }
        let k = if iteration == 0 { 3.0 } else { 2.5 };
        let lo = location - k * spread;
        let hi = location + k * spread;

        let before = retained.len();
        retained.retain(|&v| v >= lo && v <= hi);
        if retained.is_empty() {
            break;
        }
        location = median_in_place(&mut retained);
        let removed = before - retained.len();
        if (removed as f64) < 0.001 * before as f64 {
            break;
        }
    }

    let scale = sampled_qn(&retained, &mut rng);
    (location, scale)
}

/// Iteratively clip at k sigma around the median until stable.
fn iterative_clipped(pixels: &[f32], k_low: f32, k_high: f32) -> (f32, f32) {
    let mut retained = finite_values(pixels);
    if retained.is_empty() {
        return (0.0, 0.0);
    }
    let mut location = median_in_place(&mut retained);
    let mut spread = MAD_TO_SIGMA * mad(&retained, location);
    for _ in 0..LOCATION_MAX_ITERATIONS {
        if spread < EPSILON {
            break;
        }
        let lo = location - k_low * spread;
        let hi = location + k_high * spread;
        let before = retained.len();
        retained.retain(|&v| v >= lo && v <= hi);
        if retained.is_empty() || retained.len() == before {
            break;
        }
        location = median_in_place(&mut retained);
        spread = MAD_TO_SIGMA * mad(&retained, location);
    }
    (location, spread)
}

/// Estimate per-pixel additive noise via a Laplacian high-pass response.
///
/// Convolves the interior with [[0,-1,0],[-1,4,-1],[0,-1,0]] and takes the
/// MAD of the response rescaled by 1/sqrt(6). The estimate is proportional
/// to the white-noise sigma and is consumed relatively (frame weighting,
/// noise-reduction reporting), so the calibration constant follows the
/// established convention rather than the kernel's exact tap variance.
pub fn estimate_noise(data: &Array2<f32>) -> f32 {
    let (h, w) = data.dim();
    if h < 3 || w < 3 {
        return 0.0;
    }

    let mut responses: Vec<f32> = (1..h - 1)
        .into_par_iter()
        .map(|row| {
            let mut out = Vec::with_capacity(w - 2);
            for col in 1..w - 1 {
                let c = data[[row, col]];
                let n = data[[row - 1, col]];
                let s = data[[row + 1, col]];
                let e = data[[row, col + 1]];
                let v = data[[row, col - 1]];
                let r = 4.0 * c - n - s - e - v;
                if r.is_finite() {
                    out.push(r.abs());
                }
            }
            out
        })
        .flatten()
        .collect();

    if responses.is_empty() {
        return 0.0;
    }
    let med = median_in_place(&mut responses);
    MAD_TO_SIGMA * med / 6.0f32.sqrt()
}

/// Histogram of the finite samples over their observed range.
#[derive(Clone, Debug)]
pub struct Histogram {
    pub counts: Vec<u32>,
    pub min: f32,
    pub bin_width: f32,
}

impl Histogram {
    /// Center and count of the most populated bin.
    pub fn peak(&self) -> HistogramPeak {
        let (bin, &count) = self
            .counts
            .iter()
            .enumerate()
            .max_by_key(|(_, &c)| c)
            .unwrap_or((0, &0));
        HistogramPeak {
            value: self.min + (bin as f32 + 0.5) * self.bin_width,
            count,
        }
    }
}

pub fn histogram(pixels: &[f32], bins: usize) -> Histogram {
    let (min, max, _, _) = basic(pixels);
    let range = max - min;
    let bin_width = if range < EPSILON {
        1.0
    } else {
        range / bins as f32
    };

    let mut counts = vec![0u32; bins.max(1)];
    for &v in pixels {
        if !v.is_finite() {
            continue;
        }
        let bin = (((v - min) / bin_width) as usize).min(counts.len() - 1);
        counts[bin] += 1;
    }
    Histogram {
        counts,
        min,
        bin_width,
    }
}

/// Histogram mode with the default bin count, used by automatic
/// black-point placement.
pub fn histogram_peak(pixels: &[f32]) -> HistogramPeak {
    histogram(pixels, 1024).peak()
}

/// Median of a mutable buffer; averages the middle pair for even lengths.
pub fn median_in_place(values: &mut [f32]) -> f32 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return values[0];
    }
    let mid = n / 2;
    let upper = *values
        .select_nth_unstable_by(mid, |a, b| a.total_cmp(b))
        .1;
    if n % 2 == 1 {
        upper
    } else {
        let lower = values[..mid]
            .iter()
            .copied()
            .fold(f32::MIN, f32::max);
        0.5 * (lower + upper)
    }
}

/// Median absolute deviation about `center`.
pub fn mad(values: &[f32], center: f32) -> f32 {
    let mut deviations: Vec<f32> = values.iter().map(|&v| (v - center).abs()).collect();
    median_in_place(&mut deviations)
}

/// Qn-like scale: 2.2219 times the first quartile of pairwise absolute
/// differences, estimated on a bounded random pair sample.
fn sampled_qn(values: &[f32], rng: &mut ChaCha8Rng) -> f32 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let exhaustive_pairs = n * (n - 1) / 2;
    let mut diffs: Vec<f32> = if exhaustive_pairs <= MAX_SAMPLE_SIZE {
        let mut out = Vec::with_capacity(exhaustive_pairs);
        for i in 0..n {
            for j in (i + 1)..n {
                out.push((values[i] - values[j]).abs());
            }
        }
        out
    } else {
        (0..MAX_SAMPLE_SIZE)
            .map(|_| {
                let i = rng.gen_range(0..n);
                let j = rng.gen_range(0..n);
                (values[i] - values[j]).abs()
            })
            .collect()
    };

    let q1 = diffs.len() / 4;
    let quartile = *diffs
        .select_nth_unstable_by(q1, |a, b| a.total_cmp(b))
        .1;
    QN_TO_SIGMA * quartile
}

fn finite_values(pixels: &[f32]) -> Vec<f32> {
    pixels.iter().copied().filter(|v| v.is_finite()).collect()
}

/// Uniform random sample of at most `max_n` finite values.
fn finite_sample(pixels: &[f32], max_n: usize, rng: &mut ChaCha8Rng) -> Vec<f32> {
    if pixels.len() <= max_n {
        return finite_values(pixels);
    }
    let mut out = Vec::with_capacity(max_n);
    let mut attempts = 0usize;
    while out.len() < max_n && attempts < max_n * 2 {
        let v = pixels[rng.gen_range(0..pixels.len())];
        if v.is_finite() {
            out.push(v);
        }
        attempts += 1;
    }
    if out.is_empty() {
        return finite_values(pixels);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_ignores_non_finite() {
        let pixels = [1.0, f32::NAN, 3.0, f32::INFINITY, 2.0];
        let (min, max, mean, _) = basic(&pixels);
        assert_eq!(min, 1.0);
        assert_eq!(max, 3.0);
        assert!((mean - 2.0).abs() < 1e-6);
    }

    #[test]
    fn median_of_even_buffer() {
        let mut values = [4.0, 1.0, 3.0, 2.0];
        assert!((median_in_place(&mut values) - 2.5).abs() < 1e-6);
    }

    #[test]
    fn sampled_estimator_is_deterministic() {
        let pixels: Vec<f32> = (0..200_000).map(|i| (i % 977) as f32).collect();
        let a = location_scale(&pixels, LocationScaleMode::SampledSigmaClip, 7);
        let b = location_scale(&pixels, LocationScaleMode::SampledSigmaClip, 7);
        assert_eq!(a, b);
    }
}
