#![allow(dead_code)]

use std::io::Write;
use std::path::PathBuf;

use ndarray::Array2;
use tempfile::TempDir;

pub const FITS_BLOCK: usize = 2880;

/// Build a minimal FITS file in memory: BITPIX -32, NAXIS 2, EXPTIME.
pub fn build_fits_f32(data: &Array2<f32>, exposure: f32) -> Vec<u8> {
    let (h, w) = data.dim();
    let mut cards: Vec<String> = vec![
        card("SIMPLE", "T"),
        card("BITPIX", "-32"),
        card("NAXIS", "2"),
        card("NAXIS1", &w.to_string()),
        card("NAXIS2", &h.to_string()),
        card("EXPTIME", &format!("{exposure:.1}")),
    ];
    cards.push("END".to_string());

    let mut bytes = Vec::new();
    for c in &cards {
        let mut b = c.clone().into_bytes();
        b.resize(80, b' ');
        bytes.extend_from_slice(&b);
    }
    pad(&mut bytes, b' ');

    for &v in data.as_slice().expect("contiguous") {
        bytes.extend_from_slice(&v.to_be_bytes());
    }
    pad(&mut bytes, 0);
    bytes
}

/// Build a 16-bit integer FITS file with BZERO/BSCALE and extra header
/// cards (keyword, value) appended verbatim.
pub fn build_fits_i16(
    samples: &[i16],
    w: usize,
    h: usize,
    bzero: f64,
    bscale: f64,
    extra: &[(&str, &str)],
) -> Vec<u8> {
    assert_eq!(samples.len(), w * h);
    let mut cards: Vec<String> = vec![
        card("SIMPLE", "T"),
        card("BITPIX", "16"),
        card("NAXIS", "2"),
        card("NAXIS1", &w.to_string()),
        card("NAXIS2", &h.to_string()),
        card("BZERO", &format!("{bzero:.1}")),
        card("BSCALE", &format!("{bscale:.1}")),
    ];
    for (k, v) in extra {
        cards.push(card(k, v));
    }
    cards.push("END".to_string());

    let mut bytes = Vec::new();
    for c in &cards {
        let mut b = c.clone().into_bytes();
        b.resize(80, b' ');
        bytes.extend_from_slice(&b);
    }
    pad(&mut bytes, b' ');

    for &s in samples {
        bytes.extend_from_slice(&s.to_be_bytes());
    }
    pad(&mut bytes, 0);
    bytes
}

fn card(keyword: &str, value: &str) -> String {
    format!("{keyword:<8}= {value:>20}")
}

fn pad(bytes: &mut Vec<u8>, fill: u8) {
    let rem = bytes.len() % FITS_BLOCK;
    if rem != 0 {
        bytes.resize(bytes.len() + FITS_BLOCK - rem, fill);
    }
}

/// Write a frame to `<dir>/<name>` as BITPIX -32 FITS and return the path.
pub fn write_fits(dir: &TempDir, name: &str, data: &Array2<f32>, exposure: f32) -> PathBuf {
    let path = dir.path().join(name);
    let bytes = build_fits_f32(data, exposure);
    let mut file = std::fs::File::create(&path).expect("create test FITS");
    file.write_all(&bytes).expect("write test FITS");
    path
}

/// Render Gaussian stars (x, y, amplitude) over a flat background.
pub fn render_stars(
    h: usize,
    w: usize,
    stars: &[(f32, f32, f32)],
    sigma: f32,
    background: f32,
) -> Array2<f32> {
    Array2::from_shape_fn((h, w), |(r, c)| {
        let mut v = background;
        for &(x, y, amp) in stars {
            let dx = c as f32 - x;
            let dy = r as f32 - y;
            let d_sq = dx * dx + dy * dy;
            if d_sq < (6.0 * sigma) * (6.0 * sigma) {
                v += amp * (-d_sq / (2.0 * sigma * sigma)).exp();
            }
        }
        v
    })
}

/// A deterministic xorshift generator for test noise.
pub struct TestRng(u64);

impl TestRng {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    /// Uniform in [0, 1).
    pub fn uniform(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }

    /// Standard normal via Box-Muller.
    pub fn gaussian(&mut self) -> f32 {
        let u1 = self.uniform().max(1e-7);
        let u2 = self.uniform();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
    }
}

/// Add Gaussian noise of the given sigma, deterministically per seed.
pub fn add_noise(data: &mut Array2<f32>, sigma: f32, seed: u64) {
    let mut rng = TestRng::new(seed);
    for v in data.iter_mut() {
        *v += sigma * rng.gaussian();
    }
}

/// The reference star layout used by the alignment and pipeline tests.
pub fn test_star_layout() -> Vec<(f32, f32, f32)> {
    vec![
        (40.0, 60.0, 1.0),
        (180.0, 40.0, 0.9),
        (120.0, 130.0, 0.8),
        (60.0, 200.0, 0.7),
        (200.0, 180.0, 0.6),
        (90.0, 30.0, 0.55),
        (160.0, 220.0, 0.5),
        (30.0, 140.0, 0.45),
        (220.0, 100.0, 0.4),
        (140.0, 70.0, 0.35),
    ]
}
