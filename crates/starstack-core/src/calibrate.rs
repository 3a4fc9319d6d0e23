use std::path::Path;
use std::str::FromStr;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::consts::EPSILON;
use crate::error::{Result, StackError};
use crate::frame::{CfaPattern, Frame};
use crate::io::fits;
use crate::stats;

/// Color channel selected by half-resolution CFA extraction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CfaChannel {
    Red,
    Green,
    Blue,
}

impl FromStr for CfaChannel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "R" => Ok(CfaChannel::Red),
            "G" => Ok(CfaChannel::Green),
            "B" => Ok(CfaChannel::Blue),
            other => Err(format!("unknown debayer channel '{other}', expected R, G or B")),
        }
    }
}

/// Dark and flat frames, loaded once and shared read-only across workers.
#[derive(Debug, Default)]
pub struct CalibrationSet {
    dark: Option<Frame>,
    flat: Option<Frame>,
    flat_mean: f32,
}

impl CalibrationSet {
    /// Load the configured dark and flat. Mismatched dark/flat axes and a
    /// zero-mean flat are fatal.
    pub fn load(dark_path: Option<&Path>, flat_path: Option<&Path>) -> Result<Self> {
        let dark = match dark_path {
            Some(path) => {
                let (data, header) = fits::read_mono(path)?;
                info!(path = %path.display(), width = data.ncols(), height = data.nrows(), "Loaded dark frame");
                Some(Frame::new(0, data, header))
            }
            None => None,
        };
        let flat = match flat_path {
            Some(path) => {
                let (data, header) = fits::read_mono(path)?;
                info!(path = %path.display(), width = data.ncols(), height = data.nrows(), "Loaded flat frame");
                Some(Frame::new(0, data, header))
            }
            None => None,
        };

        if let (Some(d), Some(f)) = (&dark, &flat) {
            if d.data.dim() != f.data.dim() {
                return Err(StackError::DimensionMismatch {
                    context: "flat vs dark".into(),
                    expected_width: d.width(),
                    expected_height: d.height(),
                    actual_width: f.width(),
                    actual_height: f.height(),
                });
            }
        }

        let flat_mean = match &flat {
            Some(f) => {
                let (_, _, mean, _) = stats::basic(f.pixels());
                if mean.abs() < EPSILON {
                    return Err(StackError::NumericDegenerate(
                        "flat frame has zero mean".into(),
                    ));
                }
                mean
            }
            None => 0.0,
        };

        Ok(Self {
            dark,
            flat,
            flat_mean,
        })
    }

    pub fn has_dark(&self) -> bool {
        self.dark.is_some()
    }

    pub fn has_flat(&self) -> bool {
        self.flat.is_some()
    }

    /// Axes (width, height) shared by the calibration frames, if any.
    pub fn axes(&self) -> Option<(usize, usize)> {
        self.dark
            .as_ref()
            .or(self.flat.as_ref())
            .map(|f| (f.width(), f.height()))
    }

    /// Subtract the dark and divide by the flat, pixelwise.
    ///
    /// Axes must equal the light's raw axes; a mismatch is fatal. Zero or
    /// non-finite flat values produce NaN, repaired by the bad-pixel pass.
    pub fn apply(&self, frame: &mut Frame) -> Result<()> {
        if let Some(dark) = &self.dark {
            check_axes("dark vs light", dark, frame)?;
            frame.data.zip_mut_with(&dark.data, |p, &d| *p -= d);
        }
        if let Some(flat) = &self.flat {
            check_axes("flat vs light", flat, frame)?;
            let mean = self.flat_mean;
            frame.data.zip_mut_with(&flat.data, |p, &f| {
                if f.is_finite() && f.abs() > EPSILON {
                    *p = *p * mean / f;
                } else {
                    *p = f32::NAN;
                }
            });
        }
        Ok(())
    }
}

fn check_axes(context: &str, calibration: &Frame, light: &Frame) -> Result<()> {
    if calibration.data.dim() != light.data.dim() {
        return Err(StackError::DimensionMismatch {
            context: context.into(),
            expected_width: light.width(),
            expected_height: light.height(),
            actual_width: calibration.width(),
            actual_height: calibration.height(),
        });
    }
    Ok(())
}

/// Extract one color channel from a CFA mosaic by half-resolution site
/// selection, no interpolation. Output axes are halved.
pub fn extract_cfa_channel(
    data: &Array2<f32>,
    pattern: CfaPattern,
    channel: CfaChannel,
) -> Array2<f32> {
    let (h, w) = data.dim();
    let (oh, ow) = (h / 2, w / 2);
    let (dr, dc) = match channel {
        CfaChannel::Red => pattern.channel_offsets()[0],
        CfaChannel::Green => pattern.channel_offsets()[1],
        CfaChannel::Blue => pattern.channel_offsets()[2],
    };

    let mut out = Array2::zeros((oh, ow));
    for row in 0..oh {
        for col in 0..ow {
            out[[row, col]] = data[[row * 2 + dr, col * 2 + dc]];
        }
    }
    out
}

/// Average non-overlapping n x n blocks. Output axes are floor-divided.
pub fn bin(data: &Array2<f32>, n: usize) -> Array2<f32> {
    let (h, w) = data.dim();
    let (oh, ow) = (h / n, w / n);
    let mut out = Array2::zeros((oh, ow));

    for row in 0..oh {
        for col in 0..ow {
            let mut sum = 0.0f32;
            for br in 0..n {
                for bc in 0..n {
                    sum += data[[row * n + br, col * n + bc]];
                }
            }
            out[[row, col]] = sum / (n * n) as f32;
        }
    }
    out
}

/// Affine rescale to [0, 1] using the observed finite min and max.
pub fn normalize_range(data: &mut Array2<f32>) {
    let (min, max, _, _) = stats::basic(data.as_slice().expect("frame buffer is contiguous"));
    let range = max - min;
    if range < EPSILON {
        data.mapv_inplace(|v| if v.is_finite() { 0.0 } else { v });
        return;
    }
    data.mapv_inplace(|v| (v - min) / range);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CfaPattern;

    #[test]
    fn cfa_extraction_halves_axes() {
        let mut data = Array2::zeros((4, 4));
        data[[0, 0]] = 1.0; // R site of RGGB
        data[[2, 2]] = 2.0;
        let red = extract_cfa_channel(&data, CfaPattern::Rggb, CfaChannel::Red);
        assert_eq!(red.dim(), (2, 2));
        assert_eq!(red[[0, 0]], 1.0);
        assert_eq!(red[[1, 1]], 2.0);
    }

    #[test]
    fn binning_averages_blocks() {
        let data = Array2::from_shape_fn((4, 4), |(r, c)| (r * 4 + c) as f32);
        let binned = bin(&data, 2);
        assert_eq!(binned.dim(), (2, 2));
        assert!((binned[[0, 0]] - 2.5).abs() < 1e-6);
    }
}
