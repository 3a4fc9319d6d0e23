use std::str::FromStr;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::align::transform::Similarity;
use crate::detect::Star;
use crate::stats::Stats;

/// A single light, dark or flat frame.
///
/// Pixel values are f32; non-finite values mark missing samples. The buffer
/// is row-major with shape = (height, width) and has exactly one owner at
/// any time — pipeline stages take the frame by value and hand it on.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Input sequence number, also the seed for per-frame sampling.
    pub id: usize,
    /// Pixel data, row-major, shape = (height, width).
    pub data: Array2<f32>,
    /// Header metadata carried through from ingress.
    pub header: FrameHeader,
    /// Robust statistics, attached during preprocessing.
    pub stats: Option<Stats>,
    /// Detected stars, ordered by descending mass.
    pub stars: Vec<Star>,
    /// Median half-flux radius of the detected stars, 0 if none.
    pub hfr: f32,
    /// Similarity transform onto the reference frame, if aligned.
    pub transform: Option<Similarity>,
}

impl Frame {
    pub fn new(id: usize, data: Array2<f32>, header: FrameHeader) -> Self {
        Self {
            id,
            data,
            header,
            stats: None,
            stars: Vec::new(),
            hfr: 0.0,
            transform: None,
        }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    /// Row-major view of the pixel buffer.
    pub fn pixels(&self) -> &[f32] {
        self.data.as_slice().expect("frame buffer is contiguous")
    }
}

/// Header fields preserved and propagated from the input container.
#[derive(Clone, Debug, Default)]
pub struct FrameHeader {
    /// EXPTIME, seconds. 0 when absent.
    pub exposure_seconds: f32,
    /// DATE-OBS, verbatim.
    pub date_obs: Option<String>,
    /// BAYERPAT, parsed.
    pub bayer_pattern: Option<CfaPattern>,
    /// XBINNING / YBINNING. 1 when absent.
    pub xbinning: u32,
    pub ybinning: u32,
}

/// Color filter array layout of the sensor, named by the top-left 2x2 cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CfaPattern {
    Rggb,
    Grbg,
    Gbrg,
    Bggr,
}

impl CfaPattern {
    /// Offsets of the (red, green, blue) sites within the 2x2 cell,
    /// as (row, col). Green uses the first green site in reading order.
    pub fn channel_offsets(self) -> [(usize, usize); 3] {
        match self {
            CfaPattern::Rggb => [(0, 0), (0, 1), (1, 1)],
            CfaPattern::Grbg => [(0, 1), (0, 0), (1, 0)],
            CfaPattern::Gbrg => [(1, 0), (0, 0), (0, 1)],
            CfaPattern::Bggr => [(1, 1), (0, 1), (0, 0)],
        }
    }
}

impl FromStr for CfaPattern {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RGGB" => Ok(CfaPattern::Rggb),
            "GRBG" => Ok(CfaPattern::Grbg),
            "GBRG" => Ok(CfaPattern::Gbrg),
            "BGGR" => Ok(CfaPattern::Bggr),
            other => Err(format!("unknown CFA pattern '{other}'")),
        }
    }
}

impl std::fmt::Display for CfaPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CfaPattern::Rggb => "RGGB",
            CfaPattern::Grbg => "GRBG",
            CfaPattern::Gbrg => "GBRG",
            CfaPattern::Bggr => "BGGR",
        };
        write!(f, "{s}")
    }
}
