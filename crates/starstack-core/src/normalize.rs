use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::consts::EPSILON;
use crate::stats::Stats;

/// Histogram normalization mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum HistoNormMode {
    /// Leave pixel values untouched.
    None,
    /// Match the reference location and scale (light stacking).
    LocationScale,
    /// Shift the black point only (channel alignment).
    BlackPoint,
    /// Resolved per command before the pipeline runs.
    #[default]
    Auto,
}

impl HistoNormMode {
    pub fn from_flag(flag: i64) -> Self {
        match flag {
            0 => HistoNormMode::None,
            1 => HistoNormMode::LocationScale,
            2 => HistoNormMode::BlackPoint,
            _ => HistoNormMode::Auto,
        }
    }

    /// Replace `Auto` with the command's default mode.
    pub fn resolve(self, auto_default: HistoNormMode) -> HistoNormMode {
        match self {
            HistoNormMode::Auto => auto_default,
            other => other,
        }
    }
}

/// Remap a frame's histogram onto the reference statistics.
///
/// The reference stats are captured once (batch 0) and reused for every
/// subsequent frame and batch.
pub fn normalize(data: &mut Array2<f32>, stats: &Stats, reference: &Stats, mode: HistoNormMode) {
    match mode {
        HistoNormMode::None | HistoNormMode::Auto => {}
        HistoNormMode::LocationScale => {
            let gain = if stats.scale.abs() < EPSILON {
                1.0
            } else {
                reference.scale / stats.scale
            };
            let loc = stats.location;
            let ref_loc = reference.location;
            data.mapv_inplace(|p| (p - loc) * gain + ref_loc);
        }
        HistoNormMode::BlackPoint => {
            let shift = reference.location - stats.location;
            data.mapv_inplace(|p| p + shift);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(location: f32, scale: f32) -> Stats {
        Stats {
            location,
            scale,
            ..Default::default()
        }
    }

    #[test]
    fn location_scale_matches_reference() {
        let mut data = Array2::from_elem((2, 2), 5.0f32);
        normalize(
            &mut data,
            &stats(5.0, 2.0),
            &stats(10.0, 4.0),
            HistoNormMode::LocationScale,
        );
        assert!((data[[0, 0]] - 10.0).abs() < 1e-6);
    }

    #[test]
    fn black_point_shift_only() {
        let mut data = Array2::from_elem((2, 2), 3.0f32);
        normalize(
            &mut data,
            &stats(1.0, 2.0),
            &stats(4.0, 9.0),
            HistoNormMode::BlackPoint,
        );
        assert!((data[[0, 0]] - 6.0).abs() < 1e-6);
    }

    #[test]
    fn none_is_identity() {
        let mut data = Array2::from_elem((2, 2), 3.0f32);
        let before = data.clone();
        normalize(&mut data, &stats(1.0, 1.0), &stats(2.0, 2.0), HistoNormMode::None);
        assert_eq!(data, before);
    }
}
