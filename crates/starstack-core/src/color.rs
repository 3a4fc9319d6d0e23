use ndarray::Array2;

use crate::consts::EPSILON;
use crate::error::{Result, StackError};
use crate::frame::Frame;

/// Combined color image, one plane per channel.
#[derive(Clone, Debug)]
pub struct ColorImage {
    pub red: Array2<f32>,
    pub green: Array2<f32>,
    pub blue: Array2<f32>,
}

impl ColorImage {
    /// Channel-major plane order for the writer.
    pub fn planes(&self) -> [&Array2<f32>; 3] {
        [&self.red, &self.green, &self.blue]
    }
}

/// Combine three aligned channels into a color image.
///
/// A dimension mismatch between channels is fatal.
pub fn combine_rgb(red: Frame, green: Frame, blue: Frame) -> Result<ColorImage> {
    let dim = red.data.dim();
    for channel in [&green, &blue] {
        if channel.data.dim() != dim {
            return Err(StackError::DimensionMismatch {
                context: format!("channel {} vs channel {}", channel.id, red.id),
                expected_width: dim.1,
                expected_height: dim.0,
                actual_width: channel.width(),
                actual_height: channel.height(),
            });
        }
    }
    Ok(ColorImage {
        red: red.data,
        green: green.data,
        blue: blue.data,
    })
}

/// Modulate the combined color by a luminance channel.
///
/// Each pixel's channels are scaled so their mean matches the luminance
/// value, preserving the chrominance ratios of the combine.
pub fn apply_luminance(image: &mut ColorImage, luminance: &Array2<f32>) -> Result<()> {
    if luminance.dim() != image.red.dim() {
        return Err(StackError::DimensionMismatch {
            context: "luminance vs color channels".into(),
            expected_width: image.red.ncols(),
            expected_height: image.red.nrows(),
            actual_width: luminance.ncols(),
            actual_height: luminance.nrows(),
        });
    }

    let red = image.red.as_slice_mut().expect("channel buffer is contiguous");
    let green = image
        .green
        .as_slice_mut()
        .expect("channel buffer is contiguous");
    let blue = image
        .blue
        .as_slice_mut()
        .expect("channel buffer is contiguous");
    let lum = luminance.as_slice().expect("channel buffer is contiguous");

    for i in 0..lum.len() {
        let l = lum[i];
        if !l.is_finite() {
            continue;
        }
        let current = (red[i] + green[i] + blue[i]) / 3.0;
        if current.abs() > EPSILON && current.is_finite() {
            let gain = l / current;
            red[i] *= gain;
            green[i] *= gain;
            blue[i] *= gain;
        } else {
            red[i] = l;
            green[i] = l;
            blue[i] = l;
        }
    }
    Ok(())
}
