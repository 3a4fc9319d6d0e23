use ndarray::Array2;

/// Incremental stack-of-stacks accumulator.
///
/// Batch results fold in as a frame-count-weighted running mean, so only
/// one batch of frames is ever resident. This fold is exact for mean-like
/// estimators; for median and sigma-clip modes the combined result is an
/// approximation, recorded as such in the output provenance.
#[derive(Debug, Default)]
pub struct IncrementalStack {
    accumulator: Option<Array2<f32>>,
    frames: f32,
}

impl IncrementalStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one batch result representing `batch_frames` input frames.
    ///
    /// Non-finite pixels on either side fall back to the other side's
    /// value, so a rejected pixel in one batch does not poison the total.
    pub fn add(&mut self, batch: &Array2<f32>, batch_frames: f32) {
        match &mut self.accumulator {
            None => {
                self.accumulator = Some(batch.clone());
                self.frames = batch_frames;
            }
            Some(accumulator) => {
                let prior = self.frames;
                let total = prior + batch_frames;
                accumulator.zip_mut_with(batch, |a, &b| {
                    if !b.is_finite() {
                        return;
                    }
                    if !a.is_finite() {
                        *a = b;
                        return;
                    }
                    *a = (*a * prior + b * batch_frames) / total;
                });
                self.frames = total;
            }
        }
    }

    /// Total frames folded in so far.
    pub fn frames(&self) -> f32 {
        self.frames
    }

    /// The accumulated image, if any batch was added.
    pub fn finalize(self) -> Option<Array2<f32>> {
        self.accumulator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_fold_matches_single_pass_mean() {
        let a = Array2::from_elem((4, 4), 1.0f32);
        let b = Array2::from_elem((4, 4), 4.0f32);

        let mut incremental = IncrementalStack::new();
        incremental.add(&a, 3.0);
        incremental.add(&b, 1.0);

        let result = incremental.finalize().unwrap();
        // (1*3 + 4*1) / 4 = 1.75
        assert!((result[[2, 2]] - 1.75).abs() < 1e-6);
    }

    #[test]
    fn non_finite_batch_pixels_are_skipped() {
        let a = Array2::from_elem((2, 2), 2.0f32);
        let mut b = Array2::from_elem((2, 2), 6.0f32);
        b[[0, 0]] = f32::NAN;

        let mut incremental = IncrementalStack::new();
        incremental.add(&a, 1.0);
        incremental.add(&b, 1.0);

        let result = incremental.finalize().unwrap();
        assert!((result[[0, 0]] - 2.0).abs() < 1e-6);
        assert!((result[[1, 1]] - 4.0).abs() < 1e-6);
    }
}
