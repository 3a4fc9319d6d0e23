use tracing::info;

use crate::error::{Result, StackError};
use crate::frame::Frame;
use crate::stats::median_in_place;

/// Pick the alignment/normalization reference frame.
///
/// Frames are scored by
/// `hfr * (1 + |stars - median_stars| / median_stars) / sqrt(stars)`;
/// the lowest score wins, i.e. tight stars and a typical star count.
/// Ties break toward lower noise, then lower id. Fails when no frame has
/// any detectable stars.
pub fn select_reference(frames: &[Frame]) -> Result<(usize, f32)> {
    let mut star_counts: Vec<f32> = frames
        .iter()
        .filter(|f| !f.stars.is_empty())
        .map(|f| f.stars.len() as f32)
        .collect();
    if star_counts.is_empty() {
        return Err(StackError::NoReference);
    }
    let median_count = median_in_place(&mut star_counts).max(1.0);

    let mut best: Option<(usize, f32)> = None;
    for (index, frame) in frames.iter().enumerate() {
        if frame.stars.is_empty() {
            continue;
        }
        let count = frame.stars.len() as f32;
        let score = frame.hfr * (1.0 + (count - median_count).abs() / median_count) / count.sqrt();

        let better = match best {
            None => true,
            Some((best_index, best_score)) => {
                if (score - best_score).abs() > f32::EPSILON {
                    score < best_score
                } else {
                    let noise = frame.stats.map(|s| s.noise).unwrap_or(f32::MAX);
                    let best_noise = frames[best_index].stats.map(|s| s.noise).unwrap_or(f32::MAX);
                    noise < best_noise
                        || (noise == best_noise && frame.id < frames[best_index].id)
                }
            }
        };
        if better {
            best = Some((index, score));
        }
    }

    let (index, score) = best.ok_or(StackError::NoReference)?;
    info!(
        frame = frames[index].id,
        score,
        stars = frames[index].stars.len(),
        hfr = frames[index].hfr,
        "Selected reference frame"
    );
    Ok((index, score))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Star;
    use crate::frame::{Frame, FrameHeader};
    use ndarray::Array2;

    fn frame_with_stars(id: usize, star_count: usize, hfr: f32) -> Frame {
        let mut frame = Frame::new(id, Array2::zeros((4, 4)), FrameHeader::default());
        frame.stars = (0..star_count)
            .map(|i| Star {
                x: i as f32,
                y: i as f32,
                mass: 1.0,
                hfr,
            })
            .collect();
        frame.hfr = hfr;
        frame
    }

    #[test]
    fn prefers_tight_stars() {
        let frames = vec![
            frame_with_stars(0, 20, 3.0),
            frame_with_stars(1, 20, 1.5),
            frame_with_stars(2, 20, 2.5),
        ];
        let (index, _) = select_reference(&frames).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn fails_without_stars() {
        let frames = vec![frame_with_stars(0, 0, 0.0)];
        assert!(matches!(
            select_reference(&frames),
            Err(StackError::NoReference)
        ));
    }
}
