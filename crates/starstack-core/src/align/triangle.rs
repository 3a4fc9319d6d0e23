use std::collections::HashMap;

use crate::consts::EPSILON;

/// A star triangle fingerprinted by its side ratios.
///
/// Side ratios normalized by the SHORTEST side are invariant under
/// translation, rotation and uniform scale. Vertices are stored ordered by
/// the side they face (shortest first), so matching triangles yield vertex
/// correspondences directly.
#[derive(Clone, Copy, Debug)]
pub struct Triangle {
    /// Star indices, `vertices[i]` opposite the i-th shortest side.
    pub vertices: [usize; 3],
    /// (mid/short, long/short), both >= 1.
    pub ratios: (f32, f32),
}

/// Resolution of the fingerprint quantization: 1% of a side ratio.
const FINGERPRINT_RESOLUTION: f32 = 100.0;

impl Triangle {
    /// Build from three stars. Returns None for degenerate (near-collinear
    /// or coincident) configurations.
    pub fn new(indices: [usize; 3], positions: [(f32, f32); 3]) -> Option<Self> {
        let d = |a: (f32, f32), b: (f32, f32)| -> f32 {
            let dx = a.0 - b.0;
            let dy = a.1 - b.1;
            (dx * dx + dy * dy).sqrt()
        };

        // Pair each side with its opposite vertex.
        let mut sides = [
            (d(positions[1], positions[2]), indices[0]),
            (d(positions[0], positions[2]), indices[1]),
            (d(positions[0], positions[1]), indices[2]),
        ];
        sides.sort_by(|a, b| a.0.total_cmp(&b.0));

        let shortest = sides[0].0;
        if shortest < 1e-3 {
            return None;
        }
        // Nearly collinear triangles have unstable fingerprints.
        if sides[0].0 + sides[1].0 <= sides[2].0 * 1.001 {
            return None;
        }

        Some(Self {
            vertices: [sides[0].1, sides[1].1, sides[2].1],
            ratios: (sides[1].0 / shortest, sides[2].0 / shortest),
        })
    }

    /// Quantized fingerprint used as hash key.
    pub fn fingerprint(&self) -> (i32, i32) {
        (
            (self.ratios.0 * FINGERPRINT_RESOLUTION).round() as i32,
            (self.ratios.1 * FINGERPRINT_RESOLUTION).round() as i32,
        )
    }

    /// Whether two fingerprints agree within one quantization step.
    pub fn matches(&self, other: &Triangle) -> bool {
        let tol = 2.0 / FINGERPRINT_RESOLUTION * self.ratios.1.max(1.0);
        (self.ratios.0 - other.ratios.0).abs() <= tol
            && (self.ratios.1 - other.ratios.1).abs() <= tol
    }
}

/// All triangles over ordered triples of the given positions.
pub fn form_triangles(positions: &[(f32, f32)]) -> Vec<Triangle> {
    let n = positions.len();
    if n < 3 {
        return Vec::new();
    }
    let mut triangles = Vec::with_capacity(n * (n - 1) * (n - 2) / 6);
    for i in 0..n {
        for j in (i + 1)..n {
            for k in (j + 1)..n {
                if let Some(tri) =
                    Triangle::new([i, j, k], [positions[i], positions[j], positions[k]])
                {
                    triangles.push(tri);
                }
            }
        }
    }
    triangles
}

/// Hash map from quantized fingerprint to triangle indices.
pub fn fingerprint_index(triangles: &[Triangle]) -> HashMap<(i32, i32), Vec<usize>> {
    let mut index: HashMap<(i32, i32), Vec<usize>> = HashMap::new();
    for (i, tri) in triangles.iter().enumerate() {
        index.entry(tri.fingerprint()).or_default().push(i);
    }
    index
}

/// Candidate matches for `query` in the indexed set: triangles whose
/// fingerprint falls in the same or an adjacent quantization bin.
pub fn candidates<'a>(
    query: &Triangle,
    index: &'a HashMap<(i32, i32), Vec<usize>>,
) -> Vec<usize> {
    let (fx, fy) = query.fingerprint();
    let mut out = Vec::new();
    for dx in -1..=1 {
        for dy in -1..=1 {
            if let Some(bucket) = index.get(&(fx + dx, fy + dy)) {
                out.extend_from_slice(bucket);
            }
        }
    }
    out
}

/// Guard against unstable fingerprints from very elongated triangles.
pub fn is_well_conditioned(tri: &Triangle) -> bool {
    tri.ratios.1 < 10.0 + EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratios_are_scale_invariant() {
        let small = Triangle::new([0, 1, 2], [(0.0, 0.0), (3.0, 0.0), (0.0, 4.0)]).unwrap();
        let large = Triangle::new([0, 1, 2], [(10.0, 10.0), (40.0, 10.0), (10.0, 50.0)]).unwrap();
        assert!((small.ratios.0 - large.ratios.0).abs() < 1e-6);
        assert!((small.ratios.1 - large.ratios.1).abs() < 1e-6);
        assert_eq!(small.fingerprint(), large.fingerprint());
    }

    #[test]
    fn collinear_points_are_rejected() {
        assert!(Triangle::new([0, 1, 2], [(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)]).is_none());
        assert!(Triangle::new([0, 1, 2], [(0.0, 0.0), (0.0, 0.0), (1.0, 1.0)]).is_none());
    }

    #[test]
    fn vertex_order_tracks_sides() {
        // 3-4-5 right triangle: the shortest side joins the first two
        // points, so its opposite vertex (the third star) leads the order.
        let tri = Triangle::new([7, 8, 9], [(0.0, 0.0), (3.0, 0.0), (0.0, 4.0)]).unwrap();
        assert_eq!(tri.vertices[0], 9);
    }

    #[test]
    fn triangle_count_is_binomial() {
        let positions = vec![
            (0.0, 0.0),
            (10.0, 0.0),
            (0.0, 10.0),
            (10.0, 10.0),
            (5.0, 15.0),
        ];
        assert_eq!(form_triangles(&positions).len(), 10);
    }
}
