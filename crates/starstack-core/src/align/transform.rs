use crate::consts::EPSILON;

/// Similarity transform: rotation + uniform scale + translation.
///
/// Maps frame coordinates onto reference coordinates:
/// `x' = s*cos(r)*x - s*sin(r)*y + tx`, `y' = s*sin(r)*x + s*cos(r)*y + ty`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Similarity {
    pub scale: f32,
    pub rotation: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Default for Similarity {
    fn default() -> Self {
        Self::identity()
    }
}

impl Similarity {
    pub fn identity() -> Self {
        Self {
            scale: 1.0,
            rotation: 0.0,
            tx: 0.0,
            ty: 0.0,
        }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let (sin, cos) = self.rotation.sin_cos();
        let a = self.scale * cos;
        let b = self.scale * sin;
        (a * x - b * y + self.tx, b * x + a * y + self.ty)
    }

    pub fn inverse(&self) -> Similarity {
        let scale = 1.0 / self.scale;
        let rotation = -self.rotation;
        let (sin, cos) = rotation.sin_cos();
        let a = scale * cos;
        let b = scale * sin;
        Similarity {
            scale,
            rotation,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        }
    }

    /// Least-squares similarity fit mapping `pairs[i].0` onto `pairs[i].1`.
    ///
    /// Needs at least two distinct points; returns None for degenerate
    /// configurations.
    pub fn from_pairs(pairs: &[((f32, f32), (f32, f32))]) -> Option<Similarity> {
        if pairs.len() < 2 {
            return None;
        }
        let n = pairs.len() as f64;
        let mut px_mean = 0.0f64;
        let mut py_mean = 0.0f64;
        let mut qx_mean = 0.0f64;
        let mut qy_mean = 0.0f64;
        for &((px, py), (qx, qy)) in pairs {
            px_mean += px as f64;
            py_mean += py as f64;
            qx_mean += qx as f64;
            qy_mean += qy as f64;
        }
        px_mean /= n;
        py_mean /= n;
        qx_mean /= n;
        qy_mean /= n;

        let mut dot = 0.0f64;
        let mut cross = 0.0f64;
        let mut norm = 0.0f64;
        for &((px, py), (qx, qy)) in pairs {
            let px = px as f64 - px_mean;
            let py = py as f64 - py_mean;
            let qx = qx as f64 - qx_mean;
            let qy = qy as f64 - qy_mean;
            dot += px * qx + py * qy;
            cross += px * qy - py * qx;
            norm += px * px + py * py;
        }
        if norm < EPSILON as f64 {
            return None;
        }

        let a = dot / norm;
        let b = cross / norm;
        let scale = (a * a + b * b).sqrt();
        if scale < EPSILON as f64 {
            return None;
        }
        let rotation = b.atan2(a);
        let tx = qx_mean - (a * px_mean - b * py_mean);
        let ty = qy_mean - (b * px_mean + a * py_mean);

        Some(Similarity {
            scale: scale as f32,
            rotation: rotation as f32,
            tx: tx as f32,
            ty: ty as f32,
        })
    }

    /// Root-mean-square residual of the fit over `pairs`.
    pub fn rms_residual(&self, pairs: &[((f32, f32), (f32, f32))]) -> f32 {
        if pairs.is_empty() {
            return 0.0;
        }
        let mut sum = 0.0f64;
        for &((px, py), (qx, qy)) in pairs {
            let (mx, my) = self.apply(px, py);
            let dx = (mx - qx) as f64;
            let dy = (my - qy) as f64;
            sum += dx * dx + dy * dy;
        }
        ((sum / pairs.len() as f64).sqrt()) as f32
    }
}

/// Accepted alignment of a frame onto the reference.
#[derive(Clone, Copy, Debug)]
pub struct AlignResult {
    pub transform: Similarity,
    pub residual_px: f32,
    pub match_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_recovers_known_transform() {
        let truth = Similarity {
            scale: 1.02,
            rotation: 0.05,
            tx: 3.5,
            ty: -1.25,
        };
        let points = [(0.0, 0.0), (10.0, 0.0), (0.0, 10.0), (7.0, 4.0)];
        let pairs: Vec<_> = points.iter().map(|&(x, y)| ((x, y), truth.apply(x, y))).collect();

        let fitted = Similarity::from_pairs(&pairs).unwrap();
        assert!((fitted.scale - truth.scale).abs() < 1e-4);
        assert!((fitted.rotation - truth.rotation).abs() < 1e-4);
        assert!((fitted.tx - truth.tx).abs() < 1e-3);
        assert!(fitted.rms_residual(&pairs) < 1e-3);
    }

    #[test]
    fn inverse_round_trips() {
        let t = Similarity {
            scale: 0.97,
            rotation: -0.2,
            tx: 12.0,
            ty: 5.0,
        };
        let (x, y) = t.apply(42.0, 17.0);
        let (bx, by) = t.inverse().apply(x, y);
        assert!((bx - 42.0).abs() < 1e-3);
        assert!((by - 17.0).abs() < 1e-3);
    }
}
