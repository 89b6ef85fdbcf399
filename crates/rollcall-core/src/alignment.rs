//! Face alignment to the canonical ArcFace crop.
//!
//! A 4-DOF similarity (uniform scale, rotation, translation) is fitted in
//! closed form from the five detected landmarks to the InsightFace reference
//! positions, then the luma frame is resampled into a 112×112 crop.

/// ArcFace reference landmarks for a 112×112 output.
pub const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: usize = 112;

/// Similarity transform `dst = [[a, -b], [b, a]] * src + [tx, ty]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    pub const IDENTITY: Similarity = Similarity {
        a: 1.0,
        b: 0.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Least-squares fit mapping `src` points onto `dst` points.
    ///
    /// Degenerate input (all source points coincident) yields the identity.
    pub fn estimate(src: &[(f32, f32)], dst: &[(f32, f32)]) -> Similarity {
        let n = src.len().min(dst.len());
        if n == 0 {
            return Self::IDENTITY;
        }

        let centroid = |pts: &[(f32, f32)]| {
            let (sx, sy) = pts[..n]
                .iter()
                .fold((0.0f32, 0.0f32), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n as f32, sy / n as f32)
        };
        let (spx, spy) = centroid(src);
        let (dpx, dpy) = centroid(dst);

        let mut norm = 0.0f32;
        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()).take(n) {
            let (px, py) = (sx - spx, sy - spy);
            let (qx, qy) = (dx - dpx, dy - dpy);
            norm += px * px + py * py;
            dot += px * qx + py * qy;
            cross += px * qy - py * qx;
        }

        if norm < 1e-12 {
            return Self::IDENTITY;
        }

        let a = dot / norm;
        let b = cross / norm;
        Similarity {
            a,
            b,
            tx: dpx - (a * spx - b * spy),
            ty: dpy - (b * spx + a * spy),
        }
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Inverse mapping, `None` if the transform collapses the plane.
    pub fn invert(&self) -> Option<Similarity> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let a = self.a / det;
        let b = -self.b / det;
        Some(Similarity {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }
}

/// Bilinear sample of a luma buffer; out-of-bounds reads are black.
fn sample_bilinear(frame: &[u8], width: usize, height: usize, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let at = |px: i64, py: i64| -> f32 {
        if px < 0 || py < 0 || px >= width as i64 || py >= height as i64 {
            return 0.0;
        }
        frame
            .get(py as usize * width + px as usize)
            .copied()
            .unwrap_or(0) as f32
    };

    let top = at(x0, y0) * (1.0 - fx) + at(x0 + 1, y0) * fx;
    let bottom = at(x0, y0 + 1) * (1.0 - fx) + at(x0 + 1, y0 + 1) * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Resample `frame` through `transform` into an `out_size`×`out_size` crop.
pub fn warp(
    frame: &[u8],
    width: u32,
    height: u32,
    transform: &Similarity,
    out_size: usize,
) -> Vec<u8> {
    let mut out = vec![0u8; out_size * out_size];
    let Some(inverse) = transform.invert() else {
        return out;
    };

    for oy in 0..out_size {
        for ox in 0..out_size {
            let (sx, sy) = inverse.apply((ox as f32, oy as f32));
            let v = sample_bilinear(frame, width as usize, height as usize, sx, sy);
            out[oy * out_size + ox] = v.round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}

/// Align a located face to the canonical 112×112 ArcFace crop.
pub fn align_face(frame: &[u8], width: u32, height: u32, landmarks: &[(f32, f32); 5]) -> Vec<u8> {
    let transform = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS);
    warp(frame, width, height, &transform, ALIGNED_SIZE)
}
