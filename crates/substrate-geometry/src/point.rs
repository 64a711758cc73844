//! S3 point type: unit 4-vectors and the centroid/normalize operations the
//! rest of the geometry sub-system builds on.

/// A point in 4-space, used both as a raw sum accumulator and, once
/// normalized, as a point on the unit 3-sphere S3.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Vec4 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

/// Euclidean norms below this are treated as numerically zero; below this
/// threshold `normalize` falls back to the canonical basepoint rather than
/// dividing by a near-zero length. See `spec.md` §3, "Normalization".
pub const NORM_EPSILON: f64 = 1e-10;

/// The canonical basepoint on S3, used whenever normalization would
/// otherwise divide by (near) zero, for example the centroid of two
/// antipodal points.
pub const BASEPOINT: Vec4 = Vec4 {
    x: 1.0,
    y: 0.0,
    z: 0.0,
    w: 0.0,
};

impl Vec4 {
    pub const ZERO: Vec4 = Vec4 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Vec4 { x, y, z, w }
    }

    #[inline]
    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt()
    }

    #[inline]
    pub fn add(&self, other: &Vec4) -> Vec4 {
        Vec4::new(
            self.x + other.x,
            self.y + other.y,
            self.z + other.z,
            self.w + other.w,
        )
    }

    #[inline]
    pub fn scale(&self, s: f64) -> Vec4 {
        Vec4::new(self.x * s, self.y * s, self.z * s, self.w * s)
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.x, self.y, self.z, self.w]
    }

    pub fn from_array(a: [f64; 4]) -> Self {
        Vec4::new(a[0], a[1], a[2], a[3])
    }

    /// Raw little-endian bytes of the four components, in x,y,z,w order.
    /// Used when hashing a trajectory's points (`phys_id` derivation).
    pub fn to_le_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[0..8].copy_from_slice(&self.x.to_le_bytes());
        out[8..16].copy_from_slice(&self.y.to_le_bytes());
        out[16..24].copy_from_slice(&self.z.to_le_bytes());
        out[24..32].copy_from_slice(&self.w.to_le_bytes());
        out
    }
}

/// Normalize `v` to unit length, or return [`BASEPOINT`] if `v`'s norm is
/// below [`NORM_EPSILON`].
///
/// This fallback is load-bearing, not an error path: a centroid of
/// antipodal points has near-zero norm, and without this policy the S3
/// invariant (`‖centroid‖ = 1`) and the downstream Hilbert indexing would
/// both be undefined for that input. See `spec.md` §9.
pub fn normalize(v: &Vec4) -> Vec4 {
    let n = v.norm();
    if n > NORM_EPSILON {
        v.scale(1.0 / n)
    } else {
        BASEPOINT
    }
}

/// Sum `points` and normalize the result. Returns [`BASEPOINT`] for an
/// empty slice or a near-zero sum.
pub fn centroid(points: &[Vec4]) -> Vec4 {
    let sum = points.iter().fold(Vec4::ZERO, |acc, p| acc.add(p));
    normalize(&sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_unit_vector_is_identity() {
        let v = Vec4::new(1.0, 0.0, 0.0, 0.0);
        let n = normalize(&v);
        assert!((n.norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn normalize_near_zero_falls_back_to_basepoint() {
        let v = Vec4::new(1e-12, 0.0, 0.0, 0.0);
        assert_eq!(normalize(&v), BASEPOINT);
    }

    #[test]
    fn centroid_of_antipodal_points_is_basepoint() {
        let a = Vec4::new(0.5, 0.5, 0.5, 0.5);
        let b = Vec4::new(-0.5, -0.5, -0.5, -0.5);
        assert_eq!(centroid(&[a, b]), BASEPOINT);
    }

    #[test]
    fn centroid_normalizes_to_unit_length() {
        let pts = vec![
            Vec4::new(1.0, 0.0, 0.0, 0.0),
            Vec4::new(0.0, 1.0, 0.0, 0.0),
            Vec4::new(0.0, 0.0, 1.0, 0.0),
        ];
        let c = centroid(&pts);
        assert!((c.norm() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn centroid_of_empty_slice_is_basepoint() {
        assert_eq!(centroid(&[]), BASEPOINT);
    }
}
