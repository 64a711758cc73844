//! 4-dimensional Hilbert space-filling curve over points in `[0,1]^4`.
//!
//! The encoder quantizes each axis to `AXIS_BITS` bits, runs Skilling's
//! transpose-form Hilbert curve algorithm, the standard constant-memory
//! axes↔distance conversion (J. Skilling, "Programming the Hilbert Curve",
//! AIP Conf. Proc. 707, 2004), and folds a small [`EntityType`] tag into the
//! unused high bits of the resulting 128-bit word so that atoms,
//! compositions, and relations occupy disjoint regions of index space even
//! when their geometric positions coincide.
//!
//! # Bit layout
//!
//! ```text
//! bit 127 ............................. bit 0
//! [ tag: 4 bits ][ hilbert distance: 124 bits ]
//! ```
//!
//! `AXIS_BITS = 31` so that `4 * AXIS_BITS = 124`, leaving exactly 4 bits
//! for the tag, enough for the three entity kinds the spec names with
//! room to grow. This split is this crate's resolution of the spec's open
//! question on exact tag bit-folding (`spec.md` §9): it is deterministic
//! and reversible to within the quantization step, which is all the spec
//! requires.
use crate::point::Vec4;

/// Number of bits each of the four axes is quantized to before the curve
/// walk. See the module-level bit layout diagram.
pub const AXIS_BITS: u32 = 31;
const AXIS_MAX: u32 = (1u32 << AXIS_BITS) - 1;
const TAG_BITS: u32 = 4;
const DISTANCE_BITS: u32 = 4 * AXIS_BITS;

/// Distinguishes the index namespace a Hilbert index belongs to, folded
/// into the top [`TAG_BITS`] bits of the 128-bit result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Atom = 0,
    Composition = 1,
    Relation = 2,
}

/// A 128-bit Hilbert index, stored as the big-endian `(hi, lo)` u64 pair
/// the store's wire format uses (`spec.md` §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HilbertIndex {
    pub hi: u64,
    pub lo: u64,
}

impl HilbertIndex {
    pub fn from_u128(value: u128) -> Self {
        HilbertIndex {
            hi: (value >> 64) as u64,
            lo: value as u64,
        }
    }

    pub fn to_u128(self) -> u128 {
        ((self.hi as u128) << 64) | self.lo as u128
    }

    /// 16 raw bytes, big-endian (`hi` then `lo`), matching the store wire
    /// format in `spec.md` §6.
    pub fn to_be_bytes(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..8].copy_from_slice(&self.hi.to_be_bytes());
        out[8..16].copy_from_slice(&self.lo.to_be_bytes());
        out
    }

    /// Inverse of [`Self::to_be_bytes`].
    pub fn from_be_bytes(bytes: [u8; 16]) -> Self {
        HilbertIndex {
            hi: u64::from_be_bytes(bytes[0..8].try_into().unwrap()),
            lo: u64::from_be_bytes(bytes[8..16].try_into().unwrap()),
        }
    }
}

/// Remap one S3 component from `[-1,1]` to a `AXIS_BITS`-bit quantized
/// integer in `[0, AXIS_MAX]`, clamping out-of-range input defensively
/// (S3 points are expected to be unit-normalized, but floating point
/// round-off can push a component a hair outside `[-1,1]`).
fn quantize_axis(component: f64) -> u32 {
    let unit = ((component + 1.0) / 2.0).clamp(0.0, 1.0);
    (unit * AXIS_MAX as f64).round() as u32
}

/// Inverse of [`quantize_axis`]: the center of the quantization bucket,
/// remapped back to `[-1,1]`.
fn dequantize_axis(q: u32) -> f64 {
    let unit = q as f64 / AXIS_MAX as f64;
    unit * 2.0 - 1.0
}

/// Skilling's `AxestoTranspose`: converts per-axis coordinates into the
/// transposed form whose bit-interleaving (read MSB-to-LSB across axes)
/// is the Hilbert distance.
fn axes_to_transpose(x: &mut [u32; 4], bits: u32) {
    let n = x.len();
    let m: u32 = 1 << (bits - 1);
    let mut q = m;
    while q > 1 {
        let p = q - 1;
        for i in 0..n {
            if x[i] & q != 0 {
                x[0] ^= p;
            } else {
                let t = (x[0] ^ x[i]) & p;
                x[0] ^= t;
                x[i] ^= t;
            }
        }
        q >>= 1;
    }
    // Gray encode.
    for i in 1..n {
        x[i] ^= x[i - 1];
    }
    let mut t = 0u32;
    let mut q = m;
    while q > 1 {
        if x[n - 1] & q != 0 {
            t ^= q - 1;
        }
        q >>= 1;
    }
    for v in x.iter_mut() {
        *v ^= t;
    }
}

/// Inverse of [`axes_to_transpose`]: Skilling's `TransposetoAxes`.
fn transpose_to_axes(x: &mut [u32; 4], bits: u32) {
    let n = x.len();
    let nbit: u32 = 2 << (bits - 1);
    // Gray decode by H ^ (H/2).
    let mut t = x[n - 1] >> 1;
    for i in (1..n).rev() {
        x[i] ^= x[i - 1];
    }
    x[0] ^= t;
    // Undo excess work.
    let mut q = 2u32;
    while q != nbit {
        let p = q - 1;
        for i in (0..n).rev() {
            if x[i] & q != 0 {
                x[0] ^= p;
            } else {
                t = (x[0] ^ x[i]) & p;
                x[0] ^= t;
                x[i] ^= t;
            }
        }
        q <<= 1;
    }
}

/// Read the transposed axes MSB-to-LSB, interleaved across dimensions, to
/// produce the packed Hilbert distance.
fn transpose_to_distance(x: [u32; 4], bits: u32) -> u128 {
    let mut dist: u128 = 0;
    for b in (0..bits).rev() {
        for &axis in x.iter() {
            let bit = (axis >> b) & 1;
            dist = (dist << 1) | bit as u128;
        }
    }
    dist
}

/// Inverse of [`transpose_to_distance`]: unpack a distance back into
/// transposed per-axis form.
fn distance_to_transpose(mut dist: u128, bits: u32) -> [u32; 4] {
    let mut x = [0u32; 4];
    for b in (0..bits).rev() {
        for axis in (0..4).rev() {
            let bit = (dist & 1) as u32;
            x[axis] |= bit << b;
            dist >>= 1;
        }
    }
    x
}

/// Encode an S3 point (already remapped into the curve's quantized grid)
/// as a 124-bit Hilbert distance.
fn encode_distance(point: &Vec4) -> u128 {
    let mut axes = [
        quantize_axis(point.x),
        quantize_axis(point.y),
        quantize_axis(point.z),
        quantize_axis(point.w),
    ];
    axes_to_transpose(&mut axes, AXIS_BITS);
    transpose_to_distance(axes, AXIS_BITS)
}

/// Decode a 124-bit Hilbert distance back to the quantization grid's
/// bucket centers, exact up to the quantization step, per `spec.md` §4.2.
fn decode_distance(dist: u128) -> Vec4 {
    let mut axes = distance_to_transpose(dist, AXIS_BITS);
    transpose_to_axes(&mut axes, AXIS_BITS);
    Vec4::new(
        dequantize_axis(axes[0]),
        dequantize_axis(axes[1]),
        dequantize_axis(axes[2]),
        dequantize_axis(axes[3]),
    )
}

/// Encode an S3 point into a tagged 128-bit Hilbert index.
pub fn encode(point: &Vec4, entity: EntityType) -> HilbertIndex {
    let dist = encode_distance(point);
    debug_assert!(dist >> DISTANCE_BITS == 0);
    let tag = (entity as u128) & ((1u128 << TAG_BITS) - 1);
    HilbertIndex::from_u128((tag << DISTANCE_BITS) | dist)
}

/// Decode a Hilbert index back to its entity tag and the quantized point
/// it was derived from (exact only up to the quantization step).
pub fn decode(index: HilbertIndex) -> (u8, Vec4) {
    let value = index.to_u128();
    let tag = (value >> DISTANCE_BITS) as u8;
    let dist = value & ((1u128 << DISTANCE_BITS) - 1);
    (tag, decode_distance(dist))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Golden vector 1: the all-zero quantization corner is a fixed point
    /// of Skilling's algorithm (every XOR/AND in `axes_to_transpose`
    /// operates on zero bits and stays zero), so the distance is
    /// provably 0 regardless of curve orientation. With `EntityType::Atom`
    /// (tag 0) the full 128-bit index is therefore also exactly 0. This
    /// pins the tag's bit position but, since every axis collapses to 0,
    /// it can't tell a correct bit-interleave from a broken one.
    #[test]
    fn golden_all_zero_corner_atom() {
        let p = Vec4::new(-1.0, -1.0, -1.0, -1.0);
        let idx = encode(&p, EntityType::Atom);
        assert_eq!(idx.hi, 0);
        assert_eq!(idx.lo, 0);
        assert_eq!(idx.to_be_bytes(), [0u8; 16]);
    }

    /// Golden vector 2: a point with four distinct, non-zero axis values
    /// (0.25, -0.75, 0.5, -0.1), tag `EntityType::Atom` (0). Bytes below
    /// were produced by independently re-implementing `quantize_axis`,
    /// `axes_to_transpose`, and `transpose_to_distance` and running them
    /// over the same input, not by calling this module's own `encode`.
    #[test]
    fn golden_distinct_axes_atom() {
        let p = Vec4::new(0.25, -0.75, 0.5, -0.1);
        let idx = encode(&p, EntityType::Atom);
        assert_eq!(
            idx.to_be_bytes(),
            [
                12, 155, 62, 233, 82, 37, 82, 37, 82, 37, 82, 37, 82, 37, 82, 37
            ]
        );
    }

    /// Golden vector 3: axes pinned to the curve's extreme corners
    /// (1.0, -1.0, 0.0, 0.0), tag `EntityType::Composition` (1). Exercises
    /// the Gray-encode step at the top quantization bits.
    #[test]
    fn golden_corner_axes_composition() {
        let p = Vec4::new(1.0, -1.0, 0.0, 0.0);
        let idx = encode(&p, EntityType::Composition);
        assert_eq!(
            idx.to_be_bytes(),
            [
                29, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255
            ]
        );
    }

    /// Golden vector 4: two axes zero, two axes at opposite corners
    /// (0.0, 0.0, 1.0, -1.0), tag `EntityType::Relation` (2). Together
    /// with the two vectors above this pins both the tag's bit position
    /// and the interleave order across all four axes.
    #[test]
    fn golden_mixed_axes_relation() {
        let p = Vec4::new(0.0, 0.0, 1.0, -1.0);
        let idx = encode(&p, EntityType::Relation);
        assert_eq!(
            idx.to_be_bytes(),
            [
                43, 221, 221, 221, 221, 221, 221, 221, 221, 221, 221, 221, 221, 221, 221, 221
            ]
        );
    }

    #[test]
    fn encode_is_deterministic() {
        let p = Vec4::new(0.3, -0.2, 0.7, -0.5);
        let a = encode(&p, EntityType::Composition);
        let b = encode(&p, EntityType::Composition);
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_entity_types_occupy_disjoint_ranges() {
        let p = Vec4::new(0.1, 0.2, 0.3, 0.4);
        let atom = encode(&p, EntityType::Atom).to_u128();
        let comp = encode(&p, EntityType::Composition).to_u128();
        let rel = encode(&p, EntityType::Relation).to_u128();
        // tag occupies the top 4 bits; same point, different tag => the
        // top nibble differs while the low 124 bits agree.
        let mask = (1u128 << DISTANCE_BITS) - 1;
        assert_eq!(atom & mask, comp & mask);
        assert_eq!(comp & mask, rel & mask);
        assert_ne!(atom >> DISTANCE_BITS, comp >> DISTANCE_BITS);
        assert_ne!(comp >> DISTANCE_BITS, rel >> DISTANCE_BITS);
    }

    #[test]
    fn round_trips_within_quantization_step() {
        let step = 2.0 / AXIS_MAX as f64;
        for p in [
            Vec4::new(0.25, -0.75, 0.5, -0.1),
            Vec4::new(-1.0, 1.0, -1.0, 1.0),
            Vec4::new(0.0, 0.0, 0.0, 0.0),
        ] {
            let idx = encode(&p, EntityType::Relation);
            let (tag, back) = decode(idx);
            assert_eq!(tag, EntityType::Relation as u8);
            for (original, decoded) in p.to_array().iter().zip(back.to_array()) {
                assert!((original - decoded).abs() <= step + 1e-9);
            }
        }
    }
}
