//! Bit-exact record wire formats (`spec.md` §6). These are the encodings a
//! relational backend would put on the wire; [`super::RedbStore`] reuses
//! them verbatim as its on-disk row layout so the reference store and a
//! future SQL-backed store agree byte for byte on geometry encoding.

use substrate_geometry::Vec4;
use substrate_hash::Hash128;

/// WKB type code for a `POINT ZM`.
const WKB_POINT_ZM: u32 = 0xC000_0001;
/// WKB type code for a `LINESTRING ZM`.
const WKB_LINESTRING_ZM: u32 = 0xC000_0002;
/// Little-endian byte order marker used by both WKB encodings here.
const WKB_NDR: u8 = 0x01;

/// Render a [`Hash128`] as lowercase `8-4-4-4-12` hex, the raw hash bytes
/// with no RFC 4122 version/variant mangling.
pub fn uuid_string(id: &Hash128) -> String {
    id.to_uuid()
}

/// Hilbert index as 16 raw bytes, big-endian `hi` then `lo`.
pub fn hilbert_be_bytes(index: &substrate_geometry::HilbertIndex) -> [u8; 16] {
    index.to_be_bytes()
}

/// `POINT ZM` WKB: 1 endian byte, 4-byte type, then X/Y/Z/M as
/// little-endian IEEE-754 doubles. Always exactly 37 bytes.
pub fn point_zm_wkb(point: &Vec4) -> [u8; 37] {
    let mut out = [0u8; 37];
    out[0] = WKB_NDR;
    out[1..5].copy_from_slice(&WKB_POINT_ZM.to_le_bytes());
    out[5..13].copy_from_slice(&point.x.to_le_bytes());
    out[13..21].copy_from_slice(&point.y.to_le_bytes());
    out[21..29].copy_from_slice(&point.z.to_le_bytes());
    out[29..37].copy_from_slice(&point.w.to_le_bytes());
    out
}

/// Decode a `POINT ZM` WKB blob produced by [`point_zm_wkb`].
pub fn point_zm_from_wkb(bytes: &[u8; 37]) -> Vec4 {
    let x = f64::from_le_bytes(bytes[5..13].try_into().unwrap());
    let y = f64::from_le_bytes(bytes[13..21].try_into().unwrap());
    let z = f64::from_le_bytes(bytes[21..29].try_into().unwrap());
    let w = f64::from_le_bytes(bytes[29..37].try_into().unwrap());
    Vec4::new(x, y, z, w)
}

/// `LINESTRING ZM` WKB: endian byte, type, little-endian `u32` point
/// count, then 32 bytes per point (no M-dimension padding beyond the
/// point's own four doubles, matching [`point_zm_wkb`]'s X/Y/Z/W layout
/// minus its header).
pub fn linestring_zm_wkb(points: &[Vec4]) -> Vec<u8> {
    let mut out = Vec::with_capacity(9 + points.len() * 32);
    out.push(WKB_NDR);
    out.extend_from_slice(&WKB_LINESTRING_ZM.to_le_bytes());
    out.extend_from_slice(&(points.len() as u32).to_le_bytes());
    for p in points {
        out.extend_from_slice(&p.to_le_bytes());
    }
    out
}

/// Decode a `LINESTRING ZM` WKB blob produced by [`linestring_zm_wkb`].
/// Errors if `bytes` is shorter than the header or than the point count
/// it declares, rather than panicking on a truncated row.
pub fn linestring_zm_from_wkb(bytes: &[u8]) -> Result<Vec<Vec4>, String> {
    if bytes.len() < 9 {
        return Err(format!("linestring WKB too short: {} bytes", bytes.len()));
    }
    let count = u32::from_le_bytes(bytes[5..9].try_into().unwrap()) as usize;
    let needed = 9 + count * 32;
    if bytes.len() < needed {
        return Err(format!(
            "linestring WKB declares {count} points but has only {} of {needed} bytes",
            bytes.len()
        ));
    }
    let mut out = Vec::with_capacity(count);
    let mut offset = 9;
    for _ in 0..count {
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes[offset..offset + 32]);
        out.push(Vec4::from_array(array_to_f64x4(arr)));
        offset += 32;
    }
    Ok(out)
}

fn array_to_f64x4(bytes: [u8; 32]) -> [f64; 4] {
    [
        f64::from_le_bytes(bytes[0..8].try_into().unwrap()),
        f64::from_le_bytes(bytes[8..16].try_into().unwrap()),
        f64::from_le_bytes(bytes[16..24].try_into().unwrap()),
        f64::from_le_bytes(bytes[24..32].try_into().unwrap()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_string_is_verbatim_grouped() {
        let id = Hash128([0x12; 16]);
        let s = uuid_string(&id);
        assert_eq!(s.len(), 36);
        assert_eq!(&s[8..9], "-");
    }

    #[test]
    fn point_zm_wkb_is_37_bytes_and_round_trips() {
        let p = Vec4::new(0.1, 0.2, 0.3, 0.4);
        let wkb = point_zm_wkb(&p);
        assert_eq!(wkb.len(), 37);
        assert_eq!(wkb[0], WKB_NDR);
        let back = point_zm_from_wkb(&wkb);
        assert_eq!(back, p);
    }

    #[test]
    fn linestring_zm_wkb_round_trips() {
        let points = vec![
            Vec4::new(1.0, 0.0, 0.0, 0.0),
            Vec4::new(0.0, 1.0, 0.0, 0.0),
            Vec4::new(0.0, 0.0, 1.0, 0.0),
        ];
        let wkb = linestring_zm_wkb(&points);
        assert_eq!(wkb.len(), 9 + 3 * 32);
        let back = linestring_zm_from_wkb(&wkb).unwrap();
        assert_eq!(back, points);
    }

    #[test]
    fn empty_linestring_encodes_zero_count() {
        let wkb = linestring_zm_wkb(&[]);
        assert_eq!(wkb.len(), 9);
        assert!(linestring_zm_from_wkb(&wkb).unwrap().is_empty());
    }

    #[test]
    fn truncated_linestring_wkb_errors_instead_of_panicking() {
        let points = vec![Vec4::new(1.0, 0.0, 0.0, 0.0), Vec4::new(0.0, 1.0, 0.0, 0.0)];
        let mut wkb = linestring_zm_wkb(&points);
        wkb.truncate(wkb.len() - 1);
        assert!(linestring_zm_from_wkb(&wkb).is_err());
    }

    #[test]
    fn linestring_wkb_shorter_than_header_errors() {
        assert!(linestring_zm_from_wkb(&[0x01, 0x02, 0x00, 0x00]).is_err());
    }
}
