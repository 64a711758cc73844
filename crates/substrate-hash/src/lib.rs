//! Content-addressed identity hashing for the substrate pipeline.
//!
//! Every entity in the substrate (atom, composition, relation, and so on)
//! is named by a 128-bit digest of a typed byte prefix over its defining
//! content. This crate provides the single primitive that derives those
//! digests and the conversions needed to move them across wire formats.
//!
//! # Algorithm
//!
//! ```text
//! H(bytes) = BLAKE3(bytes)[0..16]
//! ```
//!
//! BLAKE3 is used at its native rate and then truncated; this is the
//! documented "first N bytes" truncation mode and carries BLAKE3's usual
//! preimage/collision resistance margins for the truncated length.
//!
//! # Namespacing
//!
//! Callers are expected to prefix the hashed bytes with a single
//! discriminator byte (see [`EntityPrefix`]) so that no two entity kinds can
//! ever collide on the same digest, even if their remaining byte content is
//! identical.
//!
//! # Determinism
//!
//! [`Hash128::digest`] is a pure function: the same bytes in the same order
//! always produce the same digest, independent of process, machine, or
//! time. This is the invariant the rest of the pipeline depends on; see
//! `spec.md` §3, "Identity determinism".
use std::fmt;

/// One-byte tags that separate the identity namespaces of the data model.
///
/// Folding a distinct prefix byte into every hash input is what keeps an
/// atom id, a composition id, and a relation id from ever colliding even
/// when the remaining bytes happen to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntityPrefix {
    Atom = 0x41,
    Composition = 0x43,
    Physicality = 0x50,
    Relation = 0x52,
    CompositionSequence = 0x53,
    RelationSequence = 0x54,
}

impl EntityPrefix {
    #[inline]
    pub const fn byte(self) -> u8 {
        self as u8
    }
}

/// A 128-bit content-addressed identity.
///
/// Equality and ordering are byte-wise over the raw digest; there is no
/// semantic interpretation of the bytes beyond "the output of [`H`]".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Hash128(pub [u8; 16]);

/// Errors produced while decoding a [`Hash128`] from an external
/// representation.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum HashError {
    #[error("hex string must be exactly 32 characters, got {0}")]
    InvalidHexLength(usize),
    #[error("invalid hex digit in hash string")]
    InvalidHexDigit,
    #[error("uuid string must be 36 characters in 8-4-4-4-12 form, got {0}")]
    InvalidUuidLength(usize),
    #[error("uuid string is missing a '-' separator at the expected position")]
    InvalidUuidSeparator,
}

impl Hash128 {
    pub const LEN: usize = 16;

    /// Derive an identity by hashing a prefixed byte buffer: `H(bytes)`.
    ///
    /// Callers build `bytes` as `prefix ‖ content`; this function does not
    /// impose the prefix itself, so it can also hash already-assembled
    /// buffers (for example `content_id ‖ rel_id` for evidence ids, which
    /// carries no entity prefix per `spec.md` §3).
    #[inline]
    pub fn digest(bytes: &[u8]) -> Self {
        let full = blake3::hash(bytes);
        let mut out = [0u8; 16];
        out.copy_from_slice(&full.as_bytes()[..16]);
        Hash128(out)
    }

    /// Hash a codepoint with the [`EntityPrefix::Atom`] tag:
    /// `H(0x41 ‖ codepoint_LE_u32)`.
    #[inline]
    pub fn hash_codepoint(codepoint: u32) -> Self {
        let mut buf = [0u8; 5];
        buf[0] = EntityPrefix::Atom.byte();
        buf[1..5].copy_from_slice(&codepoint.to_le_bytes());
        Self::digest(&buf)
    }

    /// Hash an ordered sequence of identities under a single-byte prefix,
    /// concatenating their raw bytes: used for `comp_id` over atom ids and
    /// `rel_id` over the ordered pair of composition ids.
    pub fn hash_prefixed_concat(prefix: EntityPrefix, parts: &[&Hash128]) -> Self {
        let mut buf = Vec::with_capacity(1 + parts.len() * Self::LEN);
        buf.push(prefix.byte());
        for part in parts {
            buf.extend_from_slice(&part.0);
        }
        Self::digest(&buf)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Encode as 32 lowercase hex characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Decode from a 32-character lowercase (or uppercase) hex string.
    pub fn from_hex(s: &str) -> Result<Self, HashError> {
        if s.len() != 32 {
            return Err(HashError::InvalidHexLength(s.len()));
        }
        let mut out = [0u8; 16];
        hex::decode_to_slice(s, &mut out).map_err(|_| HashError::InvalidHexDigit)?;
        Ok(Hash128(out))
    }

    /// Encode in canonical UUID `8-4-4-4-12` grouping. The 16 bytes are
    /// reproduced verbatim: no RFC 4122 version/variant bits are set,
    /// since these are content hashes, not random or time-based UUIDs.
    pub fn to_uuid(&self) -> String {
        let h = hex::encode(self.0);
        format!(
            "{}-{}-{}-{}-{}",
            &h[0..8],
            &h[8..12],
            &h[12..16],
            &h[16..20],
            &h[20..32]
        )
    }

    /// Decode a canonical UUID-grouped hex string back to its raw 16 bytes.
    pub fn from_uuid(s: &str) -> Result<Self, HashError> {
        if s.len() != 36 {
            return Err(HashError::InvalidUuidLength(s.len()));
        }
        let bytes = s.as_bytes();
        for &idx in &[8usize, 13, 18, 23] {
            if bytes[idx] != b'-' {
                return Err(HashError::InvalidUuidSeparator);
            }
        }
        let compact: String = s.chars().filter(|&c| c != '-').collect();
        Self::from_hex(&compact)
    }
}

impl fmt::Debug for Hash128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash128({})", self.to_hex())
    }
}

impl fmt::Display for Hash128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl AsRef<[u8]> for Hash128 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 16]> for Hash128 {
    fn from(bytes: [u8; 16]) -> Self {
        Hash128(bytes)
    }
}
