//! The seven record kinds that make up one unit of substrate output, plus
//! the identity aliases used throughout the pipeline. See `spec.md` §3.

use substrate_geometry::{HilbertIndex, Vec4};
use substrate_hash::Hash128;

pub type AtomId = Hash128;
pub type PhysId = Hash128;
pub type CompId = Hash128;
pub type SeqId = Hash128;
pub type RelId = Hash128;
pub type RSeqId = Hash128;
pub type EvId = Hash128;
pub type ContentId = Hash128;

/// The geometric projection of an entity: a centroid on S3, its Hilbert
/// index, and an optional capped trajectory. One row per atom,
/// composition, and relation.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalityRecord {
    pub phys_id: PhysId,
    pub centroid: Vec4,
    pub hilbert: HilbertIndex,
    /// Decimated to at most [`substrate_geometry::MAX_TRAJECTORY_POINTS`].
    pub trajectory: Vec<Vec4>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositionRecord {
    pub comp_id: CompId,
    pub phys_id: PhysId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositionSequenceRecord {
    pub seq_id: SeqId,
    pub comp_id: CompId,
    pub atom_id: AtomId,
    pub ordinal: u32,
    pub occurrences: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationRecord {
    pub rel_id: RelId,
    pub phys_id: PhysId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationSequenceRecord {
    pub rseq_id: RSeqId,
    pub rel_id: RelId,
    pub comp_id: CompId,
    pub ordinal: u32,
    pub occurrences: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelationRatingRecord {
    pub rel_id: RelId,
    pub observations: u64,
    pub rating: f64,
    pub k_factor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelationEvidenceRecord {
    pub ev_id: EvId,
    pub content_id: ContentId,
    pub rel_id: RelId,
    pub is_valid: bool,
    pub source_rating: f64,
    pub signal_strength: f64,
}

/// A resolved composition, carrying just enough to feed `compute_relation`
/// and to serve as the substrate cache's per-text memo entry
/// (`spec.md` §4.5).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachedComposition {
    pub valid: bool,
    pub comp_id: CompId,
    pub centroid: Vec4,
}

impl CachedComposition {
    pub const INVALID: CachedComposition = CachedComposition {
        valid: false,
        comp_id: Hash128([0u8; 16]),
        centroid: substrate_geometry::BASEPOINT,
    };
}
