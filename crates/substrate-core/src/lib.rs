//! The stateless substrate service: pure projection from resolved atoms to
//! the composition/relation record set, plus the batch type that
//! accumulates them for the flusher. No I/O, no global state; every
//! function here is a function of its arguments (`spec.md` §4.4).

pub mod batch;
pub mod resolver;
pub mod service;
pub mod types;

pub use batch::SubstrateBatch;
pub use resolver::{AtomPoint, AtomResolver, ResolvedAtom};
pub use service::{compute_composition, compute_relation, ComputedComposition, ComputedRelation, TEXT_BASE_RATING};
pub use types::{
    AtomId, CachedComposition, CompId, CompositionRecord, CompositionSequenceRecord, ContentId,
    EvId, PhysId, PhysicalityRecord, RelId, RSeqId, RelationEvidenceRecord,
    RelationRatingRecord, RelationRecord, RelationSequenceRecord, SeqId,
};
