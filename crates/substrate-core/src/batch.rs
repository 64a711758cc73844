//! The aggregate unit of work handed to the flusher: every record kind a
//! single ingestion pass produced, batched until a size threshold trips
//! (`spec.md` §4.6, §5).

use crate::service::{ComputedComposition, ComputedRelation};
use crate::types::{
    CompositionRecord, CompositionSequenceRecord, PhysicalityRecord, RelationEvidenceRecord,
    RelationRatingRecord, RelationRecord, RelationSequenceRecord,
};

/// Seven record streams, one per entity/evidence kind, accumulated across
/// possibly many `compute_composition`/`compute_relation` calls before
/// being handed to a worker thread as one transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubstrateBatch {
    pub physicalities: Vec<PhysicalityRecord>,
    pub compositions: Vec<CompositionRecord>,
    pub composition_sequences: Vec<CompositionSequenceRecord>,
    pub relations: Vec<RelationRecord>,
    pub relation_sequences: Vec<RelationSequenceRecord>,
    pub relation_ratings: Vec<RelationRatingRecord>,
    pub relation_evidence: Vec<RelationEvidenceRecord>,
}

impl SubstrateBatch {
    pub fn new() -> Self {
        SubstrateBatch::default()
    }

    /// Fold a composition result in. A no-op for invalid (empty) input, so
    /// callers can push unconditionally.
    pub fn push_composition(&mut self, computed: &ComputedComposition) {
        if !computed.valid {
            return;
        }
        if let Some(phys) = &computed.physicality {
            self.physicalities.push(phys.clone());
        }
        if let Some(comp) = computed.composition {
            self.compositions.push(comp);
        }
        self.composition_sequences
            .extend_from_slice(&computed.sequences);
    }

    /// Fold a relation result in. A no-op for invalid input (identical or
    /// unresolved operands).
    pub fn push_relation(&mut self, computed: &ComputedRelation) {
        if !computed.valid {
            return;
        }
        if let Some(phys) = &computed.physicality {
            self.physicalities.push(phys.clone());
        }
        if let Some(rel) = computed.relation {
            self.relations.push(rel);
        }
        if let Some(seqs) = computed.sequences {
            self.relation_sequences.extend_from_slice(&seqs);
        }
        if let Some(rating) = computed.rating {
            self.relation_ratings.push(rating);
        }
        if let Some(evidence) = computed.evidence {
            self.relation_evidence.push(evidence);
        }
    }

    /// Total record count across all seven streams, the quantity
    /// `batch_threshold` is compared against (`spec.md` §6,
    /// `ingester.batch_threshold`, default 100,000).
    pub fn record_count(&self) -> usize {
        self.physicalities.len()
            + self.compositions.len()
            + self.composition_sequences.len()
            + self.relations.len()
            + self.relation_sequences.len()
            + self.relation_ratings.len()
            + self.relation_evidence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    /// Drain another batch's records into this one, leaving `other` empty.
    /// Used to merge a just-finished document's batch into the ingester's
    /// running accumulator.
    pub fn merge(&mut self, other: &mut SubstrateBatch) {
        self.physicalities.append(&mut other.physicalities);
        self.compositions.append(&mut other.compositions);
        self.composition_sequences
            .append(&mut other.composition_sequences);
        self.relations.append(&mut other.relations);
        self.relation_sequences.append(&mut other.relation_sequences);
        self.relation_ratings.append(&mut other.relation_ratings);
        self.relation_evidence.append(&mut other.relation_evidence);
    }

    /// Split off a batch of at most `threshold` records, leaving the
    /// remainder (if any) in `self`. Splits happen on record-stream
    /// boundaries, not mid-stream, since a partial composition or relation
    /// is not a valid unit to flush independently.
    pub fn take_up_to(&mut self, threshold: usize) -> SubstrateBatch {
        if self.record_count() <= threshold {
            return std::mem::take(self);
        }
        let mut out = SubstrateBatch::new();
        let mut budget = threshold;
        budget = drain_up_to(&mut self.physicalities, &mut out.physicalities, budget);
        budget = drain_up_to(&mut self.compositions, &mut out.compositions, budget);
        budget = drain_up_to(
            &mut self.composition_sequences,
            &mut out.composition_sequences,
            budget,
        );
        budget = drain_up_to(&mut self.relations, &mut out.relations, budget);
        budget = drain_up_to(
            &mut self.relation_sequences,
            &mut out.relation_sequences,
            budget,
        );
        budget = drain_up_to(
            &mut self.relation_ratings,
            &mut out.relation_ratings,
            budget,
        );
        drain_up_to(
            &mut self.relation_evidence,
            &mut out.relation_evidence,
            budget,
        );
        out
    }
}

fn drain_up_to<T>(from: &mut Vec<T>, into: &mut Vec<T>, budget: usize) -> usize {
    let take = from.len().min(budget);
    into.extend(from.drain(0..take));
    budget - take
}

#[cfg(test)]
mod tests {
    use super::*;
    use substrate_hash::Hash128;

    fn dummy_comp() -> CompositionRecord {
        CompositionRecord {
            comp_id: Hash128::digest(b"comp"),
            phys_id: Hash128::digest(b"phys"),
        }
    }

    #[test]
    fn new_batch_is_empty() {
        let batch = SubstrateBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.record_count(), 0);
    }

    #[test]
    fn push_invalid_composition_is_noop() {
        let mut batch = SubstrateBatch::new();
        let invalid = ComputedComposition {
            valid: false,
            comp_id: Hash128([0u8; 16]),
            centroid: substrate_geometry::BASEPOINT,
            physicality: None,
            composition: None,
            sequences: Vec::new(),
        };
        batch.push_composition(&invalid);
        assert!(batch.is_empty());
    }

    #[test]
    fn merge_moves_records_and_empties_source() {
        let mut a = SubstrateBatch::new();
        let mut b = SubstrateBatch::new();
        b.compositions.push(dummy_comp());
        a.merge(&mut b);
        assert_eq!(a.record_count(), 1);
        assert!(b.is_empty());
    }

    #[test]
    fn take_up_to_below_threshold_drains_everything() {
        let mut batch = SubstrateBatch::new();
        batch.compositions.push(dummy_comp());
        let taken = batch.take_up_to(100);
        assert_eq!(taken.record_count(), 1);
        assert!(batch.is_empty());
    }

    #[test]
    fn take_up_to_above_threshold_leaves_remainder() {
        let mut batch = SubstrateBatch::new();
        for _ in 0..5 {
            batch.compositions.push(dummy_comp());
        }
        let taken = batch.take_up_to(2);
        assert_eq!(taken.record_count(), 2);
        assert_eq!(batch.record_count(), 3);
    }
}
