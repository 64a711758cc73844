//! The substrate service: two pure functions that turn text and resolved
//! atoms into the record set the rest of the pipeline stores.
//!
//! Both functions are side-effect free and depend only on their inputs:
//! `compute_composition(text, lookup) == compute_composition(text, lookup)`
//! byte for byte, across processes, forever. See `spec.md` §4.4 and the
//! testable properties in §8.

use crate::resolver::AtomResolver;
use crate::types::{
    CachedComposition, CompId, CompositionRecord, CompositionSequenceRecord, ContentId, EvId,
    PhysicalityRecord, RelationEvidenceRecord, RelationRatingRecord, RelationRecord,
    RelationSequenceRecord,
};
use substrate_geometry::hilbert::EntityType;
use substrate_geometry::{centroid, decimate_trajectory, hilbert_encode, Vec4};
use substrate_hash::{EntityPrefix, Hash128};

/// Default base rating for text-derived relations (`spec.md` §6,
/// `text.base_rating`).
pub const TEXT_BASE_RATING: f64 = 1500.0;
const DEFAULT_K_FACTOR: f64 = 32.0;

/// Output of [`compute_composition`].
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedComposition {
    pub valid: bool,
    pub comp_id: CompId,
    pub centroid: Vec4,
    pub physicality: Option<PhysicalityRecord>,
    pub composition: Option<CompositionRecord>,
    pub sequences: Vec<CompositionSequenceRecord>,
    /// Count of resolved codepoints that the resolver reported as not
    /// previously seen this session (`spec.md` §4.6 `atoms_new`).
    pub new_atoms: u64,
}

impl ComputedComposition {
    fn invalid() -> Self {
        ComputedComposition {
            valid: false,
            comp_id: Hash128([0u8; 16]),
            centroid: substrate_geometry::BASEPOINT,
            physicality: None,
            composition: None,
            sequences: Vec::new(),
            new_atoms: 0,
        }
    }

    /// Project down to the minimal form the cache memoizes and
    /// `compute_relation` consumes.
    pub fn as_cached(&self) -> CachedComposition {
        CachedComposition {
            valid: self.valid,
            comp_id: self.comp_id,
            centroid: self.centroid,
        }
    }
}

/// Output of [`compute_relation`].
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedRelation {
    pub valid: bool,
    pub physicality: Option<PhysicalityRecord>,
    pub relation: Option<RelationRecord>,
    pub sequences: Option<[RelationSequenceRecord; 2]>,
    pub rating: Option<RelationRatingRecord>,
    pub evidence: Option<RelationEvidenceRecord>,
}

impl ComputedRelation {
    fn invalid() -> Self {
        ComputedRelation {
            valid: false,
            physicality: None,
            relation: None,
            sequences: None,
            rating: None,
            evidence: None,
        }
    }
}

/// Decode `text` to codepoints, resolve each through `lookup`, drop
/// unknowns, and project the surviving atom sequence into a composition.
/// Returns an invalid result (no rows) if nothing survives resolution,
/// per `spec.md` §4.4 step 2, §7 "empty composition".
pub fn compute_composition<R: AtomResolver>(
    text: &str,
    lookup: &R,
) -> Result<ComputedComposition, R::Error> {
    let mut atom_ids = Vec::new();
    let mut positions = Vec::new();
    let mut new_atoms = 0u64;
    for ch in text.chars() {
        if let Some(resolved) = lookup.resolve(ch as u32)? {
            atom_ids.push(resolved.point.atom_id);
            positions.push(resolved.point.position);
            if resolved.is_new {
                new_atoms += 1;
            }
        }
    }
    if atom_ids.is_empty() {
        return Ok(ComputedComposition::invalid());
    }

    let id_refs: Vec<&Hash128> = atom_ids.iter().collect();
    let comp_id = Hash128::hash_prefixed_concat(EntityPrefix::Composition, &id_refs);

    let comp_centroid = centroid(&positions);
    let traj_bytes: Vec<u8> = positions.iter().flat_map(|p| p.to_le_bytes()).collect();
    let phys_id = phys_id_from(&comp_centroid, &traj_bytes);
    let hilbert = hilbert_encode(&comp_centroid, EntityType::Composition);
    let trajectory = decimate_trajectory(&positions);

    let sequences = run_length_sequences(comp_id, &atom_ids);

    Ok(ComputedComposition {
        valid: true,
        comp_id,
        centroid: comp_centroid,
        physicality: Some(PhysicalityRecord {
            phys_id,
            centroid: comp_centroid,
            hilbert,
            trajectory,
        }),
        composition: Some(CompositionRecord { comp_id, phys_id }),
        sequences,
        new_atoms,
    })
}

/// `phys_id = H(0x50 ‖ centroid_bytes ‖ trajectory_point_bytes)`, shared by
/// compositions and relations.
fn phys_id_from(centroid: &Vec4, traj_bytes: &[u8]) -> Hash128 {
    let mut buf = Vec::with_capacity(1 + 32 + traj_bytes.len());
    buf.push(EntityPrefix::Physicality.byte());
    buf.extend_from_slice(&centroid.to_le_bytes());
    buf.extend_from_slice(traj_bytes);
    Hash128::digest(&buf)
}

/// Group a run of identical atom ids into `CompositionSequence` rows:
/// one row per maximal run, `ordinal` is the run's start index and
/// `occurrences` its length.
fn run_length_sequences(comp_id: CompId, atom_ids: &[Hash128]) -> Vec<CompositionSequenceRecord> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < atom_ids.len() {
        let run_atom = atom_ids[i];
        let start = i;
        let mut j = i + 1;
        while j < atom_ids.len() && atom_ids[j] == run_atom {
            j += 1;
        }
        let occurrences = (j - start) as u32;
        let ordinal = start as u32;
        let seq_id = seq_id_for(comp_id, run_atom, ordinal);
        out.push(CompositionSequenceRecord {
            seq_id,
            comp_id,
            atom_id: run_atom,
            ordinal,
            occurrences,
        });
        i = j;
    }
    out
}

fn seq_id_for(comp_id: CompId, atom_id: Hash128, ordinal: u32) -> Hash128 {
    let mut buf = Vec::with_capacity(1 + 16 + 16 + 4);
    buf.push(EntityPrefix::CompositionSequence.byte());
    buf.extend_from_slice(comp_id.as_bytes());
    buf.extend_from_slice(atom_id.as_bytes());
    buf.extend_from_slice(&ordinal.to_le_bytes());
    Hash128::digest(&buf)
}

/// Project two cached compositions observed together into a relation.
/// Invalid if either input is invalid or the two compositions are
/// identical (`spec.md` §4.4 step 1, §8 "Distinctness").
///
/// Symmetric in `a`/`b`: `compute_relation(a, b, c) == compute_relation(b,
/// a, c)` by identity, because the pair is canonicalized to lexicographic
/// comp-id order before anything is hashed or stored, including the
/// trajectory and sequence rows, which is this crate's resolution of an
/// ambiguity `spec.md` left implicit (§8's symmetry property otherwise
/// could not hold bit-for-bit).
pub fn compute_relation(
    a: &CachedComposition,
    b: &CachedComposition,
    content_id: ContentId,
    base_rating: f64,
) -> ComputedRelation {
    if !a.valid || !b.valid || a.comp_id == b.comp_id {
        return ComputedRelation::invalid();
    }

    let (first, second) = if a.comp_id <= b.comp_id {
        (a, b)
    } else {
        (b, a)
    };

    let rel_id =
        Hash128::hash_prefixed_concat(EntityPrefix::Relation, &[&first.comp_id, &second.comp_id]);

    let r_centroid = centroid(&[first.centroid, second.centroid]);
    let trajectory = vec![first.centroid, second.centroid];
    let traj_bytes: Vec<u8> = trajectory.iter().flat_map(|p| p.to_le_bytes()).collect();
    let phys_id = phys_id_from(&r_centroid, &traj_bytes);
    let hilbert = hilbert_encode(&r_centroid, EntityType::Relation);

    let seq0 = relation_sequence(rel_id, first.comp_id, 0);
    let seq1 = relation_sequence(rel_id, second.comp_id, 1);

    let ev_id = evidence_id(content_id, rel_id);

    ComputedRelation {
        valid: true,
        physicality: Some(PhysicalityRecord {
            phys_id,
            centroid: r_centroid,
            hilbert,
            trajectory: decimate_trajectory(&trajectory),
        }),
        relation: Some(RelationRecord { rel_id, phys_id }),
        sequences: Some([seq0, seq1]),
        rating: Some(RelationRatingRecord {
            rel_id,
            observations: 1,
            rating: base_rating.max(0.0),
            k_factor: DEFAULT_K_FACTOR,
        }),
        evidence: Some(RelationEvidenceRecord {
            ev_id,
            content_id,
            rel_id,
            is_valid: true,
            source_rating: base_rating.max(0.0),
            signal_strength: 1.0,
        }),
    }
}

fn relation_sequence(rel_id: Hash128, comp_id: CompId, ordinal: u32) -> RelationSequenceRecord {
    let mut buf = Vec::with_capacity(1 + 16 + 16 + 4);
    buf.push(EntityPrefix::RelationSequence.byte());
    buf.extend_from_slice(rel_id.as_bytes());
    buf.extend_from_slice(comp_id.as_bytes());
    buf.extend_from_slice(&ordinal.to_le_bytes());
    let rseq_id = Hash128::digest(&buf);
    RelationSequenceRecord {
        rseq_id,
        rel_id,
        comp_id,
        ordinal,
        occurrences: 1,
    }
}

fn evidence_id(content_id: ContentId, rel_id: Hash128) -> EvId {
    let mut buf = Vec::with_capacity(32);
    buf.extend_from_slice(content_id.as_bytes());
    buf.extend_from_slice(rel_id.as_bytes());
    Hash128::digest(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use substrate_geometry::Vec4;

    struct FixedResolver {
        table: std::collections::HashMap<u32, crate::resolver::AtomPoint>,
        seen: std::sync::Mutex<std::collections::HashSet<u32>>,
    }

    impl AtomResolver for FixedResolver {
        type Error = Infallible;
        fn resolve(
            &self,
            codepoint: u32,
        ) -> Result<Option<crate::resolver::ResolvedAtom>, Infallible> {
            let is_new = self.seen.lock().unwrap().insert(codepoint);
            Ok(self
                .table
                .get(&codepoint)
                .copied()
                .map(|point| crate::resolver::ResolvedAtom { point, is_new }))
        }
    }

    fn resolver_for(chars: &[char]) -> FixedResolver {
        let mut table = std::collections::HashMap::new();
        for (i, &c) in chars.iter().enumerate() {
            table.insert(
                c as u32,
                crate::resolver::AtomPoint {
                    atom_id: Hash128::hash_codepoint(c as u32),
                    position: Vec4::new(1.0, 0.0, i as f64 * 0.01, 0.0),
                },
            );
        }
        FixedResolver { table, seen: std::sync::Mutex::new(std::collections::HashSet::new()) }
    }

    #[test]
    fn compute_composition_is_deterministic() {
        let r = resolver_for(&['a', 'b']);
        let c1 = compute_composition("ab", &r).unwrap();
        let c2 = compute_composition("ab", &r).unwrap();
        assert_eq!(c1, c2);
        assert!(c1.valid);
    }

    #[test]
    fn unknown_codepoints_are_dropped_silently() {
        let r = resolver_for(&['a']);
        let c = compute_composition("ab", &r).unwrap();
        assert!(c.valid);
        // Only 'a' resolved, so there's exactly one run.
        assert_eq!(c.sequences.len(), 1);
        assert_eq!(c.sequences[0].occurrences, 1);
    }

    #[test]
    fn empty_composition_is_invalid() {
        let r = resolver_for(&[]);
        let c = compute_composition("xyz", &r).unwrap();
        assert!(!c.valid);
        assert!(c.physicality.is_none());
        assert!(c.sequences.is_empty());
    }

    #[test]
    fn new_atoms_counts_first_resolution_only() {
        let r = resolver_for(&['a', 'b']);
        let first = compute_composition("ab", &r).unwrap();
        assert_eq!(first.new_atoms, 2);
        // Same resolver instance, codepoints already seen.
        let second = compute_composition("ba", &r).unwrap();
        assert_eq!(second.new_atoms, 0);
    }

    #[test]
    fn run_length_grouping_collapses_repeats() {
        let r = resolver_for(&['a', 'b']);
        let c = compute_composition("aab", &r).unwrap();
        assert_eq!(c.sequences.len(), 2);
        assert_eq!(c.sequences[0].ordinal, 0);
        assert_eq!(c.sequences[0].occurrences, 2);
        assert_eq!(c.sequences[1].ordinal, 2);
        assert_eq!(c.sequences[1].occurrences, 1);
    }

    #[test]
    fn relation_is_symmetric_in_its_operands() {
        let r = resolver_for(&['a', 'b', 'c', 'd']);
        let ab = compute_composition("ab", &r).unwrap().as_cached();
        let cd = compute_composition("cd", &r).unwrap().as_cached();
        let content = Hash128::digest(b"doc-1");

        let forward = compute_relation(&ab, &cd, content, TEXT_BASE_RATING);
        let backward = compute_relation(&cd, &ab, content, TEXT_BASE_RATING);

        assert_eq!(
            forward.relation.unwrap().rel_id,
            backward.relation.unwrap().rel_id
        );
        assert_eq!(
            forward.physicality.unwrap().phys_id,
            backward.physicality.unwrap().phys_id
        );
        assert_eq!(
            forward.rating.unwrap().rating,
            backward.rating.unwrap().rating
        );
    }

    #[test]
    fn relation_between_identical_compositions_is_invalid() {
        let r = resolver_for(&['a', 'b']);
        let ab = compute_composition("ab", &r).unwrap().as_cached();
        let content = Hash128::digest(b"doc-1");
        let rel = compute_relation(&ab, &ab, content, TEXT_BASE_RATING);
        assert!(!rel.valid);
    }

    #[test]
    fn relation_rating_never_goes_negative() {
        let r = resolver_for(&['a', 'b', 'c', 'd']);
        let ab = compute_composition("ab", &r).unwrap().as_cached();
        let cd = compute_composition("cd", &r).unwrap().as_cached();
        let content = Hash128::digest(b"doc-1");
        let rel = compute_relation(&ab, &cd, content, -50.0);
        assert_eq!(rel.rating.unwrap().rating, 0.0);
    }
}
