//! The substrate cache: per-session identity dedup sets plus a
//! text-to-composition memo, fronting the store so the ingester never
//! re-derives or re-inserts what it has already seen (`spec.md` §4.5).
//!
//! Populated once via [`SubstrateCache::pre_populate`] and then written by
//! a single ingester thread. Concurrent reads are safe (`dashmap`), but
//! this is not a general-purpose concurrent cache: see the struct-level
//! note on the single-writer assumption.

use dashmap::{DashMap, DashSet};
use substrate_core::CachedComposition;
use substrate_hash::Hash128;

/// Streams just the `id` column of an identity table, for cheap
/// pre-population without loading full rows (`spec.md` §4.5:
/// "`pre_populate` ... must not load full rows").
pub trait IdentitySource {
    type Error: std::error::Error + Send + Sync + 'static;

    fn composition_ids(&self, visitor: &mut dyn FnMut(Hash128)) -> Result<(), Self::Error>;
    fn physicality_ids(&self, visitor: &mut dyn FnMut(Hash128)) -> Result<(), Self::Error>;
    fn relation_ids(&self, visitor: &mut dyn FnMut(Hash128)) -> Result<(), Self::Error>;
}

/// Four sets and one map: identity membership for compositions,
/// physicalities, and relations, plus a text→composition memo.
///
/// Intended to be owned by a single ingester thread. The identity sets
/// (`DashSet`) and the text memo (`DashMap`) are internally synchronized,
/// so concurrent *reads* from other threads (e.g. a status reporter) are
/// sound; concurrent *writes* from more than one ingester thread are not
/// serialized by this type and must be serialized by the caller, per
/// `spec.md` §4.5's concurrency note.
#[derive(Default)]
pub struct SubstrateCache {
    compositions: DashSet<Hash128>,
    physicalities: DashSet<Hash128>,
    relations: DashSet<Hash128>,
    text_memo: DashMap<String, CachedComposition>,
}

impl SubstrateCache {
    pub fn new() -> Self {
        SubstrateCache::default()
    }

    pub fn exists_composition(&self, id: &Hash128) -> bool {
        self.compositions.contains(id)
    }

    pub fn exists_physicality(&self, id: &Hash128) -> bool {
        self.physicalities.contains(id)
    }

    pub fn exists_relation(&self, id: &Hash128) -> bool {
        self.relations.contains(id)
    }

    /// Records a composition id as now present. Returns `true` if this was
    /// the first time it was added (the caller should flush a row for
    /// it), `false` if it was already known.
    pub fn add_composition(&self, id: Hash128) -> bool {
        self.compositions.insert(id)
    }

    pub fn add_physicality(&self, id: Hash128) -> bool {
        self.physicalities.insert(id)
    }

    pub fn add_relation(&self, id: Hash128) -> bool {
        self.relations.insert(id)
    }

    pub fn get_comp(&self, text: &str) -> Option<CachedComposition> {
        self.text_memo.get(text).map(|entry| *entry)
    }

    pub fn cache_comp(&self, text: &str, composition: CachedComposition) {
        self.text_memo.insert(text.to_owned(), composition);
    }

    /// Stream the three identity tables' `id` columns into the
    /// corresponding sets. After this returns, [`Self::exists_composition`]
    /// and friends are authoritative for "already in the store or already
    /// seen this session" (`spec.md` §4.5).
    pub fn pre_populate<S: IdentitySource>(&self, source: &S) -> Result<(), S::Error> {
        source.composition_ids(&mut |id| {
            self.compositions.insert(id);
        })?;
        source.physicality_ids(&mut |id| {
            self.physicalities.insert(id);
        })?;
        source.relation_ids(&mut |id| {
            self.relations.insert(id);
        })?;
        Ok(())
    }

    pub fn composition_count(&self) -> usize {
        self.compositions.len()
    }

    pub fn physicality_count(&self) -> usize {
        self.physicalities.len()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use substrate_geometry::BASEPOINT;

    struct FakeSource {
        comps: Vec<Hash128>,
        phys: Vec<Hash128>,
        rels: Vec<Hash128>,
    }

    impl IdentitySource for FakeSource {
        type Error = Infallible;

        fn composition_ids(&self, visitor: &mut dyn FnMut(Hash128)) -> Result<(), Infallible> {
            self.comps.iter().copied().for_each(visitor);
            Ok(())
        }
        fn physicality_ids(&self, visitor: &mut dyn FnMut(Hash128)) -> Result<(), Infallible> {
            self.phys.iter().copied().for_each(visitor);
            Ok(())
        }
        fn relation_ids(&self, visitor: &mut dyn FnMut(Hash128)) -> Result<(), Infallible> {
            self.rels.iter().copied().for_each(visitor);
            Ok(())
        }
    }

    #[test]
    fn fresh_cache_has_no_identities() {
        let cache = SubstrateCache::new();
        assert!(!cache.exists_composition(&Hash128::digest(b"x")));
    }

    #[test]
    fn add_composition_reports_first_insertion_only() {
        let cache = SubstrateCache::new();
        let id = Hash128::digest(b"a");
        assert!(cache.add_composition(id));
        assert!(!cache.add_composition(id));
        assert!(cache.exists_composition(&id));
    }

    #[test]
    fn text_memo_round_trips() {
        let cache = SubstrateCache::new();
        let comp = CachedComposition {
            valid: true,
            comp_id: Hash128::digest(b"comp"),
            centroid: BASEPOINT,
        };
        assert!(cache.get_comp("hello").is_none());
        cache.cache_comp("hello", comp);
        assert_eq!(cache.get_comp("hello"), Some(comp));
    }

    #[test]
    fn pre_populate_loads_all_three_sets() {
        let cache = SubstrateCache::new();
        let source = FakeSource {
            comps: vec![Hash128::digest(b"c1")],
            phys: vec![Hash128::digest(b"p1"), Hash128::digest(b"p2")],
            rels: vec![],
        };
        cache.pre_populate(&source).unwrap();
        assert_eq!(cache.composition_count(), 1);
        assert_eq!(cache.physicality_count(), 2);
        assert_eq!(cache.relation_count(), 0);
        assert!(cache.exists_physicality(&Hash128::digest(b"p2")));
    }
}
