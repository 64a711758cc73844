//! Codepoint → atom-identity lookup.
//!
//! Every Unicode codepoint that has ever been ingested is promoted to an
//! atom: a content-addressed identity plus its S3 position and Hilbert
//! index. The full table is owned by the store; this crate is the
//! read-heavy cache in front of it, grounded on the umbrella crate's
//! `RedbBackend`/`preload`-style warm-up pattern generalized from a
//! key-value blob cache to a typed, concurrent codepoint map.
//!
//! `AtomLookup` never computes an atom's geometry itself. That is a
//! store/seeding concern out of this core's scope (`spec.md` §1, "Out of
//! scope: the UCD loader and UCD-derived atom seeding"). It only caches
//! and serves what [`AtomSource`] gives it.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use substrate_geometry::{HilbertIndex, Vec4};
use substrate_hash::Hash128;

/// A resolved atom: its identity, the codepoint it names, the
/// physicality it points at, and that physicality's geometry, flattened
/// here for lookup convenience rather than requiring a second join.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtomInfo {
    pub atom_id: Hash128,
    pub codepoint: u32,
    pub phys_id: Hash128,
    pub position: Vec4,
    pub hilbert: HilbertIndex,
}

/// The external collaborator this cache streams from: the relational
/// store's atom table. Implementations live outside this crate (see
/// `substrate-store`); this crate only depends on the contract.
pub trait AtomSource {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Stream every row of the atom table once, in no particular order,
    /// invoking `visitor` for each. Must be constant-memory on the
    /// source side (`spec.md` §6, `stream_query`).
    fn stream_all(&self, visitor: &mut dyn FnMut(AtomInfo)) -> Result<(), Self::Error>;

    /// Fetch exactly the rows for `codepoints`, via a single batched
    /// query (`spec.md` §4.3: "one store query with an IN clause on the
    /// missing subset"). Codepoints absent from the store are simply
    /// omitted from the result.
    fn fetch_batch(&self, codepoints: &[u32]) -> Result<Vec<AtomInfo>, Self::Error>;
}

#[derive(Debug, thiserror::Error)]
pub enum AtomLookupError<E: std::error::Error + Send + Sync + 'static> {
    #[error("atom source failed: {0}")]
    Source(#[source] E),
}

/// Thread-safe, preload-once cache over a codepoint → [`AtomInfo`] map.
///
/// Reads are lock-free via `dashmap`; `preload_all` is guarded so that
/// concurrent callers racing to warm the cache collapse into a single
/// streaming pass, matching `spec.md` §4.3's "must support concurrent
/// `preload_all` initiation at most once".
pub struct AtomLookup<S: AtomSource> {
    source: S,
    cache: DashMap<u32, AtomInfo>,
    preloaded: AtomicBool,
    preload_gate: Mutex<()>,
}

impl<S: AtomSource> AtomLookup<S> {
    pub fn new(source: S) -> Self {
        AtomLookup {
            source,
            cache: DashMap::new(),
            preloaded: AtomicBool::new(false),
            preload_gate: Mutex::new(()),
        }
    }

    /// Look up a single codepoint, consulting the cache first and falling
    /// back to a single-row fetch from the source on miss. A codepoint
    /// absent from the store returns `Ok(None)`; callers drop it silently
    /// per `spec.md` §4.3's failure mode.
    pub fn lookup(&self, codepoint: u32) -> Result<Option<AtomInfo>, AtomLookupError<S::Error>> {
        if let Some(info) = self.cache.get(&codepoint) {
            return Ok(Some(*info));
        }
        let rows = self
            .source
            .fetch_batch(&[codepoint])
            .map_err(AtomLookupError::Source)?;
        match rows.into_iter().next() {
            Some(info) => {
                self.cache.insert(codepoint, info);
                Ok(Some(info))
            }
            None => Ok(None),
        }
    }

    /// Resolve every codepoint in `codepoints`, performing at most one
    /// batched store query for the subset not already cached. The
    /// returned map only contains entries for codepoints that exist in
    /// the store; callers must treat absence as "drop this codepoint".
    pub fn lookup_batch(
        &self,
        codepoints: &[u32],
    ) -> Result<std::collections::HashMap<u32, AtomInfo>, AtomLookupError<S::Error>> {
        let mut out = std::collections::HashMap::with_capacity(codepoints.len());
        let mut missing = Vec::new();
        for &cp in codepoints {
            if let Some(info) = self.cache.get(&cp) {
                out.insert(cp, *info);
            } else {
                missing.push(cp);
            }
        }
        if !missing.is_empty() {
            let rows = self
                .source
                .fetch_batch(&missing)
                .map_err(AtomLookupError::Source)?;
            for info in rows {
                self.cache.insert(info.codepoint, info);
                out.insert(info.codepoint, info);
            }
        }
        Ok(out)
    }

    /// Stream the entire atom table into the cache once. Safe to call
    /// from multiple threads concurrently: the first caller performs the
    /// stream while the rest block on [`Mutex`] and then observe
    /// `preloaded = true` and return immediately.
    pub fn preload_all(&self) -> Result<(), AtomLookupError<S::Error>> {
        if self.preloaded.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self
            .preload_gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.preloaded.load(Ordering::Acquire) {
            return Ok(());
        }
        self.source
            .stream_all(&mut |info| {
                self.cache.insert(info.codepoint, info);
            })
            .map_err(AtomLookupError::Source)?;
        self.preloaded.store(true, Ordering::Release);
        Ok(())
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Whether `codepoint` has already been resolved into the cache,
    /// either by an earlier [`Self::lookup`] or by [`Self::preload_all`].
    /// Lets a caller distinguish "resolved for the first time this
    /// session" from "already known" without a second store round-trip.
    pub fn contains(&self, codepoint: u32) -> bool {
        self.cache.contains_key(&codepoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use substrate_geometry::hilbert::EntityType;

    struct FakeSource {
        rows: Vec<AtomInfo>,
    }

    impl AtomSource for FakeSource {
        type Error = Infallible;

        fn stream_all(&self, visitor: &mut dyn FnMut(AtomInfo)) -> Result<(), Infallible> {
            for row in &self.rows {
                visitor(*row);
            }
            Ok(())
        }

        fn fetch_batch(&self, codepoints: &[u32]) -> Result<Vec<AtomInfo>, Infallible> {
            Ok(self
                .rows
                .iter()
                .filter(|r| codepoints.contains(&r.codepoint))
                .copied()
                .collect())
        }
    }

    fn fake_info(cp: u32) -> AtomInfo {
        let pos = Vec4::new(1.0, 0.0, 0.0, 0.0);
        AtomInfo {
            atom_id: Hash128::hash_codepoint(cp),
            codepoint: cp,
            phys_id: Hash128::digest(&cp.to_le_bytes()),
            position: pos,
            hilbert: substrate_geometry::hilbert_encode(&pos, EntityType::Atom),
        }
    }

    #[test]
    fn lookup_miss_returns_none_without_error() {
        let lookup = AtomLookup::new(FakeSource { rows: vec![] });
        assert_eq!(lookup.lookup('a' as u32).unwrap(), None);
    }

    #[test]
    fn lookup_hit_is_cached_after_first_fetch() {
        let lookup = AtomLookup::new(FakeSource {
            rows: vec![fake_info('a' as u32)],
        });
        assert!(lookup.lookup('a' as u32).unwrap().is_some());
        assert_eq!(lookup.cached_len(), 1);
        // Second lookup must hit the cache, not the source again.
        assert!(lookup.lookup('a' as u32).unwrap().is_some());
        assert_eq!(lookup.cached_len(), 1);
    }

    #[test]
    fn lookup_batch_resolves_only_existing_codepoints() {
        let lookup = AtomLookup::new(FakeSource {
            rows: vec![fake_info('a' as u32), fake_info('b' as u32)],
        });
        let result = lookup
            .lookup_batch(&['a' as u32, 'b' as u32, 'z' as u32])
            .unwrap();
        assert_eq!(result.len(), 2);
        assert!(!result.contains_key(&('z' as u32)));
    }

    #[test]
    fn preload_all_is_idempotent() {
        let lookup = AtomLookup::new(FakeSource {
            rows: vec![fake_info('a' as u32), fake_info('b' as u32)],
        });
        lookup.preload_all().unwrap();
        assert_eq!(lookup.cached_len(), 2);
        lookup.preload_all().unwrap();
        assert_eq!(lookup.cached_len(), 2);
    }
}
