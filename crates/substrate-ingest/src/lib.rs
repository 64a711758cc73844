//! Text ingester: turns `(content_id, text)` into `SubstrateBatch`es via
//! the stateless substrate service, staging only identities the session
//! cache has not already seen and handing full batches to the flusher
//! (`spec.md` §4.6).

pub mod stats;
pub mod tokenizer;

pub use stats::IngestionStats;
pub use tokenizer::{tokenize, Token};

use std::io;
use std::path::Path;

use substrate_cache::SubstrateCache;
use substrate_core::{
    compute_composition, compute_relation, AtomResolver, CachedComposition, ContentId,
    SubstrateBatch, TEXT_BASE_RATING,
};
use substrate_flusher::Flusher;
use substrate_hash::Hash128;

#[derive(Debug, thiserror::Error)]
pub enum IngestError<E: std::error::Error + Send + Sync + 'static> {
    #[error("atom resolution failed: {0}")]
    Resolve(#[source] E),
    #[error("failed to read input file: {0}")]
    Io(#[source] io::Error),
}

/// Owns the substrate cache and a reference to the flusher; stateless
/// between calls otherwise. One instance is expected to serve a single
/// ingester thread, per `spec.md` §4.5's single-writer concurrency note.
pub struct TextIngester<'a, R: AtomResolver> {
    resolver: &'a R,
    cache: &'a SubstrateCache,
    flusher: &'a Flusher,
    batch_threshold: usize,
    base_rating: f64,
}

impl<'a, R: AtomResolver> TextIngester<'a, R> {
    pub fn new(resolver: &'a R, cache: &'a SubstrateCache, flusher: &'a Flusher) -> Self {
        TextIngester {
            resolver,
            cache,
            flusher,
            batch_threshold: 100_000,
            base_rating: TEXT_BASE_RATING,
        }
    }

    pub fn with_batch_threshold(mut self, threshold: usize) -> Self {
        self.batch_threshold = threshold;
        self
    }

    pub fn with_base_rating(mut self, rating: f64) -> Self {
        self.base_rating = rating;
        self
    }

    /// Ingest one document's text under `content_id`. Splits into
    /// composition-texts, stages each composition and each adjacent pair's
    /// relation, flushing to the worker pool whenever the pending batch
    /// crosses `batch_threshold` records or the document ends
    /// (`spec.md` §4.6, step 5).
    pub fn ingest_text(
        &self,
        content_id: ContentId,
        text: &str,
    ) -> Result<IngestionStats, IngestError<R::Error>> {
        let mut stats = IngestionStats {
            original_bytes: text.len() as u64,
            ..IngestionStats::default()
        };
        let mut batch = SubstrateBatch::new();

        let tokens = tokenize(text);
        let mut comps: Vec<CachedComposition> = Vec::with_capacity(tokens.len());

        for token in &tokens {
            let cached = self.stage_composition(&token.text, &mut batch, &mut stats)?;
            comps.push(cached);
            self.flush_if_over_threshold(&mut batch);
        }

        for window in comps.windows(2) {
            let (a, b) = (window[0], window[1]);
            self.stage_relation(&a, &b, content_id, &mut batch, &mut stats);
            self.flush_if_over_threshold(&mut batch);
        }

        stats.stored_bytes = estimate_stored_bytes(&batch);
        if !batch.is_empty() {
            self.flusher.enqueue(batch);
        }
        Ok(stats)
    }

    /// Read `path` as UTF-8 and ingest it, deriving `content_id` as
    /// `H(file bytes)` with no entity prefix (a document's content id is
    /// not itself one of the typed entity namespaces).
    pub fn ingest_file(&self, path: &Path) -> Result<IngestionStats, IngestError<R::Error>> {
        let bytes = std::fs::read(path).map_err(IngestError::Io)?;
        let content_id = Hash128::digest(&bytes);
        let text = String::from_utf8_lossy(&bytes);
        self.ingest_text(content_id, &text)
    }

    fn stage_composition(
        &self,
        text: &str,
        batch: &mut SubstrateBatch,
        stats: &mut IngestionStats,
    ) -> Result<CachedComposition, IngestError<R::Error>> {
        if let Some(cached) = self.cache.get_comp(text) {
            return Ok(cached);
        }
        let computed =
            compute_composition(text, self.resolver).map_err(IngestError::Resolve)?;
        stats.atoms_new += computed.new_atoms;
        let cached = computed.as_cached();
        if cached.valid && self.cache.add_composition(cached.comp_id) {
            stats.compositions_new += 1;
            batch.push_composition(&computed);
        }
        self.cache.cache_comp(text, cached);
        Ok(cached)
    }

    fn stage_relation(
        &self,
        a: &CachedComposition,
        b: &CachedComposition,
        content_id: ContentId,
        batch: &mut SubstrateBatch,
        stats: &mut IngestionStats,
    ) {
        let computed = compute_relation(a, b, content_id, self.base_rating);
        if let Some(relation) = computed.relation {
            if self.cache.add_relation(relation.rel_id) {
                stats.relations_new += 1;
            }
        }
        batch.push_relation(&computed);
    }

    fn flush_if_over_threshold(&self, batch: &mut SubstrateBatch) {
        if batch.record_count() >= self.batch_threshold {
            let ready = batch.take_up_to(self.batch_threshold);
            self.flusher.enqueue(ready);
        }
    }
}

/// Rough size estimate for reporting, mirroring the wire encodings'
/// per-record byte counts without depending on the store crate.
fn estimate_stored_bytes(batch: &SubstrateBatch) -> u64 {
    const PHYS_FIXED: u64 = 16 + 16 + 37 + 9;
    const TRAJ_POINT: u64 = 32;
    const COMP: u64 = 32;
    const COMP_SEQ: u64 = 48 + 8;
    const REL: u64 = 32;
    const REL_SEQ: u64 = 48 + 8;
    const RATING: u64 = 40;
    const EVIDENCE: u64 = 48 + 1 + 16;

    let phys_bytes: u64 = batch
        .physicalities
        .iter()
        .map(|p| PHYS_FIXED + p.trajectory.len() as u64 * TRAJ_POINT)
        .sum();

    phys_bytes
        + batch.compositions.len() as u64 * COMP
        + batch.composition_sequences.len() as u64 * COMP_SEQ
        + batch.relations.len() as u64 * REL
        + batch.relation_sequences.len() as u64 * REL_SEQ
        + batch.relation_ratings.len() as u64 * RATING
        + batch.relation_evidence.len() as u64 * EVIDENCE
}
