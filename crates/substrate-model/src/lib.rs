//! Model ingester: projects an embedding matrix's nearest-neighbour graph
//! into substrate relations (`spec.md` §4.8).
//!
//! Each vocabulary token is ingested as its own composition (no adjacent-
//! pair relations are derived from the vocabulary text itself; those
//! come from the k-NN pass below, not from token adjacency). Relations
//! are emitted for the top-k cosine neighbours of each token's embedding
//! row, evidenced against one synthetic `content_id` identifying the
//! model package as a whole.

pub mod ann;
pub mod package;

pub use ann::{AnnConfig, CosineIndex};
pub use package::{ModelPackage, PackageError};

use std::path::Path;

use substrate_cache::SubstrateCache;
use substrate_core::{
    compute_composition, compute_relation, AtomResolver, CachedComposition, ContentId,
    SubstrateBatch,
};
use substrate_flusher::Flusher;
use substrate_hash::Hash128;

/// Default starting rating for model-derived relations (`spec.md` §6
/// `model.base_rating`).
pub const MODEL_BASE_RATING: f64 = 1200.0;
/// Default cosine floor for k-NN edges (`spec.md` §6
/// `model.similarity_threshold`).
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.40;
/// Hard cap on neighbours per token (`spec.md` §4.8 step 3).
pub const DEFAULT_MAX_NEIGHBORS: usize = 64;

/// Monotone non-increasing shaping function over layer depth
/// (`spec.md` §4.8 step 4: "policy input; default 1.0"). A flat embedding
/// matrix carries no layer dimension of its own, so every token is
/// treated as layer 0 and only the default constant shape is exercised
/// in practice; the trait exists so a caller with a layered package can
/// supply real decay.
pub trait LayerShape {
    fn weight(&self, layer_index: u32) -> f64;
}

/// `f(layer_index) = 1.0` for all layers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantShape;

impl LayerShape for ConstantShape {
    fn weight(&self, _layer_index: u32) -> f64 {
        1.0
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ModelIngestionStats {
    pub tokens: u64,
    pub compositions_new: u64,
    pub relations_new: u64,
    pub edges_considered: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ModelIngestError<E: std::error::Error + Send + Sync + 'static> {
    #[error("failed to load model package: {0}")]
    Package(#[from] PackageError),
    #[error("token composition failed: {0}")]
    Resolve(#[source] E),
}

/// Owns the substrate cache and a reference to the flusher, same
/// division of responsibility as `TextIngester`.
pub struct ModelIngester<'a, R: AtomResolver, S: LayerShape = ConstantShape> {
    resolver: &'a R,
    cache: &'a SubstrateCache,
    flusher: &'a Flusher,
    shape: S,
    similarity_threshold: f32,
    max_neighbors: usize,
    base_rating: f64,
    ann_config: AnnConfig,
}

impl<'a, R: AtomResolver> ModelIngester<'a, R, ConstantShape> {
    pub fn new(resolver: &'a R, cache: &'a SubstrateCache, flusher: &'a Flusher) -> Self {
        ModelIngester {
            resolver,
            cache,
            flusher,
            shape: ConstantShape,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_neighbors: DEFAULT_MAX_NEIGHBORS,
            base_rating: MODEL_BASE_RATING,
            ann_config: AnnConfig::default(),
        }
    }
}

impl<'a, R: AtomResolver, S: LayerShape> ModelIngester<'a, R, S> {
    pub fn with_shape<S2: LayerShape>(self, shape: S2) -> ModelIngester<'a, R, S2> {
        ModelIngester {
            resolver: self.resolver,
            cache: self.cache,
            flusher: self.flusher,
            shape,
            similarity_threshold: self.similarity_threshold,
            max_neighbors: self.max_neighbors,
            base_rating: self.base_rating,
            ann_config: self.ann_config,
        }
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_max_neighbors(mut self, k: usize) -> Self {
        self.max_neighbors = k.min(DEFAULT_MAX_NEIGHBORS);
        self
    }

    pub fn with_base_rating(mut self, rating: f64) -> Self {
        self.base_rating = rating;
        self
    }

    pub fn with_ann_config(mut self, config: AnnConfig) -> Self {
        self.ann_config = config;
        self
    }

    /// Run the full §4.8 algorithm over the package at `package_dir`.
    pub fn ingest_model(
        &self,
        package_dir: &Path,
    ) -> Result<ModelIngestionStats, ModelIngestError<R::Error>> {
        let package = ModelPackage::load(package_dir)?;
        let content_id = model_content_id(&package);

        let mut stats = ModelIngestionStats {
            tokens: package.vocab_size() as u64,
            ..ModelIngestionStats::default()
        };
        let mut batch = SubstrateBatch::new();

        // Step 1: ingest every token as its own composition, keeping the
        // `token_index -> CachedComposition` map for the k-NN pass.
        let mut compositions: Vec<CachedComposition> = Vec::with_capacity(package.vocab_size());
        for token in &package.tokens {
            let cached = self.stage_composition(token, &mut batch, &mut stats)?;
            compositions.push(cached);
        }

        // Step 2: L2-normalize the embedding rows.
        let normalized: Vec<Vec<f32>> = (0..package.vocab_size())
            .map(|i| l2_normalize(package.row(i)))
            .collect();

        // Step 3: build the cosine index and search each valid token's
        // row for its top-k neighbours above the similarity floor.
        let index = CosineIndex::build(normalized, self.ann_config);
        for (i, comp) in compositions.iter().enumerate() {
            if !comp.valid {
                continue;
            }
            let neighbors = index.neighbors(i, self.max_neighbors, self.similarity_threshold);
            stats.edges_considered += neighbors.len() as u64;
            for (j, _similarity) in neighbors {
                let other = &compositions[j];
                if !other.valid {
                    continue;
                }
                self.stage_relation(comp, other, content_id, &mut batch, &mut stats);
            }
        }

        if !batch.is_empty() {
            self.flusher.enqueue(batch);
        }
        Ok(stats)
    }

    fn stage_composition(
        &self,
        text: &str,
        batch: &mut SubstrateBatch,
        stats: &mut ModelIngestionStats,
    ) -> Result<CachedComposition, ModelIngestError<R::Error>> {
        if let Some(cached) = self.cache.get_comp(text) {
            return Ok(cached);
        }
        let computed =
            compute_composition(text, self.resolver).map_err(ModelIngestError::Resolve)?;
        let cached = computed.as_cached();
        if cached.valid && self.cache.add_composition(cached.comp_id) {
            stats.compositions_new += 1;
            batch.push_composition(&computed);
        }
        self.cache.cache_comp(text, cached);
        Ok(cached)
    }

    // Step 4: emit the relation and its evidence against the model's
    // synthetic content id, shaped by layer 0 (see `LayerShape`).
    fn stage_relation(
        &self,
        a: &CachedComposition,
        b: &CachedComposition,
        content_id: ContentId,
        batch: &mut SubstrateBatch,
        stats: &mut ModelIngestionStats,
    ) {
        let rating = self.base_rating * self.shape.weight(0);
        let computed = compute_relation(a, b, content_id, rating);
        if let Some(relation) = computed.relation {
            if self.cache.add_relation(relation.rel_id) {
                stats.relations_new += 1;
            }
        }
        batch.push_relation(&computed);
    }
}

fn l2_normalize(row: &[f32]) -> Vec<f32> {
    let norm: f32 = row.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return row.to_vec();
    }
    row.iter().map(|v| v / norm).collect()
}

/// A stable id for the model package as a whole, used as the evidence
/// `content_id` for every relation this ingester emits (`spec.md` §4.8
/// step 4: "a synthetic `content_id` identifying the model").
fn model_content_id(package: &ModelPackage) -> ContentId {
    let mut bytes = Vec::with_capacity(8 + package.tokens.iter().map(|t| t.len() + 1).sum::<usize>());
    bytes.extend_from_slice(&(package.dim as u64).to_le_bytes());
    for token in &package.tokens {
        bytes.extend_from_slice(token.as_bytes());
        bytes.push(0);
    }
    Hash128::digest(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use substrate_core::AtomPoint;
    use substrate_geometry::Vec4;
    use substrate_store::{RedbStore, SubstrateStore};

    struct FixedResolver {
        table: std::collections::HashMap<u32, AtomPoint>,
    }

    impl AtomResolver for FixedResolver {
        type Error = Infallible;
        fn resolve(&self, codepoint: u32) -> Result<Option<substrate_core::ResolvedAtom>, Infallible> {
            Ok(self
                .table
                .get(&codepoint)
                .copied()
                .map(|point| substrate_core::ResolvedAtom { point, is_new: true }))
        }
    }

    fn resolver_for(chars: &str) -> FixedResolver {
        let mut table = std::collections::HashMap::new();
        for (i, c) in chars.chars().enumerate() {
            table.insert(
                c as u32,
                AtomPoint {
                    atom_id: Hash128::hash_codepoint(c as u32),
                    position: Vec4::new(1.0, 0.0, i as f64 * 0.01, 0.0),
                },
            );
        }
        FixedResolver { table }
    }

    fn harness() -> (SubstrateCache, Flusher, tempfile::TempPath) {
        let cache = SubstrateCache::new();
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.into_temp_path();
        let db_path = path.to_path_buf();
        let flusher = Flusher::start(substrate_flusher::FlusherConfig::default(), move || {
            RedbStore::open(&db_path)
        })
        .unwrap();
        (cache, flusher, path)
    }

    fn write_package(dir: &Path, tokens: &[&str], rows: &[[f32; 2]]) {
        std::fs::write(dir.join("vocab.txt"), tokens.join("\n")).unwrap();
        let mut bytes = Vec::new();
        for row in rows {
            for value in row {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        std::fs::write(dir.join("embeddings.f32"), bytes).unwrap();
    }

    #[test]
    fn near_duplicate_embeddings_produce_one_relation() {
        let resolver = resolver_for("catdog");
        let (cache, flusher, _path) = harness();
        let dir = tempfile::tempdir().unwrap();
        write_package(
            dir.path(),
            &["cat", "dog"],
            &[[1.0, 0.0], [0.99, 0.01]],
        );

        let ingester = ModelIngester::new(&resolver, &cache, &flusher).with_similarity_threshold(0.5);
        let stats = ingester.ingest_model(dir.path()).unwrap();

        assert_eq!(stats.tokens, 2);
        assert_eq!(stats.compositions_new, 2);
        assert_eq!(stats.relations_new, 1);
    }

    #[test]
    fn orthogonal_embeddings_below_threshold_produce_no_relation() {
        let resolver = resolver_for("catdog");
        let (cache, flusher, _path) = harness();
        let dir = tempfile::tempdir().unwrap();
        write_package(dir.path(), &["cat", "dog"], &[[1.0, 0.0], [0.0, 1.0]]);

        let ingester = ModelIngester::new(&resolver, &cache, &flusher);
        let stats = ingester.ingest_model(dir.path()).unwrap();

        assert_eq!(stats.relations_new, 0);
    }

    #[test]
    fn token_with_unresolvable_codepoints_is_skipped_from_knn() {
        let resolver = resolver_for("cat");
        let (cache, flusher, _path) = harness();
        let dir = tempfile::tempdir().unwrap();
        write_package(dir.path(), &["cat", "dog"], &[[1.0, 0.0], [0.99, 0.01]]);

        let ingester = ModelIngester::new(&resolver, &cache, &flusher).with_similarity_threshold(0.5);
        let stats = ingester.ingest_model(dir.path()).unwrap();

        assert_eq!(stats.compositions_new, 1);
        assert_eq!(stats.relations_new, 0);
    }

    #[test]
    fn max_neighbors_caps_edges_considered() {
        let resolver = resolver_for("abcdefgh");
        let (cache, flusher, _path) = harness();
        let dir = tempfile::tempdir().unwrap();
        let tokens: Vec<&str> = vec!["a", "b", "c", "d", "e", "f", "g", "h"];
        let rows: Vec<[f32; 2]> = (0..8).map(|i| [1.0 - i as f32 * 0.001, i as f32 * 0.001]).collect();
        write_package(dir.path(), &tokens, &rows);

        let ingester = ModelIngester::new(&resolver, &cache, &flusher)
            .with_similarity_threshold(-1.0)
            .with_max_neighbors(2);
        let stats = ingester.ingest_model(dir.path()).unwrap();

        assert_eq!(stats.edges_considered, 8 * 2);
    }

    #[test]
    fn same_model_content_id_is_stable_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        write_package(dir.path(), &["cat", "dog"], &[[1.0, 0.0], [0.0, 1.0]]);
        let a = ModelPackage::load(dir.path()).unwrap();
        let b = ModelPackage::load(dir.path()).unwrap();
        assert_eq!(model_content_id(&a), model_content_id(&b));
    }
}
