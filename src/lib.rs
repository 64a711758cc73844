//! Workspace umbrella crate for the substrate ingestion pipeline.
//!
//! The `substrate` crate wires the independently-grounded stage crates
//! (atom resolution, the stateless substrate service, the session cache,
//! text and model ingestion, and the durable flusher) into one
//! `Pipeline` applications can drive through a single dependency.
//!
//! ## Quick start
//!
//! ```ignore
//! use substrate::{config::SubstrateConfig, Pipeline};
//!
//! # fn demo() -> Result<(), substrate::PipelineError> {
//! let config = SubstrateConfig::default();
//! let pipeline = Pipeline::open(config)?;
//!
//! let stats = pipeline.ingest_file(std::path::Path::new("document.txt"))?;
//! println!("{} new compositions", stats.compositions_new);
//!
//! pipeline.flush_wait();
//! # Ok(())
//! # }
//! ```
//!
//! ## Observability
//!
//! Metrics and structured logs can be captured by installing a
//! [`PipelineMetrics`] recorder via [`set_pipeline_metrics`] and/or a
//! [`PipelineEventLogger`] with [`set_pipeline_logger`]. Both hooks receive
//! the stage, its outcome, and a caller-supplied label (a content id for
//! text, a package path for the model ingester) so deployments can
//! correlate with upstream systems.

pub mod config;

pub use substrate_atoms::{AtomInfo, AtomLookup, AtomLookupError, AtomSource};
pub use substrate_cache::{IdentitySource, SubstrateCache};
pub use substrate_core::{
    compute_composition, compute_relation, AtomPoint, AtomResolver, CachedComposition,
    ComputedComposition, ComputedRelation, ContentId, ResolvedAtom, SubstrateBatch,
    TEXT_BASE_RATING,
};
pub use substrate_flusher::{Flusher, FlusherConfig, FlusherError, FlusherStats};
pub use substrate_geometry::{centroid, hilbert_decode, hilbert_encode, normalize, Vec4, BASEPOINT};
pub use substrate_hash::{EntityPrefix, Hash128, HashError};
pub use substrate_ingest::{tokenize, IngestError, IngestionStats, TextIngester, Token};
pub use substrate_model::{
    ConstantShape, LayerShape, ModelIngestError, ModelIngester, ModelIngestionStats, ModelPackage,
    PackageError,
};
pub use substrate_store::{RedbStore, StoreError, SubstrateStore};

use std::error::Error;
use std::fmt;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::{Duration, Instant};

use config::SubstrateConfig;

type ResolveError = AtomLookupError<StoreError>;

/// Errors a [`Pipeline`] can surface to its caller.
#[derive(Debug)]
pub enum PipelineError {
    Store(StoreError),
    Flusher(FlusherError),
    TextIngest(IngestError<ResolveError>),
    ModelIngest(ModelIngestError<ResolveError>),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Store(err) => write!(f, "store failure: {err}"),
            PipelineError::Flusher(err) => write!(f, "flusher failed to start: {err}"),
            PipelineError::TextIngest(err) => write!(f, "text ingestion failed: {err}"),
            PipelineError::ModelIngest(err) => write!(f, "model ingestion failed: {err}"),
        }
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PipelineError::Store(err) => Some(err),
            PipelineError::Flusher(err) => Some(err),
            PipelineError::TextIngest(err) => Some(err),
            PipelineError::ModelIngest(err) => Some(err),
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(value: StoreError) -> Self {
        PipelineError::Store(value)
    }
}

impl From<FlusherError> for PipelineError {
    fn from(value: FlusherError) -> Self {
        PipelineError::Flusher(value)
    }
}

impl From<ResolveError> for PipelineError {
    fn from(value: ResolveError) -> Self {
        PipelineError::Store(match value {
            AtomLookupError::Source(source) => source,
        })
    }
}

impl From<IngestError<ResolveError>> for PipelineError {
    fn from(value: IngestError<ResolveError>) -> Self {
        PipelineError::TextIngest(value)
    }
}

impl From<ModelIngestError<ResolveError>> for PipelineError {
    fn from(value: ModelIngestError<ResolveError>) -> Self {
        PipelineError::ModelIngest(value)
    }
}

/// Processing stage captured in observability events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    TextIngest,
    ModelIngest,
    Flush,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::TextIngest => "text_ingest",
            PipelineStage::ModelIngest => "model_ingest",
            PipelineStage::Flush => "flush",
        };
        f.write_str(name)
    }
}

/// Outcome of a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEventStatus {
    Success,
    Failure,
}

impl fmt::Display for PipelineEventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PipelineEventStatus::Success => "success",
            PipelineEventStatus::Failure => "failure",
        };
        f.write_str(label)
    }
}

/// Structured observation describing the outcome of a pipeline stage.
#[derive(Debug, Clone)]
pub struct PipelineEvent {
    pub stage: PipelineStage,
    pub status: PipelineEventStatus,
    pub latency: Duration,
    /// A content id (text ingestion) or package path (model ingestion),
    /// hex- or string-formatted by the caller.
    pub label: String,
    pub error: Option<String>,
}

impl PipelineEvent {
    fn from_outcome(
        stage: PipelineStage,
        label: &str,
        latency: Duration,
        error: Option<String>,
    ) -> Self {
        let status = if error.is_some() {
            PipelineEventStatus::Failure
        } else {
            PipelineEventStatus::Success
        };
        Self {
            stage,
            status,
            latency,
            label: label.to_string(),
            error,
        }
    }

    fn format_key_values(&self, include_timestamp: bool) -> String {
        let mut parts = Vec::new();
        if include_timestamp {
            parts.push(format!("timestamp_us={}", now_micros()));
        }
        parts.push(format!("stage={}", self.stage));
        parts.push(format!("status={}", self.status));
        parts.push(format!("latency_us={}", self.latency.as_micros()));
        parts.push(format!("label=\"{}\"", escape_kv(&self.label)));
        if let Some(error) = &self.error {
            parts.push(format!("error=\"{}\"", escape_kv(error)));
        }
        parts.join(" ")
    }
}

fn now_micros() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or(0)
}

fn escape_kv(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

/// Metrics observer for pipeline stages. Errors arrive pre-formatted
/// (rather than as the stage's typed error) because the ingest-side error
/// types are generic over the resolver's error and not `Clone`, and the
/// span already needs a stringified copy for the event logger regardless.
pub trait PipelineMetrics: Send + Sync {
    fn record_text_ingest(&self, latency: Duration, result: Result<(), String>);
    fn record_model_ingest(&self, latency: Duration, result: Result<(), String>);
    fn record_flush(&self, latency: Duration);
}

/// Hook for emitting structured events per pipeline stage.
pub trait PipelineEventLogger: Send + Sync {
    fn log(&self, event: &PipelineEvent);
}

/// Simple key-value logger that writes structured events to any writer.
pub struct KeyValueLogger {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    include_timestamp: bool,
}

impl KeyValueLogger {
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
            include_timestamp: true,
        }
    }

    pub fn with_timestamps(mut self, include_timestamp: bool) -> Self {
        self.include_timestamp = include_timestamp;
        self
    }
}

impl PipelineEventLogger for KeyValueLogger {
    fn log(&self, event: &PipelineEvent) {
        if let Ok(mut writer) = self.writer.lock() {
            let line = event.format_key_values(self.include_timestamp);
            let _ = writeln!(writer, "{line}");
        }
    }
}

/// Install or clear the global pipeline metrics recorder.
pub fn set_pipeline_metrics(recorder: Option<Arc<dyn PipelineMetrics>>) {
    let mut guard = metrics_lock()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = recorder;
}

fn metrics_lock() -> &'static RwLock<Option<Arc<dyn PipelineMetrics>>> {
    static METRICS: OnceLock<RwLock<Option<Arc<dyn PipelineMetrics>>>> = OnceLock::new();
    METRICS.get_or_init(|| RwLock::new(None))
}

fn metrics_recorder() -> Option<Arc<dyn PipelineMetrics>> {
    metrics_lock()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

/// Install or clear the structured pipeline event logger.
pub fn set_pipeline_logger(logger: Option<Arc<dyn PipelineEventLogger>>) {
    let mut guard = logger_lock()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = logger;
}

fn logger_lock() -> &'static RwLock<Option<Arc<dyn PipelineEventLogger>>> {
    static LOGGER: OnceLock<RwLock<Option<Arc<dyn PipelineEventLogger>>>> = OnceLock::new();
    LOGGER.get_or_init(|| RwLock::new(None))
}

fn pipeline_logger() -> Option<Arc<dyn PipelineEventLogger>> {
    logger_lock()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

struct MetricsSpan {
    recorder: Option<Arc<dyn PipelineMetrics>>,
    logger: Option<Arc<dyn PipelineEventLogger>>,
    stage: PipelineStage,
    label: String,
    start: Instant,
}

impl MetricsSpan {
    fn start(stage: PipelineStage, label: impl Into<String>) -> Option<Self> {
        let recorder = metrics_recorder();
        let logger = pipeline_logger();
        if recorder.is_none() && logger.is_none() {
            return None;
        }
        Some(Self {
            recorder,
            logger,
            stage,
            label: label.into(),
            start: Instant::now(),
        })
    }

    fn emit(&self, error: Option<String>) -> Duration {
        let latency = self.start.elapsed();
        if let Some(logger) = self.logger.as_ref() {
            let event = PipelineEvent::from_outcome(self.stage, &self.label, latency, error);
            logger.log(&event);
        }
        latency
    }

    fn record_text_ingest(self, result: Result<(), String>) {
        let latency = self.emit(result.clone().err());
        if let Some(recorder) = self.recorder {
            recorder.record_text_ingest(latency, result);
        }
    }

    fn record_model_ingest(self, result: Result<(), String>) {
        let latency = self.emit(result.clone().err());
        if let Some(recorder) = self.recorder {
            recorder.record_model_ingest(latency, result);
        }
    }

    fn record_flush(self) {
        let latency = self.emit(None);
        if let Some(recorder) = self.recorder {
            recorder.record_flush(latency);
        }
    }
}

/// Owns the full ingestion pipeline: a preloaded atom resolver, the
/// per-run substrate cache, and a flusher worker pool writing durably to
/// the reference store. One `Pipeline` is meant to serve one process;
/// `TextIngester`/`ModelIngester` instances are created fresh per call
/// over borrowed `&self` fields, matching `spec.md` §4.5/§5's
/// single-writer-per-cache concurrency note.
pub struct Pipeline {
    resolver: AtomLookup<RedbStore>,
    cache: SubstrateCache,
    flusher: Flusher,
    config: SubstrateConfig,
}

impl Pipeline {
    /// Open the reference store at `config.store.path` once, preload the
    /// atom and identity caches, and start the flusher worker pool. The
    /// database is opened exactly once; every other owner (the resolver,
    /// the identity pre-populate pass, and each flusher worker) shares
    /// that same handle via `RedbStore::clone`, since `redb::Database`
    /// rejects a second exclusive open from the same process.
    pub fn open(config: SubstrateConfig) -> Result<Self, PipelineError> {
        let store = RedbStore::open(&config.store.path)?;

        let resolver = AtomLookup::new(store.clone());
        resolver.preload_all()?;

        let cache = SubstrateCache::new();
        cache.pre_populate(&store)?;

        let flusher_config: FlusherConfig = config.flusher.into();
        let flusher = Flusher::start(flusher_config, move || Ok::<_, StoreError>(store.clone()))?;

        Ok(Pipeline {
            resolver,
            cache,
            flusher,
            config,
        })
    }

    fn text_ingester(&self) -> TextIngester<'_, AtomLookup<RedbStore>> {
        TextIngester::new(&self.resolver, &self.cache, &self.flusher)
            .with_batch_threshold(self.config.ingester.batch_threshold)
            .with_base_rating(self.config.ingester.text_base_rating)
    }

    fn model_ingester(&self) -> ModelIngester<'_, AtomLookup<RedbStore>> {
        ModelIngester::new(&self.resolver, &self.cache, &self.flusher)
            .with_similarity_threshold(self.config.model.similarity_threshold)
            .with_max_neighbors(self.config.model.max_neighbors)
            .with_base_rating(self.config.model.base_rating)
    }

    pub fn ingest_text(
        &self,
        content_id: ContentId,
        text: &str,
    ) -> Result<IngestionStats, PipelineError> {
        let span = MetricsSpan::start(PipelineStage::TextIngest, content_id.to_hex());
        let result = self.text_ingester().ingest_text(content_id, text);
        if let Some(span) = span {
            span.record_text_ingest(result.as_ref().map(|_| ()).map_err(ToString::to_string));
        }
        result.map_err(PipelineError::from)
    }

    pub fn ingest_file(&self, path: &Path) -> Result<IngestionStats, PipelineError> {
        let span = MetricsSpan::start(PipelineStage::TextIngest, path.display().to_string());
        let result = self.text_ingester().ingest_file(path);
        if let Some(span) = span {
            span.record_text_ingest(result.as_ref().map(|_| ()).map_err(ToString::to_string));
        }
        result.map_err(PipelineError::from)
    }

    pub fn ingest_model(&self, package_dir: &Path) -> Result<ModelIngestionStats, PipelineError> {
        let span = MetricsSpan::start(PipelineStage::ModelIngest, package_dir.display().to_string());
        let result = self.model_ingester().ingest_model(package_dir);
        if let Some(span) = span {
            span.record_model_ingest(result.as_ref().map(|_| ()).map_err(ToString::to_string));
        }
        result.map_err(PipelineError::from)
    }

    /// Block until all enqueued work is durable (`spec.md` §6
    /// `flush_wait()`).
    pub fn flush_wait(&self) {
        let span = MetricsSpan::start(PipelineStage::Flush, "flush_wait");
        self.flusher.wait_all();
        if let Some(span) = span {
            span.record_flush();
        }
    }

    pub fn flusher_stats(&self) -> FlusherStats {
        self.flusher.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_end_to_end_ingests_text_and_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SubstrateConfig::default();
        config.store.path = dir.path().join("substrate.redb").display().to_string();

        let pipeline = Pipeline::open(config).unwrap();
        let content_id = Hash128::digest(b"doc-1");

        // No atoms are seeded, so every codepoint is unresolved and the
        // composition is empty; this still exercises the full path
        // without requiring a populated store.
        let stats = pipeline.ingest_text(content_id, "hello world").unwrap();
        assert_eq!(stats.compositions_new, 0);

        pipeline.flush_wait();
        assert_eq!(pipeline.flusher_stats().dropped, 0);
    }

    #[test]
    fn pipeline_stage_display_matches_expected_labels() {
        assert_eq!(PipelineStage::TextIngest.to_string(), "text_ingest");
        assert_eq!(PipelineStage::ModelIngest.to_string(), "model_ingest");
        assert_eq!(PipelineStage::Flush.to_string(), "flush");
    }

    #[test]
    fn key_value_logger_formats_an_event() {
        let buffer: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        struct SharedWriter(Arc<Mutex<Vec<u8>>>);
        impl Write for SharedWriter {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().write(buf)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let logger = KeyValueLogger::new(Box::new(SharedWriter(buffer.clone()))).with_timestamps(false);
        let event = PipelineEvent::from_outcome(
            PipelineStage::TextIngest,
            "doc-1",
            Duration::from_micros(42),
            None,
        );
        logger.log(&event);
        let output = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(output.contains("stage=text_ingest"));
        assert!(output.contains("status=success"));
        assert!(output.contains("label=\"doc-1\""));
    }
}
