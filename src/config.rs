//! YAML configuration file support for the substrate pipeline.
//!
//! Loads the flusher, ingester, and model-ingester knobs from a single YAML
//! document so deployments can tune them without recompiling (`spec.md`
//! §6 "Configuration").
//!
//! ## Example YAML configuration
//!
//! ```yaml
//! version: "1.0"
//!
//! store:
//!   path: "./substrate.redb"
//!
//! flusher:
//!   workers: 3
//!   queue_capacity: 16
//!   deadlock_retries: 4
//!
//! ingester:
//!   batch_threshold: 100000
//!   text_base_rating: 1500.0
//!
//! model:
//!   similarity_threshold: 0.40
//!   max_neighbors: 64
//!   base_rating: 1200.0
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),
}

/// Top-level YAML configuration for the substrate pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SubstrateConfig {
    pub version: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub store: StoreYamlConfig,

    #[serde(default)]
    pub flusher: FlusherYamlConfig,

    #[serde(default)]
    pub ingester: IngesterYamlConfig,

    #[serde(default)]
    pub model: ModelYamlConfig,
}

impl SubstrateConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: SubstrateConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;
        self.flusher.validate()?;
        self.ingester.validate()?;
        self.model.validate()?;
        Ok(())
    }
}

impl Default for SubstrateConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            name: None,
            store: StoreYamlConfig::default(),
            flusher: FlusherYamlConfig::default(),
            ingester: IngesterYamlConfig::default(),
            model: ModelYamlConfig::default(),
        }
    }
}

/// The reference store's configuration. Out of scope at the core level
/// (`spec.md` §1), but the redb reference store needs a file path from
/// somewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreYamlConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreYamlConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// `spec.md` §6 `flusher.*`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FlusherYamlConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_deadlock_retries")]
    pub deadlock_retries: u32,
}

impl FlusherYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.workers == 0 {
            return Err(ConfigLoadError::Validation(
                "flusher.workers must be >= 1".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigLoadError::Validation(
                "flusher.queue_capacity must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for FlusherYamlConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            deadlock_retries: default_deadlock_retries(),
        }
    }
}

impl From<FlusherYamlConfig> for substrate_flusher::FlusherConfig {
    fn from(cfg: FlusherYamlConfig) -> Self {
        substrate_flusher::FlusherConfig {
            workers: cfg.workers,
            queue_capacity: cfg.queue_capacity,
            deadlock_retries: cfg.deadlock_retries,
        }
    }
}

/// `spec.md` §6 `ingester.*` and `text.base_rating`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IngesterYamlConfig {
    #[serde(default = "default_batch_threshold")]
    pub batch_threshold: usize,

    #[serde(default = "default_text_base_rating")]
    pub text_base_rating: f64,
}

impl IngesterYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.batch_threshold == 0 {
            return Err(ConfigLoadError::Validation(
                "ingester.batch_threshold must be >= 1".to_string(),
            ));
        }
        if self.text_base_rating < 0.0 {
            return Err(ConfigLoadError::Validation(
                "ingester.text_base_rating must be >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for IngesterYamlConfig {
    fn default() -> Self {
        Self {
            batch_threshold: default_batch_threshold(),
            text_base_rating: default_text_base_rating(),
        }
    }
}

/// `spec.md` §6 `model.*`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelYamlConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    #[serde(default = "default_max_neighbors")]
    pub max_neighbors: usize,

    #[serde(default = "default_model_base_rating")]
    pub base_rating: f64,
}

impl ModelYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigLoadError::Validation(
                "model.similarity_threshold must be within [-1.0, 1.0]".to_string(),
            ));
        }
        if self.max_neighbors == 0 {
            return Err(ConfigLoadError::Validation(
                "model.max_neighbors must be >= 1".to_string(),
            ));
        }
        if self.base_rating < 0.0 {
            return Err(ConfigLoadError::Validation(
                "model.base_rating must be >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ModelYamlConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            max_neighbors: default_max_neighbors(),
            base_rating: default_model_base_rating(),
        }
    }
}

fn default_store_path() -> String {
    "./substrate.redb".to_string()
}
fn default_workers() -> usize {
    3
}
fn default_queue_capacity() -> usize {
    16
}
fn default_deadlock_retries() -> u32 {
    4
}
fn default_batch_threshold() -> usize {
    100_000
}
fn default_text_base_rating() -> f64 {
    substrate_core::TEXT_BASE_RATING
}
fn default_similarity_threshold() -> f32 {
    substrate_model::DEFAULT_SIMILARITY_THRESHOLD
}
fn default_max_neighbors() -> usize {
    substrate_model::DEFAULT_MAX_NEIGHBORS
}
fn default_model_base_rating() -> f64 {
    substrate_model::MODEL_BASE_RATING
}
