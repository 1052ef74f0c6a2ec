//! Engine configuration.
//!
//! Defaults are merged with an optional TOML file and `DATASHEET_*`
//! environment variables (`__` separates nested keys, e.g.
//! `DATASHEET_CHUNKING__MAX_CHARS=1500`).

use crate::error::{ChunkingError, IngestError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_COLLECTION: &str = "component_datasheets";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub min_chars: usize,
    pub max_chars: usize,
    pub overlap_chars: usize,
    /// How far before the overlap point a sentence boundary may be used as
    /// the next chunk start.
    pub snap_tolerance: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_chars: 1_000,
            max_chars: 2_000,
            overlap_chars: 200,
            snap_tolerance: 64,
        }
    }
}

impl ChunkingConfig {
    pub fn new(min_chars: usize, max_chars: usize, overlap_chars: usize) -> Self {
        Self {
            min_chars,
            max_chars,
            overlap_chars,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ChunkingError> {
        if self.max_chars == 0 {
            return Err(ChunkingError::InvalidConfig(
                "max_chars must be positive".to_string(),
            ));
        }
        if self.min_chars > self.max_chars {
            return Err(ChunkingError::InvalidConfig(format!(
                "min_chars {} exceeds max_chars {}",
                self.min_chars, self.max_chars
            )));
        }
        if self.overlap_chars >= self.min_chars {
            return Err(ChunkingError::InvalidConfig(format!(
                "overlap_chars {} must be smaller than min_chars {}",
                self.overlap_chars, self.min_chars
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub chunking: ChunkingConfig,
    pub embed_batch_size: usize,
    pub max_input_chars: usize,
    pub search_budget_ms: u64,
    pub query_timeout_ms: u64,
    pub latency_window: usize,
    pub default_collection: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            embed_batch_size: 32,
            max_input_chars: 8_192,
            search_budget_ms: 150,
            query_timeout_ms: 5_000,
            latency_window: 1_024,
            default_collection: DEFAULT_COLLECTION.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, IngestError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("DATASHEET_").split("__"));

        let config: Self = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        self.chunking.validate()?;
        if self.embed_batch_size == 0 {
            return Err(IngestError::InvalidArgument(
                "embed_batch_size must be positive".to_string(),
            ));
        }
        if self.max_input_chars < self.chunking.max_chars {
            return Err(IngestError::InvalidArgument(format!(
                "max_input_chars {} is smaller than chunk max_chars {}",
                self.max_input_chars, self.chunking.max_chars
            )));
        }
        if self.default_collection.trim().is_empty() {
            return Err(IngestError::InvalidArgument(
                "default_collection must not be blank".to_string(),
            ));
        }
        Ok(())
    }

    pub fn search_budget(&self) -> Duration {
        Duration::from_millis(self.search_budget_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}
