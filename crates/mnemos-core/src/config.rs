//! Configuration for the mnemos engine.
//!
//! Configuration is loaded in order:
//! 1. `config/default.toml` (base settings)
//! 2. `config/{MNEMOS_ENV}.toml` (environment-specific)
//! 3. Environment variables with `MNEMOS_` prefix
//!
//! HNSW construction parameters are tunable configuration, not business
//! logic: callers that need different recall/latency trade-offs adjust
//! `m`, `ef_construction` and `ef_search` rather than patching the index.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// HNSW construction and search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Vector dimension every record in the index must carry.
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Max connections per node per layer (layer 0 uses 2*M).
    #[serde(default = "default_m")]
    pub m: usize,
    /// Build-time beam width.
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    /// Search-time beam width (clamped up to k at query time).
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
    /// Hard cap on the level a node can be assigned.
    #[serde(default = "default_max_level")]
    pub max_level: usize,
    /// Seed for level assignment. Fixed seed + identical insert order
    /// yields an identical graph.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_dimension() -> usize {
    384
}
fn default_m() -> usize {
    16
}
fn default_ef_construction() -> usize {
    200
}
fn default_ef_search() -> usize {
    50
}
fn default_max_level() -> usize {
    16
}
fn default_seed() -> u64 {
    42
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            m: default_m(),
            ef_construction: default_ef_construction(),
            ef_search: default_ef_search(),
            max_level: default_max_level(),
            seed: default_seed(),
        }
    }
}

impl HnswConfig {
    /// Default parameters for a given vector dimension.
    pub fn for_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }

    /// Level-continuation multiplier: `1 / ln(M)`.
    pub fn level_multiplier(&self) -> f64 {
        1.0 / (self.m as f64).ln()
    }

    /// Degree cap for a layer: M above layer 0, 2*M at layer 0.
    pub fn max_connections(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m * 2
        } else {
            self.m
        }
    }

    /// Validate parameter ranges.
    pub fn validate(&self) -> CoreResult<()> {
        if self.dimension == 0 {
            return Err(CoreError::ConfigError(
                "index.dimension must be > 0".to_string(),
            ));
        }
        if self.m < 2 {
            return Err(CoreError::ConfigError(format!(
                "index.m must be >= 2, got {}",
                self.m
            )));
        }
        if self.ef_construction < self.m {
            return Err(CoreError::ConfigError(format!(
                "index.ef_construction ({}) must be >= index.m ({})",
                self.ef_construction, self.m
            )));
        }
        if self.ef_search == 0 {
            return Err(CoreError::ConfigError(
                "index.ef_search must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Proximity index parameters.
    #[serde(default)]
    pub index: HnswConfig,
}

impl Config {
    /// Load configuration from files and environment.
    pub fn load() -> CoreResult<Self> {
        let env = std::env::var("MNEMOS_ENV").unwrap_or_else(|_| "development".to_string());

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("MNEMOS").separator("__"));

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::ConfigError(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| CoreError::ConfigError(format!("failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate all sections.
    pub fn validate(&self) -> CoreResult<()> {
        self.index.validate()
    }
}
