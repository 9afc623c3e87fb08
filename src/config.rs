//! Index configuration structs and layered loading.
//!
//! Per-section structs with `#[serde(default)]`, a `validate()` method each,
//! and a `figment`-layered `AnnidxConfig::load` (defaults < TOML file <
//! `ANNIDX_*` env vars).

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::distance::DistanceMetric;

/// Configuration-layer errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to parse configuration from its source.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// A configuration value failed validation.
    #[error("invalid configuration value for '{key}': {message}")]
    InvalidValue {
        /// Dotted key path, e.g. `"hnsw.m"`.
        key: String,
        /// Human-readable validation failure.
        message: String,
    },
}

/// HNSW index configuration (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    /// Vector dimension.
    pub dimension: usize,
    /// Target degree per level > 0 (`M_max(0) = 2M`).
    pub m: usize,
    /// Build-time candidate set size.
    pub ef_construction: usize,
    /// Query-time candidate set size.
    pub ef_search: usize,
    /// Distance metric.
    pub metric: DistanceMetric,
    /// Random seed for reproducible level assignment.
    pub seed: u64,
    /// Optional quantizer configuration.
    pub quantizer: Option<QuantizerConfig>,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            dimension: 0,
            m: 16,
            ef_construction: 200,
            ef_search: 64,
            metric: DistanceMetric::L2,
            seed: 42,
            quantizer: None,
        }
    }
}

impl HnswConfig {
    /// Validates the configuration per spec §4.4/§7.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if any field is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dimension == 0 {
            return Err(ConfigError::InvalidValue {
                key: "hnsw.dimension".into(),
                message: "must be greater than zero".into(),
            });
        }
        if !(4..=128).contains(&self.m) {
            return Err(ConfigError::InvalidValue {
                key: "hnsw.m".into(),
                message: format!("value {} is out of range [4, 128]", self.m),
            });
        }
        if self.ef_construction < self.m {
            return Err(ConfigError::InvalidValue {
                key: "hnsw.ef_construction".into(),
                message: format!("must be >= m ({})", self.m),
            });
        }
        if self.ef_search == 0 {
            return Err(ConfigError::InvalidValue {
                key: "hnsw.ef_search".into(),
                message: "must be greater than zero".into(),
            });
        }
        if let Some(q) = &self.quantizer {
            q.validate()?;
        }
        Ok(())
    }

    /// `M_max(level)`: `2*m` at level 0, `m` above it (spec §3).
    #[must_use]
    pub fn m_max(&self, level: usize) -> usize {
        if level == 0 {
            2 * self.m
        } else {
            self.m
        }
    }
}

/// IVF-PQ index configuration (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IvfPqConfig {
    /// Vector dimension.
    pub dimension: usize,
    /// Number of coarse (Voronoi) clusters.
    pub n_clusters: usize,
    /// Number of clusters probed per query.
    pub n_probes: usize,
    /// Distance metric.
    pub metric: DistanceMetric,
    /// Random seed for k-means++ seeding.
    pub seed: u64,
    /// Maximum k-means iterations.
    pub max_iterations: usize,
    /// Relative inertia-change convergence tolerance.
    pub tolerance: f64,
    /// Optional fine (per-entry) quantizer configuration.
    pub quantizer: Option<QuantizerConfig>,
    /// Enable adaptive probe-count tuning (spec §4.5).
    pub adaptive_probes: bool,
}

impl Default for IvfPqConfig {
    fn default() -> Self {
        Self {
            dimension: 0,
            n_clusters: 256,
            n_probes: 8,
            metric: DistanceMetric::L2,
            seed: 42,
            max_iterations: 25,
            tolerance: 1e-4,
            quantizer: None,
            adaptive_probes: false,
        }
    }
}

impl IvfPqConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if any field is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dimension == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ivfpq.dimension".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.n_clusters == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ivfpq.n_clusters".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.n_probes == 0 || self.n_probes > self.n_clusters {
            return Err(ConfigError::InvalidValue {
                key: "ivfpq.n_probes".into(),
                message: format!("must be in [1, {}]", self.n_clusters),
            });
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ivfpq.max_iterations".into(),
                message: "must be greater than zero".into(),
            });
        }
        if !(self.tolerance > 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "ivfpq.tolerance".into(),
                message: "must be positive".into(),
            });
        }
        if let Some(q) = &self.quantizer {
            q.validate()?;
        }
        Ok(())
    }
}

/// Flat (brute-force) index configuration (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlatConfig {
    /// Vector dimension.
    pub dimension: usize,
    /// Distance metric.
    pub metric: DistanceMetric,
}

impl Default for FlatConfig {
    fn default() -> Self {
        Self {
            dimension: 0,
            metric: DistanceMetric::L2,
        }
    }
}

impl FlatConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the dimension is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dimension == 0 {
            return Err(ConfigError::InvalidValue {
                key: "flat.dimension".into(),
                message: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

/// Which quantizer variant a [`QuantizerConfig`] configures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantizerKind {
    /// Product Quantization.
    Product,
    /// Scalar (per-dimension) quantization.
    Scalar,
}

/// Quantizer configuration shared by HNSW and IVF-PQ (spec §4.2/§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizerConfig {
    /// Which quantizer variant to build.
    pub kind: QuantizerKind,
    /// Number of PQ sub-spaces (`S`). Ignored for scalar.
    pub codebooks: usize,
    /// Bits per code (PQ: per sub-space code; Scalar: per dimension).
    pub bits: u32,
    /// Fraction of the training batch actually used, `(0, 1]`.
    pub train_ratio: f64,
    /// Bound on the asymmetric-distance-table LRU cache (PQ only).
    pub cache_size: usize,
}

impl Default for QuantizerConfig {
    fn default() -> Self {
        Self {
            kind: QuantizerKind::Scalar,
            codebooks: 8,
            bits: 8,
            train_ratio: 1.0,
            cache_size: 1024,
        }
    }
}

impl QuantizerConfig {
    /// Validates the configuration per spec §4.2.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if any field is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=32).contains(&self.bits) {
            return Err(ConfigError::InvalidValue {
                key: "quantizer.bits".into(),
                message: format!("value {} is out of range [1, 32]", self.bits),
            });
        }
        if !(self.train_ratio > 0.0 && self.train_ratio <= 1.0) {
            return Err(ConfigError::InvalidValue {
                key: "quantizer.train_ratio".into(),
                message: "must be in (0, 1]".into(),
            });
        }
        if self.kind == QuantizerKind::Product && self.codebooks == 0 {
            return Err(ConfigError::InvalidValue {
                key: "quantizer.codebooks".into(),
                message: "must be >= 1 for product quantization".into(),
            });
        }
        Ok(())
    }
}

/// Top-level, layered configuration bundling all three index kinds.
///
/// An embedding application can ship an `annidx.toml` beside its binary;
/// this struct does not depend on any particular application framework.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnidxConfig {
    /// HNSW defaults.
    pub hnsw: HnswConfig,
    /// IVF-PQ defaults.
    pub ivfpq: IvfPqConfig,
    /// Flat-index defaults.
    pub flat: FlatConfig,
}

impl AnnidxConfig {
    /// Loads configuration layering defaults, an optional TOML file, and
    /// `ANNIDX_*` environment variables, in that priority order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] if any layer fails to parse.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("ANNIDX_").split("_").lowercase(false));
        figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validates all three sub-configurations.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::InvalidValue`] encountered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.hnsw.validate()?;
        self.ivfpq.validate()?;
        self.flat.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_hnsw_config_needs_a_dimension() {
        let config = HnswConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn hnsw_config_rejects_ef_construction_below_m() {
        let config = HnswConfig {
            dimension: 4,
            m: 16,
            ef_construction: 4,
            ..HnswConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn hnsw_m_max_doubles_at_level_zero() {
        let config = HnswConfig {
            dimension: 4,
            m: 16,
            ..HnswConfig::default()
        };
        assert_eq!(config.m_max(0), 32);
        assert_eq!(config.m_max(1), 16);
    }

    #[test]
    fn ivfpq_config_rejects_too_many_probes() {
        let config = IvfPqConfig {
            dimension: 4,
            n_clusters: 4,
            n_probes: 5,
            ..IvfPqConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn quantizer_config_rejects_zero_codebooks_for_product() {
        let config = QuantizerConfig {
            kind: QuantizerKind::Product,
            codebooks: 0,
            ..QuantizerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn annidx_config_loads_defaults_without_a_file() {
        let config = AnnidxConfig::load(None).expect("defaults always parse");
        assert_eq!(config.hnsw.m, 16);
    }
}
