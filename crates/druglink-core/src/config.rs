//! Engine configuration.
//!
//! Every section deserializes with `#[serde(default)]`, so a partial TOML file only
//! overrides what it names.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Top-level configuration for the formulary engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path to the formulary dataset JSON
    pub dataset_path: Option<PathBuf>,
    pub search: SearchConfig,
    pub translator: TranslatorConfig,
    pub expansion: ExpansionConfig,
}

impl EngineConfig {
    /// Check all sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.search.validate()?;
        self.translator.validate()?;
        self.expansion.validate()
    }
}

/// Local search tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Results returned when the caller gives no limit
    pub default_limit: usize,
    /// Token keys scanned for queries shorter than the prefix length
    pub short_query_scan_cap: usize,
    /// Minimum Jaro-Winkler similarity for the typo fallback
    pub typo_threshold: f64,
    /// Token keys sharing the first letter compared per term by the typo fallback
    pub typo_scan_cap: usize,
    /// Lifetime of cached search results
    pub result_cache_ttl_secs: u64,
    /// Number of cached queries
    pub result_cache_capacity: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 50,
            short_query_scan_cap: 100,
            typo_threshold: 0.88,
            typo_scan_cap: 20_000,
            result_cache_ttl_secs: 300,
            result_cache_capacity: 256,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_limit == 0 {
            return Err(invalid("search.default_limit", "must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.typo_threshold) {
            return Err(invalid("search.typo_threshold", "must be within [0, 1]"));
        }
        if self.result_cache_capacity == 0 {
            return Err(invalid("search.result_cache_capacity", "must be greater than zero"));
        }
        Ok(())
    }
}

/// Translation heuristics. The thresholds are empirical.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    /// A key contained in the query must be at least this long relative to it
    pub min_contains_ratio: f64,
    /// Prefix length for classification-code fallback matches
    pub atc_prefix_len: usize,
    /// Queries shorter than this skip partial matching
    pub min_partial_query_len: usize,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            min_contains_ratio: 0.7,
            atc_prefix_len: 5,
            min_partial_query_len: 3,
        }
    }
}

impl TranslatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min_contains_ratio > 0.0 && self.min_contains_ratio <= 1.0) {
            return Err(invalid("translator.min_contains_ratio", "must be within (0, 1]"));
        }
        if self.atc_prefix_len == 0 {
            return Err(invalid("translator.atc_prefix_len", "must be greater than zero"));
        }
        Ok(())
    }
}

/// Expansion cache policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    /// Maximum number of entries
    pub capacity: usize,
    /// Entries idle longer than this may be pruned
    pub idle_days: i64,
    /// Fill ratio at which idle pruning starts
    pub prune_threshold: f64,
    /// Entries used more often than this are never pruned for idleness
    pub keep_use_count: u32,
    /// Entries dropped before retrying a write that hit the storage quota
    pub quota_eviction_batch: usize,
    /// Key of the persisted blob
    pub storage_key: String,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            idle_days: 30,
            prune_threshold: 0.75,
            keep_use_count: 3,
            quota_eviction_batch: 50,
            storage_key: crate::cache::EXPANSION_STORAGE_KEY.to_string(),
        }
    }
}

impl ExpansionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(invalid("expansion.capacity", "must be greater than zero"));
        }
        if !(self.prune_threshold > 0.0 && self.prune_threshold <= 1.0) {
            return Err(invalid("expansion.prune_threshold", "must be within (0, 1]"));
        }
        if self.quota_eviction_batch == 0 {
            return Err(invalid("expansion.quota_eviction_batch", "must be greater than zero"));
        }
        if self.storage_key.trim().is_empty() {
            return Err(invalid("expansion.storage_key", "must not be empty"));
        }
        Ok(())
    }

    /// Entry count at which idle pruning becomes eligible.
    pub fn prune_watermark(&self) -> usize {
        (self.capacity as f64 * self.prune_threshold).ceil() as usize
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}
