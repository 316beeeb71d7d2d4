//! Druglink Core Library
//!
//! Identity resolution for a national drug formulary: maps free-text product and
//! ingredient fields to international names, ranks local search results and keeps
//! externally resolved drugs in a persisted expansion cache.
//!
//! # Architecture
//!
//! ```text
//! FormularyRecord ─► IngredientParser ─► components
//!                                            │
//!                                 IngredientTranslator ─► international names
//!                                            │
//!                                 (external sources, see druglink-sources)
//!
//! query ─► SearchIndex ──┐
//!                        ├─► merged, ranked SearchHits
//! query ─► ExpansionCache┘
//! ```
//!
//! # Modules
//!
//! - [`resolver`]: Normalization, ingredient parsing and translation
//! - [`index`]: Token, prefix and drug-class search index
//! - [`cache`]: TTL cache and the persisted expansion cache
//! - [`store`]: Key-value storage (in-memory and SQLite)
//! - [`engine`]: Lazily loaded formulary tying the above together
//! - [`db`]: SQLite file behind `SqliteStore`

pub mod cache;
pub mod clock;
pub mod config;
pub mod dataset;
pub mod db;
pub mod engine;
pub mod index;
pub mod lifecycle;
pub mod models;
pub mod resolver;
pub mod store;

// Re-export commonly used types
pub use cache::{ExpansionCache, TtlCache};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{EngineConfig, ExpansionConfig, SearchConfig, TranslatorConfig};
pub use dataset::{DatasetError, FormularyDataset};
pub use db::Database;
pub use engine::{DatasetSource, FormularyEngine, LoadedFormulary};
pub use index::{HitOrigin, MarketFilter, SearchHit, SearchIndex, SearchOptions};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use models::{ExpansionCacheEntry, FormularyRecord, ParsedIngredient, SourceId};
pub use resolver::{IngredientParser, IngredientTranslator};
pub use store::{KeyValueStore, MemoryStore, SqliteStore, StoreError};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::Arc;

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum DruglinkError {
    #[error("Dataset error: {0}")]
    DatasetError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<DatasetError> for DruglinkError {
    fn from(e: DatasetError) -> Self {
        DruglinkError::DatasetError(e.to_string())
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Build a formulary from dataset JSON.
#[uniffi::export]
pub fn open_formulary(json: String) -> Result<Arc<DruglinkCore>, DruglinkError> {
    let dataset = FormularyDataset::from_json_str(&json)?;
    Ok(Arc::new(DruglinkCore::build(dataset, EngineConfig::default())))
}

/// Build a formulary from a dataset file.
#[uniffi::export]
pub fn open_formulary_file(path: String) -> Result<Arc<DruglinkCore>, DruglinkError> {
    let json = std::fs::read_to_string(&path)
        .map_err(|e| DruglinkError::DatasetError(format!("{path}: {e}")))?;
    open_formulary(json)
}

// =========================================================================
// Main API Object
// =========================================================================

/// Synchronous formulary handle for FFI callers.
#[derive(uniffi::Object)]
pub struct DruglinkCore {
    formulary: LoadedFormulary,
    parser: IngredientParser,
}

impl DruglinkCore {
    fn build(dataset: FormularyDataset, config: EngineConfig) -> Self {
        Self {
            formulary: LoadedFormulary::build(dataset, &config),
            parser: IngredientParser::new(),
        }
    }
}

#[uniffi::export]
impl DruglinkCore {
    /// Ranked search by name, ingredient or ATC code.
    pub fn search(&self, query: String, limit: u32) -> Result<Vec<FfiSearchHit>, DruglinkError> {
        if limit == 0 {
            return Err(DruglinkError::InvalidInput("limit must be positive".to_string()));
        }
        let hits = self
            .formulary
            .index
            .search(&query, &SearchOptions::with_limit(limit as usize));
        Ok(hits.into_iter().map(|h| h.into()).collect())
    }

    /// Get a record by id.
    pub fn get_record(&self, id: String) -> Option<FfiFormularyRecord> {
        self.formulary.index.get(&id).cloned().map(|r| r.into())
    }

    /// Split an ingredient field into components.
    pub fn parse_ingredients(&self, field: String) -> FfiParsedIngredient {
        self.parser.parse(&field).into()
    }

    /// International-name candidates for a local ingredient name.
    pub fn translate(&self, name: String) -> Vec<String> {
        self.formulary.translator.to_international(&name)
    }

    /// Canonical name for an ATC code.
    pub fn classification_name(&self, code: String) -> Option<String> {
        self.formulary.translator.from_classification_code(&code)
    }

    /// Number of records in the formulary.
    pub fn record_count(&self) -> u64 {
        self.formulary.index.len() as u64
    }

    /// Dataset version string.
    pub fn version(&self) -> String {
        self.formulary.version.clone()
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe formulary record.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiFormularyRecord {
    pub id: String,
    pub name: String,
    pub base_name: String,
    pub active_ingredient: String,
    pub atc_code: String,
    pub is_marketed: bool,
    pub route: Option<String>,
    pub prescription_only: bool,
    pub form: Option<String>,
    pub strength: Option<String>,
}

impl From<FormularyRecord> for FfiFormularyRecord {
    fn from(record: FormularyRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            base_name: record.base_name,
            active_ingredient: record.active_ingredient,
            atc_code: record.atc_code,
            is_marketed: record.is_marketed,
            route: record.route,
            prescription_only: record.prescription_only,
            form: record.form,
            strength: record.strength,
        }
    }
}

/// FFI-safe search hit.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSearchHit {
    pub record: FfiFormularyRecord,
    pub score: u32,
}

impl From<SearchHit> for FfiSearchHit {
    fn from(hit: SearchHit) -> Self {
        Self {
            record: hit.record.into(),
            score: hit.score,
        }
    }
}

/// FFI-safe parsed ingredient field.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiParsedIngredient {
    pub original: String,
    pub ingredients: Vec<String>,
    pub is_multi_ingredient: bool,
    pub is_generic_placeholder: bool,
}

impl From<ParsedIngredient> for FfiParsedIngredient {
    fn from(parsed: ParsedIngredient) -> Self {
        Self {
            original: parsed.original,
            ingredients: parsed.ingredients,
            is_multi_ingredient: parsed.is_multi_ingredient,
            is_generic_placeholder: parsed.is_generic_placeholder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATASET: &str = r#"{
        "version": "ffi-test",
        "drugs": [
            {"id": "1", "name": "Biktarvy 50/200/25 mg",
             "active_ingredient": "emtricitabine, tenofovir alafenamide and bictegravir",
             "atc_code": "J05AR20", "is_marketed": true}
        ],
        "translations": {"bictegravir": ["bictegravir"]},
        "atc_names": {"J05AR20": "emtricitabine, tenofovir alafenamide and bictegravir"}
    }"#;

    #[test]
    fn test_open_and_query() {
        let core = open_formulary(DATASET.to_string()).unwrap();

        assert_eq!(core.record_count(), 1);
        assert_eq!(core.version(), "ffi-test");
        assert_eq!(core.search("biktarvy".to_string(), 10).unwrap().len(), 1);
        assert!(core.get_record("1".to_string()).is_some());
        assert_eq!(
            core.parse_ingredients("emtricitabine, tenofovir alafenamide and bictegravir".to_string())
                .ingredients
                .len(),
            3
        );
        assert!(core.classification_name("J05AR20".to_string()).is_some());
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            open_formulary("[]".to_string()),
            Err(DruglinkError::DatasetError(_))
        ));

        let core = open_formulary(DATASET.to_string()).unwrap();
        assert!(matches!(
            core.search("x".to_string(), 0),
            Err(DruglinkError::InvalidInput(_))
        ));
    }
}
