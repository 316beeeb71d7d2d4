//! The formulary engine: lazy dataset loading, search and translation.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::cache::{ExpansionCache, TtlCache};
use crate::clock::{system_clock, SharedClock};
use crate::config::EngineConfig;
use crate::dataset::{DatasetError, FormularyDataset};
use crate::index::{scoring, HitOrigin, SearchHit, SearchIndex, SearchOptions};
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::models::{FormularyRecord, ParsedIngredient};
use crate::resolver::{normalize, IngredientParser, IngredientTranslator};
use crate::store::KeyValueStore;

/// Where the formulary comes from.
#[derive(Debug, Clone)]
pub enum DatasetSource {
    Path(PathBuf),
    Json(String),
    Dataset(FormularyDataset),
}

/// The read-only state built from a dataset.
#[derive(Debug)]
pub struct LoadedFormulary {
    pub index: SearchIndex,
    pub translator: IngredientTranslator,
    pub version: String,
}

impl LoadedFormulary {
    /// Build the index and translator.
    pub fn build(dataset: FormularyDataset, config: &EngineConfig) -> Self {
        let translator = IngredientTranslator::new(
            &dataset.translations,
            &dataset.atc_names,
            config.translator.clone(),
        );
        let index = SearchIndex::build(dataset.drugs, config.search.clone());
        Self {
            index,
            translator,
            version: dataset.version,
        }
    }

    fn empty(config: &EngineConfig) -> Self {
        Self::build(FormularyDataset::default(), config)
    }
}

type ResultKey = (String, SearchOptions);

#[derive(Debug)]
struct ResultCache {
    hits: TtlCache<ResultKey, Vec<SearchHit>>,
    /// Expansion cache generation the cached hits were computed against
    generation: u64,
}

/// Search and translation over the national formulary plus the expansion cache.
///
/// The dataset is loaded on first use; every query awaits that load.
#[derive(Debug)]
pub struct FormularyEngine {
    source: DatasetSource,
    formulary: Lifecycle<LoadedFormulary>,
    parser: IngredientParser,
    expansion: Arc<ExpansionCache>,
    results: Mutex<ResultCache>,
    config: EngineConfig,
}

impl FormularyEngine {
    /// Create an engine that loads `source` on first use.
    pub fn new(source: DatasetSource, expansion: Arc<ExpansionCache>, config: EngineConfig) -> Self {
        Self::with_clock(source, expansion, config, system_clock())
    }

    /// Create an engine with an explicit clock for the result cache.
    pub fn with_clock(
        source: DatasetSource,
        expansion: Arc<ExpansionCache>,
        config: EngineConfig,
        clock: SharedClock,
    ) -> Self {
        let results = ResultCache {
            hits: TtlCache::new(
                config.search.result_cache_capacity,
                Duration::from_secs(config.search.result_cache_ttl_secs),
                clock,
            ),
            generation: expansion.generation(),
        };
        Self {
            source,
            formulary: Lifecycle::new(),
            parser: IngredientParser::new(),
            expansion,
            results: Mutex::new(results),
            config,
        }
    }

    /// Create an engine from configuration, persisting the expansion cache to `store`.
    pub fn from_config(config: EngineConfig, store: Arc<dyn KeyValueStore>) -> Self {
        let clock = system_clock();
        let source = match &config.dataset_path {
            Some(path) => DatasetSource::Path(path.clone()),
            None => {
                warn!("No dataset path configured; the formulary will be empty");
                DatasetSource::Dataset(FormularyDataset::default())
            }
        };
        let expansion = Arc::new(ExpansionCache::new(store, config.expansion.clone(), clock.clone()));
        Self::with_clock(source, expansion, config, clock)
    }

    /// Create an engine over an in-memory dataset with an in-memory expansion cache.
    pub fn from_dataset(dataset: FormularyDataset, config: EngineConfig) -> Self {
        let clock = system_clock();
        let expansion = Arc::new(ExpansionCache::in_memory(config.expansion.clone(), clock.clone()));
        Self::with_clock(DatasetSource::Dataset(dataset), expansion, config, clock)
    }

    pub fn state(&self) -> LifecycleState {
        self.formulary.state()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn parser(&self) -> &IngredientParser {
        &self.parser
    }

    pub fn expansion_cache(&self) -> &Arc<ExpansionCache> {
        &self.expansion
    }

    /// Wait for the dataset to load. A failed load yields an empty formulary.
    ///
    /// A caller dropped mid-load leaves the source in place for the next one.
    pub async fn ready(&self) -> Arc<LoadedFormulary> {
        self.formulary
            .get_or_init(|| async move {
                let dataset = match load_source(self.source.clone()).await {
                    Ok(dataset) => dataset,
                    Err(e) => {
                        error!(error = %e, "Failed to load formulary; serving an empty dataset");
                        FormularyDataset::default()
                    }
                };

                let config = self.config.clone();
                let loaded =
                    tokio::task::spawn_blocking(move || LoadedFormulary::build(dataset, &config))
                        .await;
                match loaded {
                    Ok(loaded) => {
                        info!(
                            version = %loaded.version,
                            records = loaded.index.len(),
                            translations = loaded.translator.len(),
                            "Formulary ready"
                        );
                        loaded
                    }
                    Err(e) => {
                        error!(error = %e, "Index build failed; serving an empty dataset");
                        LoadedFormulary::empty(&self.config)
                    }
                }
            })
            .await
    }

    /// Ranked search over the formulary and the expansion cache.
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Vec<SearchHit> {
        let normalized = normalize(query);
        if normalized.is_empty() {
            return Vec::new();
        }

        let key: ResultKey = (normalized.clone(), options.clone());
        let generation = self.expansion.generation();
        if let Some(hits) = self.cached_hits(&key, generation) {
            debug!(query = %normalized, "Search cache hit");
            return hits;
        }

        let formulary = self.ready().await;
        let (local, extra) = tokio::join!(
            async { formulary.index.search(query, options) },
            self.expansion.search(query)
        );

        let mut hits = local;
        for entry in extra {
            if hits.iter().any(|hit| hit.record.id == entry.record.id)
                || !options.matches(&entry.record)
            {
                continue;
            }
            let score = scoring::score_expansion(&entry, &normalized);
            if score > 0 {
                hits.push(SearchHit {
                    record: entry.record,
                    score,
                    origin: HitOrigin::ExpansionCache,
                });
            }
        }
        hits.sort_by(scoring::compare_hits);
        hits.truncate(options.limit.unwrap_or(self.config.search.default_limit));

        self.store_hits(key, generation, hits.clone());
        hits
    }

    /// Look up a record by id: formulary first, then the expansion cache.
    pub async fn record(&self, id: &str) -> Option<FormularyRecord> {
        let formulary = self.ready().await;
        if let Some(record) = formulary.index.get(id) {
            return Some(record.clone());
        }
        self.expansion.get(id).await.map(|entry| entry.record)
    }

    /// Parse an ingredient field.
    pub fn parse(&self, field: &str) -> ParsedIngredient {
        self.parser.parse(field)
    }

    /// International-name candidates for a local ingredient name.
    pub async fn to_international(&self, local_name: &str) -> Vec<String> {
        self.ready().await.translator.to_international(local_name)
    }

    /// Canonical name for an ATC code.
    pub async fn classification_name(&self, code: &str) -> Option<String> {
        self.ready().await.translator.from_classification_code(code)
    }

    fn cached_hits(&self, key: &ResultKey, generation: u64) -> Option<Vec<SearchHit>> {
        let mut results = self.results.lock().unwrap_or_else(PoisonError::into_inner);
        if results.generation != generation {
            results.hits.clear();
            results.generation = generation;
            return None;
        }
        results.hits.get(key)
    }

    fn store_hits(&self, key: ResultKey, generation: u64, hits: Vec<SearchHit>) {
        let mut results = self.results.lock().unwrap_or_else(PoisonError::into_inner);
        // Skip if the expansion cache changed while searching.
        if results.generation == generation && self.expansion.generation() == generation {
            results.hits.insert(key, hits);
        }
    }
}

async fn load_source(source: DatasetSource) -> Result<FormularyDataset, DatasetError> {
    match source {
        DatasetSource::Path(path) => FormularyDataset::from_path(&path).await,
        DatasetSource::Json(json) => FormularyDataset::from_json_str(&json),
        DatasetSource::Dataset(mut dataset) => {
            dataset.prepare();
            Ok(dataset)
        }
    }
}
