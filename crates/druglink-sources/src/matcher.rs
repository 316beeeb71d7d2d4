//! Matching formulary records against one external source.
//!
//! Fallback chain, first success wins:
//!
//! 1. brand name with strength/form stripped (display name, then base name)
//! 2. each non-placeholder ingredient, each international candidate:
//!    active-ingredient field, then generic-name field
//! 3. for placeholder ingredients, the ATC code itself where the source indexes
//!    it, then the ATC classification name through steps 1-2
//!
//! A source that is down, rate limited, failing or slow ends the chain with a
//! not-found result that is never cached. Availability checks draw on the same
//! rate limit as lookups.

use std::sync::{Arc, Mutex, PoisonError};

use druglink_core::resolver::{normalize, strip_strength};
use druglink_core::clock::system_clock;
use druglink_core::{FormularyEngine, FormularyRecord, SharedClock, SourceId, TtlCache};
use tracing::{debug, warn};

use crate::backend::{QueryField, SourceBackend, SourceRecord};
use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::health::{Availability, HealthMonitor};
use crate::models::{ExternalMatchResult, IngredientMatch, MatchMethod, MultiIngredientResult};
use crate::rate_limit::{RateLimitStatus, RateLimiter};

type LookupKey = (QueryField, String);

/// Outcome of a single field lookup.
#[derive(Debug, Clone)]
enum Lookup {
    Found(SourceRecord),
    NotFound,
    /// Nothing was learned; the chain must stop
    Unavailable,
}

/// Outcome of walking a list of candidate terms.
enum Step {
    Matched(ExternalMatchResult),
    Exhausted,
    Halted,
}

/// Resolves formulary records against one external source.
pub struct ExternalMatcher {
    backend: Arc<dyn SourceBackend>,
    engine: Arc<FormularyEngine>,
    limiter: RateLimiter,
    health: HealthMonitor,
    lookups: Mutex<TtlCache<LookupKey, Option<SourceRecord>>>,
    records: Mutex<TtlCache<String, ExternalMatchResult>>,
    breakdowns: Mutex<TtlCache<String, MultiIngredientResult>>,
    config: SourceConfig,
}

impl std::fmt::Debug for ExternalMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalMatcher")
            .field("source", &self.backend.id())
            .field("availability", &self.health.state())
            .field("rate_limit", &self.limiter.status())
            .finish()
    }
}

impl ExternalMatcher {
    pub fn new(backend: Arc<dyn SourceBackend>, engine: Arc<FormularyEngine>, config: SourceConfig) -> Self {
        Self::with_clock(backend, engine, config, system_clock())
    }

    pub fn with_clock(
        backend: Arc<dyn SourceBackend>,
        engine: Arc<FormularyEngine>,
        config: SourceConfig,
        clock: SharedClock,
    ) -> Self {
        let capacity = config.cache_capacity.max(1);
        Self {
            limiter: RateLimiter::new(config.requests_per_minute, config.requests_per_hour, clock.clone()),
            health: HealthMonitor::new(config.health_recheck(), config.download_timeout(), clock.clone()),
            lookups: Mutex::new(TtlCache::new(capacity, config.negative_ttl(), clock.clone())),
            records: Mutex::new(TtlCache::new(capacity, config.content_ttl(), clock.clone())),
            breakdowns: Mutex::new(TtlCache::new(capacity, config.content_ttl(), clock)),
            backend,
            engine,
            config,
        }
    }

    pub fn source(&self) -> SourceId {
        self.backend.id()
    }

    pub fn rate_limit_status(&self) -> RateLimitStatus {
        self.limiter.status()
    }

    pub fn availability(&self) -> Availability {
        self.health.state()
    }

    /// Match a formulary record.
    pub async fn resolve(&self, record: &FormularyRecord) -> ExternalMatchResult {
        if let Some(cached) = self.records.lock().unwrap_or_else(PoisonError::into_inner).get(&record.id) {
            debug!(source = %self.source(), id = %record.id, "Record match cache hit");
            return cached;
        }

        let result = self.run_chain(record).await;
        if !result.degraded {
            self.records
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(record.id.clone(), result.clone());
        }
        result
    }

    /// Match a record component by component.
    ///
    /// For a combination product the `combination` result only reflects its own brand
    /// entry; for a single-ingredient product it is the full [`resolve`](Self::resolve).
    /// When nothing matched and a component is a class placeholder, the classification
    /// retry is attached to the placeholder components.
    pub async fn resolve_multi(&self, record: &FormularyRecord) -> MultiIngredientResult {
        if let Some(cached) = self
            .breakdowns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&record.id)
        {
            return cached;
        }

        let source = self.source();
        let parsed = self.engine.parse(&record.active_ingredient);
        let mut halted = false;

        let combination = if parsed.is_multi_ingredient {
            match self.try_terms(&brand_terms(record)).await {
                Step::Matched(result) => result,
                Step::Exhausted => ExternalMatchResult::not_found(source),
                Step::Halted => {
                    halted = true;
                    ExternalMatchResult::degraded(source)
                }
            }
        } else {
            let result = self.resolve(record).await;
            halted = result.degraded;
            result
        };

        let mut components = Vec::with_capacity(parsed.ingredients.len());
        for ingredient in &parsed.ingredients {
            let is_placeholder = self.engine.parser().is_placeholder(ingredient);
            let international_names = self.engine.to_international(ingredient).await;
            let result = if halted {
                ExternalMatchResult::degraded(source)
            } else if !parsed.is_multi_ingredient
                && combination.matched
                && (combination.classification_fallback || combination.method != MatchMethod::BrandName)
            {
                combination.clone()
            } else if is_placeholder {
                ExternalMatchResult::not_found(source)
            } else {
                match self.try_terms(&candidate_terms(&international_names)).await {
                    Step::Matched(result) => result,
                    Step::Exhausted => ExternalMatchResult::not_found(source),
                    Step::Halted => {
                        halted = true;
                        ExternalMatchResult::degraded(source)
                    }
                }
            };
            components.push(IngredientMatch {
                ingredient: ingredient.clone(),
                international_names,
                is_placeholder,
                result,
            });
        }

        let nothing_matched = !combination.matched && components.iter().all(|c| !c.result.matched);
        if parsed.is_multi_ingredient && parsed.is_generic_placeholder && !halted && nothing_matched {
            let fallback = self.classification_retry(record).await;
            for component in components.iter_mut().filter(|c| c.is_placeholder) {
                component.result = fallback.clone();
            }
        }

        let breakdown = MultiIngredientResult {
            record_id: record.id.clone(),
            is_multi_ingredient: parsed.is_multi_ingredient,
            combination,
            components,
        };
        if !breakdown.degraded() {
            self.breakdowns
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(record.id.clone(), breakdown.clone());
        }
        breakdown
    }

    /// Match a free-text term (brand or ingredient) that may not be in the formulary.
    pub async fn resolve_term(&self, term: &str) -> ExternalMatchResult {
        let mut terms = vec![(QueryField::BrandName, strip_strength(term))];
        let names = self.engine.to_international(term).await;
        terms.extend(candidate_terms(&names));
        self.finish(self.try_terms(&dedup(terms)).await)
    }

    /// Look up one term on one field, through the cache, health check and rate limiter.
    pub async fn lookup_term(&self, field: QueryField, term: &str) -> Option<SourceRecord> {
        match self.lookup(field, term).await {
            Lookup::Found(record) => Some(record),
            Lookup::NotFound | Lookup::Unavailable => None,
        }
    }

    async fn run_chain(&self, record: &FormularyRecord) -> ExternalMatchResult {
        let parsed = self.engine.parse(&record.active_ingredient);

        let mut terms = brand_terms(record);
        for ingredient in &parsed.ingredients {
            if self.engine.parser().is_placeholder(ingredient) {
                continue;
            }
            let names = self.engine.to_international(ingredient).await;
            terms.extend(candidate_terms(&names));
        }

        match self.try_terms(&dedup(terms)).await {
            Step::Exhausted if parsed.is_generic_placeholder => self.classification_retry(record).await,
            step => self.finish(step),
        }
    }

    /// Step 3: the ATC code, then the classification name as brand and ingredients.
    async fn classification_retry(&self, record: &FormularyRecord) -> ExternalMatchResult {
        let mut terms = vec![(QueryField::ClassificationCode, record.atc_code.trim().to_string())];
        if let Some(class_name) = self.engine.classification_name(&record.atc_code).await {
            debug!(source = %self.source(), id = %record.id, class_name = %class_name, "Retrying with classification name");
            terms.push((QueryField::BrandName, class_name.clone()));
            for ingredient in self.engine.parse(&class_name).ingredients {
                let names = self.engine.to_international(&ingredient).await;
                terms.extend(candidate_terms(&names));
            }
        }

        let mut result = self.finish(self.try_terms(&dedup(terms)).await);
        result.classification_fallback = result.matched;
        result
    }

    fn finish(&self, step: Step) -> ExternalMatchResult {
        match step {
            Step::Matched(result) => result,
            Step::Exhausted => ExternalMatchResult::not_found(self.source()),
            Step::Halted => ExternalMatchResult::degraded(self.source()),
        }
    }

    async fn try_terms(&self, terms: &[(QueryField, String)]) -> Step {
        for (field, term) in terms {
            match self.lookup(*field, term).await {
                Lookup::Found(record) => {
                    debug!(source = %self.source(), ?field, term = %term, "External match");
                    return Step::Matched(ExternalMatchResult::found(self.source(), *field, term, record));
                }
                Lookup::NotFound => continue,
                Lookup::Unavailable => return Step::Halted,
            }
        }
        Step::Exhausted
    }

    async fn lookup(&self, field: QueryField, term: &str) -> Lookup {
        let normalized = normalize(term);
        if normalized.is_empty() || !self.backend.supports(field) {
            return Lookup::NotFound;
        }
        let key = (field, normalized);
        if let Some(cached) = self.lookups.lock().unwrap_or_else(PoisonError::into_inner).get(&key) {
            return cached.map_or(Lookup::NotFound, Lookup::Found);
        }

        let source = self.source().to_string();
        let availability = match self.health.settled() {
            Some(availability) => availability,
            None => {
                if !self.limiter.try_acquire() {
                    warn!(%source, status = ?self.limiter.status(), "Rate limit reached; availability check refused");
                    return Lookup::Unavailable;
                }
                self.health.ensure(&source, || self.backend.check()).await
            }
        };
        if availability == Availability::Down {
            debug!(%source, "Source down; skipping lookup");
            return Lookup::Unavailable;
        }
        if !self.limiter.try_acquire() {
            warn!(%source, status = ?self.limiter.status(), "Rate limit reached; lookup refused");
            return Lookup::Unavailable;
        }

        let timeout = self.config.request_timeout();
        let outcome = match tokio::time::timeout(timeout, self.backend.lookup(field, term)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SourceError::Timeout(timeout)),
        };

        match outcome {
            Ok(found) => {
                let ttl = if found.is_some() {
                    self.config.content_ttl()
                } else {
                    self.config.negative_ttl()
                };
                self.lookups
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert_with_ttl(key, found.clone(), ttl);
                found.map_or(Lookup::NotFound, Lookup::Found)
            }
            Err(e) => {
                warn!(%source, ?field, term, error = %e, "External lookup failed");
                Lookup::Unavailable
            }
        }
    }
}

/// Display name then base name, strength and form text removed.
fn brand_terms(record: &FormularyRecord) -> Vec<(QueryField, String)> {
    let mut terms = vec![(QueryField::BrandName, strip_strength(&record.name))];
    let base = strip_strength(&record.base_name);
    if !base.is_empty() && normalize(&base) != normalize(&terms[0].1) {
        terms.push((QueryField::BrandName, base));
    }
    terms
}

/// Each candidate on the active-ingredient field, then the generic-name field.
fn candidate_terms(names: &[String]) -> Vec<(QueryField, String)> {
    names
        .iter()
        .flat_map(|name| {
            [
                (QueryField::ActiveIngredient, name.clone()),
                (QueryField::GenericName, name.clone()),
            ]
        })
        .collect()
}

fn dedup(terms: Vec<(QueryField, String)>) -> Vec<(QueryField, String)> {
    let mut seen = std::collections::HashSet::new();
    terms
        .into_iter()
        .filter(|(field, term)| !normalize(term).is_empty() && seen.insert((*field, normalize(term))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brand_terms_strip_strength() {
        let record = FormularyRecord::new("1", "Crestor 10 mg filmtabletta").with_base_name("Crestor");
        assert_eq!(brand_terms(&record), vec![(QueryField::BrandName, "Crestor".to_string())]);

        let record = FormularyRecord::new("2", "Roxera Plus 20 mg").with_base_name("Roxera");
        assert_eq!(brand_terms(&record).len(), 2);
    }

    #[test]
    fn test_candidate_order() {
        let terms = candidate_terms(&["rosuvastatin".to_string(), "ezetimibe".to_string()]);
        let fields: Vec<QueryField> = terms.iter().map(|(f, _)| *f).collect();

        assert_eq!(
            fields,
            vec![
                QueryField::ActiveIngredient,
                QueryField::GenericName,
                QueryField::ActiveIngredient,
                QueryField::GenericName
            ]
        );
        assert_eq!(terms[0].1, "rosuvastatin");
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let terms = dedup(vec![
            (QueryField::BrandName, "Crestor".to_string()),
            (QueryField::BrandName, "CRESTOR".to_string()),
            (QueryField::GenericName, "crestor".to_string()),
            (QueryField::GenericName, " ".to_string()),
        ]);

        assert_eq!(terms.len(), 2);
        assert_eq!(terms[0].1, "Crestor");
    }
}
