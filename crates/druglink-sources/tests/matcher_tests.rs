//! Fallback chain, caching, rate limiting and availability tests for the matcher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use druglink_core::resolver::normalize;
use druglink_core::{EngineConfig, FormularyDataset, FormularyEngine, HitOrigin, ManualClock, SearchOptions, SourceId};
use druglink_sources::authorization::{AuthorizedMedicine, SupplyShortage};
use druglink_sources::label::LabelOpenFda;
use druglink_sources::{
    AuthorizationBackend, AuthorizationDataset, Availability, ClinicalDataResolver, ExternalMatcher,
    LabelDocument, MatchMethod, QueryField, SourceBackend, SourceConfig, SourceError, SourceRecord,
    SourceResult,
};

const FORMULARY: &str = r#"{
    "version": "matcher-test",
    "drugs": [
        {"id": "100", "name": "Crestor 10 mg filmtabletta", "base_name": "Crestor",
         "active_ingredient": "rozuvasztatin", "atc_code": "C10AA07", "is_marketed": true},
        {"id": "101", "name": "Roxera 10 mg filmtabletta", "base_name": "Roxera",
         "active_ingredient": "rozuvasztatin", "atc_code": "C10AA07", "is_marketed": true},
        {"id": "102", "name": "Roxera Plus 10 mg/10 mg", "base_name": "Roxera Plus",
         "active_ingredient": "rozuvasztatin és ezetimib", "atc_code": "C10BA06", "is_marketed": true},
        {"id": "300", "name": "Co-Aprovel 150/12,5 mg", "base_name": "Co-Aprovel",
         "active_ingredient": "irbesartan and diuretics", "atc_code": "C09DA04", "is_marketed": true}
    ],
    "translations": {
        "rozuvasztatin": ["rosuvastatin"],
        "ezetimib": ["ezetimibe"]
    },
    "atc_names": {"C10AA07": "rosuvastatin", "C09DA04": "irbesartan and diuretics"}
}"#;

/// A scripted source that counts every call.
struct FakeBackend {
    source: SourceId,
    entries: HashMap<(QueryField, String), SourceRecord>,
    down: bool,
    delay: Option<Duration>,
    checks: AtomicUsize,
    lookups: AtomicUsize,
}

impl FakeBackend {
    fn new() -> Self {
        Self {
            source: SourceId::Label,
            entries: HashMap::new(),
            down: false,
            delay: None,
            checks: AtomicUsize::new(0),
            lookups: AtomicUsize::new(0),
        }
    }

    fn with(mut self, field: QueryField, term: &str, brand: &str) -> Self {
        self.entries.insert((field, normalize(term)), label(brand, term));
        self
    }

    fn down(mut self) -> Self {
        self.down = true;
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceBackend for FakeBackend {
    fn id(&self) -> SourceId {
        self.source
    }

    async fn check(&self) -> SourceResult<()> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if self.down {
            return Err(SourceError::Network("connection refused".to_string()));
        }
        Ok(())
    }

    async fn lookup(&self, field: QueryField, term: &str) -> SourceResult<Option<SourceRecord>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.entries.get(&(field, normalize(term))).cloned())
    }
}

fn label(brand: &str, substance: &str) -> SourceRecord {
    SourceRecord::Label(LabelDocument {
        set_id: Some(format!("set-{}", normalize(brand).replace(' ', "-"))),
        openfda: LabelOpenFda {
            brand_name: vec![brand.to_string()],
            generic_name: vec![substance.to_string()],
            substance_name: vec![substance.to_string()],
            ..Default::default()
        },
        contraindications: vec![format!("{brand} contraindications")],
        ..Default::default()
    })
}

fn engine() -> Arc<FormularyEngine> {
    let dataset = FormularyDataset::from_json_str(FORMULARY).unwrap();
    Arc::new(FormularyEngine::from_dataset(dataset, EngineConfig::default()))
}

fn matcher(backend: &Arc<FakeBackend>, config: SourceConfig, clock: Arc<ManualClock>) -> ExternalMatcher {
    ExternalMatcher::with_clock(backend.clone(), engine(), config, clock)
}

async fn record(id: &str) -> druglink_core::FormularyRecord {
    engine().record(id).await.unwrap()
}

#[tokio::test]
async fn test_brand_name_matches_first() {
    let backend = Arc::new(FakeBackend::new().with(QueryField::BrandName, "crestor", "CRESTOR"));
    let matcher = matcher(&backend, SourceConfig::label_defaults(), Arc::new(ManualClock::new()));

    let result = matcher.resolve(&record("100").await).await;

    assert!(result.matched);
    assert_eq!(result.method, MatchMethod::BrandName);
    assert_eq!(result.query_term.as_deref(), Some("Crestor"));
    assert_eq!(backend.lookups(), 1);
    assert_eq!(matcher.availability(), Availability::Up);
}

#[tokio::test]
async fn test_falls_back_to_translated_ingredient() {
    let backend = Arc::new(FakeBackend::new().with(QueryField::ActiveIngredient, "rosuvastatin", "EZALLOR"));
    let matcher = matcher(&backend, SourceConfig::label_defaults(), Arc::new(ManualClock::new()));

    let result = matcher.resolve(&record("101").await).await;

    assert!(result.matched);
    assert_eq!(result.method, MatchMethod::ActiveIngredient);
    assert_eq!(result.query_term.as_deref(), Some("rosuvastatin"));
    // brand "Roxera", then the substance field
    assert_eq!(backend.lookups(), 2);
}

#[tokio::test]
async fn test_generic_name_after_active_ingredient() {
    let backend = Arc::new(FakeBackend::new().with(QueryField::GenericName, "rosuvastatin", "EZALLOR"));
    let matcher = matcher(&backend, SourceConfig::label_defaults(), Arc::new(ManualClock::new()));

    let result = matcher.resolve(&record("101").await).await;

    assert_eq!(result.method, MatchMethod::GenericName);
    assert_eq!(backend.lookups(), 3);
}

#[tokio::test]
async fn test_down_source_makes_no_lookups() {
    let backend = Arc::new(FakeBackend::new().with(QueryField::BrandName, "crestor", "CRESTOR").down());
    let matcher = matcher(&backend, SourceConfig::label_defaults(), Arc::new(ManualClock::new()));

    let first = matcher.resolve(&record("100").await).await;
    let second = matcher.resolve(&record("100").await).await;

    assert!(!first.matched);
    assert!(first.degraded);
    assert!(!second.matched);
    assert_eq!(backend.lookups(), 0);
    assert_eq!(backend.checks.load(Ordering::SeqCst), 1);
    assert_eq!(matcher.availability(), Availability::Down);
}

#[tokio::test]
async fn test_rate_limit_refuses_locally_and_recovers() {
    let clock = Arc::new(ManualClock::new());
    let backend = Arc::new(FakeBackend::new());
    let config = SourceConfig::label_defaults().with_rate_limits(3, 100);
    let matcher = matcher(&backend, config, clock.clone());

    // availability check, brand "Roxera", substance field; the generic-name lookup is refused
    let refused = matcher.resolve(&record("101").await).await;
    assert!(refused.degraded);
    assert_eq!(backend.lookups(), 2);
    let status = matcher.rate_limit_status();
    assert_eq!(status.used_last_minute, 3);
    assert_eq!(status.limit_per_minute, 3);
    assert!(!status.has_capacity());

    clock.advance(Duration::from_secs(61));
    let retried = matcher.resolve(&record("101").await).await;

    // the first two non-matches were cached; a fresh availability check and the
    // generic-name lookup remain
    assert!(!retried.degraded);
    assert!(!retried.matched);
    assert_eq!(backend.lookups(), 3);
    assert_eq!(backend.checks.load(Ordering::SeqCst), 2);
    assert_eq!(matcher.rate_limit_status().used_last_minute, 2);
}

#[tokio::test]
async fn test_availability_check_needs_a_rate_limit_slot() {
    let clock = Arc::new(ManualClock::new());
    let backend = Arc::new(FakeBackend::new().with(QueryField::BrandName, "crestor", "CRESTOR"));
    let config = SourceConfig::label_defaults().with_rate_limits(1, 100);
    let matcher = matcher(&backend, config, clock.clone());

    let refused = matcher.resolve(&record("100").await).await;
    assert!(refused.degraded);
    assert_eq!(backend.checks.load(Ordering::SeqCst), 1);
    assert_eq!(backend.lookups(), 0);
    assert_eq!(matcher.rate_limit_status().used_last_minute, 1);

    // a fresh check is reused without taking another slot
    clock.advance(Duration::from_secs(30));
    assert!(matcher.resolve(&record("100").await).await.degraded);
    assert_eq!(backend.checks.load(Ordering::SeqCst), 1);
    assert_eq!(matcher.rate_limit_status().used_last_hour, 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_lookup_is_soft_not_found() {
    let backend = Arc::new(
        FakeBackend::new()
            .with(QueryField::BrandName, "crestor", "CRESTOR")
            .slow(Duration::from_secs(30)),
    );
    let matcher = matcher(&backend, SourceConfig::label_defaults(), Arc::new(ManualClock::new()));

    let result = matcher.resolve(&record("100").await).await;

    assert!(!result.matched);
    assert!(result.degraded);
    assert_eq!(backend.lookups(), 1);
}

#[tokio::test]
async fn test_results_are_cached() {
    let backend = Arc::new(FakeBackend::new().with(QueryField::BrandName, "crestor", "CRESTOR"));
    let matcher = matcher(&backend, SourceConfig::label_defaults(), Arc::new(ManualClock::new()));
    let crestor = record("100").await;

    matcher.resolve(&crestor).await;
    matcher.resolve(&crestor).await;
    assert_eq!(backend.lookups(), 1);

    // same normalized term, different caller
    assert!(matcher.lookup_term(QueryField::BrandName, "CRESTOR").await.is_some());
    assert_eq!(backend.lookups(), 1);
}

#[tokio::test]
async fn test_content_expires_after_ttl() {
    let clock = Arc::new(ManualClock::new());
    let backend = Arc::new(FakeBackend::new().with(QueryField::BrandName, "crestor", "CRESTOR"));
    let matcher = matcher(&backend, SourceConfig::label_defaults(), clock.clone());

    assert!(matcher.lookup_term(QueryField::BrandName, "crestor").await.is_some());
    clock.advance(Duration::from_secs(8 * 24 * 3600));
    assert!(matcher.lookup_term(QueryField::BrandName, "crestor").await.is_some());

    assert_eq!(backend.lookups(), 2);
}

#[tokio::test]
async fn test_multi_ingredient_breakdown() {
    let backend = Arc::new(
        FakeBackend::new()
            .with(QueryField::ActiveIngredient, "rosuvastatin", "EZALLOR")
            .with(QueryField::GenericName, "ezetimibe", "ZETIA"),
    );
    let matcher = matcher(&backend, SourceConfig::label_defaults(), Arc::new(ManualClock::new()));

    let breakdown = matcher.resolve_multi(&record("102").await).await;

    assert!(breakdown.is_multi_ingredient);
    assert!(!breakdown.combination.matched);
    assert_eq!(breakdown.components.len(), 2);
    assert_eq!(breakdown.components[0].international_names, vec!["rosuvastatin"]);
    assert_eq!(breakdown.components[0].result.method, MatchMethod::ActiveIngredient);
    assert_eq!(breakdown.components[1].result.method, MatchMethod::GenericName);
    assert!(breakdown.any_matched());
}

#[tokio::test]
async fn test_combination_matched_under_own_brand() {
    let backend = Arc::new(FakeBackend::new().with(QueryField::BrandName, "roxera plus", "ROXERA PLUS"));
    let matcher = matcher(&backend, SourceConfig::label_defaults(), Arc::new(ManualClock::new()));

    let breakdown = matcher.resolve_multi(&record("102").await).await;

    assert!(breakdown.combination.matched);
    assert!(breakdown.components.iter().all(|c| !c.result.matched));
}

#[tokio::test]
async fn test_placeholder_uses_classification_name() {
    let backend = Arc::new(
        FakeBackend::new()
            .with(QueryField::BrandName, "irbesartan and diuretics", "AVALIDE")
            .with(QueryField::BrandName, "rosuvastatin", "ROSUVASTATIN"),
    );
    let matcher = matcher(&backend, SourceConfig::label_defaults(), Arc::new(ManualClock::new()));

    let placeholder = matcher.resolve(&record("300").await).await;
    assert!(placeholder.matched);
    assert!(placeholder.classification_fallback);
    assert_eq!(placeholder.query_term.as_deref(), Some("irbesartan and diuretics"));

    // no placeholder, so the classification name is never tried
    let plain = matcher.resolve(&record("101").await).await;
    assert!(!plain.matched);
    assert!(!plain.classification_fallback);
}

#[tokio::test]
async fn test_placeholder_component_uses_classification_name() {
    let backend = Arc::new(FakeBackend::new().with(QueryField::BrandName, "irbesartan and diuretics", "AVALIDE"));
    let matcher = matcher(&backend, SourceConfig::label_defaults(), Arc::new(ManualClock::new()));

    let breakdown = matcher.resolve_multi(&record("300").await).await;

    assert!(breakdown.is_multi_ingredient);
    assert!(!breakdown.combination.matched);
    assert_eq!(breakdown.components.len(), 2);

    let irbesartan = &breakdown.components[0];
    assert!(!irbesartan.is_placeholder);
    assert!(!irbesartan.result.matched);

    let diuretics = &breakdown.components[1];
    assert!(diuretics.is_placeholder);
    assert!(diuretics.result.matched);
    assert!(diuretics.result.classification_fallback);
    assert_eq!(diuretics.result.query_term.as_deref(), Some("irbesartan and diuretics"));
    assert!(breakdown.any_matched());
}

#[tokio::test]
async fn test_classification_code_queried_where_indexed() {
    let backend = Arc::new(FakeBackend::new().with(QueryField::ClassificationCode, "C09DA04", "KARVEZIDE"));
    let matcher = matcher(&backend, SourceConfig::label_defaults(), Arc::new(ManualClock::new()));

    let result = matcher.resolve(&record("300").await).await;

    assert!(result.matched);
    assert!(result.classification_fallback);
    assert_eq!(result.method, MatchMethod::ClassificationCode);
    assert_eq!(result.query_term.as_deref(), Some("C09DA04"));
}

#[tokio::test]
async fn test_resolver_combines_sources_and_adopts() {
    let engine = engine();
    let clock = Arc::new(ManualClock::new());

    let label_backend = Arc::new(
        FakeBackend::new()
            .with(QueryField::BrandName, "crestor", "CRESTOR")
            .with(QueryField::BrandName, "ezallor", "EZALLOR"),
    );
    let medicine = AuthorizedMedicine {
        name: "Crestor".to_string(),
        inn: "rosuvastatin".to_string(),
        status: "Authorised".to_string(),
        product_number: "NAP-1".to_string(),
        ..Default::default()
    };
    let shortage = SupplyShortage {
        medicine: "Crestor".to_string(),
        status: "Ongoing".to_string(),
        ..Default::default()
    };
    let authorization_backend = Arc::new(AuthorizationBackend::from_dataset(AuthorizationDataset::new(
        vec![medicine],
        vec![shortage],
        Vec::new(),
    )));

    let label = Arc::new(ExternalMatcher::with_clock(
        label_backend,
        engine.clone(),
        SourceConfig::label_defaults(),
        clock.clone(),
    ));
    let authorization = Arc::new(ExternalMatcher::with_clock(
        authorization_backend,
        engine.clone(),
        SourceConfig::authorization_defaults(),
        clock,
    ));
    let resolver = ClinicalDataResolver::new(engine.clone(), label, authorization);

    let clinical = resolver.resolve("100").await.unwrap();
    assert!(clinical.label.combination.matched);
    assert!(clinical.authorization.combination.matched);
    assert_eq!(clinical.label_content().len(), 1);
    assert_eq!(clinical.shortages().len(), 1);
    assert!(resolver.resolve("missing").await.is_none());

    let found = resolver.lookup_external("Ezallor 5 mg").await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].source, SourceId::Label);

    let adopted = resolver.adopt(&found[0]).await.unwrap();
    assert_eq!(adopted.id, "ext-fda-set-ezallor");

    let hits = engine.search("ezallor", &SearchOptions::default()).await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].origin, HitOrigin::ExpansionCache);
    assert!(engine.record("ext-fda-set-ezallor").await.is_some());
}
