//! Clinical data aggregation across the formulary and both external sources.

use std::sync::Arc;

use druglink_core::{FormularyEngine, FormularyRecord};
use tracing::{debug, info};

use crate::matcher::ExternalMatcher;
use crate::models::{ClinicalDataRecord, ExternalMatchResult};

/// Combines the formulary engine with the label and authorization matchers.
#[derive(Debug, Clone)]
pub struct ClinicalDataResolver {
    engine: Arc<FormularyEngine>,
    label: Arc<ExternalMatcher>,
    authorization: Arc<ExternalMatcher>,
}

impl ClinicalDataResolver {
    pub fn new(
        engine: Arc<FormularyEngine>,
        label: Arc<ExternalMatcher>,
        authorization: Arc<ExternalMatcher>,
    ) -> Self {
        Self {
            engine,
            label,
            authorization,
        }
    }

    pub fn engine(&self) -> &Arc<FormularyEngine> {
        &self.engine
    }

    pub fn label(&self) -> &Arc<ExternalMatcher> {
        &self.label
    }

    pub fn authorization(&self) -> &Arc<ExternalMatcher> {
        &self.authorization
    }

    /// Resolve a formulary (or expansion cache) record against both sources.
    pub async fn resolve(&self, record_id: &str) -> Option<ClinicalDataRecord> {
        let record = self.engine.record(record_id).await?;
        let parsed = self.engine.parse(&record.active_ingredient);

        let (label, authorization) = tokio::join!(
            self.label.resolve_multi(&record),
            self.authorization.resolve_multi(&record)
        );
        debug!(
            id = record_id,
            label = label.any_matched(),
            authorization = authorization.any_matched(),
            "Clinical data resolved"
        );

        Some(ClinicalDataRecord {
            record,
            parsed,
            label,
            authorization,
        })
    }

    /// Look a term up in both sources, for drugs missing from the formulary.
    ///
    /// Only matches are returned.
    pub async fn lookup_external(&self, term: &str) -> Vec<ExternalMatchResult> {
        let (label, authorization) = tokio::join!(
            self.label.resolve_term(term),
            self.authorization.resolve_term(term)
        );
        [label, authorization].into_iter().filter(|r| r.matched).collect()
    }

    /// Add a matched external drug to the expansion cache so it joins local search.
    pub async fn adopt(&self, result: &ExternalMatchResult) -> Option<FormularyRecord> {
        let source_record = result.record.as_ref().filter(|_| result.matched)?;
        let record = source_record.to_formulary_record();
        let entry = self
            .engine
            .expansion_cache()
            .add(record, source_record.source())
            .await;
        info!(id = %entry.record.id, source = %entry.source, uses = entry.use_count, "Adopted external drug");
        Some(entry.record)
    }
}
