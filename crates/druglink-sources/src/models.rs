//! Result types produced by the external matcher and aggregator.

use druglink_core::{FormularyRecord, ParsedIngredient, SourceId};
use serde::{Deserialize, Serialize};

use crate::authorization::{ProviderCommunication, SupplyShortage};
use crate::backend::{QueryField, SourceRecord};
use crate::label::{map_label, LabelContent};

/// Which step of the fallback chain produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    BrandName,
    ActiveIngredient,
    GenericName,
    ClassificationCode,
    None,
}

impl From<QueryField> for MatchMethod {
    fn from(field: QueryField) -> Self {
        match field {
            QueryField::BrandName => MatchMethod::BrandName,
            QueryField::ActiveIngredient => MatchMethod::ActiveIngredient,
            QueryField::GenericName => MatchMethod::GenericName,
            QueryField::ClassificationCode => MatchMethod::ClassificationCode,
        }
    }
}

/// The outcome of matching one record (or term) against one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalMatchResult {
    pub source: SourceId,
    pub matched: bool,
    pub method: MatchMethod,
    /// The term that produced the match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_term: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<SourceRecord>,
    /// The match was found through the ATC classification name
    #[serde(default)]
    pub classification_fallback: bool,
    /// The chain stopped early because the source was down, rate limited or failing
    #[serde(default)]
    pub degraded: bool,
}

impl ExternalMatchResult {
    pub fn not_found(source: SourceId) -> Self {
        Self {
            source,
            matched: false,
            method: MatchMethod::None,
            query_term: None,
            record: None,
            classification_fallback: false,
            degraded: false,
        }
    }

    pub fn found(source: SourceId, field: QueryField, term: &str, record: SourceRecord) -> Self {
        Self {
            source,
            matched: true,
            method: field.into(),
            query_term: Some(term.to_string()),
            record: Some(record),
            classification_fallback: false,
            degraded: false,
        }
    }

    pub(crate) fn degraded(source: SourceId) -> Self {
        Self {
            degraded: true,
            ..Self::not_found(source)
        }
    }
}

/// Match result for one component of an ingredient field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngredientMatch {
    pub ingredient: String,
    pub international_names: Vec<String>,
    pub is_placeholder: bool,
    pub result: ExternalMatchResult,
}

/// Per-component breakdown of a record against one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiIngredientResult {
    pub record_id: String,
    pub is_multi_ingredient: bool,
    /// The product as a whole (for combinations: under its own brand entry)
    pub combination: ExternalMatchResult,
    pub components: Vec<IngredientMatch>,
}

impl MultiIngredientResult {
    pub fn any_matched(&self) -> bool {
        self.combination.matched || self.components.iter().any(|c| c.result.matched)
    }

    pub fn degraded(&self) -> bool {
        self.combination.degraded || self.components.iter().any(|c| c.result.degraded)
    }

    /// Every matched source document, combination first.
    pub fn records(&self) -> impl Iterator<Item = &SourceRecord> {
        std::iter::once(&self.combination)
            .chain(self.components.iter().map(|c| &c.result))
            .filter_map(|r| r.record.as_ref())
    }
}

/// Everything known about one formulary record from both sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalDataRecord {
    pub record: FormularyRecord,
    pub parsed: ParsedIngredient,
    pub label: MultiIngredientResult,
    pub authorization: MultiIngredientResult,
}

impl ClinicalDataRecord {
    /// Clinical label sections, one per distinct matched label.
    pub fn label_content(&self) -> Vec<LabelContent> {
        let mut content: Vec<LabelContent> = Vec::new();
        for record in self.label.records() {
            if let SourceRecord::Label(doc) = record {
                let mapped = map_label(doc);
                if !content.contains(&mapped) {
                    content.push(mapped);
                }
            }
        }
        content
    }

    pub fn shortages(&self) -> Vec<SupplyShortage> {
        let mut shortages: Vec<SupplyShortage> = Vec::new();
        for record in self.authorization.records() {
            if let SourceRecord::Authorization(authorization) = record {
                for shortage in &authorization.shortages {
                    if !shortages.contains(shortage) {
                        shortages.push(shortage.clone());
                    }
                }
            }
        }
        shortages
    }

    pub fn safety_communications(&self) -> Vec<ProviderCommunication> {
        let mut communications: Vec<ProviderCommunication> = Vec::new();
        for record in self.authorization.records() {
            if let SourceRecord::Authorization(authorization) = record {
                for communication in &authorization.communications {
                    if !communications.contains(communication) {
                        communications.push(communication.clone());
                    }
                }
            }
        }
        communications
    }
}
