//! Source A: an openFDA-style drug label database.
//!
//! Queried per term over HTTP:
//!
//! ```text
//! GET <base>?search=openfda.brand_name:"crestor"&limit=1
//! ```
//!
//! A 404 is the database's way of saying "no results".

use async_trait::async_trait;
use druglink_core::resolver::{normalize, tokenize};
use druglink_core::SourceId;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::backend::{QueryField, SourceBackend, SourceRecord};
use crate::config::SourceConfig;
use crate::error::{SourceError, SourceResult};

// ============================================================================
// Response schema
// ============================================================================

/// The `openfda` harmonized fields of a label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelOpenFda {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub brand_name: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub generic_name: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub substance_name: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub route: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub product_type: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub manufacturer_name: Vec<String>,
}

/// One structured product label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_id: Option<String>,
    pub openfda: LabelOpenFda,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contraindications: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub drug_interactions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings_and_cautions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub boxed_warning: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub adverse_reactions: Vec<String>,
}

impl LabelDocument {
    /// Brand name, falling back to the generic name.
    pub fn display_name(&self) -> String {
        self.openfda
            .brand_name
            .first()
            .or_else(|| self.openfda.generic_name.first())
            .cloned()
            .unwrap_or_default()
    }

    /// Substances, falling back to the generic name.
    pub fn ingredient_text(&self) -> String {
        if self.openfda.substance_name.is_empty() {
            self.openfda.generic_name.join(", ")
        } else {
            self.openfda.substance_name.join(", ")
        }
    }

    pub fn is_prescription(&self) -> bool {
        self.openfda
            .product_type
            .iter()
            .any(|t| t.to_uppercase().contains("PRESCRIPTION"))
    }

    fn field_values(&self, field: QueryField) -> &[String] {
        match field {
            QueryField::BrandName => &self.openfda.brand_name,
            QueryField::ActiveIngredient => &self.openfda.substance_name,
            QueryField::GenericName => &self.openfda.generic_name,
            QueryField::ClassificationCode => &[],
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LabelResponse {
    results: Vec<LabelDocument>,
}

// ============================================================================
// Mapping
// ============================================================================

/// Clinical sections extracted from a label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelContent {
    pub brand_name: String,
    pub generic_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contraindications: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interactions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boxed_warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adverse_reactions: Option<String>,
}

fn section(parts: &[String]) -> Option<String> {
    let text = parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    (!text.is_empty()).then_some(text)
}

/// Extract the clinical sections of a label.
///
/// Newer labels carry `warnings_and_cautions`; older ones only `warnings`.
pub fn map_label(doc: &LabelDocument) -> LabelContent {
    LabelContent {
        brand_name: doc.openfda.brand_name.first().cloned().unwrap_or_default(),
        generic_name: doc.openfda.generic_name.first().cloned().unwrap_or_default(),
        contraindications: section(&doc.contraindications),
        interactions: section(&doc.drug_interactions),
        warnings: section(&doc.warnings_and_cautions).or_else(|| section(&doc.warnings)),
        boxed_warning: section(&doc.boxed_warning),
        adverse_reactions: section(&doc.adverse_reactions),
    }
}

/// Pick the document that best matches `term` on `field`.
///
/// An exact (normalized) field value wins; otherwise the first document whose field
/// contains every token of the term. Anything else is a non-match, even if the
/// server returned it.
pub fn select_label(docs: Vec<LabelDocument>, field: QueryField, term: &str) -> Option<LabelDocument> {
    let wanted = normalize(term);
    let tokens = tokenize(term);
    if wanted.is_empty() {
        return None;
    }

    let exact = docs
        .iter()
        .position(|doc| doc.field_values(field).iter().any(|v| normalize(v) == wanted));
    let index = exact.or_else(|| {
        docs.iter().position(|doc| {
            doc.field_values(field).iter().any(|v| {
                let value = tokenize(v);
                tokens.iter().all(|t| value.contains(t))
            })
        })
    })?;
    docs.into_iter().nth(index)
}

// ============================================================================
// Backend
// ============================================================================

/// HTTP client for the label database.
#[derive(Debug, Clone)]
pub struct LabelBackend {
    client: Client,
    base_url: Url,
    result_limit: u32,
}

impl LabelBackend {
    /// Build the client. Fails only on invalid configuration.
    pub fn new(config: &SourceConfig) -> SourceResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SourceError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url()?,
            result_limit: config.result_limit.max(1),
        })
    }

    /// Labels carry no ATC codes.
    fn field_path(field: QueryField) -> Option<&'static str> {
        match field {
            QueryField::BrandName => Some("openfda.brand_name"),
            QueryField::ActiveIngredient => Some("openfda.substance_name"),
            QueryField::GenericName => Some("openfda.generic_name"),
            QueryField::ClassificationCode => None,
        }
    }

    /// Request URL for one field lookup, if the field is searchable.
    pub fn search_url(&self, field: QueryField, term: &str) -> Option<Url> {
        let path = Self::field_path(field)?;
        let term = term.replace('"', "");
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("search", &format!("{path}:\"{}\"", term.trim()))
            .append_pair("limit", &self.result_limit.to_string());
        Some(url)
    }
}

#[async_trait]
impl SourceBackend for LabelBackend {
    fn id(&self) -> SourceId {
        SourceId::Label
    }

    fn supports(&self, field: QueryField) -> bool {
        Self::field_path(field).is_some()
    }

    async fn check(&self) -> SourceResult<()> {
        let mut url = self.base_url.clone();
        url.query_pairs_mut().append_pair("limit", "1");
        self.client.get(url).send().await?.error_for_status()?;
        Ok(())
    }

    async fn lookup(&self, field: QueryField, term: &str) -> SourceResult<Option<SourceRecord>> {
        let Some(url) = self.search_url(field, term) else {
            return Ok(None);
        };
        debug!(url = %url, "Label lookup");

        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: LabelResponse = response.error_for_status()?.json().await?;
        Ok(select_label(body.results, field, term).map(SourceRecord::Label))
    }
}
