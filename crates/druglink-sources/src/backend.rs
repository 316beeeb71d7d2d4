//! The seam between the matcher and a concrete external database.

use async_trait::async_trait;
use druglink_core::{FormularyRecord, SourceId};
use serde::{Deserialize, Serialize};

use crate::authorization::AuthorizationRecord;
use crate::error::SourceResult;
use crate::label::LabelDocument;

/// Which field of the external database a term is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryField {
    /// Brand / medicine name
    BrandName,
    /// Structured active-ingredient (substance) field
    ActiveIngredient,
    /// Generic / international non-proprietary name
    GenericName,
    /// ATC classification code
    ClassificationCode,
}

/// A matched document from one of the sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", content = "document", rename_all = "snake_case")]
pub enum SourceRecord {
    Label(LabelDocument),
    Authorization(AuthorizationRecord),
}

impl SourceRecord {
    pub fn source(&self) -> SourceId {
        match self {
            SourceRecord::Label(_) => SourceId::Label,
            SourceRecord::Authorization(_) => SourceId::Authorization,
        }
    }

    /// Name the source lists the product under.
    pub fn display_name(&self) -> String {
        match self {
            SourceRecord::Label(doc) => doc.display_name(),
            SourceRecord::Authorization(record) => record.medicine.name.clone(),
        }
    }

    /// Convert to a formulary record so it can join local search results.
    ///
    /// Ids are `ext-fda-<set id>` or `ext-ema-<product number>`; a random id is used
    /// when the source carries none.
    pub fn to_formulary_record(&self) -> FormularyRecord {
        match self {
            SourceRecord::Label(doc) => {
                let id = external_id("ext-fda", doc.set_id.as_deref().or(doc.id.as_deref()));
                let brand = doc.openfda.brand_name.first().cloned().unwrap_or_default();
                let mut record = FormularyRecord::new(id, doc.display_name())
                    .with_base_name(brand)
                    .with_ingredient(doc.ingredient_text())
                    .marketed(true)
                    .prescription_only(doc.is_prescription());
                if let Some(route) = doc.openfda.route.first() {
                    record = record.with_route(route.to_lowercase());
                }
                record
            }
            SourceRecord::Authorization(authorization) => {
                let medicine = &authorization.medicine;
                let number = Some(medicine.product_number.as_str()).filter(|n| !n.trim().is_empty());
                let ingredient = if medicine.active_substance.trim().is_empty() {
                    &medicine.inn
                } else {
                    &medicine.active_substance
                };
                FormularyRecord::new(external_id("ext-ema", number), medicine.name.clone())
                    .with_base_name(medicine.name.clone())
                    .with_ingredient(ingredient.clone())
                    .with_atc(medicine.atc_code.clone())
                    .marketed(medicine.is_authorised())
            }
        }
    }
}

fn external_id(prefix: &str, source_id: Option<&str>) -> String {
    match source_id.map(str::trim).filter(|s| !s.is_empty()) {
        Some(id) => format!("{prefix}-{}", id.replace('/', "-")),
        None => format!("{prefix}-{}", uuid::Uuid::new_v4()),
    }
}

/// An external drug database.
#[async_trait]
pub trait SourceBackend: Send + Sync {
    fn id(&self) -> SourceId;

    /// Whether `field` can be searched at all. Unsupported fields are skipped without a request.
    fn supports(&self, _field: QueryField) -> bool {
        true
    }

    /// Check the source is reachable.
    async fn check(&self) -> SourceResult<()>;

    /// Find the best document whose `field` matches `term`.
    ///
    /// `Ok(None)` is a definitive non-match.
    async fn lookup(&self, field: QueryField, term: &str) -> SourceResult<Option<SourceRecord>>;
}
