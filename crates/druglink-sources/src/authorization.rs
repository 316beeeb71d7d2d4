//! Source B: the EU medicines authorization database.
//!
//! Published as three flat JSON record sets (authorized medicines, supply shortages,
//! and direct healthcare professional communications). They are downloaded on
//! first use, indexed in memory and matched locally.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use druglink_core::resolver::normalize;
use druglink_core::SourceId;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::backend::{QueryField, SourceBackend, SourceRecord};
use crate::config::SourceConfig;
use crate::error::{SourceError, SourceResult};

// ============================================================================
// Record schemas
// ============================================================================

/// An authorized medicine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizedMedicine {
    #[serde(rename = "name_of_medicine", alias = "name")]
    pub name: String,
    #[serde(
        rename = "international_non_proprietary_name_common_name",
        alias = "inn"
    )]
    pub inn: String,
    pub active_substance: String,
    #[serde(rename = "atc_code_human", alias = "atc_code")]
    pub atc_code: String,
    #[serde(rename = "medicine_status", alias = "status")]
    pub status: String,
    pub product_number: String,
    #[serde(rename = "marketing_authorisation_developer_applicant_holder", alias = "holder")]
    pub holder: String,
    #[serde(rename = "medicine_url", alias = "url", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl AuthorizedMedicine {
    pub fn is_authorised(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case("authorised")
    }
}

/// A reported supply shortage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupplyShortage {
    #[serde(rename = "medicine_affected", alias = "medicine")]
    pub medicine: String,
    #[serde(
        rename = "international_non_proprietary_name_inn_or_common_name",
        alias = "inn"
    )]
    pub inn: String,
    #[serde(rename = "supply_shortage_status", alias = "status")]
    pub status: String,
    #[serde(rename = "start_of_shortage_date", skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(rename = "expected_resolution_date", skip_serializing_if = "Option::is_none")]
    pub expected_resolution: Option<String>,
}

/// A direct healthcare professional communication (safety notice).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderCommunication {
    #[serde(rename = "name_of_medicine", alias = "medicine")]
    pub medicine: String,
    #[serde(rename = "active_substances", alias = "active_substance")]
    pub active_substance: String,
    #[serde(rename = "dhpc_type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(rename = "dissemination_date", skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "regulatory_outcome", skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

/// A medicine with the shortages and safety communications that mention it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationRecord {
    pub medicine: AuthorizedMedicine,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shortages: Vec<SupplyShortage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub communications: Vec<ProviderCommunication>,
}

impl AuthorizationRecord {
    pub fn new(medicine: AuthorizedMedicine) -> Self {
        Self {
            medicine,
            shortages: Vec::new(),
            communications: Vec::new(),
        }
    }
}

/// Record sets are published either bare or wrapped in `{"data": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecordSet<T> {
    Wrapped { data: Vec<T> },
    Bare(Vec<T>),
}

impl<T> RecordSet<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            RecordSet::Wrapped { data } => data,
            RecordSet::Bare(records) => records,
        }
    }
}

/// Parse a record set in either layout.
pub fn parse_record_set<T: DeserializeOwned>(json: &str) -> SourceResult<Vec<T>> {
    Ok(serde_json::from_str::<RecordSet<T>>(json)?.into_vec())
}

// ============================================================================
// In-memory dataset
// ============================================================================

/// Postings for one name field. Exact matches on the whole value are kept apart
/// from matches on one listed component of it.
#[derive(Debug, Default)]
struct NameIndex {
    exact: HashMap<String, Vec<usize>>,
    components: HashMap<String, Vec<usize>>,
}

impl NameIndex {
    fn insert(&mut self, value: &str, position: usize) {
        let full = normalize(value);
        if full.is_empty() {
            return;
        }
        for part in components(&full) {
            self.components.entry(part).or_default().push(position);
        }
        self.exact.entry(full).or_default().push(position);
    }
}

/// The three record sets, indexed by normalized name.
#[derive(Debug, Default)]
pub struct AuthorizationDataset {
    medicines: Vec<AuthorizedMedicine>,
    shortages: Vec<SupplyShortage>,
    communications: Vec<ProviderCommunication>,
    by_name: NameIndex,
    by_inn: NameIndex,
    by_substance: NameIndex,
    by_atc: HashMap<String, Vec<usize>>,
}

/// Listed components of a normalized value, excluding the value itself.
fn components(full: &str) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    for part in full.split([',', '/', ';', '+']).flat_map(|p| p.split(" and ")) {
        let part = part.trim();
        if !part.is_empty() && part != full && !parts.iter().any(|k| k == part) {
            parts.push(part.to_string());
        }
    }
    parts
}

/// The full normalized value plus each listed component.
fn name_keys(value: &str) -> Vec<String> {
    let full = normalize(value);
    if full.is_empty() {
        return Vec::new();
    }
    let mut keys = components(&full);
    keys.insert(0, full);
    keys
}

impl AuthorizationDataset {
    pub fn new(
        medicines: Vec<AuthorizedMedicine>,
        shortages: Vec<SupplyShortage>,
        communications: Vec<ProviderCommunication>,
    ) -> Self {
        let mut dataset = Self {
            medicines,
            shortages,
            communications,
            ..Default::default()
        };
        for (i, medicine) in dataset.medicines.iter().enumerate() {
            dataset.by_name.insert(&medicine.name, i);
            dataset.by_inn.insert(&medicine.inn, i);
            dataset.by_substance.insert(&medicine.active_substance, i);
            let atc = medicine.atc_code.trim().to_uppercase();
            if !atc.is_empty() {
                dataset.by_atc.entry(atc).or_default().push(i);
            }
        }
        dataset
    }

    pub fn len(&self) -> usize {
        self.medicines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.medicines.is_empty()
    }

    /// Best medicine for `term` on `field`, with its related notices.
    ///
    /// A whole-value match beats a match on one component of a combination.
    /// Within each, authorised medicines win over withdrawn or refused ones.
    pub fn find(&self, field: QueryField, term: &str) -> Option<AuthorizationRecord> {
        let index = match field {
            QueryField::BrandName => &self.by_name,
            QueryField::ActiveIngredient => &self.by_substance,
            QueryField::GenericName => &self.by_inn,
            QueryField::ClassificationCode => return self.find_by_classification(term),
        };
        let key = normalize(term);
        [&index.exact, &index.components]
            .into_iter()
            .find_map(|postings| self.best(postings.get(&key)?))
    }

    /// Medicines classified under `code` (exact ATC match).
    pub fn find_by_classification(&self, code: &str) -> Option<AuthorizationRecord> {
        self.best(self.by_atc.get(&code.trim().to_uppercase())?)
    }

    fn best(&self, positions: &[usize]) -> Option<AuthorizationRecord> {
        let position = positions
            .iter()
            .copied()
            .find(|&i| self.medicines[i].is_authorised())
            .or_else(|| positions.first().copied())?;
        Some(self.with_related(self.medicines[position].clone()))
    }

    fn with_related(&self, medicine: AuthorizedMedicine) -> AuthorizationRecord {
        let mut names: Vec<String> = Vec::new();
        for value in [&medicine.name, &medicine.inn, &medicine.active_substance] {
            names.extend(name_keys(value));
        }
        let mentioned = |value: &str| name_keys(value).iter().any(|k| names.contains(k));

        let shortages = self
            .shortages
            .iter()
            .filter(|s| mentioned(&s.medicine) || mentioned(&s.inn))
            .cloned()
            .collect();
        let communications = self
            .communications
            .iter()
            .filter(|c| mentioned(&c.medicine) || mentioned(&c.active_substance))
            .cloned()
            .collect();

        AuthorizationRecord {
            medicine,
            shortages,
            communications,
        }
    }
}

// ============================================================================
// Backend
// ============================================================================

/// Bulk-loading client for the authorization database.
///
/// A downloaded dataset is kept for the life of the backend. A failed or empty
/// download keeps nothing, so the next call downloads again.
#[derive(Debug)]
pub struct AuthorizationBackend {
    client: Client,
    config: SourceConfig,
    dataset: RwLock<Option<Arc<AuthorizationDataset>>>,
    loading: Mutex<()>,
}

impl AuthorizationBackend {
    /// Build the client. The record sets are fetched on first use.
    pub fn new(config: SourceConfig) -> SourceResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.download_timeout())
            .build()
            .map_err(|e| SourceError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            config,
            dataset: RwLock::new(None),
            loading: Mutex::new(()),
        })
    }

    /// A backend over an already loaded dataset.
    pub fn from_dataset(dataset: AuthorizationDataset) -> Self {
        Self {
            client: Client::new(),
            config: SourceConfig::authorization_defaults(),
            dataset: RwLock::new(Some(Arc::new(dataset))),
            loading: Mutex::new(()),
        }
    }

    /// The dataset, downloading it if none is held. Concurrent callers share one download.
    pub async fn dataset(&self) -> SourceResult<Arc<AuthorizationDataset>> {
        if let Some(dataset) = self.dataset.read().await.clone() {
            return Ok(dataset);
        }

        let _loading = self.loading.lock().await;
        if let Some(dataset) = self.dataset.read().await.clone() {
            return Ok(dataset);
        }

        match self.download().await {
            Ok(dataset) => {
                let dataset = Arc::new(dataset);
                *self.dataset.write().await = Some(dataset.clone());
                Ok(dataset)
            }
            Err(e) => {
                warn!(error = %e, "Failed to download authorized medicines");
                Err(e)
            }
        }
    }

    async fn download(&self) -> SourceResult<AuthorizationDataset> {
        let medicines = self.fetch::<AuthorizedMedicine>(&self.config.base_url).await?;
        if medicines.is_empty() {
            return Err(SourceError::Unavailable(
                "authorized medicines list is empty".to_string(),
            ));
        }
        let shortages = self.fetch_optional(self.config.shortages_url.as_deref()).await;
        let communications = self.fetch_optional(self.config.dhpc_url.as_deref()).await;

        let dataset = AuthorizationDataset::new(medicines, shortages, communications);
        info!(
            medicines = dataset.len(),
            shortages = dataset.shortages.len(),
            communications = dataset.communications.len(),
            "Authorization dataset loaded"
        );
        Ok(dataset)
    }

    async fn fetch<T: DeserializeOwned>(&self, url: &str) -> SourceResult<Vec<T>> {
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_record_set(&body)
    }

    async fn fetch_optional<T: DeserializeOwned>(&self, url: Option<&str>) -> Vec<T> {
        let Some(url) = url else {
            return Vec::new();
        };
        self.fetch(url).await.unwrap_or_else(|e| {
            warn!(url, error = %e, "Failed to download supplementary record set");
            Vec::new()
        })
    }
}

#[async_trait]
impl SourceBackend for AuthorizationBackend {
    fn id(&self) -> SourceId {
        SourceId::Authorization
    }

    async fn check(&self) -> SourceResult<()> {
        if self.dataset().await?.is_empty() {
            return Err(SourceError::Unavailable("authorization dataset is empty".to_string()));
        }
        Ok(())
    }

    async fn lookup(&self, field: QueryField, term: &str) -> SourceResult<Option<SourceRecord>> {
        Ok(self
            .dataset()
            .await?
            .find(field, term)
            .map(SourceRecord::Authorization))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEDICINES: &str = r#"{"data": [
        {"name_of_medicine": "Biktarvy",
         "international_non_proprietary_name_common_name": "bictegravir / emtricitabine / tenofovir alafenamide",
         "active_substance": "bictegravir sodium, emtricitabine, tenofovir alafenamide fumarate",
         "atc_code_human": "J05AR20", "medicine_status": "Authorised", "product_number": "EMEA/H/C/004449"},
        {"name_of_medicine": "Rosuvastatin Old", "international_non_proprietary_name_common_name": "rosuvastatin",
         "active_substance": "rosuvastatin calcium", "atc_code_human": "C10AA07", "medicine_status": "Withdrawn"},
        {"name_of_medicine": "Rosuvastatin Krka", "international_non_proprietary_name_common_name": "rosuvastatin",
         "active_substance": "rosuvastatin calcium", "atc_code_human": "C10AA07", "medicine_status": "Authorised"}
    ]}"#;

    fn dataset() -> AuthorizationDataset {
        let shortages = vec![SupplyShortage {
            medicine: "Biktarvy".to_string(),
            status: "Ongoing".to_string(),
            ..Default::default()
        }];
        let communications = vec![ProviderCommunication {
            medicine: "Various".to_string(),
            active_substance: "rosuvastatin".to_string(),
            ..Default::default()
        }];
        AuthorizationDataset::new(parse_record_set(MEDICINES).unwrap(), shortages, communications)
    }

    #[test]
    fn test_record_set_layouts() {
        let wrapped: Vec<AuthorizedMedicine> = parse_record_set(MEDICINES).unwrap();
        let bare: Vec<AuthorizedMedicine> = parse_record_set(r#"[{"name": "Crestor", "status": "Authorised"}]"#).unwrap();

        assert_eq!(wrapped.len(), 3);
        assert_eq!(wrapped[0].atc_code, "J05AR20");
        assert_eq!(bare[0].name, "Crestor");
        assert!(bare[0].is_authorised());
        assert!(parse_record_set::<AuthorizedMedicine>("{\"rows\": 1}").is_err());
    }

    #[test]
    fn test_find_by_field() {
        let dataset = dataset();

        let brand = dataset.find(QueryField::BrandName, "BIKTARVY").unwrap();
        assert_eq!(brand.medicine.product_number, "EMEA/H/C/004449");
        assert_eq!(brand.shortages.len(), 1);

        let component = dataset.find(QueryField::GenericName, "emtricitabine").unwrap();
        assert_eq!(component.medicine.name, "Biktarvy");

        assert!(dataset.find(QueryField::ActiveIngredient, "bictegravir sodium").is_some());
        assert!(dataset.find(QueryField::BrandName, "crestor").is_none());
    }

    #[test]
    fn test_authorised_medicine_preferred() {
        let dataset = dataset();

        let record = dataset.find(QueryField::GenericName, "rosuvastatin").unwrap();
        assert_eq!(record.medicine.name, "Rosuvastatin Krka");
        assert_eq!(record.communications.len(), 1);
        assert!(record.shortages.is_empty());

        let by_atc = dataset.find_by_classification("c10aa07").unwrap();
        assert_eq!(by_atc.medicine.name, "Rosuvastatin Krka");
        let by_field = dataset.find(QueryField::ClassificationCode, " C10AA07 ").unwrap();
        assert_eq!(by_field.medicine.name, "Rosuvastatin Krka");
    }

    #[test]
    fn test_single_substance_beats_combination() {
        let medicines: Vec<AuthorizedMedicine> = parse_record_set(
            r#"[
                {"name": "Roswera Combo", "inn": "rosuvastatin / ezetimibe",
                 "active_substance": "rosuvastatin calcium, ezetimibe", "status": "Authorised"},
                {"name": "Rosuvastatin Krka", "inn": "rosuvastatin",
                 "active_substance": "rosuvastatin calcium", "status": "Authorised"}
            ]"#,
        )
        .unwrap();
        let dataset = AuthorizationDataset::new(medicines, Vec::new(), Vec::new());

        let generic = dataset.find(QueryField::GenericName, "rosuvastatin").unwrap();
        assert_eq!(generic.medicine.name, "Rosuvastatin Krka");
        let substance = dataset.find(QueryField::ActiveIngredient, "rosuvastatin calcium").unwrap();
        assert_eq!(substance.medicine.name, "Rosuvastatin Krka");

        let component = dataset.find(QueryField::GenericName, "ezetimibe").unwrap();
        assert_eq!(component.medicine.name, "Roswera Combo");
    }

    #[tokio::test]
    async fn test_backend_over_loaded_dataset() {
        let backend = AuthorizationBackend::from_dataset(dataset());

        assert!(backend.check().await.is_ok());
        let found = backend.lookup(QueryField::BrandName, "biktarvy").await.unwrap();
        assert!(matches!(found, Some(SourceRecord::Authorization(_))));

        let empty = AuthorizationBackend::from_dataset(AuthorizationDataset::default());
        assert!(matches!(empty.check().await, Err(SourceError::Unavailable(_))));
    }
}
