//! Formulary dataset loading.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::FormularyRecord;

/// Dataset loading errors.
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Failed to read dataset {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid dataset JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// The versioned formulary dataset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormularyDataset {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub drugs: Vec<FormularyRecord>,
    /// Local ingredient name → international candidates
    #[serde(default)]
    pub translations: BTreeMap<String, Vec<String>>,
    /// ATC code → canonical name
    #[serde(default)]
    pub atc_names: BTreeMap<String, String>,
}

impl FormularyDataset {
    /// Parse a dataset. Duplicate ids keep the first record.
    pub fn from_json_str(json: &str) -> Result<Self, DatasetError> {
        let mut dataset: FormularyDataset = serde_json::from_str(json)?;
        dataset.prepare();
        Ok(dataset)
    }

    /// Read and parse a dataset file.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| DatasetError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let dataset = Self::from_json_str(&json)?;
        info!(
            path = %path.display(),
            version = %dataset.version,
            drugs = dataset.drugs.len(),
            translations = dataset.translations.len(),
            "Loaded formulary dataset"
        );
        Ok(dataset)
    }

    /// Compute search fields and drop duplicate ids.
    pub fn prepare(&mut self) {
        let mut seen = HashSet::new();
        let before = self.drugs.len();
        self.drugs.retain(|record| {
            if seen.insert(record.id.clone()) {
                true
            } else {
                warn!(id = %record.id, "Duplicate record id in dataset; keeping the first");
                false
            }
        });
        if self.drugs.len() != before {
            warn!(dropped = before - self.drugs.len(), "Dropped duplicate records");
        }

        for record in &mut self.drugs {
            record.prepare_search_fields();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "version": "2024-06",
        "drugs": [
            {"id": "1", "name": "Crestor 10 mg", "active_ingredient": "Rozuvasztatin", "is_marketed": true},
            {"id": "1", "name": "Duplicate"},
            {"id": "2", "name": "Biktarvy", "marketed": true}
        ],
        "translations": {"rozuvasztatin": ["rosuvastatin"]},
        "atc_names": {"C10AA07": "rosuvastatin"}
    }"#;

    #[test]
    fn test_parse_dedupes_and_prepares() {
        let dataset = FormularyDataset::from_json_str(SAMPLE).unwrap();

        assert_eq!(dataset.version, "2024-06");
        assert_eq!(dataset.drugs.len(), 2);
        assert_eq!(dataset.drugs[0].name, "Crestor 10 mg");
        assert_eq!(dataset.drugs[0].search_ingredient, "rozuvasztatin");
        assert!(dataset.drugs[1].is_marketed);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            FormularyDataset::from_json_str("{not json"),
            Err(DatasetError::Json(_))
        ));
    }

    #[tokio::test]
    async fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let dataset = FormularyDataset::from_path(file.path()).await.unwrap();
        assert_eq!(dataset.drugs.len(), 2);
        assert_eq!(dataset.atc_names.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let result = FormularyDataset::from_path("/nonexistent/formulary.json").await;
        assert!(matches!(result, Err(DatasetError::Io { .. })));
    }
}
