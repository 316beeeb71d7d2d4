//! National formulary models.

use serde::{Deserialize, Serialize};

use crate::resolver::normalize;

/// A single drug entry in the national formulary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormularyRecord {
    /// Unique, immutable identifier
    pub id: String,
    /// Display name, usually brand plus strength and form
    pub name: String,
    /// Brand/base name without strength
    #[serde(default)]
    pub base_name: String,
    /// Free-text active ingredient field (may list several substances or a drug class)
    #[serde(default)]
    pub active_ingredient: String,
    /// ATC classification code (e.g., "C10AA07")
    #[serde(default)]
    pub atc_code: String,
    /// Whether the product is currently on the market
    #[serde(default, alias = "marketed")]
    pub is_marketed: bool,
    /// Route of administration (e.g., "oral")
    #[serde(default)]
    pub route: Option<String>,
    /// Prescription-only medicine
    #[serde(default)]
    pub prescription_only: bool,
    /// Pharmaceutical form (e.g., "filmtabletta")
    #[serde(default)]
    pub form: Option<String>,
    /// Strength text (e.g., "10 mg")
    #[serde(default)]
    pub strength: Option<String>,
    /// Normalized display name, computed at load
    #[serde(default, skip_serializing)]
    pub search_name: String,
    /// Normalized ingredient field, computed at load
    #[serde(default, skip_serializing)]
    pub search_ingredient: String,
}

impl FormularyRecord {
    /// Create a record with required fields; search fields are filled in.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let mut record = Self {
            id: id.into(),
            name: name.into(),
            base_name: String::new(),
            active_ingredient: String::new(),
            atc_code: String::new(),
            is_marketed: false,
            route: None,
            prescription_only: false,
            form: None,
            strength: None,
            search_name: String::new(),
            search_ingredient: String::new(),
        };
        record.prepare_search_fields();
        record
    }

    /// Builder-style setter for the ingredient field.
    pub fn with_ingredient(mut self, ingredient: impl Into<String>) -> Self {
        self.active_ingredient = ingredient.into();
        self.prepare_search_fields();
        self
    }

    /// Builder-style setter for the ATC code.
    pub fn with_atc(mut self, atc_code: impl Into<String>) -> Self {
        self.atc_code = atc_code.into();
        self
    }

    /// Builder-style setter for the market flag.
    pub fn marketed(mut self, is_marketed: bool) -> Self {
        self.is_marketed = is_marketed;
        self
    }

    pub fn with_base_name(mut self, base_name: impl Into<String>) -> Self {
        self.base_name = base_name.into();
        self
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn prescription_only(mut self, prescription_only: bool) -> Self {
        self.prescription_only = prescription_only;
        self
    }

    /// Recompute the lowercase search fields from the source fields.
    pub fn prepare_search_fields(&mut self) {
        self.search_name = normalize(&self.name);
        self.search_ingredient = normalize(&self.active_ingredient);
    }

    /// Whether the ingredient field carries any text.
    pub fn has_ingredient(&self) -> bool {
        !self.active_ingredient.trim().is_empty()
    }
}
