//! Parsed ingredient fields.

use serde::{Deserialize, Serialize};

/// The decomposition of a free-text ingredient field.
///
/// Derived on demand from [`FormularyRecord::active_ingredient`](super::FormularyRecord),
/// never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParsedIngredient {
    /// The field exactly as given
    pub original: String,
    /// Component names in the order they appear
    pub ingredients: Vec<String>,
    /// More than one component
    pub is_multi_ingredient: bool,
    /// At least one component names a drug class rather than a substance
    pub is_generic_placeholder: bool,
}

impl ParsedIngredient {
    /// The result for an empty or blank field.
    pub fn empty(original: &str) -> Self {
        Self {
            original: original.to_string(),
            ingredients: Vec::new(),
            is_multi_ingredient: false,
            is_generic_placeholder: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ingredients.is_empty()
    }
}
