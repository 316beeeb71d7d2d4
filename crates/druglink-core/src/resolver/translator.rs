//! Local-language → international ingredient name translation.
//!
//! Lookup order:
//! 1. Exact match on the normalized name
//! 2. Partial match over all keys (single-substance keys beat combination keys)
//! 3. Input without local diacritics is assumed to be international already
//! 4. The normalized input as a last resort
//!
//! Classification codes resolve to a canonical name by exact code, then by prefix.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::tokenizer::{has_local_diacritics, normalize};
use crate::config::TranslatorConfig;

/// Candidates for one normalized local name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranslationEntry {
    /// Normalized local-language name
    pub local_name: String,
    /// International names, most likely first
    pub candidates: Vec<String>,
    /// The key names a fixed combination rather than one substance
    pub is_combination: bool,
}

/// Translator built from the formulary's lookup tables.
#[derive(Debug, Clone, Default)]
pub struct IngredientTranslator {
    /// Ordered by key so partial matching is deterministic
    entries: BTreeMap<String, TranslationEntry>,
    /// Upper-case ATC code → canonical name
    atc_names: BTreeMap<String, String>,
    config: TranslatorConfig,
}

impl IngredientTranslator {
    /// Build from raw tables. Keys are normalized; colliding keys merge their candidates.
    pub fn new<'a, T, A>(translations: T, atc_names: A, config: TranslatorConfig) -> Self
    where
        T: IntoIterator<Item = (&'a String, &'a Vec<String>)>,
        A: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut entries: BTreeMap<String, TranslationEntry> = BTreeMap::new();
        for (local, candidates) in translations {
            let key = normalize(local);
            if key.is_empty() {
                continue;
            }
            let entry = entries.entry(key.clone()).or_insert_with(|| TranslationEntry {
                is_combination: is_combination_key(&key),
                local_name: key,
                candidates: Vec::new(),
            });
            for candidate in candidates {
                let candidate = candidate.trim();
                if !candidate.is_empty() && !entry.candidates.iter().any(|c| c == candidate) {
                    entry.candidates.push(candidate.to_string());
                }
            }
        }
        entries.retain(|_, entry| !entry.candidates.is_empty());

        let atc_names = atc_names
            .into_iter()
            .map(|(code, name)| (code.trim().to_uppercase(), name.trim().to_string()))
            .filter(|(code, name)| !code.is_empty() && !name.is_empty())
            .collect();

        Self {
            entries,
            atc_names,
            config,
        }
    }

    /// International-name candidates for a local ingredient name, most likely first.
    ///
    /// Returns at least one candidate for any non-blank input.
    pub fn to_international(&self, local_name: &str) -> Vec<String> {
        let query = normalize(local_name);
        if query.is_empty() {
            return Vec::new();
        }

        if let Some(entry) = self.entries.get(&query) {
            return entry.candidates.clone();
        }

        if let Some(candidates) = self.partial_match(&query) {
            return candidates;
        }

        if !has_local_diacritics(local_name) {
            return vec![local_name.trim().to_string()];
        }

        vec![query]
    }

    /// Canonical name for a classification code: exact, then by prefix.
    pub fn from_classification_code(&self, code: &str) -> Option<String> {
        let code = code.trim().to_uppercase();
        if code.is_empty() {
            return None;
        }

        if let Some(name) = self.atc_names.get(&code) {
            return Some(name.clone());
        }

        let prefix_len = self.config.atc_prefix_len;
        if code.chars().count() < prefix_len {
            return None;
        }
        let prefix: String = code.chars().take(prefix_len).collect();

        self.atc_names
            .range(prefix.clone()..)
            .take_while(|(candidate, _)| candidate.starts_with(&prefix))
            .map(|(_, name)| name.clone())
            .next()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn classification_code_count(&self) -> usize {
        self.atc_names.len()
    }

    /// Substring matching over all keys.
    ///
    /// A key inside the query must not be much shorter than the query, which keeps
    /// fragments like "sav" from matching "szalicilsav-…". Single-substance keys win
    /// over combination keys; among singles, shorter keys come first.
    fn partial_match(&self, query: &str) -> Option<Vec<String>> {
        let query_len = query.chars().count();
        if query_len < self.config.min_partial_query_len {
            return None;
        }

        let mut singles: Vec<&TranslationEntry> = Vec::new();
        let mut combinations: Vec<&TranslationEntry> = Vec::new();

        for (key, entry) in &self.entries {
            let accepted = if key.contains(query) {
                true
            } else if query.contains(key.as_str()) {
                key.chars().count() as f64 / query_len as f64 > self.config.min_contains_ratio
            } else {
                false
            };

            if !accepted {
                continue;
            }
            if entry.is_combination {
                combinations.push(entry);
            } else {
                singles.push(entry);
            }
        }

        // Stable sort keeps key order among equal lengths.
        singles.sort_by_key(|entry| entry.local_name.chars().count());

        let chosen = if singles.is_empty() { combinations } else { singles };
        if chosen.is_empty() {
            return None;
        }

        let mut candidates: Vec<String> = Vec::new();
        for entry in chosen {
            for candidate in &entry.candidates {
                if !candidates.contains(candidate) {
                    candidates.push(candidate.clone());
                }
            }
        }
        Some(candidates)
    }
}

/// Whether a normalized key lists more than one substance.
fn is_combination_key(key: &str) -> bool {
    key.contains(" and ")
        || key.contains(" es ")
        || key.contains(',')
        || key.contains('+')
        || key.contains('/')
}
