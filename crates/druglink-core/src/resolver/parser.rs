//! Ingredient field parser.
//!
//! Splits a free-text active-ingredient field into its components. Strategies are
//! tried in order and the first one that accepts the field wins:
//!
//! 1. Serial conjunction: `A, B and C` / `A, B és C`
//! 2. Simple conjunction: `A and B` (recursing into `B`)
//! 3. Mixed commas and conjunctions: `A and B, C`
//! 4. Pure comma list: `A, B, C` (only if every part looks like an ingredient)
//! 5. The whole field as one component
//!
//! Parsing never fails. Class terms such as "diuretics" mark the result as a
//! generic placeholder but stay in the component list.

use std::collections::HashSet;

use regex::Regex;

use super::tokenizer::{collapse_whitespace, normalize, tokenize};
use crate::models::ParsedIngredient;

/// Minimum length of a segment accepted as an ingredient name.
const MIN_INGREDIENT_CHARS: usize = 3;

/// Conjunctions in English and Hungarian, surrounded by whitespace.
const CONJUNCTION_PATTERN: &str = r"(?i)\s+(?:and|és)\s+";

/// A comma directly before a conjunction (Oxford comma).
const COMMA_CONJUNCTION_PATTERN: &str = r"(?i),\s*(and|és)\s+";

/// One way of splitting an ingredient field.
///
/// `split` returns `None` when the strategy does not apply, letting the next one try.
pub trait ParseStrategy: Send + Sync {
    /// Short identifier used in logs and tests.
    fn name(&self) -> &'static str;

    /// Split `field` (already trimmed and whitespace-collapsed) into components.
    fn split(&self, field: &str, parser: &IngredientParser) -> Option<Vec<String>>;
}

/// Parser for free-text ingredient fields.
pub struct IngredientParser {
    conjunction: Regex,
    comma_conjunction: Regex,
    /// Normalized words that name a drug class rather than a substance
    placeholder_terms: HashSet<String>,
    /// Normalized pharmaceutical form words (English and Hungarian)
    form_words: HashSet<String>,
    /// Normalized unit tokens
    unit_tokens: HashSet<String>,
    strategies: Vec<Box<dyn ParseStrategy>>,
}

impl Default for IngredientParser {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IngredientParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngredientParser")
            .field("strategies", &self.strategy_names())
            .field("placeholder_terms", &self.placeholder_terms.len())
            .finish()
    }
}

impl IngredientParser {
    /// Create a parser with the default vocabularies and strategy order.
    pub fn new() -> Self {
        Self {
            conjunction: Regex::new(CONJUNCTION_PATTERN).expect("conjunction pattern is valid"),
            comma_conjunction: Regex::new(COMMA_CONJUNCTION_PATTERN)
                .expect("comma-conjunction pattern is valid"),
            placeholder_terms: Self::default_placeholder_terms(),
            form_words: Self::default_form_words(),
            unit_tokens: Self::default_unit_tokens(),
            strategies: vec![
                Box::new(SerialConjunction),
                Box::new(SimpleConjunction),
                Box::new(MixedCommaConjunction),
                Box::new(CommaList),
                Box::new(WholeField),
            ],
        }
    }

    /// Parse an ingredient field.
    pub fn parse(&self, field: &str) -> ParsedIngredient {
        let cleaned = collapse_whitespace(field);
        if cleaned.is_empty() {
            return ParsedIngredient::empty(field);
        }

        let ingredients = self.split_components(&cleaned);
        let is_generic_placeholder = ingredients.iter().any(|i| self.is_placeholder(i));

        ParsedIngredient {
            original: field.to_string(),
            is_multi_ingredient: ingredients.len() > 1,
            ingredients,
            is_generic_placeholder,
        }
    }

    /// Run the strategies over a piece of text; used recursively by strategies.
    pub fn split_components(&self, text: &str) -> Vec<String> {
        let text = collapse_whitespace(&self.comma_conjunction.replace_all(text, " ${1} "));
        if text.is_empty() {
            return Vec::new();
        }

        for strategy in &self.strategies {
            let Some(parts) = strategy.split(&text, self) else {
                continue;
            };
            let parts: Vec<String> = parts
                .iter()
                .map(|p| collapse_whitespace(p))
                .filter(|p| !p.is_empty())
                .collect();
            if !parts.is_empty() {
                return parts;
            }
        }

        vec![text]
    }

    /// Whether a component names a drug class rather than a substance.
    pub fn is_placeholder(&self, component: &str) -> bool {
        tokenize(component)
            .iter()
            .any(|token| self.placeholder_terms.contains(token))
    }

    /// Whether a segment plausibly names an ingredient.
    ///
    /// Rejects short fragments, segments starting with a digit (decimal commas such
    /// as `0,5 mg`), bare units and pharmaceutical form words.
    pub fn looks_like_ingredient(&self, segment: &str) -> bool {
        let segment = segment.trim();
        if segment.chars().count() < MIN_INGREDIENT_CHARS {
            return false;
        }
        if segment.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            return false;
        }

        let normalized = normalize(segment);
        if self.unit_tokens.contains(&normalized) || self.form_words.contains(&normalized) {
            return false;
        }

        let tokens = tokenize(segment);
        !tokens.is_empty()
            && !tokens
                .iter()
                .all(|t| self.form_words.contains(t) || self.unit_tokens.contains(t))
    }

    /// Names of the configured strategies, in evaluation order.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    fn has_conjunction(&self, text: &str) -> bool {
        self.conjunction.is_match(text)
    }

    fn all_ingredients(&self, parts: &[String]) -> bool {
        parts.len() > 1 && parts.iter().all(|p| self.looks_like_ingredient(p))
    }

    /// Default class terms.
    fn default_placeholder_terms() -> HashSet<String> {
        [
            // English
            "diuretic",
            "diuretics",
            "combination",
            "combinations",
            "various",
            "other",
            "others",
            "inhibitors",
            "antagonists",
            "derivatives",
            "agents",
            // Hungarian (normalized, no diacritics)
            "diuretikum",
            "diuretikumok",
            "vizhajtok",
            "kombinacio",
            "kombinaciok",
            "kombinacioi",
            "egyeb",
            "kulonfele",
            "gatlok",
            "antagonistak",
            "szarmazekok",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    /// Default pharmaceutical form words.
    fn default_form_words() -> HashSet<String> {
        [
            // English
            "tablet",
            "tablets",
            "film-coated tablet",
            "capsule",
            "capsules",
            "injection",
            "solution",
            "suspension",
            "syrup",
            "cream",
            "ointment",
            "gel",
            "drops",
            "spray",
            "powder",
            "suppository",
            "patch",
            "emulsion",
            // Hungarian (normalized)
            "tabletta",
            "filmtabletta",
            "retardtabletta",
            "kapszula",
            "kemeny kapszula",
            "injekcio",
            "oldat",
            "oldatos injekcio",
            "szuszpenzio",
            "szirup",
            "krem",
            "kenocs",
            "csepp",
            "belsoleges",
            "por",
            "kup",
            "tapasz",
            "emulzio",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    /// Default unit tokens.
    fn default_unit_tokens() -> HashSet<String> {
        [
            "mg", "g", "kg", "mcg", "ug", "µg", "ng", "ml", "l", "dl", "iu", "ne", "nu", "mmol",
            "meq", "%", "mg/ml", "mg/g", "mcg/h", "adag", "dose", "doses",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }
}

/// `A, B and C`: the conjunction sits in the last comma segment.
struct SerialConjunction;

impl ParseStrategy for SerialConjunction {
    fn name(&self) -> &'static str {
        "serial-conjunction"
    }

    fn split(&self, field: &str, parser: &IngredientParser) -> Option<Vec<String>> {
        let last = parser.conjunction.find_iter(field).last()?;
        let left = field[..last.start()].trim_end_matches(',').trim();
        let right = field[last.end()..].trim();
        if right.is_empty() || right.contains(',') {
            return None;
        }

        let (head, second) = left.rsplit_once(',')?;
        let mut parts: Vec<String> = head.split(',').map(|s| s.trim().to_string()).collect();
        parts.push(second.trim().to_string());
        parts.push(right.to_string());

        parser.all_ingredients(&parts).then_some(parts)
    }
}

/// `A and B`, recursing into `B` when it holds another conjunction.
struct SimpleConjunction;

impl ParseStrategy for SimpleConjunction {
    fn name(&self) -> &'static str {
        "simple-conjunction"
    }

    fn split(&self, field: &str, parser: &IngredientParser) -> Option<Vec<String>> {
        if field.contains(',') {
            return None;
        }
        let first = parser.conjunction.find(field)?;
        let head = field[..first.start()].trim();
        let tail = field[first.end()..].trim();
        if head.is_empty() || tail.is_empty() {
            return None;
        }

        let mut parts = vec![head.to_string()];
        if parser.has_conjunction(tail) {
            parts.extend(parser.split_components(tail));
        } else {
            parts.push(tail.to_string());
        }
        Some(parts)
    }
}

/// Commas and conjunctions mixed, e.g. `A and B, C`.
///
/// Splits at commas and parses each part on its own; the result is only accepted
/// when every component still looks like an ingredient.
struct MixedCommaConjunction;

impl ParseStrategy for MixedCommaConjunction {
    fn name(&self) -> &'static str {
        "mixed-comma-conjunction"
    }

    fn split(&self, field: &str, parser: &IngredientParser) -> Option<Vec<String>> {
        if !field.contains(',') || !parser.has_conjunction(field) {
            return None;
        }

        let parts: Vec<String> = field
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .flat_map(|p| parser.split_components(p))
            .collect();

        parser.all_ingredients(&parts).then_some(parts)
    }
}

/// `A, B, C` with no conjunction.
struct CommaList;

impl ParseStrategy for CommaList {
    fn name(&self) -> &'static str {
        "comma-list"
    }

    fn split(&self, field: &str, parser: &IngredientParser) -> Option<Vec<String>> {
        if !field.contains(',') || parser.has_conjunction(field) {
            return None;
        }

        let parts: Vec<String> = field.split(',').map(|s| s.trim().to_string()).collect();
        parser.all_ingredients(&parts).then_some(parts)
    }
}

/// Fallback: the whole field is one ingredient.
struct WholeField;

impl ParseStrategy for WholeField {
    fn name(&self) -> &'static str {
        "whole-field"
    }

    fn split(&self, field: &str, _parser: &IngredientParser) -> Option<Vec<String>> {
        Some(vec![field.to_string()])
    }
}
