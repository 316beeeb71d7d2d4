//! Relevance scoring.

use std::cmp::Ordering;
use std::collections::HashMap;

use super::SearchHit;
use crate::models::{ExpansionCacheEntry, FormularyRecord};

/// Query term equals an indexed token.
pub const EXACT_TOKEN: u32 = 10;
/// Query term is a proper prefix of an indexed token.
pub const PREFIX: u32 = 5;
/// Query term names a drug-class stem the record belongs to.
pub const CLASS_SUFFIX: u32 = 8;
/// Query term is a near miss of an indexed token.
pub const TYPO: u32 = 3;
/// Bonus for marketed products.
pub const MARKETED: u32 = 20;
/// Bonus for records with a known active ingredient.
pub const HAS_INGREDIENT: u32 = 15;
/// Expansion entry whose name contains the query.
pub const EXPANSION_NAME: u32 = 10;
/// Expansion entry whose ingredient or base name contains the query.
pub const EXPANSION_OTHER: u32 = 5;

/// Per-record match scores for one query.
#[derive(Debug, Default)]
pub(crate) struct ScoreBoard {
    scores: HashMap<u32, u32>,
}

impl ScoreBoard {
    pub fn add(&mut self, record: u32, points: u32) {
        *self.scores.entry(record).or_insert(0) += points;
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Apply record bonuses and return `(record, score)` pairs.
    pub fn finish(self, records: &[FormularyRecord]) -> Vec<(u32, u32)> {
        self.scores
            .into_iter()
            .filter(|(_, score)| *score > 0)
            .map(|(id, score)| (id, score + record_bonus(&records[id as usize])))
            .collect()
    }
}

/// Bonus applied to any record that matched at all.
pub fn record_bonus(record: &FormularyRecord) -> u32 {
    let mut bonus = 0;
    if record.is_marketed {
        bonus += MARKETED;
    }
    if record.has_ingredient() {
        bonus += HAS_INGREDIENT;
    }
    bonus
}

/// Score an expansion cache entry against a normalized query, or zero.
pub fn score_expansion(entry: &ExpansionCacheEntry, normalized_query: &str) -> u32 {
    let record = &entry.record;
    let base = if record.search_name.contains(normalized_query) {
        EXPANSION_NAME
    } else if record.search_ingredient.contains(normalized_query)
        || crate::resolver::normalize(&record.base_name).contains(normalized_query)
    {
        EXPANSION_OTHER
    } else {
        return 0;
    };
    base + record_bonus(record)
}

/// Final ordering: score descending, then name, then id.
pub fn compare_hits(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| a.record.search_name.cmp(&b.record.search_name))
        .then_with(|| a.record.id.cmp(&b.record.id))
}
