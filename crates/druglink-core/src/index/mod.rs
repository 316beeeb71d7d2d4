//! In-memory search index over the formulary.
//!
//! Built once from the full record set. Holds:
//! - token postings from name, base name and ingredient (plus ATC code prefixes)
//! - 3-character prefix postings over the same tokens
//! - drug-class stem postings
//!
//! Queries are tokenized and each term scores records independently; see [`scoring`].

pub mod scoring;
pub mod suffix;

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SearchConfig;
use crate::models::FormularyRecord;
use crate::resolver::{normalize, tokenize};
use scoring::ScoreBoard;

/// Length of the keys in the prefix index.
pub const PREFIX_LEN: usize = 3;

/// ATC code prefix lengths indexed as tokens (the full code is indexed too).
const ATC_LEVELS: &[usize] = &[1, 3, 5];

// ============================================================================
// Query types
// ============================================================================

/// Market-status filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketFilter {
    #[default]
    Any,
    Marketed,
    NotMarketed,
}

/// Search filters and limit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    /// Route of administration, compared case- and accent-insensitively
    pub route: Option<String>,
    /// Require (or exclude) prescription-only products
    pub prescription_only: Option<bool>,
    /// ATC code prefix
    pub atc_prefix: Option<String>,
    pub market: MarketFilter,
    /// Maximum hits; the configured default when absent
    pub limit: Option<usize>,
}

impl SearchOptions {
    /// Create options with only a limit.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Whether a record passes every filter.
    pub fn matches(&self, record: &FormularyRecord) -> bool {
        if let Some(route) = &self.route {
            match &record.route {
                Some(record_route) if normalize(record_route) == normalize(route) => {}
                _ => return false,
            }
        }

        if let Some(prescription_only) = self.prescription_only {
            if record.prescription_only != prescription_only {
                return false;
            }
        }

        if let Some(prefix) = &self.atc_prefix {
            let prefix = prefix.trim().to_uppercase();
            if !record.atc_code.trim().to_uppercase().starts_with(&prefix) {
                return false;
            }
        }

        match self.market {
            MarketFilter::Any => true,
            MarketFilter::Marketed => record.is_marketed,
            MarketFilter::NotMarketed => !record.is_marketed,
        }
    }
}

/// Where a hit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitOrigin {
    Formulary,
    ExpansionCache,
}

/// A ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub record: FormularyRecord,
    pub score: u32,
    pub origin: HitOrigin,
}

// ============================================================================
// Index
// ============================================================================

/// Token, prefix and drug-class indices over an immutable record set.
#[derive(Debug, Default)]
pub struct SearchIndex {
    records: Vec<FormularyRecord>,
    by_id: HashMap<String, u32>,
    /// Text tokens of each record, for prefix verification
    record_tokens: Vec<HashSet<String>>,
    token_index: HashMap<String, Vec<u32>>,
    /// Keys of `token_index`, sorted, for short-prefix scans
    sorted_tokens: Vec<String>,
    prefix_index: HashMap<String, Vec<u32>>,
    suffix_index: HashMap<&'static str, Vec<u32>>,
    config: SearchConfig,
}

impl SearchIndex {
    /// Build the index. Records are expected to have unique ids; later duplicates are ignored.
    pub fn build(records: Vec<FormularyRecord>, config: SearchConfig) -> Self {
        let mut index = Self {
            config,
            ..Self::default()
        };

        for record in records {
            if index.by_id.contains_key(&record.id) {
                continue;
            }
            let slot = index.records.len() as u32;
            index.by_id.insert(record.id.clone(), slot);

            let tokens = record_text_tokens(&record);
            for token in &tokens {
                push_posting(&mut index.token_index, token.clone(), slot);

                if token.chars().count() >= PREFIX_LEN {
                    let prefix: String = token.chars().take(PREFIX_LEN).collect();
                    push_posting(&mut index.prefix_index, prefix, slot);
                }

                for stem in suffix::class_suffixes(token) {
                    let postings = index.suffix_index.entry(stem).or_default();
                    if postings.last() != Some(&slot) {
                        postings.push(slot);
                    }
                }
            }

            for code_token in atc_tokens(&record.atc_code) {
                push_posting(&mut index.token_index, code_token, slot);
            }

            index.record_tokens.push(tokens.into_iter().collect());
            index.records.push(record);
        }

        let mut sorted_tokens: Vec<String> = index.token_index.keys().cloned().collect();
        sorted_tokens.sort();
        index.sorted_tokens = sorted_tokens;

        debug!(
            records = index.records.len(),
            tokens = index.token_index.len(),
            prefixes = index.prefix_index.len(),
            classes = index.suffix_index.len(),
            "Built search index"
        );
        index
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Look up a record by id.
    pub fn get(&self, id: &str) -> Option<&FormularyRecord> {
        self.by_id.get(id).map(|slot| &self.records[*slot as usize])
    }

    /// All records in load order.
    pub fn records(&self) -> &[FormularyRecord] {
        &self.records
    }

    /// Ranked search. Multi-term queries match records hitting any term.
    pub fn search(&self, query: &str, options: &SearchOptions) -> Vec<SearchHit> {
        let terms = query_terms(query);
        let limit = options.limit.unwrap_or(self.config.default_limit);
        if terms.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut allowed: HashMap<u32, bool> = HashMap::new();
        let mut passes = |slot: u32| {
            *allowed
                .entry(slot)
                .or_insert_with(|| options.matches(&self.records[slot as usize]))
        };

        let mut board = ScoreBoard::default();
        for term in &terms {
            let mut counted: HashSet<u32> = HashSet::new();

            if let Some(postings) = self.token_index.get(term) {
                for &slot in postings {
                    if passes(slot) && counted.insert(slot) {
                        board.add(slot, scoring::EXACT_TOKEN);
                    }
                }
            }

            for slot in self.prefix_candidates(term) {
                if passes(slot) && counted.insert(slot) {
                    board.add(slot, scoring::PREFIX);
                }
            }

            if let Some(stem) = suffix::as_class_suffix(term) {
                if let Some(postings) = self.suffix_index.get(stem) {
                    for &slot in postings {
                        if passes(slot) && counted.insert(slot) {
                            board.add(slot, scoring::CLASS_SUFFIX);
                        }
                    }
                }
            }
        }

        if board.is_empty() {
            for term in &terms {
                for slot in self.typo_candidates(term) {
                    if passes(slot) {
                        board.add(slot, scoring::TYPO);
                    }
                }
            }
        }

        let mut hits: Vec<SearchHit> = board
            .finish(&self.records)
            .into_iter()
            .map(|(slot, score)| SearchHit {
                record: self.records[slot as usize].clone(),
                score,
                origin: HitOrigin::Formulary,
            })
            .collect();
        hits.sort_by(scoring::compare_hits);
        hits.truncate(limit);
        hits
    }

    /// Records with a token that starts with `term` but is not equal to it.
    fn prefix_candidates(&self, term: &str) -> BTreeSet<u32> {
        let mut candidates = BTreeSet::new();

        if term.chars().count() >= PREFIX_LEN {
            let key: String = term.chars().take(PREFIX_LEN).collect();
            if let Some(postings) = self.prefix_index.get(&key) {
                for &slot in postings {
                    let has_prefix = self.record_tokens[slot as usize]
                        .iter()
                        .any(|token| token.len() > term.len() && token.starts_with(term));
                    if has_prefix {
                        candidates.insert(slot);
                    }
                }
            }
            return candidates;
        }

        let start = self.sorted_tokens.partition_point(|token| token.as_str() < term);
        for token in self.sorted_tokens[start..]
            .iter()
            .take(self.config.short_query_scan_cap)
            .take_while(|token| token.starts_with(term))
        {
            if token == term {
                continue;
            }
            if let Some(postings) = self.token_index.get(token) {
                candidates.extend(postings.iter().copied());
            }
        }
        candidates
    }

    /// Records with a token similar to `term`. Only tokens sharing the
    /// term's first letter are compared, at most `typo_scan_cap` of them.
    fn typo_candidates(&self, term: &str) -> BTreeSet<u32> {
        let mut candidates = BTreeSet::new();
        let Some(first) = term.chars().next() else {
            return candidates;
        };
        if term.chars().count() < 4 {
            return candidates;
        }

        let lead = first.to_string();
        let start = self
            .sorted_tokens
            .partition_point(|token| token.as_str() < lead.as_str());
        for token in self.sorted_tokens[start..]
            .iter()
            .take_while(|token| token.starts_with(first))
            .take(self.config.typo_scan_cap)
        {
            if strsim::jaro_winkler(term, token) >= self.config.typo_threshold {
                if let Some(postings) = self.token_index.get(token) {
                    candidates.extend(postings.iter().copied());
                }
            }
        }
        candidates
    }
}

/// Deduplicated query terms in query order.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(query)
        .into_iter()
        .filter(|term| seen.insert(term.clone()))
        .collect()
}

fn record_text_tokens(record: &FormularyRecord) -> Vec<String> {
    let mut seen = HashSet::new();
    [&record.name, &record.base_name, &record.active_ingredient]
        .into_iter()
        .flat_map(|field| tokenize(field))
        .filter(|token| seen.insert(token.clone()))
        .collect()
}

/// Lowercased ATC prefixes at each classification level plus the full code.
fn atc_tokens(code: &str) -> Vec<String> {
    let code = code.trim().to_lowercase();
    if code.is_empty() {
        return Vec::new();
    }

    let mut tokens: Vec<String> = ATC_LEVELS
        .iter()
        .filter(|len| code.chars().count() >= **len)
        .map(|len| code.chars().take(*len).collect())
        .collect();
    if !tokens.contains(&code) {
        tokens.push(code);
    }
    tokens
}

fn push_posting(index: &mut HashMap<String, Vec<u32>>, key: String, slot: u32) {
    let postings = index.entry(key).or_default();
    if postings.last() != Some(&slot) {
        postings.push(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SearchIndex {
        SearchIndex::build(
            vec![
                FormularyRecord::new("1", "Crestor 10 mg filmtabletta")
                    .with_base_name("Crestor")
                    .with_ingredient("rosuvastatin")
                    .with_atc("C10AA07")
                    .with_route("oral")
                    .prescription_only(true)
                    .marketed(true),
                FormularyRecord::new("2", "Crestorvit")
                    .with_ingredient("rosuvastatin")
                    .marketed(true),
                FormularyRecord::new("3", "Atorvastatin Teva")
                    .with_ingredient("atorvastatin")
                    .with_atc("C10AA05")
                    .marketed(false),
                FormularyRecord::new("4", "Atorvastatin Sandoz")
                    .with_ingredient("atorvastatin")
                    .with_atc("C10AA05")
                    .marketed(true),
                FormularyRecord::new("5", "Omeprazol 20 mg").with_ingredient("omeprazole"),
            ],
            SearchConfig::default(),
        )
    }

    fn ids(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|hit| hit.record.id.as_str()).collect()
    }

    #[test]
    fn test_exact_token_outranks_prefix() {
        let index = sample();
        let hits = index.search("crestor", &SearchOptions::default());

        assert_eq!(ids(&hits), vec!["1", "2"]);
        assert_eq!(hits[0].score, scoring::EXACT_TOKEN + scoring::MARKETED + scoring::HAS_INGREDIENT);
        assert_eq!(hits[1].score, scoring::PREFIX + scoring::MARKETED + scoring::HAS_INGREDIENT);
    }

    #[test]
    fn test_marketed_outranks_not_marketed() {
        let index = sample();
        let hits = index.search("atorvastatin", &SearchOptions::default());

        assert_eq!(ids(&hits), vec!["4", "3"]);
        assert_eq!(hits[0].score - hits[1].score, scoring::MARKETED);
    }

    #[test]
    fn test_short_query_scans_sorted_tokens() {
        let index = sample();
        let hits = index.search("cr", &SearchOptions::default());

        assert_eq!(ids(&hits), vec!["1", "2"]);
    }

    #[test]
    fn test_class_stem_query() {
        let index = sample();
        let hits = index.search("statin", &SearchOptions::default());

        assert_eq!(hits.len(), 4);
        assert!(hits.iter().all(|hit| hit.score >= scoring::CLASS_SUFFIX));
    }

    #[test]
    fn test_atc_prefix_tokens() {
        let index = sample();

        assert_eq!(index.search("C10AA07", &SearchOptions::default()).len(), 1);
        assert_eq!(index.search("c10", &SearchOptions::default()).len(), 3);
    }

    #[test]
    fn test_filters_apply_before_scoring() {
        let index = sample();

        let options = SearchOptions {
            market: MarketFilter::NotMarketed,
            ..SearchOptions::default()
        };
        assert_eq!(ids(&index.search("atorvastatin", &options)), vec!["3"]);

        let options = SearchOptions {
            route: Some("ORAL".to_string()),
            prescription_only: Some(true),
            ..SearchOptions::default()
        };
        assert_eq!(ids(&index.search("rosuvastatin", &options)), vec!["1"]);

        let options = SearchOptions {
            atc_prefix: Some("c10aa05".to_string()),
            ..SearchOptions::default()
        };
        assert_eq!(index.search("statin", &options).len(), 2);
    }

    #[test]
    fn test_typo_fallback() {
        let index = sample();
        let hits = index.search("rosuvastatn", &SearchOptions::default());

        assert_eq!(ids(&hits), vec!["1", "2"]);
        assert!(hits.iter().all(|hit| hit.score >= scoring::TYPO));
    }

    #[test]
    fn test_typo_scan_starts_at_first_letter() {
        let index = SearchIndex::build(
            vec![
                FormularyRecord::new("1", "Abacavir").with_ingredient("abacavir"),
                FormularyRecord::new("2", "Amlodipin").with_ingredient("amlodipine"),
                FormularyRecord::new("3", "Atenolol").with_ingredient("atenolol"),
                FormularyRecord::new("4", "Rosuvastatin Krka").with_ingredient("rosuvastatin"),
            ],
            SearchConfig {
                typo_scan_cap: 2,
                ..SearchConfig::default()
            },
        );

        let hits = index.search("rosuvastatn", &SearchOptions::default());
        assert_eq!(ids(&hits), vec!["4"]);
        assert!(index.search("xosuvastatin", &SearchOptions::default()).is_empty());
    }

    #[test]
    fn test_limit_and_empty_query() {
        let index = sample();

        assert_eq!(index.search("statin", &SearchOptions::with_limit(2)).len(), 2);
        assert!(index.search("", &SearchOptions::default()).is_empty());
        assert!(index.search("x", &SearchOptions::default()).is_empty());
    }

    #[test]
    fn test_lookup_by_id() {
        let index = sample();

        assert_eq!(index.get("5").map(|r| r.name.as_str()), Some("Omeprazol 20 mg"));
        assert!(index.get("missing").is_none());
        assert_eq!(index.len(), 5);
    }
}
