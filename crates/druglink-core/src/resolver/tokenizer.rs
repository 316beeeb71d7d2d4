//! Language-agnostic text normalization.
//!
//! Every index key, translation key and comparison in the crate goes through
//! [`normalize`] or [`tokenize`], so both must stay pure and deterministic.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Tokens shorter than this are dropped by [`tokenize`].
pub const MIN_TOKEN_CHARS: usize = 2;

/// Accented vowels of the formulary's local language (Hungarian).
const LOCAL_DIACRITICS: &[char] = &[
    'á', 'é', 'í', 'ó', 'ö', 'ő', 'ú', 'ü', 'ű', 'Á', 'É', 'Í', 'Ó', 'Ö', 'Ő', 'Ú', 'Ü', 'Ű',
];

/// Lowercase, strip diacritics and collapse whitespace.
pub fn normalize(text: &str) -> String {
    // Lowercase first: some lowercase mappings introduce combining marks.
    let lowered = text.to_lowercase();
    let stripped: String = lowered.nfd().filter(|c| !is_combining_mark(*c)).collect();
    collapse_whitespace(&stripped)
}

/// Normalize, split on anything that is not alphanumeric, drop short tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    normalize(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_string)
        .collect()
}

/// Trim and collapse internal whitespace, preserving case.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether the text carries local-language accented vowels.
///
/// Text without them is assumed to already be in international nomenclature.
pub fn has_local_diacritics(text: &str) -> bool {
    text.chars().any(|c| LOCAL_DIACRITICS.contains(&c))
}

/// Strip strength and form text from a product name, leaving the brand part.
///
/// Cuts at the first word that starts with a digit: `"Crestor 10 mg filmtabletta"`
/// becomes `"Crestor"`. A name that starts with a digit is returned collapsed but
/// otherwise unchanged.
pub fn strip_strength(name: &str) -> String {
    let words: Vec<&str> = name.split_whitespace().collect();
    let cut = words
        .iter()
        .position(|w| w.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .unwrap_or(words.len());

    if cut == 0 {
        return words.join(" ");
    }

    words[..cut]
        .join(" ")
        .trim_end_matches(|c: char| matches!(c, ',' | '-' | '/'))
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_strips_hungarian_diacritics() {
        assert_eq!(normalize("Rozuvasztatin-KALCIUM"), "rozuvasztatin-kalcium");
        assert_eq!(normalize("  Hidroklorotiazid   és  Ramipril "), "hidroklorotiazid es ramipril");
        assert_eq!(normalize("Ősz ÉS Űr"), "osz es ur");
    }

    #[test]
    fn test_normalize_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   \t\n "), "");
    }

    #[test]
    fn test_tokenize_drops_punctuation_and_short_tokens() {
        assert_eq!(
            tokenize("Tritace HCT 5 mg/25 mg, tabletta"),
            vec!["tritace", "hct", "mg", "25", "mg", "tabletta"]
        );
        assert!(tokenize("").is_empty());
        assert!(tokenize("a / b").is_empty());
    }

    #[test]
    fn test_has_local_diacritics() {
        assert!(has_local_diacritics("rozuvasztatin-kalcium és ezetimib"));
        assert!(has_local_diacritics("ŐSZ"));
        assert!(!has_local_diacritics("rosuvastatin"));
        assert!(!has_local_diacritics("señor"));
    }

    #[test]
    fn test_strip_strength() {
        assert_eq!(strip_strength("Crestor 10 mg filmtabletta"), "Crestor");
        assert_eq!(strip_strength("Tritace HCT 5 mg/25 mg tabletta"), "Tritace HCT");
        assert_eq!(strip_strength("Algopyrin"), "Algopyrin");
        assert_eq!(strip_strength("5-FU medac"), "5-FU medac");
        assert_eq!(strip_strength(""), "");
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(input in "[a-zA-Z0-9áéíóöőúüűÁÉÍÓÖŐÚÜŰçñ ,.+/-]{0,48}") {
            let once = normalize(&input);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn prop_tokens_are_normalized_and_long_enough(input in "[a-zA-Z0-9À-žΑ-ωА-я ,./-]{0,32}") {
            for token in tokenize(&input) {
                prop_assert!(token.chars().count() >= MIN_TOKEN_CHARS);
                prop_assert_eq!(normalize(&token), token.clone());
            }
        }
    }
}
