//! Drug-class suffix vocabulary.
//!
//! Many INNs share a stem naming their pharmacological class ("-statin",
//! "-sartan", ...). Searching for the bare stem finds every member of the class.

/// Class stems, matched against normalized tokens.
pub const DRUG_CLASS_SUFFIXES: &[&str] = &[
    "statin", "pril", "sartan", "mab", "olol", "prazole", "cillin", "floxacin", "mycin",
    "cycline", "dipine", "gliptin", "gliflozin", "parin", "xaban", "tinib", "vir", "azole",
    "setron", "triptan", "lukast", "dronate", "oxetine", "afil", "semide", "thiazide",
    "zepam", "zolam", "barbital",
];

/// A token needs this many characters in front of the stem to count as a class member.
pub const MIN_STEM_PREFIX: usize = 3;

/// Every class stem the token belongs to.
pub fn class_suffixes(token: &str) -> impl Iterator<Item = &'static str> + '_ {
    let len = token.chars().count();
    DRUG_CLASS_SUFFIXES.iter().copied().filter(move |suffix| {
        token.ends_with(suffix) && len >= suffix.chars().count() + MIN_STEM_PREFIX
    })
}

/// Whether a query term names a class stem.
pub fn as_class_suffix(term: &str) -> Option<&'static str> {
    DRUG_CLASS_SUFFIXES.iter().copied().find(|suffix| *suffix == term)
}
