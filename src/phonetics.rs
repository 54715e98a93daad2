//! Double-metaphone helpers shared by the wake-word table and the lexicon
//! fuzzy index.

use rphonetic::DoubleMetaphone;

/// Phonetic codes for a term: primary code plus the alternate when distinct.
/// Empty codes (non-alphabetic input) are omitted.
pub fn double_metaphone_codes(term: &str) -> Vec<String> {
    let encoder = DoubleMetaphone::default();
    let result = encoder.double_metaphone(term);
    let primary = result.primary().to_string();
    let alternate = result.alternate().to_string();

    let mut codes = Vec::with_capacity(2);
    if !primary.is_empty() {
        codes.push(primary);
    }
    if !alternate.is_empty() && codes.first() != Some(&alternate) {
        codes.push(alternate);
    }
    codes
}

/// Primary code only, for keys where one code is enough.
pub fn primary_code(term: &str) -> Option<String> {
    double_metaphone_codes(term).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_for_equal_sounding_words() {
        // "note" and "noat" should collide phonetically.
        assert_eq!(primary_code("note"), primary_code("noat"));
    }

    #[test]
    fn distinct_words_get_distinct_codes() {
        assert_ne!(primary_code("letter"), primary_code("proofread"));
    }

    #[test]
    fn empty_input_yields_no_codes() {
        assert!(double_metaphone_codes("").is_empty());
    }
}
