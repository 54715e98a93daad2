//! Filler-word filtering of transcribed text.
//!
//! Removes configured filler words ("um", "uh", ...) as whole words,
//! case-insensitively, then cleans up the comma and whitespace debris the
//! removal leaves behind.

use regex::{Regex, RegexBuilder};

pub struct FillerWordFilter {
    enabled: bool,
    pattern: Option<Regex>,
}

impl FillerWordFilter {
    pub fn new(enabled: bool, filler_words: &[String]) -> Self {
        let words: Vec<String> = filler_words
            .iter()
            .map(|w| w.trim())
            .filter(|w| !w.is_empty())
            .map(regex::escape)
            .collect();
        let pattern = if words.is_empty() {
            None
        } else {
            RegexBuilder::new(&format!(r"\b(?:{})\b", words.join("|")))
                .case_insensitive(true)
                .build()
                .ok()
        };
        Self { enabled, pattern }
    }

    pub fn clean(&self, text: &str) -> String {
        if !self.enabled || text.is_empty() {
            return text.to_string();
        }
        let Some(pattern) = &self.pattern else {
            return text.to_string();
        };

        let mut result = pattern.replace_all(text, "").into_owned();

        // Orphaned punctuation left by removed words.
        result = Regex::new(r",\s*,")
            .unwrap()
            .replace_all(&result, ",")
            .into_owned();
        result = Regex::new(r"^\s*,\s*")
            .unwrap()
            .replace_all(&result, "")
            .into_owned();
        result = Regex::new(r",\s*([.!?])")
            .unwrap()
            .replace_all(&result, "$1")
            .into_owned();
        result = Regex::new(r"\s*,\s*$")
            .unwrap()
            .replace_all(&result, "")
            .into_owned();
        result = Regex::new(r"\s+")
            .unwrap()
            .replace_all(&result, " ")
            .into_owned();

        result.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(words: &[&str]) -> FillerWordFilter {
        let words: Vec<String> = words.iter().map(|s| s.to_string()).collect();
        FillerWordFilter::new(true, &words)
    }

    #[test]
    fn removes_fillers_and_tidies_punctuation() {
        let f = filter(&["um", "uh"]);
        assert_eq!(
            f.clean("Um, the patient reports, uh, headaches."),
            "the patient reports, headaches."
        );
        assert_eq!(f.clean("so, uh."), "so.");
    }

    #[test]
    fn whole_words_only() {
        let f = filter(&["um"]);
        assert_eq!(f.clean("the umbrella is um here"), "the umbrella is here");
    }

    #[test]
    fn disabled_filter_passes_through() {
        let f = FillerWordFilter::new(false, &["um".to_string()]);
        assert_eq!(f.clean("um yes"), "um yes");
    }

    #[test]
    fn empty_word_list_passes_through() {
        let f = FillerWordFilter::new(true, &[]);
        assert_eq!(f.clean("um yes"), "um yes");
    }
}
