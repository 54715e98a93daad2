//! Custom vocabulary, adaptive learning, and the domain lexicon.
//!
//! The store owns the canonical terms and their recognized variations,
//! applies whole-word case-preserving corrections to transcriptions, and
//! learns new terms from repeated user corrections. A secondary conservative
//! fuzzy pass consults a drug-name lexicon through a double-metaphone index.
//!
//! Correction order is deterministic: terms apply in normalized-canonical
//! order (BTreeMap iteration), and all replacements for one term complete
//! before the next begins.

pub mod api;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::phonetics::double_metaphone_codes;

/// Fuzzy-pass acceptance gates. Conservative by construction.
const FUZZY_MIN_SIMILARITY: f64 = 0.92;
const FUZZY_MAX_LEN_DIFF: usize = 3;
/// Repetitions of the same (observed, canonical) pair before promotion.
const PROMOTION_THRESHOLD: u64 = 2;
const SUGGESTION_CUTOFF: f64 = 0.6;

#[derive(Debug, Error)]
pub enum VocabularyError {
    #[error("vocabulary I/O failure: {0}")]
    Io(String),
    #[error("vocabulary schema mismatch: {0}")]
    Schema(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabularyTerm {
    pub canonical: String,
    pub variations: Vec<String>,
    pub category: String,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub added_date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub original: String,
    pub corrected: String,
    #[serde(default)]
    pub context: String,
    pub timestamp: String,
    pub confidence: f64,
}

/// One applied replacement, returned for observability.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AppliedCorrection {
    pub original: String,
    pub corrected: String,
    pub position: usize,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct VocabularyFile {
    #[serde(default)]
    terms: BTreeMap<String, VocabularyTerm>,
    #[serde(default)]
    patterns: HashMap<String, u64>,
    #[serde(default)]
    last_updated: String,
}

/// Domain lexicon: canonical drug names plus a phonetic index.
#[derive(Default)]
struct Lexicon {
    /// normalized form -> canonical (original casing)
    canonical: BTreeMap<String, String>,
    /// metaphone code -> canonicals sharing it
    metaphone_index: HashMap<String, Vec<String>>,
}

impl Lexicon {
    fn load(path: &Path) -> Self {
        #[derive(Deserialize)]
        struct LexiconFile {
            #[serde(default)]
            terms: Vec<String>,
        }

        let mut lexicon = Lexicon::default();
        let Ok(contents) = std::fs::read_to_string(path) else {
            return lexicon; // absent lexicon just disables the fuzzy pass
        };
        match serde_json::from_str::<LexiconFile>(&contents) {
            Ok(file) => {
                for term in file.terms {
                    lexicon.insert(term);
                }
                info!(terms = lexicon.canonical.len(), "Domain lexicon loaded");
            }
            Err(e) => warn!("Lexicon parse failed ({}): fuzzy pass disabled", e),
        }
        lexicon
    }

    fn insert(&mut self, term: String) {
        let norm = normalize(&term);
        if norm.is_empty() || self.canonical.contains_key(&norm) {
            return;
        }
        for code in double_metaphone_codes(&term) {
            self.metaphone_index
                .entry(code)
                .or_default()
                .push(term.clone());
        }
        self.canonical.insert(norm, term);
    }

    fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }
}

fn normalize(term: &str) -> String {
    term.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&a.to_lowercase(), &b.to_lowercase())
}

/// Map the matched text's case pattern onto the replacement.
fn preserve_case(original: &str, replacement: &str) -> String {
    let letters: Vec<char> = original.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.is_empty() {
        return replacement.to_string();
    }
    if letters.iter().all(|c| c.is_uppercase()) {
        return replacement.to_uppercase();
    }
    if letters.iter().all(|c| c.is_lowercase()) {
        return replacement.to_lowercase();
    }
    if is_title_case(original) {
        return title_case(replacement);
    }
    replacement.to_string()
}

fn is_title_case(text: &str) -> bool {
    text.split_whitespace().all(|word| {
        let mut chars = word.chars().filter(|c| c.is_alphabetic());
        match chars.next() {
            Some(first) => first.is_uppercase() && chars.all(|c| c.is_lowercase()),
            None => true,
        }
    })
}

fn title_case(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whole-word, case-insensitive matcher for a variation.
fn word_regex(variation: &str) -> Option<Regex> {
    RegexBuilder::new(&format!(r"\b{}\b", regex::escape(variation)))
        .case_insensitive(true)
        .build()
        .ok()
}

fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub struct VocabularyStore {
    data_dir: PathBuf,
    terms: BTreeMap<String, VocabularyTerm>,
    patterns: HashMap<String, u64>,
    corrections: Vec<CorrectionRecord>,
    lexicon: Lexicon,
}

impl VocabularyStore {
    /// Load from the data directory. Any failure falls back to in-memory
    /// defaults; the correction stage is never the reason the pipeline dies.
    pub fn load(data_dir: &Path) -> Self {
        let vocabulary_path = data_dir.join("user_vocabulary.json");
        let corrections_path = data_dir.join("corrections_log.json");

        let file: VocabularyFile = std::fs::read_to_string(&vocabulary_path)
            .ok()
            .and_then(|contents| match serde_json::from_str(&contents) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!("Vocabulary schema mismatch ({}): starting empty", e);
                    None
                }
            })
            .unwrap_or_default();

        let corrections: Vec<CorrectionRecord> = std::fs::read_to_string(&corrections_path)
            .ok()
            .and_then(|contents| serde_json::from_str(&contents).ok())
            .unwrap_or_default();

        let lexicon = Lexicon::load(&data_dir.join("medical_lexicon.json"));

        info!(
            terms = file.terms.len(),
            corrections = corrections.len(),
            "Vocabulary store loaded"
        );
        Self {
            data_dir: data_dir.to_path_buf(),
            terms: file.terms,
            patterns: file.patterns,
            corrections,
            lexicon,
        }
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        Self {
            data_dir: std::env::temp_dir().join(format!(
                "scribe-vocab-{}-{}",
                std::process::id(),
                NEXT.fetch_add(1, Ordering::Relaxed)
            )),
            terms: BTreeMap::new(),
            patterns: HashMap::new(),
            corrections: Vec::new(),
            lexicon: Lexicon::default(),
        }
    }

    #[cfg(test)]
    pub fn load_lexicon_terms(&mut self, terms: Vec<&str>) {
        for term in terms {
            self.lexicon.insert(term.to_string());
        }
    }

    fn save_vocabulary(&self) {
        let file = VocabularyFile {
            terms: self.terms.clone(),
            patterns: self.patterns.clone(),
            last_updated: now_stamp(),
        };
        self.write_json("user_vocabulary.json", &file);
    }

    fn save_corrections(&self) {
        self.write_json("corrections_log.json", &self.corrections);
    }

    fn write_json<S: Serialize>(&self, name: &str, value: &S) {
        if let Err(e) = std::fs::create_dir_all(&self.data_dir) {
            warn!("Vocabulary dir create failed: {}", e);
            return;
        }
        match serde_json::to_string_pretty(value) {
            Ok(json) => {
                if let Err(e) = std::fs::write(self.data_dir.join(name), json) {
                    warn!("Vocabulary save failed ({name}): {}", e);
                }
            }
            Err(e) => warn!("Vocabulary serialize failed ({name}): {}", e),
        }
    }

    // ── terms ────────────────────────────────────────────────────────

    /// Key is the normalized canonical form; one entry per canonical.
    pub fn term_key(canonical: &str) -> String {
        normalize(canonical)
    }

    pub fn add_term(&mut self, canonical: &str, variations: Vec<String>, category: &str) {
        let canonical = canonical.trim().to_string();
        if canonical.is_empty() {
            return;
        }
        let mut variations: Vec<String> = variations
            .into_iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        if !variations
            .iter()
            .any(|v| v.eq_ignore_ascii_case(&canonical))
        {
            variations.insert(0, canonical.clone());
        }
        let key = Self::term_key(&canonical);
        self.terms.insert(
            key,
            VocabularyTerm {
                canonical,
                variations,
                category: category.to_string(),
                usage_count: 0,
                added_date: now_stamp(),
            },
        );
        self.save_vocabulary();
    }

    pub fn terms(&self) -> &BTreeMap<String, VocabularyTerm> {
        &self.terms
    }

    pub fn delete_term(&mut self, key: &str) -> Option<VocabularyTerm> {
        let removed = self.terms.remove(key);
        if removed.is_some() {
            self.save_vocabulary();
        }
        removed
    }

    pub fn clear(&mut self) -> usize {
        let count = self.terms.len();
        self.terms.clear();
        self.patterns.clear();
        self.save_vocabulary();
        count
    }

    // ── correction ───────────────────────────────────────────────────

    /// Apply all vocabulary corrections to `text`: the custom-term pass, then
    /// the lexicon fuzzy pass. Deterministic for a fixed store snapshot.
    pub fn apply_corrections(&mut self, text: &str) -> (String, Vec<AppliedCorrection>) {
        let mut corrected = text.to_string();
        let mut applied = Vec::new();

        // Snapshot of keys keeps iteration stable while usage counts mutate.
        let keys: Vec<String> = self.terms.keys().cloned().collect();
        for key in keys {
            let (canonical, variations, category) = {
                let term = &self.terms[&key];
                (
                    term.canonical.clone(),
                    term.variations.clone(),
                    term.category.clone(),
                )
            };
            let mut hits: u64 = 0;
            for variation in &variations {
                let Some(re) = word_regex(variation) else {
                    continue;
                };
                corrected =
                    replace_all_tracked(&re, &corrected, &canonical, &category, &mut applied, &mut hits);
            }
            if hits > 0 {
                if let Some(term) = self.terms.get_mut(&key) {
                    term.usage_count += hits;
                }
            }
        }

        let (corrected, lexicon_applied) = self.apply_lexicon_corrections(&corrected);
        applied.extend(lexicon_applied);

        if !applied.is_empty() {
            self.save_vocabulary();
        }
        (corrected, applied)
    }

    /// Conservative fuzzy pass over the domain lexicon: exact n-gram matches
    /// first, then metaphone candidates gated by first letter, length, and
    /// string similarity.
    fn apply_lexicon_corrections(&self, text: &str) -> (String, Vec<AppliedCorrection>) {
        if self.lexicon.is_empty() {
            return (text.to_string(), Vec::new());
        }

        let token_re = Regex::new(r"[A-Za-z][A-Za-z\-']*").expect("token regex");
        let tokens: Vec<(usize, usize)> = token_re
            .find_iter(text)
            .map(|m| (m.start(), m.end()))
            .collect();

        let mut replacements: Vec<(usize, usize, String, String)> = Vec::new();
        let max_ngram = 3usize;

        let mut i = 0;
        while i < tokens.len() {
            let mut best: Option<(usize, usize, String, usize)> = None;
            for n in (1..=max_ngram).rev() {
                if i + n > tokens.len() {
                    continue;
                }
                let start = tokens[i].0;
                let end = tokens[i + n - 1].1;
                let original = &text[start..end];
                let norm = normalize(original);

                if let Some(canonical) = self.lexicon.canonical.get(&norm) {
                    best = Some((start, end, canonical.clone(), n));
                    break;
                }

                if n == 1 {
                    if let Some(candidate) = self.fuzzy_candidate(original) {
                        best = Some((start, end, candidate, 1));
                        break;
                    }
                }
            }
            match best {
                Some((start, end, canonical, n)) => {
                    let original = &text[start..end];
                    if !original.eq_ignore_ascii_case(&canonical) {
                        let replacement = preserve_case(original, &canonical);
                        replacements.push((start, end, original.to_string(), replacement));
                    }
                    // Skip past the consumed n-gram so replacements never overlap.
                    i += n;
                }
                None => i += 1,
            }
        }

        if replacements.is_empty() {
            return (text.to_string(), Vec::new());
        }

        let mut out = text.to_string();
        let mut applied = Vec::new();
        for (start, end, original, replacement) in replacements.iter().rev() {
            out.replace_range(start..end, replacement);
            applied.push(AppliedCorrection {
                original: original.clone(),
                corrected: replacement.clone(),
                position: *start,
                category: "medication".to_string(),
            });
        }
        applied.reverse();
        (out, applied)
    }

    fn fuzzy_candidate(&self, original: &str) -> Option<String> {
        let first = original.chars().next()?.to_lowercase().next()?;
        let mut seen = Vec::new();
        for code in double_metaphone_codes(original) {
            if let Some(candidates) = self.lexicon.metaphone_index.get(&code) {
                for candidate in candidates {
                    if seen.contains(candidate) {
                        continue;
                    }
                    seen.push(candidate.clone());
                    let candidate_first = candidate.chars().next()?.to_lowercase().next()?;
                    if candidate_first != first {
                        continue;
                    }
                    if candidate.len().abs_diff(original.len()) > FUZZY_MAX_LEN_DIFF {
                        continue;
                    }
                    if similarity(original, candidate) >= FUZZY_MIN_SIMILARITY {
                        return Some(candidate.clone());
                    }
                }
            }
        }
        None
    }

    // ── learning ─────────────────────────────────────────────────────

    /// Record a user correction; the second occurrence of the same pair
    /// promotes it to a vocabulary term.
    pub fn learn_from_correction(&mut self, original: &str, corrected: &str, context: &str) -> bool {
        let original = original.trim();
        let corrected = corrected.trim();
        if original.is_empty() || original == corrected {
            return false;
        }

        self.corrections.push(CorrectionRecord {
            original: original.to_string(),
            corrected: corrected.to_string(),
            context: context.to_string(),
            timestamp: now_stamp(),
            confidence: similarity(original, corrected),
        });

        let pattern = format!("{} -> {}", original.to_lowercase(), corrected.to_lowercase());
        let count = self.patterns.entry(pattern.clone()).or_insert(0);
        *count += 1;
        let count = *count;

        if count >= PROMOTION_THRESHOLD {
            self.promote(original, corrected);
        }

        self.save_corrections();
        self.save_vocabulary();
        info!(original, corrected, count, "Learned correction");
        true
    }

    fn promote(&mut self, original: &str, corrected: &str) {
        let existing_key = self
            .terms
            .iter()
            .find(|(_, term)| term.canonical.eq_ignore_ascii_case(corrected))
            .map(|(key, _)| key.clone());

        match existing_key {
            Some(key) => {
                let term = self.terms.get_mut(&key).expect("key from iteration");
                if !term
                    .variations
                    .iter()
                    .any(|v| v.eq_ignore_ascii_case(original))
                {
                    term.variations.push(original.to_string());
                }
            }
            None => {
                let category = categorize(corrected);
                self.add_term(corrected, vec![original.to_string()], category);
            }
        }
    }

    /// Suggest canonical terms close to words of `text`.
    pub fn suggest(&self, text: &str, max_suggestions: usize) -> Vec<serde_json::Value> {
        let mut suggestions = Vec::new();
        for word in text.split_whitespace() {
            for term in self.terms.values() {
                let confidence = similarity(word, &term.canonical);
                if confidence >= SUGGESTION_CUTOFF && !word.eq_ignore_ascii_case(&term.canonical) {
                    suggestions.push((
                        confidence,
                        term.usage_count,
                        serde_json::json!({
                            "original": word,
                            "suggested": term.canonical,
                            "confidence": confidence,
                            "category": term.category,
                            "usage_count": term.usage_count,
                        }),
                    ));
                }
            }
        }
        suggestions.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.1.cmp(&a.1))
        });
        suggestions
            .into_iter()
            .take(max_suggestions)
            .map(|(_, _, value)| value)
            .collect()
    }

    // ── stats / import / export ──────────────────────────────────────

    pub fn stats(&self) -> serde_json::Value {
        let mut categories: BTreeMap<&str, u64> = BTreeMap::new();
        let mut total_usage = 0u64;
        for term in self.terms.values() {
            *categories.entry(term.category.as_str()).or_insert(0) += 1;
            total_usage += term.usage_count;
        }
        serde_json::json!({
            "total_terms": self.terms.len(),
            "categories": categories,
            "total_corrections": self.corrections.len(),
            "total_usage": total_usage,
            "learning_patterns": self.patterns.len(),
        })
    }

    pub fn export(&self, filepath: &Path) -> Result<(), VocabularyError> {
        let payload = serde_json::json!({
            "vocabulary_export": {
                "terms": self.terms,
                "export_date": now_stamp(),
                "stats": self.stats(),
            }
        });
        let json = serde_json::to_string_pretty(&payload)
            .map_err(|e| VocabularyError::Schema(e.to_string()))?;
        std::fs::write(filepath, json).map_err(|e| VocabularyError::Io(e.to_string()))
    }

    /// Merge terms from an export file into the store.
    pub fn import(&mut self, filepath: &Path) -> Result<usize, VocabularyError> {
        let contents =
            std::fs::read_to_string(filepath).map_err(|e| VocabularyError::Io(e.to_string()))?;
        let value: serde_json::Value =
            serde_json::from_str(&contents).map_err(|e| VocabularyError::Schema(e.to_string()))?;
        let terms: BTreeMap<String, VocabularyTerm> =
            serde_json::from_value(value["vocabulary_export"]["terms"].clone())
                .map_err(|e| VocabularyError::Schema(e.to_string()))?;
        let count = terms.len();
        self.terms.extend(terms);
        self.save_vocabulary();
        Ok(count)
    }

    pub fn edit_term(
        &mut self,
        key: &str,
        category: Option<&str>,
        add_variations: &[String],
        remove_variations: &[String],
    ) -> Result<Vec<String>, VocabularyError> {
        let term = self
            .terms
            .get_mut(key)
            .ok_or_else(|| VocabularyError::Schema(format!("term not found: {key}")))?;

        let mut changes = Vec::new();
        if let Some(category) = category {
            if category != term.category {
                changes.push(format!(
                    "category changed from '{}' to '{}'",
                    term.category, category
                ));
                term.category = category.to_string();
            }
        }
        for variation in remove_variations {
            if let Some(pos) = term.variations.iter().position(|v| v == variation) {
                term.variations.remove(pos);
                changes.push(format!("removed variation '{variation}'"));
            }
        }
        for variation in add_variations {
            let variation = variation.trim();
            if !variation.is_empty()
                && !term
                    .variations
                    .iter()
                    .any(|v| v.eq_ignore_ascii_case(variation))
            {
                term.variations.push(variation.to_string());
                changes.push(format!("added variation '{variation}'"));
            }
        }
        if !changes.is_empty() {
            self.save_vocabulary();
        }
        Ok(changes)
    }
}

/// Replace whole-word matches, preserving case, recording actual changes.
fn replace_all_tracked(
    re: &Regex,
    text: &str,
    canonical: &str,
    category: &str,
    applied: &mut Vec<AppliedCorrection>,
    hits: &mut u64,
) -> String {
    let matches: Vec<(usize, usize, String)> = re
        .find_iter(text)
        .map(|m| (m.start(), m.end(), m.as_str().to_string()))
        .collect();
    if matches.is_empty() {
        return text.to_string();
    }

    let mut out = text.to_string();
    for (start, end, matched) in matches.iter().rev() {
        *hits += 1;
        let replacement = preserve_case(matched, canonical);
        if replacement != *matched {
            applied.push(AppliedCorrection {
                original: matched.clone(),
                corrected: replacement.clone(),
                position: *start,
                category: category.to_string(),
            });
        }
        out.replace_range(start..end, &replacement);
    }
    out
}

/// Guess a category for a promoted term from simple morphology.
fn categorize(term: &str) -> &'static str {
    let lower = term.to_lowercase();
    if ["mycin", "cillin", "phen", "zole", "pine"]
        .iter()
        .any(|s| lower.contains(s))
    {
        return "medication";
    }
    if ["Dr.", "Doctor", "Mr.", "Mrs.", "Ms.", "Prof.", "Professor"]
        .iter()
        .any(|p| term.starts_with(p))
    {
        return "names";
    }
    if [
        "itis", "osis", "emia", "pathy", "gram", "scopy", "monia", "thorax", "tension",
    ]
    .iter()
    .any(|s| lower.contains(s))
    {
        return "technical_terms";
    }
    "general"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_term() -> VocabularyStore {
        let mut store = VocabularyStore::in_memory();
        store.add_term(
            "pneumothorax",
            vec!["new motor ax".into(), "numo thorax".into()],
            "technical_terms",
        );
        store
    }

    #[test]
    fn variations_round_trip_to_canonical() {
        let mut store = store_with_term();
        for variation in ["new motor ax", "numo thorax", "pneumothorax"] {
            let (out, _) = store.apply_corrections(variation);
            assert_eq!(out, "pneumothorax");
        }
    }

    #[test]
    fn case_pattern_is_preserved() {
        let mut store = store_with_term();
        let (upper, _) = store.apply_corrections("NEW MOTOR AX");
        assert_eq!(upper, "PNEUMOTHORAX");
        let (lower, _) = store.apply_corrections("new motor ax");
        assert_eq!(lower, "pneumothorax");
        let (title, _) = store.apply_corrections("New Motor Ax");
        assert_eq!(title, "Pneumothorax");
    }

    #[test]
    fn matches_whole_words_only() {
        let mut store = VocabularyStore::in_memory();
        store.add_term("cat", vec!["kat".into()], "general");
        let (out, applied) = store.apply_corrections("the kat sat on katalog");
        assert_eq!(out, "the cat sat on katalog");
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].original, "kat");
        assert_eq!(applied[0].position, 4);
    }

    #[test]
    fn correction_is_idempotent() {
        let mut store = store_with_term();
        let input = "Patient has a new motor ax on the left side.";
        let (once, _) = store.apply_corrections(input);
        let (twice, _) = store.apply_corrections(&once);
        assert_eq!(once, twice);
        assert_eq!(once, "Patient has a pneumothorax on the left side.");
    }

    #[test]
    fn usage_counts_increment_on_match() {
        let mut store = store_with_term();
        let _ = store.apply_corrections("new motor ax and numo thorax");
        let term = &store.terms()[&VocabularyStore::term_key("pneumothorax")];
        assert_eq!(term.usage_count, 2);
    }

    #[test]
    fn second_identical_correction_promotes() {
        let mut store = VocabularyStore::in_memory();
        assert!(store.learn_from_correction("new motor ax", "pneumothorax", ""));
        // Not yet promoted after one occurrence.
        let (out, _) = store.apply_corrections("new motor ax");
        assert_eq!(out, "new motor ax");

        assert!(store.learn_from_correction("new motor ax", "pneumothorax", ""));
        let (out, _) = store.apply_corrections("patient has new motor ax");
        assert_eq!(out, "patient has pneumothorax");
        // Category inferred from morphology ("thorax").
        let term = &store.terms()[&VocabularyStore::term_key("pneumothorax")];
        assert_eq!(term.category, "technical_terms");
    }

    #[test]
    fn identical_pair_is_not_learned() {
        let mut store = VocabularyStore::in_memory();
        assert!(!store.learn_from_correction("same", "same", ""));
        assert!(!store.learn_from_correction(" ", "anything", ""));
    }

    #[test]
    fn fuzzy_pass_is_conservative() {
        let mut store = VocabularyStore::in_memory();
        store.load_lexicon_terms(vec!["Hydrochlorothiazide", "Metformin"]);
        // A single vowel slip in a long drug name passes every gate.
        let (out, applied) = store.apply_corrections("started on hydrochlorothiazade today");
        assert_eq!(out, "started on hydrochlorothiazide today");
        assert_eq!(applied[0].category, "medication");
        // A short word two edits away stays untouched (similarity gate).
        let (out, _) = store.apply_corrections("metformen");
        assert_eq!(out, "metformen");
        // Severe truncation never corrects (length gate).
        let (out, _) = store.apply_corrections("met");
        assert_eq!(out, "met");
    }

    #[test]
    fn lexicon_exact_match_is_a_no_op() {
        let mut store = VocabularyStore::in_memory();
        store.load_lexicon_terms(vec!["Metformin"]);
        let (out, applied) = store.apply_corrections("METFORMIN dose unchanged");
        assert_eq!(out, "METFORMIN dose unchanged");
        assert!(applied.is_empty());
    }

    #[test]
    fn deterministic_for_fixed_snapshot() {
        let input = "new motor ax with numo thorax twice";
        let run = |store: &mut VocabularyStore| store.apply_corrections(input);
        let (a, applied_a) = run(&mut store_with_term());
        let (b, applied_b) = run(&mut store_with_term());
        assert_eq!(a, b);
        assert_eq!(applied_a, applied_b);
    }

    #[test]
    fn suggestions_are_ranked_and_cut() {
        let mut store = VocabularyStore::in_memory();
        store.add_term("pneumothorax", vec![], "technical_terms");
        store.add_term("pneumonia", vec![], "technical_terms");
        let suggestions = store.suggest("pneumothoraks", 3);
        assert!(!suggestions.is_empty());
        assert_eq!(suggestions[0]["suggested"], "pneumothorax");
    }

    #[test]
    fn categorize_by_morphology() {
        assert_eq!(categorize("azithromycin"), "medication");
        assert_eq!(categorize("Dr. Gerrard"), "names");
        assert_eq!(categorize("appendicitis"), "technical_terms");
        assert_eq!(categorize("follow up"), "general");
    }

    #[test]
    fn edit_and_delete_terms() {
        let mut store = store_with_term();
        let key = VocabularyStore::term_key("pneumothorax");
        let changes = store
            .edit_term(&key, Some("medication"), &["pneumo".into()], &[])
            .unwrap();
        assert_eq!(changes.len(), 2);
        assert!(store.edit_term("missing", None, &[], &[]).is_err());
        assert!(store.delete_term(&key).is_some());
        assert!(store.delete_term(&key).is_none());
    }
}
