//! Vocabulary command API for the UI.
//!
//! Handles the `VOCABULARY_API:<id>:{"command": ..., "data": ...}` surface.
//! Every command returns a `{"success": ...}` JSON object; malformed payloads
//! produce a failure response, never a crash.

use serde_json::{json, Value};

use crate::config::paths::vocabulary_templates_dir;

use super::VocabularyStore;

fn str_arg(data: &Value, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn list_arg(data: &Value, key: &str) -> Vec<String> {
    data.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn failure(message: impl Into<String>) -> Value {
    json!({ "success": false, "error": message.into() })
}

/// Dispatch one vocabulary command against the store.
pub fn handle_command(store: &mut VocabularyStore, command: &str, data: &Value) -> Value {
    match command {
        "add_term" => {
            let term = str_arg(data, "correct_term");
            if term.is_empty() {
                return failure("correct_term is required");
            }
            let variations = list_arg(data, "variations");
            let category = data
                .get("category")
                .and_then(Value::as_str)
                .unwrap_or("general");
            let count = variations.len();
            store.add_term(&term, variations, category);
            json!({
                "success": true,
                "message": format!("Added term '{term}' with {count} variations"),
            })
        }

        "get_list" => {
            let search = str_arg(data, "search").to_lowercase();
            let category = str_arg(data, "category");
            let mut terms: Vec<Value> = store
                .terms()
                .iter()
                .filter(|(_, term)| {
                    (search.is_empty() || term.canonical.to_lowercase().contains(&search))
                        && (category.is_empty() || term.category == category)
                })
                .map(|(key, term)| {
                    json!({
                        "key": key,
                        "correct": term.canonical,
                        "variations": term.variations,
                        "category": term.category,
                        "usage_count": term.usage_count,
                        "added_date": term.added_date,
                    })
                })
                .collect();
            // Most used first, then alphabetical.
            terms.sort_by(|a, b| {
                let usage_a = a["usage_count"].as_u64().unwrap_or(0);
                let usage_b = b["usage_count"].as_u64().unwrap_or(0);
                usage_b.cmp(&usage_a).then_with(|| {
                    a["correct"]
                        .as_str()
                        .unwrap_or("")
                        .to_lowercase()
                        .cmp(&b["correct"].as_str().unwrap_or("").to_lowercase())
                })
            });
            json!({
                "success": true,
                "total_count": terms.len(),
                "terms": terms,
            })
        }

        "get_stats" => json!({ "success": true, "stats": store.stats() }),

        "edit_term" => {
            let key = str_arg(data, "term_key");
            let category = data.get("category").and_then(Value::as_str);
            let add = list_arg(data, "additional_variations");
            let remove = list_arg(data, "remove_variations");
            match store.edit_term(&key, category, &add, &remove) {
                Ok(changes) if changes.is_empty() => {
                    json!({ "success": true, "message": "No changes made" })
                }
                Ok(changes) => json!({
                    "success": true,
                    "message": format!("Updated term: {}", changes.join("; ")),
                }),
                Err(e) => failure(e.to_string()),
            }
        }

        "delete_term" => {
            let key = str_arg(data, "term_key");
            match store.delete_term(&key) {
                Some(term) => json!({
                    "success": true,
                    "message": format!("Deleted term '{}'", term.canonical),
                }),
                None => failure("Term not found"),
            }
        }

        "import_template" => {
            let name = str_arg(data, "template_name");
            if name.is_empty() {
                return failure("template_name is required");
            }
            let path = vocabulary_templates_dir().join(format!("{name}.json"));
            match store.import(&path) {
                Ok(count) => json!({
                    "success": true,
                    "message": format!("Imported {count} terms from '{name}'"),
                }),
                Err(e) => failure(e.to_string()),
            }
        }

        "export" => {
            let filepath = str_arg(data, "filepath");
            if filepath.is_empty() {
                return failure("filepath is required");
            }
            match store.export(std::path::Path::new(&filepath)) {
                Ok(()) => json!({
                    "success": true,
                    "message": format!("Vocabulary exported to {filepath}"),
                }),
                Err(e) => failure(e.to_string()),
            }
        }

        "clear_all" => {
            let count = store.clear();
            json!({
                "success": true,
                "message": format!("Cleared {count} vocabulary terms"),
            })
        }

        "learn_correction" => {
            let original = str_arg(data, "original");
            let corrected = str_arg(data, "corrected");
            let context = str_arg(data, "context");
            if store.learn_from_correction(&original, &corrected, &context) {
                json!({
                    "success": true,
                    "message": format!("Learned correction: '{original}' -> '{corrected}'"),
                })
            } else {
                json!({
                    "success": true,
                    "message": "No correction needed (terms are identical)",
                })
            }
        }

        "get_suggestions" => {
            let text = str_arg(data, "text");
            let max = data
                .get("max_suggestions")
                .and_then(Value::as_u64)
                .unwrap_or(3) as usize;
            json!({
                "success": true,
                "suggestions": store.suggest(&text, max),
            })
        }

        other => failure(format!("Unknown vocabulary command: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_list_and_filter() {
        let mut store = VocabularyStore::in_memory();
        let response = handle_command(
            &mut store,
            "add_term",
            &json!({"correct_term": "pneumothorax", "variations": ["new motor ax"], "category": "technical_terms"}),
        );
        assert_eq!(response["success"], true);
        handle_command(
            &mut store,
            "add_term",
            &json!({"correct_term": "Metoprolol", "category": "medication"}),
        );

        let all = handle_command(&mut store, "get_list", &json!({}));
        assert_eq!(all["total_count"], 2);
        let filtered = handle_command(
            &mut store,
            "get_list",
            &json!({"category": "medication"}),
        );
        assert_eq!(filtered["total_count"], 1);
        assert_eq!(filtered["terms"][0]["correct"], "Metoprolol");
    }

    #[test]
    fn learn_correction_twice_promotes_for_transcription() {
        let mut store = VocabularyStore::in_memory();
        let payload = json!({"original": "new motor ax", "corrected": "pneumothorax"});
        assert_eq!(
            handle_command(&mut store, "learn_correction", &payload)["success"],
            true
        );
        assert_eq!(
            handle_command(&mut store, "learn_correction", &payload)["success"],
            true
        );
        let (out, _) = store.apply_corrections("suspect new motor ax on imaging");
        assert_eq!(out, "suspect pneumothorax on imaging");
    }

    #[test]
    fn unknown_command_fails_gracefully() {
        let mut store = VocabularyStore::in_memory();
        let response = handle_command(&mut store, "frobnicate", &json!({}));
        assert_eq!(response["success"], false);
    }

    #[test]
    fn stats_shape() {
        let mut store = VocabularyStore::in_memory();
        handle_command(
            &mut store,
            "add_term",
            &json!({"correct_term": "pneumothorax"}),
        );
        let response = handle_command(&mut store, "get_stats", &json!({}));
        assert_eq!(response["stats"]["total_terms"], 1);
    }
}
