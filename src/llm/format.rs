//! Mode-specific normalization of LLM output.
//!
//! Proofread output is contractually a bulleted list; models still wrap it in
//! prose, continuation lines, and run-on bullets. This pass extracts the
//! first contiguous bullet block, folds continuations into their bullet,
//! splits overlong bullets on natural junctions, and re-joins with `- `
//! markers. When no bullets are found the trimmed output passes through
//! unchanged. Letter mode only trims.

use std::sync::OnceLock;

use regex::Regex;

/// Bullets longer than this get split on junction phrases.
const LONG_BULLET_CHARS: usize = 200;

fn bullet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*[-*•]\s+").expect("bullet regex"))
}

fn junction_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\. (?:The second (?:issue|concern|problem)|The person also|He also|She also|Additionally|Furthermore|He seeks?|Person seeks?)",
        )
        .expect("junction regex")
    })
}

/// Normalize final LLM text for the given mode label.
pub fn post_process(text: &str, proofread: bool) -> String {
    if proofread {
        process_proofread(text)
    } else {
        text.trim().to_string()
    }
}

fn process_proofread(text: &str) -> String {
    let mut bullets: Vec<String> = Vec::new();
    let mut in_block = false;

    for line in text.lines() {
        if bullet_re().is_match(line) {
            let cleaned = bullet_re().replace(line, "").trim().to_string();
            if !cleaned.is_empty() {
                if cleaned.len() > LONG_BULLET_CHARS {
                    bullets.extend(split_long_bullet(&cleaned));
                } else {
                    bullets.push(cleaned);
                }
                in_block = true;
            }
        } else if in_block {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                // Blank line ends the first bullet block.
                break;
            }
            // Continuation line: fold into the previous bullet.
            if let Some(last) = bullets.last_mut() {
                last.push(' ');
                last.push_str(trimmed);
            }
        }
    }

    if bullets.is_empty() {
        return text.trim().to_string();
    }

    bullets
        .iter()
        .map(|b| format!("- {b}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split a run-on bullet at sentence boundaries that read as new items.
fn split_long_bullet(bullet: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = bullet;
    while let Some(m) = junction_re().find(rest) {
        let head = &rest[..m.start() + 1]; // keep the period
        if !head.trim().is_empty() {
            parts.push(head.trim().to_string());
        }
        rest = rest[m.start() + 2..].trim_start(); // drop ". ", keep the phrase
    }
    if !rest.trim().is_empty() {
        parts.push(rest.trim().to_string());
    }
    parts
}
