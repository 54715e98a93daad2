//! Streaming parsers for model output.
//!
//! Tokens arrive incrementally and tag text can straddle token boundaries, so
//! both parsers are explicit state machines over a residual buffer: at each
//! step they emit only the newly-consumed characters and hold back any buffer
//! suffix that could still turn out to be a tag prefix. For a fixed token
//! stream the emitted delta sequence is a pure function of the stream.
//!
//! `ChannelStreamParser` handles channel-tagged output
//! (`<|start|>assistant<|channel|>analysis<|message|>…<|end|>`, long and
//! short forms). `ThinkFilter` handles inline `<think>…</think>` reasoning
//! (plus the localized `<思考过程>` variant) inside otherwise plain text.

use std::sync::OnceLock;

use regex::Regex;

const TAG_ANALYSIS_LONG: &str = "<|start|>assistant<|channel|>analysis<|message|>";
const TAG_FINAL_LONG: &str = "<|start|>assistant<|channel|>final<|message|>";
const TAG_ANALYSIS_SHORT: &str = "<|channel|>analysis<|message|>";
const TAG_FINAL_SHORT: &str = "<|channel|>final<|message|>";
const TAG_END: &str = "<|end|>";

/// Start tags in match-priority order. Earliest match in the buffer wins,
/// which also prefers the long forms since they start before the embedded
/// short form.
const START_TAGS: [(&str, Channel); 4] = [
    (TAG_ANALYSIS_LONG, Channel::Analysis),
    (TAG_FINAL_LONG, Channel::Final),
    (TAG_ANALYSIS_SHORT, Channel::Analysis),
    (TAG_FINAL_SHORT, Channel::Final),
];

const THINK_TAGS: [(&str, &str); 2] = [
    ("<think>", "</think>"),
    ("<思考过程>", "</思考过程>"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Analysis,
    Final,
}

/// Incremental output of the channel parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    /// Text outside any channel block (discarded for final-only delivery).
    Outside(String),
    Analysis(String),
    Final(String),
}

/// Longest buffer suffix that is a proper prefix of any candidate tag.
/// That suffix must stay buffered: the next token may complete the tag.
fn holdback_len(buffer: &str, tags: &[&str]) -> usize {
    let max_probe = tags.iter().map(|t| t.len() - 1).max().unwrap_or(0);
    let probe = max_probe.min(buffer.len());
    for k in (1..=probe).rev() {
        let split = buffer.len() - k;
        if !buffer.is_char_boundary(split) {
            continue;
        }
        let suffix = &buffer[split..];
        if tags.iter().any(|tag| tag.starts_with(suffix)) {
            return k;
        }
    }
    0
}

/// Earliest occurrence of any start tag in the buffer.
fn find_start_tag(buffer: &str) -> Option<(usize, &'static str, Channel)> {
    START_TAGS
        .iter()
        .filter_map(|(tag, channel)| buffer.find(tag).map(|idx| (idx, *tag, *channel)))
        .min_by_key(|(idx, _, _)| *idx)
}

/// State machine over a channel-tagged token stream.
pub struct ChannelStreamParser {
    buffer: String,
    channel: Option<Channel>,
    analysis: String,
    final_text: String,
}

impl ChannelStreamParser {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            channel: None,
            analysis: String::new(),
            final_text: String::new(),
        }
    }

    /// Consume one token, returning the deltas it unlocked.
    pub fn push(&mut self, token: &str) -> Vec<Delta> {
        if token.is_empty() {
            return Vec::new();
        }
        self.buffer.push_str(token);
        let mut deltas = Vec::new();

        loop {
            match self.channel {
                None => {
                    if let Some((idx, tag, channel)) = find_start_tag(&self.buffer) {
                        if idx > 0 {
                            deltas.push(Delta::Outside(self.buffer[..idx].to_string()));
                        }
                        self.buffer.drain(..idx + tag.len());
                        self.channel = Some(channel);
                        continue;
                    }
                    let start_tag_names: Vec<&str> =
                        START_TAGS.iter().map(|(tag, _)| *tag).collect();
                    let keep = holdback_len(&self.buffer, &start_tag_names);
                    let emit_to = self.buffer.len() - keep;
                    if emit_to > 0 {
                        deltas.push(Delta::Outside(self.buffer[..emit_to].to_string()));
                        self.buffer.drain(..emit_to);
                    }
                    break;
                }
                Some(channel) => {
                    if let Some(idx) = self.buffer.find(TAG_END) {
                        let chunk = self.buffer[..idx].to_string();
                        self.buffer.drain(..idx + TAG_END.len());
                        self.emit_channel(channel, chunk, &mut deltas);
                        self.channel = None;
                        // Another block may already be queued in the buffer.
                        continue;
                    }
                    let keep = holdback_len(&self.buffer, &[TAG_END]);
                    let emit_to = self.buffer.len() - keep;
                    if emit_to > 0 {
                        let chunk = self.buffer[..emit_to].to_string();
                        self.buffer.drain(..emit_to);
                        self.emit_channel(channel, chunk, &mut deltas);
                    }
                    break;
                }
            }
        }
        deltas
    }

    fn emit_channel(&mut self, channel: Channel, chunk: String, deltas: &mut Vec<Delta>) {
        if chunk.is_empty() {
            return;
        }
        match channel {
            Channel::Analysis => {
                self.analysis.push_str(&chunk);
                deltas.push(Delta::Analysis(chunk));
            }
            Channel::Final => {
                self.final_text.push_str(&chunk);
                deltas.push(Delta::Final(chunk));
            }
        }
    }

    /// Flush whatever is still buffered when the stream completes. A held
    /// partial tag that never completed is real content at this point.
    pub fn finish(&mut self) -> Vec<Delta> {
        let mut deltas = Vec::new();
        if self.buffer.is_empty() {
            return deltas;
        }
        let rest = std::mem::take(&mut self.buffer);
        match self.channel.take() {
            Some(channel) => self.emit_channel(channel, rest, &mut deltas),
            None => deltas.push(Delta::Outside(rest)),
        }
        deltas
    }

    /// Aggregated analysis-channel text seen so far.
    pub fn analysis_text(&self) -> &str {
        &self.analysis
    }

    /// Aggregated final-channel text seen so far.
    pub fn final_text(&self) -> &str {
        &self.final_text
    }

    /// True once any channel tag has been consumed.
    pub fn saw_channel_tags(&self) -> bool {
        !self.analysis.is_empty() || !self.final_text.is_empty() || self.channel.is_some()
    }
}

/// Incremental output of the think filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilteredDelta {
    /// Text outside any think block.
    Visible(String),
    /// Reasoning extracted from inside a think block.
    Thinking(String),
}

/// State machine routing inline `<think>` spans away from visible text.
pub struct ThinkFilter {
    buffer: String,
    /// Close tag we are scanning for while inside a think block.
    awaiting_close: Option<&'static str>,
}

impl ThinkFilter {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            awaiting_close: None,
        }
    }

    pub fn push(&mut self, text: &str) -> Vec<FilteredDelta> {
        if text.is_empty() {
            return Vec::new();
        }
        self.buffer.push_str(text);
        let mut deltas = Vec::new();

        loop {
            match self.awaiting_close {
                None => {
                    let hit = THINK_TAGS
                        .iter()
                        .filter_map(|(open, close)| {
                            self.buffer.find(open).map(|idx| (idx, *open, *close))
                        })
                        .min_by_key(|(idx, _, _)| *idx);
                    if let Some((idx, open, close)) = hit {
                        if idx > 0 {
                            deltas.push(FilteredDelta::Visible(self.buffer[..idx].to_string()));
                        }
                        self.buffer.drain(..idx + open.len());
                        self.awaiting_close = Some(close);
                        continue;
                    }
                    let open_tags: Vec<&str> = THINK_TAGS.iter().map(|(open, _)| *open).collect();
                    let keep = holdback_len(&self.buffer, &open_tags);
                    let emit_to = self.buffer.len() - keep;
                    if emit_to > 0 {
                        deltas.push(FilteredDelta::Visible(self.buffer[..emit_to].to_string()));
                        self.buffer.drain(..emit_to);
                    }
                    break;
                }
                Some(close) => {
                    if let Some(idx) = self.buffer.find(close) {
                        if idx > 0 {
                            deltas.push(FilteredDelta::Thinking(self.buffer[..idx].to_string()));
                        }
                        self.buffer.drain(..idx + close.len());
                        self.awaiting_close = None;
                        continue;
                    }
                    let keep = holdback_len(&self.buffer, &[close]);
                    let emit_to = self.buffer.len() - keep;
                    if emit_to > 0 {
                        deltas.push(FilteredDelta::Thinking(self.buffer[..emit_to].to_string()));
                        self.buffer.drain(..emit_to);
                    }
                    break;
                }
            }
        }
        deltas
    }

    /// Flush at stream end. An unterminated think block stays reasoning.
    pub fn finish(&mut self) -> Vec<FilteredDelta> {
        let mut deltas = Vec::new();
        if self.buffer.is_empty() {
            return deltas;
        }
        let rest = std::mem::take(&mut self.buffer);
        match self.awaiting_close.take() {
            Some(_) => deltas.push(FilteredDelta::Thinking(rest)),
            None => deltas.push(FilteredDelta::Visible(rest)),
        }
        deltas
    }
}

/// Safety net over aggregated text: remove whole think blocks and any stray
/// orphan tags that slipped through a malformed stream.
pub fn strip_think_tags(text: &str) -> String {
    static BLOCKS: OnceLock<Regex> = OnceLock::new();
    static STRAYS: OnceLock<Regex> = OnceLock::new();
    let blocks = BLOCKS.get_or_init(|| {
        Regex::new(r"(?is)<think>.*?</think>|<思考过程>.*?</思考过程>").expect("think block regex")
    });
    let strays = STRAYS.get_or_init(|| {
        Regex::new(r"(?i)</?think>|</?思考过程>").expect("stray tag regex")
    });
    let without_blocks = blocks.replace_all(text, "");
    strays.replace_all(&without_blocks, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed text in pieces of `chunk` bytes (respecting char boundaries).
    fn feed_channel(parser: &mut ChannelStreamParser, text: &str, chunk: usize) -> Vec<Delta> {
        let mut deltas = Vec::new();
        let mut buf = String::new();
        for c in text.chars() {
            buf.push(c);
            if buf.len() >= chunk {
                deltas.extend(parser.push(&buf));
                buf.clear();
            }
        }
        if !buf.is_empty() {
            deltas.extend(parser.push(&buf));
        }
        deltas.extend(parser.finish());
        deltas
    }

    fn concat(deltas: &[Delta], want: fn(&Delta) -> Option<&str>) -> String {
        deltas.iter().filter_map(want).collect()
    }

    fn analysis_of(d: &Delta) -> Option<&str> {
        match d {
            Delta::Analysis(s) => Some(s),
            _ => None,
        }
    }

    fn final_of(d: &Delta) -> Option<&str> {
        match d {
            Delta::Final(s) => Some(s),
            _ => None,
        }
    }

    const RESPONSE: &str = "<|start|>assistant<|channel|>analysis<|message|>Check the \
spelling of complaints.<|end|><|start|>assistant<|channel|>final<|message|>- Twenty-one-\
year-old male presents with no specific complaints.<|end|>";

    #[test]
    fn whole_response_in_one_token() {
        let mut parser = ChannelStreamParser::new();
        let deltas = feed_channel(&mut parser, RESPONSE, usize::MAX);
        assert_eq!(
            concat(&deltas, analysis_of),
            "Check the spelling of complaints."
        );
        assert_eq!(
            concat(&deltas, final_of),
            "- Twenty-one-year-old male presents with no specific complaints."
        );
        assert_eq!(parser.final_text(), concat(&deltas, final_of));
    }

    #[test]
    fn char_by_char_equals_single_shot() {
        let mut one = ChannelStreamParser::new();
        let single = feed_channel(&mut one, RESPONSE, usize::MAX);
        let mut two = ChannelStreamParser::new();
        let drip = feed_channel(&mut two, RESPONSE, 1);
        // Delta granularity differs, but content per channel must not.
        assert_eq!(concat(&single, analysis_of), concat(&drip, analysis_of));
        assert_eq!(concat(&single, final_of), concat(&drip, final_of));
        // No delta ever contains tag text.
        for delta in &drip {
            let text = match delta {
                Delta::Outside(s) | Delta::Analysis(s) | Delta::Final(s) => s,
            };
            assert!(!text.contains("<|"), "tag leaked: {text:?}");
        }
    }

    #[test]
    fn deterministic_for_fixed_chunking() {
        let runs: Vec<Vec<Delta>> = (0..2)
            .map(|_| feed_channel(&mut ChannelStreamParser::new(), RESPONSE, 7))
            .collect();
        assert_eq!(runs[0], runs[1]);
    }

    #[test]
    fn short_form_tags_are_recognized() {
        let text =
            "<|channel|>analysis<|message|>thinking<|end|><|channel|>final<|message|>done<|end|>";
        let mut parser = ChannelStreamParser::new();
        let deltas = feed_channel(&mut parser, text, 3);
        assert_eq!(concat(&deltas, analysis_of), "thinking");
        assert_eq!(concat(&deltas, final_of), "done");
    }

    #[test]
    fn text_before_tag_is_outside() {
        let text = "preamble<|channel|>final<|message|>body<|end|>";
        let mut parser = ChannelStreamParser::new();
        let deltas = feed_channel(&mut parser, text, usize::MAX);
        let outside: String = deltas
            .iter()
            .filter_map(|d| match d {
                Delta::Outside(s) => Some(s.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(outside, "preamble");
        assert_eq!(concat(&deltas, final_of), "body");
    }

    #[test]
    fn end_tag_split_across_tokens() {
        let mut parser = ChannelStreamParser::new();
        let mut deltas = parser.push("<|channel|>final<|message|>bullet text<|en");
        deltas.extend(parser.push("d|> trailing"));
        deltas.extend(parser.finish());
        assert_eq!(concat(&deltas, final_of), "bullet text");
        assert!(deltas.contains(&Delta::Outside(" trailing".to_string())));
    }

    #[test]
    fn unterminated_channel_flushes_on_finish() {
        let mut parser = ChannelStreamParser::new();
        let mut deltas = parser.push("<|channel|>final<|message|>half a re");
        deltas.extend(parser.push("sult"));
        deltas.extend(parser.finish());
        assert_eq!(concat(&deltas, final_of), "half a result");
        assert!(parser.saw_channel_tags());
    }

    #[test]
    fn pipe_like_text_is_not_swallowed() {
        let mut parser = ChannelStreamParser::new();
        let mut deltas = parser.push("a < b and c <| d");
        deltas.extend(parser.finish());
        let outside: String = deltas
            .iter()
            .filter_map(|d| match d {
                Delta::Outside(s) => Some(s.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(outside, "a < b and c <| d");
    }

    fn feed_filter(filter: &mut ThinkFilter, text: &str, chunk: usize) -> Vec<FilteredDelta> {
        let mut deltas = Vec::new();
        let mut buf = String::new();
        for c in text.chars() {
            buf.push(c);
            if buf.len() >= chunk {
                deltas.extend(filter.push(&buf));
                buf.clear();
            }
        }
        if !buf.is_empty() {
            deltas.extend(filter.push(&buf));
        }
        deltas.extend(filter.finish());
        deltas
    }

    fn visible(deltas: &[FilteredDelta]) -> String {
        deltas
            .iter()
            .filter_map(|d| match d {
                FilteredDelta::Visible(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    fn thinking(deltas: &[FilteredDelta]) -> String {
        deltas
            .iter()
            .filter_map(|d| match d {
                FilteredDelta::Thinking(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn inline_think_is_routed_to_thinking() {
        for chunk in [1, 4, usize::MAX] {
            let mut filter = ThinkFilter::new();
            let deltas = feed_filter(
                &mut filter,
                "<think>reasoning</think>- corrected text.",
                chunk,
            );
            assert_eq!(visible(&deltas), "- corrected text.", "chunk {chunk}");
            assert_eq!(thinking(&deltas), "reasoning", "chunk {chunk}");
            // Think span content never appears in visible output.
            assert!(!visible(&deltas).contains("reasoning"));
        }
    }

    #[test]
    fn localized_think_variant() {
        let mut filter = ThinkFilter::new();
        let deltas = feed_filter(&mut filter, "<思考过程>推理</思考过程>answer", 2);
        assert_eq!(visible(&deltas), "answer");
        assert_eq!(thinking(&deltas), "推理");
    }

    #[test]
    fn unterminated_think_stays_thinking() {
        let mut filter = ThinkFilter::new();
        let deltas = feed_filter(&mut filter, "before<think>never closed", usize::MAX);
        assert_eq!(visible(&deltas), "before");
        assert_eq!(thinking(&deltas), "never closed");
    }

    #[test]
    fn strip_think_tags_handles_strays_and_case() {
        assert_eq!(
            strip_think_tags("<THINK>hidden</THINK>- kept."),
            "- kept."
        );
        assert_eq!(strip_think_tags("</think>orphan"), "orphan");
        assert_eq!(strip_think_tags("plain"), "plain");
    }
}
