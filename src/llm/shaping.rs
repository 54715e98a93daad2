//! The LLM shaping job: stream tokens, split reasoning from final text, feed
//! the UI incrementally, and return the normalized final text.
//!
//! Emission discipline: only newly-consumed characters are ever forwarded;
//! reasoning forwarded to the thinking pane is capped at
//! `MAX_THINKING_CHARS`, after which a single truncation marker is sent.
//! `PROOF_STREAM:end` is always emitted, on success, failure, and abort
//! alike. Abort discards partial output: the job returns `Ok(None)` and
//! nothing is delivered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::MAX_THINKING_CHARS;
use crate::ipc::IpcWriter;
use crate::session::Mode;

use super::format::post_process;
use super::prompts::{build_prompt, is_channel_tagged, sampling_for};
use super::stream::{strip_think_tags, ChannelStreamParser, Delta, FilteredDelta, ThinkFilter};
use super::{LlmClient, LlmError};

/// First `chars` characters of `s`, on a char boundary.
fn truncate_chars(s: &str, chars: usize) -> &str {
    match s.char_indices().nth(chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Routes a token stream into `PROOF_STREAM` deltas and the aggregated final
/// text. One assembler per shaping job.
pub struct StreamAssembler {
    ipc: Arc<IpcWriter>,
    channel_tagged: bool,
    proofread: bool,
    parser: ChannelStreamParser,
    /// Filters inline think spans out of whichever path carries final text.
    final_filter: ThinkFilter,
    final_buffer: String,
    outside_buffer: String,
    thinking_sent: usize,
    truncation_notified: bool,
}

impl StreamAssembler {
    pub fn new(model_id: &str, mode: Mode, ipc: Arc<IpcWriter>) -> Self {
        Self {
            ipc,
            channel_tagged: is_channel_tagged(model_id),
            proofread: mode == Mode::Proofread,
            parser: ChannelStreamParser::new(),
            final_filter: ThinkFilter::new(),
            final_buffer: String::new(),
            outside_buffer: String::new(),
            thinking_sent: 0,
            truncation_notified: false,
        }
    }

    pub fn push_token(&mut self, token: &str) {
        if self.channel_tagged {
            for delta in self.parser.push(token) {
                self.route_channel_delta(delta);
            }
        } else {
            let deltas = self.final_filter.push(token);
            self.route_filtered(deltas);
        }
    }

    fn route_channel_delta(&mut self, delta: Delta) {
        match delta {
            Delta::Analysis(text) => self.emit_thinking(&text),
            Delta::Final(text) => {
                let deltas = self.final_filter.push(&text);
                self.route_filtered(deltas);
            }
            // Outside a channel block: withheld from final-only delivery but
            // kept as the fallback for models that skip the tags entirely.
            Delta::Outside(text) => self.outside_buffer.push_str(&text),
        }
    }

    fn route_filtered(&mut self, deltas: Vec<FilteredDelta>) {
        for delta in deltas {
            match delta {
                FilteredDelta::Visible(text) => {
                    self.ipc.proof_chunk(&text);
                    self.final_buffer.push_str(&text);
                }
                FilteredDelta::Thinking(text) => self.emit_thinking(&text),
            }
        }
    }

    fn emit_thinking(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        let remaining = MAX_THINKING_CHARS.saturating_sub(self.thinking_sent);
        if remaining == 0 {
            if !self.truncation_notified {
                self.ipc.proof_thinking("(thinking truncated)");
                self.truncation_notified = true;
            }
            return;
        }
        let piece = truncate_chars(delta, remaining);
        self.ipc.proof_thinking(piece);
        self.thinking_sent += piece.chars().count();
        if piece.len() < delta.len() && !self.truncation_notified {
            self.ipc.proof_thinking("(thinking truncated)");
            self.truncation_notified = true;
        }
    }

    /// Flush residual parser state and return the normalized final text.
    pub fn finish(mut self) -> String {
        if self.channel_tagged {
            for delta in self.parser.finish() {
                self.route_channel_delta(delta);
            }
        }
        let deltas = self.final_filter.finish();
        self.route_filtered(deltas);

        let mut aggregated = strip_think_tags(&self.final_buffer);
        if aggregated.is_empty() && self.channel_tagged && !self.parser.saw_channel_tags() {
            // Channel-tagged model never produced channel blocks.
            debug!("Channel-tagged model produced untagged output; using it directly");
            aggregated = strip_think_tags(&self.outside_buffer);
        }
        post_process(&aggregated, self.proofread)
    }
}

/// Run one shaping job. Returns the normalized final text, or `Ok(None)` when
/// the job was aborted mid-stream.
pub async fn run_shaping(
    llm: &LlmClient,
    model_id: &str,
    mode: Mode,
    template: &str,
    input_text: &str,
    ipc: &Arc<IpcWriter>,
    cancel: &Arc<AtomicBool>,
) -> Result<Option<String>, LlmError> {
    let prompt = build_prompt(mode, model_id, template, input_text);
    let params = sampling_for(model_id);

    ipc.proof_thinking(&format!("Processing with {model_id}..."));

    let stream = llm
        .chat_stream(model_id, &prompt.system, &prompt.user, params)
        .await;
    let mut stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            ipc.proof_end();
            return Err(e);
        }
    };

    let mut assembler = StreamAssembler::new(model_id, mode, ipc.clone());
    let result = loop {
        if cancel.load(Ordering::Acquire) {
            info!("Shaping job aborted; discarding partial output");
            break Ok(None);
        }
        match stream.next_token().await {
            Ok(Some(token)) => assembler.push_token(&token),
            Ok(None) => {
                if cancel.load(Ordering::Acquire) {
                    break Ok(None);
                }
                break Ok(Some(assembler.finish()));
            }
            Err(e) => break Err(e),
        }
    };

    // The stream-complete marker goes out on every path.
    ipc.proof_end();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Write};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn lines(&self) -> Vec<String> {
            String::from_utf8(self.0.lock().unwrap().clone())
                .unwrap()
                .lines()
                .map(String::from)
                .collect()
        }
    }

    fn chunks_of(lines: &[String]) -> String {
        lines
            .iter()
            .filter_map(|l| l.strip_prefix("STATUS:blue:PROOF_STREAM:chunk:"))
            .collect::<String>()
            .replace("\\n", "\n")
    }

    fn thinking_of(lines: &[String]) -> String {
        lines
            .iter()
            .filter_map(|l| l.strip_prefix("STATUS:blue:PROOF_STREAM:thinking:"))
            .collect::<String>()
            .replace("\\n", "\n")
    }

    /// Feed `text` through an assembler in small token chunks.
    fn run_assembler(model: &str, text: &str, chunk: usize) -> (Vec<String>, String) {
        let capture = Capture::default();
        let ipc = IpcWriter::sink(Box::new(capture.clone()));
        let mut assembler = StreamAssembler::new(model, Mode::Proofread, ipc);
        let mut buf = String::new();
        for c in text.chars() {
            buf.push(c);
            if buf.len() >= chunk {
                assembler.push_token(&buf);
                buf.clear();
            }
        }
        if !buf.is_empty() {
            assembler.push_token(&buf);
        }
        let final_text = assembler.finish();
        (capture.lines(), final_text)
    }

    #[test]
    fn channel_tagged_stream_splits_thinking_and_chunks() {
        let body = "- Twenty-one-year-old male presents with no specific complaints.";
        let stream = format!(
            "<|start|>assistant<|channel|>analysis<|message|>Check number formatting.<|end|>\
             <|start|>assistant<|channel|>final<|message|>{body}<|end|>"
        );
        for chunk in [1, 5, usize::MAX] {
            let (lines, final_text) = run_assembler("gpt-oss:20b", &stream, chunk);
            assert_eq!(chunks_of(&lines), body, "chunk size {chunk}");
            assert_eq!(thinking_of(&lines), "Check number formatting.");
            assert_eq!(final_text, body);
            // Reasoning never leaks into chunk lines.
            assert!(!chunks_of(&lines).contains("Check number"));
        }
    }

    #[test]
    fn inline_think_in_final_channel_routes_to_thinking() {
        let stream = "<|channel|>final<|message|><think>reasoning</think>- corrected text.<|end|>";
        for chunk in [1, 3, usize::MAX] {
            let (lines, final_text) = run_assembler("gpt-oss:20b", stream, chunk);
            assert_eq!(chunks_of(&lines), "- corrected text.", "chunk size {chunk}");
            assert_eq!(thinking_of(&lines), "reasoning");
            assert_eq!(final_text, "- corrected text.");
            for line in &lines {
                if let Some(chunk_text) = line.strip_prefix("STATUS:blue:PROOF_STREAM:chunk:") {
                    assert!(!chunk_text.contains("<think>"));
                    assert!(!chunk_text.contains("reasoning"));
                }
            }
        }
    }

    #[test]
    fn plain_model_think_blocks_are_filtered() {
        let stream = "<think>fixing the spelling</think>- Patient complained of fever.";
        let (lines, final_text) = run_assembler("qwen3:8b", stream, 4);
        assert_eq!(chunks_of(&lines), "- Patient complained of fever.");
        assert_eq!(thinking_of(&lines), "fixing the spelling");
        assert_eq!(final_text, "- Patient complained of fever.");
    }

    #[test]
    fn thinking_is_capped_with_single_marker() {
        let long_analysis = "x".repeat(MAX_THINKING_CHARS * 2);
        let stream = format!(
            "<|channel|>analysis<|message|>{long_analysis}<|end|>\
             <|channel|>final<|message|>- ok.<|end|>"
        );
        let (lines, _) = run_assembler("gpt-oss:20b", &stream, 64);
        let thinking = thinking_of(&lines);
        assert!(thinking.contains("(thinking truncated)"));
        assert_eq!(thinking.matches("(thinking truncated)").count(), 1);
        // Forwarded reasoning stays within cap (plus the marker text).
        let forwarded: String = thinking.replace("(thinking truncated)", "");
        assert_eq!(forwarded.chars().count(), MAX_THINKING_CHARS);
    }

    #[test]
    fn untagged_output_from_channel_model_falls_back() {
        let (_, final_text) = run_assembler("gpt-oss:20b", "- plain bullet output.", 6);
        assert_eq!(final_text, "- plain bullet output.");
    }

    #[test]
    fn proofread_normalization_applies_at_finish() {
        let stream = "<|channel|>final<|message|>Here you go:\n- Fixed sentence one.\n- Fixed sentence two.\n\nAnything else?<|end|>";
        let (_, final_text) = run_assembler("gpt-oss:20b", stream, usize::MAX);
        assert_eq!(final_text, "- Fixed sentence one.\n- Fixed sentence two.");
    }
}
