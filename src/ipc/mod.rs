//! Line protocol with the UI shell.
//!
//! One message per line, UTF-8, newline-terminated: commands arrive on stdin,
//! events leave on stdout. Payload bodies are escaped (`\n`, `\r`) so a line
//! is always exactly one message. Every outbound line goes through a single
//! writer mutex; nothing else in the process may write to stdout.

pub mod bridge;

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigPayload;

/// Status line colors. The UI maps these to tray/status-bar tints:
/// grey = inactive/preparing, blue = listening, green = dictating,
/// orange = processing or advisory warning, red = error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusColor {
    Grey,
    Blue,
    Green,
    Orange,
    Red,
    Black,
}

impl StatusColor {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Grey => "grey",
            Self::Blue => "blue",
            Self::Green => "green",
            Self::Orange => "orange",
            Self::Red => "red",
            Self::Black => "black",
        }
    }
}

/// Inbound protocol failures. None of these are fatal; malformed input is
/// logged and acknowledged where an acknowledgement is expected.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("malformed line: {0}")]
    MalformedLine(String),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
}

/// Commands the UI sends on stdin.
#[derive(Debug)]
pub enum UiCommand {
    GetConfig,
    Config(ConfigPayload),
    ModelsRequest,
    StartDictate,
    StartProofread,
    StartLetter,
    StopDictation,
    AbortDictation,
    ToggleActive,
    SetAppState(bool),
    GetHotkeys,
    Vocabulary {
        id: String,
        command: String,
        data: serde_json::Value,
    },
    RestartApp,
    Shutdown,
}

/// Escape a payload for single-line transport.
pub fn escape_payload(text: &str) -> String {
    text.replace('\r', "\\r").replace('\n', "\\n")
}

/// Parse one inbound line into a command.
pub fn parse_command(line: &str) -> Result<UiCommand, IpcError> {
    match line {
        "GET_CONFIG" => return Ok(UiCommand::GetConfig),
        "MODELS_REQUEST" => return Ok(UiCommand::ModelsRequest),
        "start_dictate" => return Ok(UiCommand::StartDictate),
        "start_proofread" => return Ok(UiCommand::StartProofread),
        "start_letter" => return Ok(UiCommand::StartLetter),
        "STOP_DICTATION" => return Ok(UiCommand::StopDictation),
        "ABORT_DICTATION" => return Ok(UiCommand::AbortDictation),
        "TOGGLE_ACTIVE" => return Ok(UiCommand::ToggleActive),
        "GET_HOTKEYS" => return Ok(UiCommand::GetHotkeys),
        "RESTART_APP" => return Ok(UiCommand::RestartApp),
        "SHUTDOWN" => return Ok(UiCommand::Shutdown),
        _ => {}
    }

    if let Some(json) = line.strip_prefix("CONFIG:") {
        let payload: ConfigPayload = serde_json::from_str(json)
            .map_err(|e| IpcError::MalformedLine(format!("CONFIG payload: {e}")))?;
        return Ok(UiCommand::Config(payload));
    }

    if let Some(value) = line.strip_prefix("SET_APP_STATE:") {
        return match value.to_ascii_lowercase().as_str() {
            "true" => Ok(UiCommand::SetAppState(true)),
            "false" => Ok(UiCommand::SetAppState(false)),
            other => Err(IpcError::MalformedLine(format!(
                "SET_APP_STATE expects true|false, got {other}"
            ))),
        };
    }

    if let Some(rest) = line.strip_prefix("VOCABULARY_API:") {
        // VOCABULARY_API:<id>:{"command": "...", "data": {...}}
        let (id, json) = rest
            .split_once(':')
            .ok_or_else(|| IpcError::MalformedLine("VOCABULARY_API missing id".into()))?;
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| IpcError::MalformedLine(format!("VOCABULARY_API payload: {e}")))?;
        let command = value
            .get("command")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();
        let data = value.get("data").cloned().unwrap_or(serde_json::json!({}));
        return Ok(UiCommand::Vocabulary {
            id: id.to_string(),
            command,
            data,
        });
    }

    Err(IpcError::UnknownCommand(line.to_string()))
}

/// Serialized writer for all outbound lines.
pub struct IpcWriter {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl IpcWriter {
    pub fn stdout() -> Arc<Self> {
        Arc::new(Self {
            sink: Mutex::new(Box::new(io::stdout())),
        })
    }

    #[cfg(test)]
    pub fn sink(sink: Box<dyn Write + Send>) -> Arc<Self> {
        Arc::new(Self {
            sink: Mutex::new(sink),
        })
    }

    /// Write one complete line. Write errors are ignored: a broken pipe means
    /// the UI is gone and shutdown is already in flight via the stdin reader.
    fn line(&self, line: &str) {
        debug_assert!(
            !line.contains('\n') && !line.contains('\r'),
            "IPC line contains an unescaped newline: {line:?}"
        );
        if let Ok(mut sink) = self.sink.lock() {
            let _ = writeln!(sink, "{line}");
            let _ = sink.flush();
        }
    }

    pub fn ready(&self) {
        self.line("PYTHON_BACKEND_READY");
    }

    /// Ask the UI to deliver its saved configuration.
    pub fn request_config(&self) {
        self.line("GET_CONFIG");
    }

    pub fn state<S: Serialize>(&self, snapshot: &S) {
        match serde_json::to_string(snapshot) {
            Ok(json) => self.line(&format!("STATE:{json}")),
            Err(e) => tracing::error!("Failed to serialize state snapshot: {}", e),
        }
    }

    pub fn status(&self, color: StatusColor, text: &str) {
        self.line(&format!(
            "STATUS:{}:{}",
            color.as_str(),
            escape_payload(text)
        ));
    }

    pub fn amplitude(&self, amp: u8) {
        self.line(&format!("AUDIO_AMP:{}", amp.min(100)));
    }

    pub fn final_transcript(&self, text: &str) {
        self.line(&format!("FINAL_TRANSCRIPT:{}", escape_payload(text)));
    }

    /// `TRANSCRIPTION:PROOFED:` / `TRANSCRIPTION:LETTER:` result line.
    pub fn transcription_result(&self, label: &str, text: &str) {
        self.line(&format!("TRANSCRIPTION:{label}:{}", escape_payload(text)));
    }

    pub fn transcription_error(&self, text: &str) {
        self.line(&format!("TRANSCRIPTION:ERROR:{}", escape_payload(text)));
    }

    /// Incremental reasoning delta for the UI thinking pane.
    pub fn proof_thinking(&self, delta: &str) {
        self.line(&format!(
            "STATUS:blue:PROOF_STREAM:thinking:{}",
            escape_payload(delta)
        ));
    }

    /// Incremental final-text delta.
    pub fn proof_chunk(&self, delta: &str) {
        self.line(&format!(
            "STATUS:blue:PROOF_STREAM:chunk:{}",
            escape_payload(delta)
        ));
    }

    pub fn proof_end(&self) {
        self.line("STATUS:black:PROOF_STREAM:end");
    }

    pub fn models_list<S: Serialize>(&self, models: &S) {
        match serde_json::to_string(models) {
            Ok(json) => self.line(&format!("MODELS_LIST:{json}")),
            Err(e) => tracing::error!("Failed to serialize models list: {}", e),
        }
    }

    pub fn hotkeys<S: Serialize>(&self, map: &S) {
        match serde_json::to_string(map) {
            Ok(json) => self.line(&format!("HOTKEYS:{json}")),
            Err(e) => tracing::error!("Failed to serialize hotkey map: {}", e),
        }
    }

    /// `kind` is `proof` or `letter`.
    pub fn model_selected(&self, kind: &str, id: &str) {
        self.line(&format!("MODEL_SELECTED:{kind}:{id}"));
    }

    pub fn vocab_response(&self, id: &str, result: &serde_json::Value) {
        match serde_json::to_string(result) {
            Ok(json) => self.line(&format!("VOCAB_RESPONSE:{id}:{json}")),
            Err(e) => tracing::error!("Failed to serialize vocab response: {}", e),
        }
    }

    pub fn unknown_command(&self, line: &str) {
        self.line(&format!("UNKNOWN_COMMAND:{}", escape_payload(line)));
    }

    /// Last line before process exit.
    pub fn shutdown_finalized(&self) {
        self.line("BACKEND_SHUTDOWN_FINALIZED");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Shared byte sink for capturing writer output in tests.
    #[derive(Clone, Default)]
    struct Capture(Arc<StdMutex<Vec<u8>>>);

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

    #[test]
    fn payload_newlines_are_escaped() {
        assert_eq!(escape_payload("a\nb\r\nc"), "a\\nb\\r\\nc");
    }

    #[test]
    fn every_line_is_newline_terminated_and_single() {
        let capture = Capture::default();
        let writer = IpcWriter::sink(Box::new(capture.clone()));
        writer.final_transcript("first line\nsecond line");
        writer.proof_chunk("- bullet\n");
        writer.proof_end();

        let raw = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert!(raw.ends_with('\n'));
        let lines = capture.lines();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "FINAL_TRANSCRIPT:first line\\nsecond line");
        assert_eq!(lines[1], "STATUS:blue:PROOF_STREAM:chunk:- bullet\\n");
        assert_eq!(lines[2], "STATUS:black:PROOF_STREAM:end");
    }

    #[test]
    fn amplitude_is_clamped() {
        let capture = Capture::default();
        let writer = IpcWriter::sink(Box::new(capture.clone()));
        writer.amplitude(250);
        writer.amplitude(42);
        assert_eq!(capture.lines(), vec!["AUDIO_AMP:100", "AUDIO_AMP:42"]);
    }

    #[test]
    fn parses_simple_commands() {
        assert!(matches!(
            parse_command("STOP_DICTATION"),
            Ok(UiCommand::StopDictation)
        ));
        assert!(matches!(
            parse_command("start_proofread"),
            Ok(UiCommand::StartProofread)
        ));
        assert!(matches!(
            parse_command("SET_APP_STATE:true"),
            Ok(UiCommand::SetAppState(true))
        ));
        assert!(matches!(
            parse_command("SET_APP_STATE:False"),
            Ok(UiCommand::SetAppState(false))
        ));
    }

    #[test]
    fn parses_config_payload() {
        let cmd = parse_command(r#"CONFIG:{"selectedProofingModel":"gpt-oss:20b"}"#).unwrap();
        match cmd {
            UiCommand::Config(payload) => {
                assert_eq!(payload.selected_proofing_model.as_deref(), Some("gpt-oss:20b"));
            }
            other => panic!("expected Config, got {other:?}"),
        }
    }

    #[test]
    fn parses_vocabulary_api() {
        let cmd = parse_command(
            r#"VOCABULARY_API:msg-7:{"command":"learn_correction","data":{"original":"new motor ax","corrected":"pneumothorax"}}"#,
        )
        .unwrap();
        match cmd {
            UiCommand::Vocabulary { id, command, data } => {
                assert_eq!(id, "msg-7");
                assert_eq!(command, "learn_correction");
                assert_eq!(data["corrected"], "pneumothorax");
            }
            other => panic!("expected Vocabulary, got {other:?}"),
        }
    }

    #[test]
    fn malformed_lines_are_errors_not_panics() {
        assert!(matches!(
            parse_command("CONFIG:{not json"),
            Err(IpcError::MalformedLine(_))
        ));
        assert!(matches!(
            parse_command("SET_APP_STATE:maybe"),
            Err(IpcError::MalformedLine(_))
        ));
        assert!(matches!(
            parse_command("FROBNICATE"),
            Err(IpcError::UnknownCommand(_))
        ));
    }
}
