//! Settings persistence and pipeline constants.
//!
//! Settings live in `user_settings.json` in the data directory. They are
//! loaded once at startup, merged when the UI delivers a `CONFIG:` line, and
//! persisted on change. Missing keys fall back to the compile-time defaults
//! below, so a partial or corrupt file never takes the backend down.

pub mod paths;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use paths::get_data_dir;

// --- Audio parameters ---
pub const SAMPLE_RATE: u32 = 16_000;
pub const FRAME_DURATION_MS: u32 = 30;
/// Samples per frame (480 at 16 kHz / 30 ms).
pub const FRAME_SIZE: usize = (SAMPLE_RATE as usize * FRAME_DURATION_MS as usize) / 1000;
pub const CHANNELS: u16 = 1;
/// Pre-roll kept so the leading edge of an utterance is not clipped.
pub const RING_BUFFER_DURATION_MS: u32 = 600;
/// Capture -> pipeline queue depth, drop-oldest on overflow.
pub const FRAME_QUEUE_CAPACITY: usize = 50;

/// Frames below this max amplitude bypass VAD and count as non-speech.
/// Must stay small: raising it past ~15 starts swallowing real speech.
pub const ESSENTIALLY_SILENT_MAX: i16 = 3;

/// Dictation buffers past this many frames get a periodic warning (5 min).
pub const LONG_DICTATION_WARN_FRAMES: usize = 10_000;

// --- Device retry ---
pub const RETRY_INITIAL_SECS: u64 = 1;
pub const RETRY_MAX_SECS: u64 = 30;

// --- LLM sampling ---
pub const LLM_TEMPERATURE: f32 = 0.1;
pub const LLM_TOP_P: f32 = 0.95;
pub const LLM_MAX_TOKENS: u32 = 4096;
/// Channel-tagged models loop easily; keep them on a short leash.
pub const LLM_CHANNEL_TEMPERATURE: f32 = 0.3;
pub const LLM_CHANNEL_MAX_TOKENS: u32 = 768;
/// Cap on reasoning characters forwarded to the UI thinking pane.
pub const MAX_THINKING_CHARS: usize = 600;

pub const DEFAULT_ASR_MODEL: &str = "whisper-large-v3-turbo";
pub const DEFAULT_LLM_MODEL: &str = "qwen3:8b";
pub const DEFAULT_LLM_ENDPOINT: &str = "http://127.0.0.1:11434";

pub const DEFAULT_TRANSCRIPTION_HINT: &str = "You are transcribing a professional medical \
encounter for documentation. Ensure the transcription is accurate and concise, and use \
appropriate clinical terminology when needed.";

pub const DEFAULT_PROOFREAD_PROMPT: &str = "You are proofreading text that will be entered \
into a professional medical document.\nCorrect any grammatical errors, spelling mistakes, \
or awkward phrasing.\nEnsure the text is clear, concise, and maintains clinical accuracy.";

pub const DEFAULT_LETTER_PROMPT: &str = "You are finalizing text that will be sent as a \
professional message.\nEnsure the text is grammatically correct, clear, concise, and \
maintains accuracy.\nFormat it appropriately for professional communication.\nReturn only \
the finalized message without adding any extra comments, context, or introductory phrases.";

/// Wake words by activation mode, as configured by the UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WakeWords {
    #[serde(default)]
    pub dictate: Vec<String>,
    #[serde(default)]
    pub proofread: Vec<String>,
    #[serde(default)]
    pub letter: Vec<String>,
}

impl Default for WakeWords {
    fn default() -> Self {
        Self {
            dictate: vec!["note".into(), "dictation".into(), "dictate".into()],
            proofread: vec!["proof".into(), "proofread".into()],
            letter: vec!["letter".into()],
        }
    }
}

fn default_asr_model() -> String {
    DEFAULT_ASR_MODEL.to_string()
}

fn default_llm_model() -> String {
    DEFAULT_LLM_MODEL.to_string()
}

fn default_llm_endpoint() -> String {
    DEFAULT_LLM_ENDPOINT.to_string()
}

fn default_proofing_prompt() -> String {
    DEFAULT_PROOFREAD_PROMPT.to_string()
}

fn default_letter_prompt() -> String {
    DEFAULT_LETTER_PROMPT.to_string()
}

fn default_filter_filler_words() -> bool {
    true
}

fn default_filler_words() -> Vec<String> {
    ["um", "uh", "ah", "er", "hmm", "mm", "mhm"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_vad_aggressiveness() -> u8 {
    1
}

fn default_silence_threshold_secs() -> f64 {
    1.5
}

fn default_ring_buffer_ms() -> u32 {
    RING_BUFFER_DURATION_MS
}

fn default_essentially_silent_max() -> i16 {
    ESSENTIALLY_SILENT_MAX
}

fn default_conflict_silence_secs() -> f64 {
    2.0
}

/// Persisted user settings. Field names match the JSON the UI reads/writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub selected_asr_model: String,
    pub selected_proofing_model: String,
    pub selected_letter_model: String,
    pub proofing_prompt: String,
    pub letter_prompt: String,
    pub wake_words: WakeWords,
    pub filter_filler_words: bool,
    pub filler_words: Vec<String>,
    /// VAD aggressiveness 0 (permissive) .. 3 (strict).
    pub vad_aggressiveness: u8,
    pub silence_threshold_secs: f64,
    pub ring_buffer_ms: u32,
    pub essentially_silent_max: i16,
    pub conflict_silence_secs: f64,
    pub llm_endpoint: String,
    pub stt_endpoint: Option<String>,
    pub stt_api_key: Option<String>,
    pub input_device: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            selected_asr_model: default_asr_model(),
            selected_proofing_model: default_llm_model(),
            selected_letter_model: default_llm_model(),
            proofing_prompt: default_proofing_prompt(),
            letter_prompt: default_letter_prompt(),
            wake_words: WakeWords::default(),
            filter_filler_words: default_filter_filler_words(),
            filler_words: default_filler_words(),
            vad_aggressiveness: default_vad_aggressiveness(),
            silence_threshold_secs: default_silence_threshold_secs(),
            ring_buffer_ms: default_ring_buffer_ms(),
            essentially_silent_max: default_essentially_silent_max(),
            conflict_silence_secs: default_conflict_silence_secs(),
            llm_endpoint: default_llm_endpoint(),
            stt_endpoint: None,
            stt_api_key: None,
            input_device: None,
        }
    }
}

/// Subset of keys the UI may deliver in a `CONFIG:{json}` line.
/// Everything is optional; absent keys leave the current settings untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPayload {
    pub selected_asr_model: Option<String>,
    pub selected_proofing_model: Option<String>,
    pub selected_letter_model: Option<String>,
    pub proofing_prompt: Option<String>,
    pub letter_prompt: Option<String>,
    pub wake_words: Option<WakeWords>,
    pub filter_filler_words: Option<bool>,
    pub filler_words: Option<Vec<String>>,
    pub llm_endpoint: Option<String>,
    pub stt_endpoint: Option<String>,
    pub stt_api_key: Option<String>,
    pub input_device: Option<String>,
}

/// What a `CONFIG:` ingestion actually changed, for follow-up IPC.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ConfigApplied {
    pub proofing_model: Option<String>,
    pub letter_model: Option<String>,
    pub wake_words_changed: bool,
}

impl Settings {
    /// Merge a UI config payload into the current settings.
    pub fn apply(&mut self, payload: ConfigPayload) -> ConfigApplied {
        let mut applied = ConfigApplied::default();

        if let Some(m) = payload.selected_asr_model {
            self.selected_asr_model = m;
        }
        if let Some(m) = payload.selected_proofing_model {
            if m != self.selected_proofing_model {
                applied.proofing_model = Some(m.clone());
            }
            self.selected_proofing_model = m;
        }
        if let Some(m) = payload.selected_letter_model {
            if m != self.selected_letter_model {
                applied.letter_model = Some(m.clone());
            }
            self.selected_letter_model = m;
        }
        if let Some(p) = payload.proofing_prompt {
            self.proofing_prompt = p;
        }
        if let Some(p) = payload.letter_prompt {
            self.letter_prompt = p;
        }
        if let Some(w) = payload.wake_words {
            applied.wake_words_changed = w != self.wake_words;
            self.wake_words = w;
        }
        if let Some(f) = payload.filter_filler_words {
            self.filter_filler_words = f;
        }
        if let Some(f) = payload.filler_words {
            self.filler_words = f;
        }
        if let Some(e) = payload.llm_endpoint {
            self.llm_endpoint = e;
        }
        if payload.stt_endpoint.is_some() {
            self.stt_endpoint = payload.stt_endpoint;
        }
        if payload.stt_api_key.is_some() {
            self.stt_api_key = payload.stt_api_key;
        }
        if payload.input_device.is_some() {
            self.input_device = payload.input_device;
        }

        applied
    }
}

/// Path to the persisted settings file.
pub fn settings_path() -> PathBuf {
    get_data_dir().join("user_settings.json")
}

/// Load settings from disk, falling back to defaults on any failure.
pub fn load_settings() -> Settings {
    let path = settings_path();
    match std::fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str::<Settings>(&contents) {
            Ok(settings) => {
                info!(path = %path.display(), "Settings loaded");
                settings
            }
            Err(e) => {
                warn!("Failed to parse {}: {}; using defaults", path.display(), e);
                Settings::default()
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}; using defaults", path.display(), e);
            }
            Settings::default()
        }
    }
}

/// Persist settings to disk. Failures are logged, never fatal.
pub fn save_settings(settings: &Settings) {
    let path = settings_path();
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!("Failed to create {}: {}", parent.display(), e);
            return;
        }
    }
    match serde_json::to_string_pretty(settings) {
        Ok(json) => {
            if let Err(e) = std::fs::write(&path, json) {
                warn!("Failed to write {}: {}", path.display(), e);
            }
        }
        Err(e) => warn!("Failed to serialize settings: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_restore_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"selectedAsrModel": "parakeet-tdt-0.6b"}"#).unwrap();
        assert_eq!(settings.selected_asr_model, "parakeet-tdt-0.6b");
        assert_eq!(settings.selected_proofing_model, DEFAULT_LLM_MODEL);
        assert!(settings.filter_filler_words);
        assert_eq!(settings.wake_words, WakeWords::default());
    }

    #[test]
    fn apply_reports_model_changes() {
        let mut settings = Settings::default();
        let payload: ConfigPayload = serde_json::from_str(
            r#"{"selectedProofingModel": "gpt-oss:20b", "proofingPrompt": "fix it"}"#,
        )
        .unwrap();
        let applied = settings.apply(payload);
        assert_eq!(applied.proofing_model.as_deref(), Some("gpt-oss:20b"));
        assert_eq!(applied.letter_model, None);
        assert_eq!(settings.proofing_prompt, "fix it");
    }

    #[test]
    fn apply_same_model_is_not_a_change() {
        let mut settings = Settings::default();
        let payload = ConfigPayload {
            selected_letter_model: Some(settings.selected_letter_model.clone()),
            ..Default::default()
        };
        assert_eq!(settings.apply(payload), ConfigApplied::default());
    }
}
