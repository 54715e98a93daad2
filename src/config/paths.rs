//! Filesystem layout for persisted state.
//!
//! Everything the backend writes lives under one per-user root: settings,
//! learned vocabulary and its corrections log, downloaded models, scratch
//! dictation audio, and the log file. The UI shell reads the same tree when
//! importing or exporting vocabulary.

use std::path::PathBuf;

/// Per-user data root: `<platform data dir>/scribe-core`.
pub fn get_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("scribe-core")
}

/// Unpacked wake-word and ASR models.
pub fn models_dir() -> PathBuf {
    get_data_dir().join("models")
}

/// Scratch WAV files handed to the file-style transcriber.
pub fn temp_audio_dir() -> PathBuf {
    get_data_dir().join("temp_audio")
}

/// Importable vocabulary template files.
pub fn vocabulary_templates_dir() -> PathBuf {
    get_data_dir().join("vocabulary_templates")
}
