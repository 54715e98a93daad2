//! Vosk streaming recognizer, behind the `wake-vosk` feature.
//!
//! When the feature is disabled the loader reports `ModelMissing` and the
//! system stays in `Preparing`; hotkeys and UI commands keep working.

use std::path::Path;

use super::{PhraseRecognizer, RecognizerError};

/// Subdirectory of the models dir holding the unpacked Vosk model.
pub const MODEL_DIR_NAME: &str = "vosk";

// ── wake-vosk enabled ────────────────────────────────────────────────
#[cfg(feature = "wake-vosk")]
mod inner {
    use std::path::Path;

    use tracing::info;
    use vosk::{DecodingState, Model, Recognizer};

    use super::super::{PhraseRecognizer, RecognizerError};
    use crate::config::SAMPLE_RATE;

    pub struct VoskRecognizer {
        recognizer: Recognizer,
    }

    impl VoskRecognizer {
        pub fn new(model_path: &Path) -> Result<Self, RecognizerError> {
            if !model_path.exists() {
                return Err(RecognizerError::ModelMissing(
                    model_path.display().to_string(),
                ));
            }
            let model = Model::new(model_path.display().to_string()).ok_or_else(|| {
                RecognizerError::ModelLoadFailed(format!(
                    "could not read model at {}",
                    model_path.display()
                ))
            })?;
            let mut recognizer =
                Recognizer::new(&model, SAMPLE_RATE as f32).ok_or_else(|| {
                    RecognizerError::ModelLoadFailed("recognizer construction failed".into())
                })?;
            // Only the final phrase matters for wake words.
            recognizer.set_words(false);

            info!(model = %model_path.display(), "Vosk model loaded");
            Ok(Self { recognizer })
        }
    }

    impl PhraseRecognizer for VoskRecognizer {
        fn accept_frame(&mut self, samples: &[i16]) -> Option<String> {
            match self.recognizer.accept_waveform(samples) {
                DecodingState::Finalized => self
                    .recognizer
                    .result()
                    .single()
                    .map(|r| r.text.to_string())
                    .filter(|t| !t.is_empty()),
                _ => None,
            }
        }

        fn reset(&mut self) {
            // Flush and discard any partial utterance.
            let _ = self.recognizer.final_result();
        }
    }

    pub fn load(model_dir: &Path) -> Result<Box<dyn PhraseRecognizer>, RecognizerError> {
        Ok(Box::new(VoskRecognizer::new(
            &model_dir.join(super::MODEL_DIR_NAME),
        )?))
    }
}

// ── wake-vosk disabled (stub) ────────────────────────────────────────
#[cfg(not(feature = "wake-vosk"))]
mod inner {
    use std::path::Path;

    use super::super::{PhraseRecognizer, RecognizerError};

    pub fn load(_model_dir: &Path) -> Result<Box<dyn PhraseRecognizer>, RecognizerError> {
        Err(RecognizerError::ModelMissing(
            "wake-word recognition is not available (compile with --features wake-vosk)".into(),
        ))
    }
}

/// Load the configured recognizer from the model directory.
pub fn load_recognizer(model_dir: &Path) -> Result<Box<dyn PhraseRecognizer>, RecognizerError> {
    inner::load(model_dir)
}
