//! Transcription of completed dictation buffers.
//!
//! Single-call contract: the adapter consumes one PCM16 concatenation plus a
//! free-form hint string and produces `(text, elapsed)` or a
//! `TranscribeError`. Empty text is not an error; the caller treats it as a
//! no-op delivery. Backends:
//! - streaming-style: local whisper.cpp (`whisper` feature), fed the PCM
//!   buffer directly
//! - file-style: a configured HTTP endpoint, fed a scoped temporary WAV

pub mod cloud;
pub mod whisper;

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::paths;

#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("no transcription engine available; configure an STT endpoint or local model")]
    ModelNotLoaded,
    #[error("unsupported audio format: {0}")]
    AudioFormatUnsupported(String),
    #[error("transcription engine failure: {0}")]
    Engine(String),
}

#[derive(Debug, Clone)]
pub struct Transcription {
    pub text: String,
    pub elapsed: Duration,
}

/// Enum dispatch over the supported backends; avoids dyn-compatibility
/// issues with async methods.
pub enum TranscriberAdapter {
    #[cfg(feature = "whisper")]
    Whisper(whisper::WhisperTranscriber),
    Cloud(cloud::CloudTranscriber),
}

impl TranscriberAdapter {
    pub async fn transcribe(
        &self,
        pcm: &[i16],
        hint: &str,
    ) -> Result<Transcription, TranscribeError> {
        let started = Instant::now();
        let text = match self {
            #[cfg(feature = "whisper")]
            Self::Whisper(engine) => engine.transcribe(pcm, hint).await?,
            Self::Cloud(engine) => engine.transcribe(pcm, hint).await?,
        };
        Ok(Transcription {
            text: text.trim().to_string(),
            elapsed: started.elapsed(),
        })
    }
}

/// Build a transcriber for the selected model.
///
/// Model ids containing "whisper" prefer the local engine when it is compiled
/// in and the GGML file exists in the models directory; anything else (or a
/// missing local model) falls through to the HTTP endpoint.
pub fn create_transcriber(
    model_id: &str,
    endpoint: Option<&str>,
    api_key: Option<&str>,
) -> Result<TranscriberAdapter, TranscribeError> {
    #[cfg(feature = "whisper")]
    {
        if model_id.to_lowercase().contains("whisper") {
            let model_path = paths::models_dir().join(format!("{model_id}.bin"));
            if model_path.exists() {
                return Ok(TranscriberAdapter::Whisper(
                    whisper::WhisperTranscriber::new(&model_path)?,
                ));
            }
        }
    }
    match endpoint {
        Some(url) => Ok(TranscriberAdapter::Cloud(cloud::CloudTranscriber::new(
            url,
            api_key.map(str::to_string),
            model_id,
            paths::temp_audio_dir(),
        ))),
        None => Err(TranscribeError::ModelNotLoaded),
    }
}
