//! HTTP endpoint transcriber (file-style backend).
//!
//! Writes the dictation to a temporary WAV container, posts it as multipart
//! together with the hint, and parses `{"text": ...}` from the response. The
//! temp file is removed on every exit path via a drop guard.

use std::path::{Path, PathBuf};

use reqwest::multipart;
use tracing::{debug, warn};

use crate::config::{CHANNELS, SAMPLE_RATE};

use super::TranscribeError;

/// Temporary WAV file deleted when the guard drops.
struct TempWav {
    path: PathBuf,
}

impl TempWav {
    /// Write `pcm` as 16 kHz mono PCM16 WAV into the scratch folder.
    fn write(pcm: &[i16], folder: &Path) -> Result<Self, TranscribeError> {
        std::fs::create_dir_all(folder)
            .map_err(|e| TranscribeError::Engine(format!("temp folder: {e}")))?;
        let stamp = chrono::Utc::now().timestamp_millis();
        let path = folder.join(format!("dictation_{stamp}.wav"));

        let spec = hound::WavSpec {
            channels: CHANNELS,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec)
            .map_err(|e| TranscribeError::AudioFormatUnsupported(e.to_string()))?;
        // Guard from here on: a failed write must still remove the file.
        let guard = Self { path: path.clone() };
        for &sample in pcm {
            writer
                .write_sample(sample)
                .map_err(|e| TranscribeError::Engine(format!("wav write: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| TranscribeError::Engine(format!("wav finalize: {e}")))?;
        Ok(guard)
    }

    fn read(&self) -> Result<Vec<u8>, TranscribeError> {
        std::fs::read(&self.path).map_err(|e| TranscribeError::Engine(format!("wav read: {e}")))
    }
}

impl Drop for TempWav {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", self.path.display(), e);
            }
        }
    }
}

pub struct CloudTranscriber {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temp_dir: PathBuf,
    client: reqwest::Client,
}

impl CloudTranscriber {
    pub fn new(endpoint: &str, api_key: Option<String>, model: &str, temp_dir: PathBuf) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            api_key,
            model: model.to_string(),
            temp_dir,
            client: reqwest::Client::new(),
        }
    }

    pub async fn transcribe(&self, pcm: &[i16], hint: &str) -> Result<String, TranscribeError> {
        if pcm.is_empty() {
            return Ok(String::new());
        }

        let wav_bytes = {
            let temp = TempWav::write(pcm, &self.temp_dir)?;
            temp.read()?
            // temp dropped here; file removed before the network round-trip
        };
        debug!(
            bytes = wav_bytes.len(),
            endpoint = %self.endpoint,
            "Posting dictation audio for transcription"
        );

        let file_part = multipart::Part::bytes(wav_bytes)
            .file_name("dictation.wav")
            .mime_str("audio/wav")
            .map_err(|e| TranscribeError::Engine(e.to_string()))?;

        let form = multipart::Form::new()
            .text("model", self.model.clone())
            .text("prompt", hint.to_string())
            .part("file", file_part);

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TranscribeError::Engine(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TranscribeError::Engine(format!(
                "STT endpoint returned {status}: {body}"
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TranscribeError::Engine(e.to_string()))?;
        Ok(json["text"].as_str().unwrap_or("").to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_wav_is_removed_on_drop() {
        let dir = std::env::temp_dir().join(format!("scribe-test-{}", std::process::id()));
        let pcm: Vec<i16> = (0..480).map(|i| (i % 100) as i16).collect();
        let path = {
            let temp = TempWav::write(&pcm, &dir).unwrap();
            assert!(temp.path.exists());
            let bytes = temp.read().unwrap();
            // 44-byte RIFF header + 2 bytes per sample.
            assert_eq!(bytes.len(), 44 + pcm.len() * 2);
            temp.path.clone()
        };
        assert!(!path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
