//! Local whisper.cpp transcription via whisper-rs (streaming-style backend).
//!
//! Gated behind the `whisper` feature; without it the factory simply never
//! offers this backend.

#[cfg(feature = "whisper")]
mod inner {
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use tracing::info;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    use crate::stt::TranscribeError;

    /// Below ~0.4 s of audio whisper tends to hallucinate; return empty.
    const MIN_SAMPLES: usize = 6_400;

    /// Context cell moved between worker threads.
    struct CtxCell(Mutex<WhisperContext>);

    // SAFETY: inference access is serialized through the mutex; the context
    // itself holds no thread-affine state.
    unsafe impl Send for CtxCell {}
    unsafe impl Sync for CtxCell {}

    pub struct WhisperTranscriber {
        ctx: Arc<CtxCell>,
    }

    impl WhisperTranscriber {
        pub fn new(model_path: &Path) -> Result<Self, TranscribeError> {
            if !model_path.exists() {
                return Err(TranscribeError::ModelNotLoaded);
            }
            let params = WhisperContextParameters::default();
            let ctx = WhisperContext::new_with_params(
                model_path.to_str().unwrap_or_default(),
                params,
            )
            .map_err(|e| TranscribeError::Engine(format!("whisper model load: {e}")))?;

            info!(model = %model_path.display(), "Whisper model loaded");
            Ok(Self {
                ctx: Arc::new(CtxCell(Mutex::new(ctx))),
            })
        }

        pub async fn transcribe(&self, pcm: &[i16], hint: &str) -> Result<String, TranscribeError> {
            if pcm.len() < MIN_SAMPLES {
                return Ok(String::new());
            }

            let audio: Vec<f32> = pcm.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
            let hint = hint.to_string();
            let ctx = Arc::clone(&self.ctx);

            tokio::task::spawn_blocking(move || {
                let ctx = ctx
                    .0
                    .lock()
                    .map_err(|_| TranscribeError::Engine("whisper context poisoned".into()))?;
                let mut state = ctx
                    .create_state()
                    .map_err(|e| TranscribeError::Engine(format!("whisper state: {e}")))?;

                let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
                params.set_language(Some("en"));
                params.set_initial_prompt(&hint);
                params.set_print_special(false);
                params.set_print_progress(false);
                params.set_print_realtime(false);
                params.set_print_timestamps(false);
                params.set_no_timestamps(true);

                state
                    .full(params, &audio)
                    .map_err(|e| TranscribeError::Engine(format!("whisper inference: {e}")))?;

                let num_segments = state
                    .full_n_segments()
                    .map_err(|e| TranscribeError::Engine(format!("whisper segments: {e}")))?;
                let mut text = String::new();
                for i in 0..num_segments {
                    if let Ok(segment) = state.full_get_segment_text(i) {
                        if !text.is_empty() {
                            text.push(' ');
                        }
                        text.push_str(segment.trim());
                    }
                }
                Ok(text)
            })
            .await
            .map_err(|e| TranscribeError::Engine(format!("whisper task join: {e}")))?
        }
    }
}

#[cfg(feature = "whisper")]
pub use inner::WhisperTranscriber;
