//! Application orchestration.
//!
//! Owns the shared state and handles every event source the main loop
//! selects over: UI commands from stdin, global hotkeys, capture supervisor
//! events, recognizer loader events, and completed dictation buffers from
//! the pipeline. Transcription and LLM shaping run as spawned tasks, one per
//! dictation, guarded by a session epoch: aborting bumps the epoch and any
//! in-flight result whose epoch is stale is discarded without delivery.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, RwLock};

use tracing::{error, info, warn};

use crate::audio::AudioEvent;
use crate::config::{save_settings, ConfigPayload, Settings, DEFAULT_TRANSCRIPTION_HINT};
use crate::delivery::{deliver_text, DeliveryOutcome};
use crate::hotkey::{hotkey_map, HotkeyCommand};
use crate::ipc::{IpcWriter, StatusColor, UiCommand};
use crate::llm::shaping::run_shaping;
use crate::llm::{LlmClient, ModelInfo};
use crate::pipeline::{PipelineCommand, PipelineEvent, VadParams};
use crate::session::{Mode, SessionState, SessionStateMachine, StateSnapshot};
use crate::stt::create_transcriber;
use crate::text::FillerWordFilter;
use crate::vocabulary::{api as vocab_api, VocabularyStore};
use crate::wake_word::{RecognizerEvent, RecognizerSlot, WakeWordTable};

pub struct App {
    pub settings: Arc<RwLock<Settings>>,
    pub state: Arc<SessionStateMachine>,
    pub ipc: Arc<IpcWriter>,
    pub vocabulary: Arc<RwLock<VocabularyStore>>,
    pub wake_table: Arc<RwLock<WakeWordTable>>,
    pub recognizer: Arc<RecognizerSlot>,
    pub epoch: Arc<AtomicU64>,
    /// Cancel flag of the in-flight shaping job, if any.
    shaping_cancel: Mutex<Option<Arc<AtomicBool>>>,
    pub pipeline_tx: std_mpsc::Sender<PipelineCommand>,
    pub stop: Arc<AtomicBool>,
}

impl App {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        state: Arc<SessionStateMachine>,
        ipc: Arc<IpcWriter>,
        vocabulary: VocabularyStore,
        recognizer: Arc<RecognizerSlot>,
        epoch: Arc<AtomicU64>,
        pipeline_tx: std_mpsc::Sender<PipelineCommand>,
        stop: Arc<AtomicBool>,
    ) -> Arc<Self> {
        let wake_table = Arc::new(RwLock::new(WakeWordTable::build(&settings.wake_words)));
        Arc::new(Self {
            settings: Arc::new(RwLock::new(settings)),
            state,
            ipc,
            vocabulary: Arc::new(RwLock::new(vocabulary)),
            wake_table,
            recognizer,
            epoch,
            shaping_cancel: Mutex::new(None),
            pipeline_tx,
            stop,
        })
    }

    /// Wire the IPC emitter into the state machine: every transition becomes
    /// a `STATE:` snapshot plus the matching human-readable `STATUS:` line.
    pub fn install_state_observer(self: &Arc<Self>) {
        let ipc = self.ipc.clone();
        self.state.subscribe(Box::new(move |snapshot: &StateSnapshot| {
            ipc.state(snapshot);
            let (color, text) = status_for(snapshot);
            ipc.status(color, &text);
        }));
    }

    // ── UI commands ──────────────────────────────────────────────────

    /// Handle one inbound command. Returns false when the loop should exit.
    pub fn handle_ui_command(self: &Arc<Self>, command: UiCommand) -> bool {
        match command {
            UiCommand::GetConfig => self.ipc.request_config(),
            UiCommand::Config(payload) => self.apply_config(payload),
            UiCommand::ModelsRequest => self.send_models_list(),
            UiCommand::StartDictate => self.start_mode(Mode::Dictate),
            UiCommand::StartProofread => self.start_mode(Mode::Proofread),
            UiCommand::StartLetter => self.start_mode(Mode::Letter),
            UiCommand::StopDictation => self.stop_dictation(),
            UiCommand::AbortDictation => self.abort_dictation(),
            UiCommand::ToggleActive => self.toggle_active(),
            UiCommand::SetAppState(active) => self.set_active(active),
            UiCommand::GetHotkeys => self.send_hotkeys(),
            UiCommand::Vocabulary { id, command, data } => {
                self.handle_vocabulary(&id, &command, &data)
            }
            UiCommand::RestartApp => {
                self.restart();
                return false;
            }
            UiCommand::Shutdown => {
                info!("Shutdown command received from UI");
                return false;
            }
        }
        true
    }

    pub fn handle_hotkey(self: &Arc<Self>, command: HotkeyCommand) {
        info!(command = command.as_str(), "Hotkey");
        match command {
            HotkeyCommand::ToggleActive => self.toggle_active(),
            HotkeyCommand::Restart => self.restart(),
            HotkeyCommand::ShowHotkeys => self.send_hotkeys(),
            HotkeyCommand::StartDictate
            | HotkeyCommand::StartProofread
            | HotkeyCommand::StartLetter => {
                if !self.state.current().program_active() {
                    self.ipc.status(
                        StatusColor::Orange,
                        &format!("Program inactive, hotkey '{}' ignored.", command.as_str()),
                    );
                    return;
                }
                let mode = match command {
                    HotkeyCommand::StartDictate => Mode::Dictate,
                    HotkeyCommand::StartProofread => Mode::Proofread,
                    _ => Mode::Letter,
                };
                self.start_mode(mode);
            }
            HotkeyCommand::StopDictate => self.stop_dictation(),
            HotkeyCommand::AbortDictate => self.abort_dictation(),
        }
    }

    // ── session control ──────────────────────────────────────────────

    fn start_mode(self: &Arc<Self>, mode: Mode) {
        match self.state.current() {
            SessionState::Dictation(_) => {
                self.ipc
                    .status(StatusColor::Orange, "Already dictating, ignoring start command.");
            }
            SessionState::Processing(_) => {
                self.ipc
                    .status(StatusColor::Orange, "Currently processing, ignoring start command.");
            }
            SessionState::Activation => {
                if self.state.try_begin_dictation(mode) {
                    self.ipc.status(
                        StatusColor::Green,
                        &format!("Dictation started ({} mode).", mode.as_str()),
                    );
                }
            }
            SessionState::Inactive | SessionState::Preparing => {
                self.ipc.status(
                    StatusColor::Orange,
                    "Program is not listening yet; start command ignored.",
                );
            }
        }
    }

    fn stop_dictation(self: &Arc<Self>) {
        let _ = self.pipeline_tx.send(PipelineCommand::StopDictation);
    }

    fn abort_dictation(self: &Arc<Self>) {
        // Invalidate in-flight work first so late results become no-ops.
        self.epoch.fetch_add(1, Ordering::AcqRel);
        if let Some(cancel) = self.shaping_cancel.lock().unwrap().take() {
            cancel.store(true, Ordering::Release);
        }
        let _ = self.pipeline_tx.send(PipelineCommand::ResetBuffers);
        if self.state.abort_to_activation() {
            self.ipc
                .status(StatusColor::Orange, "Aborting current dictation/processing.");
        } else {
            self.ipc
                .status(StatusColor::Blue, "No active dictation/processing to abort.");
        }
    }

    fn toggle_active(self: &Arc<Self>) {
        match self.state.current() {
            SessionState::Inactive => self.set_active(true),
            _ => self.set_active(false),
        }
    }

    fn set_active(self: &Arc<Self>, active: bool) {
        if active {
            if self.recognizer.is_ready() {
                self.state.set_activation();
            } else {
                self.state.set_preparing();
            }
        } else {
            self.epoch.fetch_add(1, Ordering::AcqRel);
            if let Some(cancel) = self.shaping_cancel.lock().unwrap().take() {
                cancel.store(true, Ordering::Release);
            }
            let _ = self.pipeline_tx.send(PipelineCommand::ResetBuffers);
            self.state.set_inactive(None);
        }
    }

    // ── configuration ────────────────────────────────────────────────

    fn apply_config(self: &Arc<Self>, payload: ConfigPayload) {
        let (applied, snapshot) = {
            let mut settings = self.settings.write().unwrap();
            let applied = settings.apply(payload);
            (applied, settings.clone())
        };
        save_settings(&snapshot);

        if applied.wake_words_changed {
            *self.wake_table.write().unwrap() = WakeWordTable::build(&snapshot.wake_words);
        }
        let _ = self
            .pipeline_tx
            .send(PipelineCommand::UpdateVad(VadParams::from(&snapshot)));

        if let Some(model) = &applied.proofing_model {
            self.ipc.model_selected("proof", model);
        }
        if let Some(model) = &applied.letter_model {
            self.ipc.model_selected("letter", model);
        }

        self.ipc.status(StatusColor::Grey, "Configuration applied.");
        self.state.rebroadcast();
    }

    fn send_models_list(self: &Arc<Self>) {
        let app = self.clone();
        tokio::spawn(async move {
            let (endpoint, proofing, letter) = {
                let settings = app.settings.read().unwrap();
                (
                    settings.llm_endpoint.clone(),
                    settings.selected_proofing_model.clone(),
                    settings.selected_letter_model.clone(),
                )
            };
            let mut models = LlmClient::new(&endpoint).list_models().await;
            if models.is_empty() {
                // Server unreachable: at least advertise the configured picks.
                models.push(ModelInfo {
                    id: proofing.clone(),
                    name: proofing.clone(),
                });
                if letter != proofing {
                    models.push(ModelInfo {
                        id: letter.clone(),
                        name: letter,
                    });
                }
            }
            app.ipc.models_list(&models);
        });
    }

    fn send_hotkeys(self: &Arc<Self>) {
        self.ipc.hotkeys(&hotkey_map());
    }

    fn handle_vocabulary(self: &Arc<Self>, id: &str, command: &str, data: &serde_json::Value) {
        let result = {
            let mut store = self.vocabulary.write().unwrap();
            vocab_api::handle_command(&mut store, command, data)
        };
        self.ipc.vocab_response(id, &result);
    }

    fn restart(self: &Arc<Self>) {
        info!("Restart requested");
        self.ipc.status(StatusColor::Orange, "Restarting...");
        self.stop.store(true, Ordering::Release);
        self.ipc.shutdown_finalized();

        let exe = match std::env::current_exe() {
            Ok(exe) => exe,
            Err(e) => {
                error!("Restart failed to locate executable: {}", e);
                std::process::exit(1);
            }
        };
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            let err = std::process::Command::new(&exe).exec();
            error!("Restart exec failed: {}", err);
            std::process::exit(1);
        }
        #[cfg(not(unix))]
        {
            if let Err(e) = std::process::Command::new(&exe).spawn() {
                error!("Restart spawn failed: {}", e);
                std::process::exit(1);
            }
            std::process::exit(0);
        }
    }

    // ── device / recognizer events ───────────────────────────────────

    pub fn handle_audio_event(self: &Arc<Self>, event: AudioEvent) {
        match event {
            AudioEvent::DeviceReady => {
                info!("Audio device ready");
                if self.recognizer.is_ready() {
                    self.state.set_activation();
                } else {
                    self.state.set_preparing();
                }
            }
            AudioEvent::DeviceLost { error, advisory } => {
                self.epoch.fetch_add(1, Ordering::AcqRel);
                if let Some(cancel) = self.shaping_cancel.lock().unwrap().take() {
                    cancel.store(true, Ordering::Release);
                }
                let _ = self.pipeline_tx.send(PipelineCommand::ResetBuffers);
                self.state.set_inactive(Some(error.clone()));
                self.ipc.status(StatusColor::Red, &error);
                if let Some(advisory) = advisory {
                    self.ipc.status(StatusColor::Orange, &advisory);
                }
            }
        }
    }

    pub fn handle_recognizer_event(self: &Arc<Self>, event: RecognizerEvent) {
        match event {
            RecognizerEvent::Ready => {
                if matches!(self.state.current(), SessionState::Preparing) {
                    self.state.set_activation();
                }
            }
            RecognizerEvent::LoadFailed(message) => {
                self.ipc.status(
                    StatusColor::Red,
                    &format!("Wake-word model failed to load: {message}"),
                );
                self.ipc.status(
                    StatusColor::Orange,
                    "Wake words are unavailable; hotkeys and UI buttons still work.",
                );
            }
        }
    }

    // ── dictation processing ─────────────────────────────────────────

    pub fn handle_pipeline_event(self: &Arc<Self>, event: PipelineEvent) {
        let PipelineEvent::SpeechEnded {
            buffer,
            mode,
            epoch,
        } = event;
        let app = self.clone();
        tokio::spawn(async move {
            app.process_dictation(buffer, mode, epoch).await;
        });
    }

    fn epoch_is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Acquire) == epoch
    }

    async fn process_dictation(
        self: Arc<Self>,
        buffer: crate::audio::DictationBuffer,
        mode: Mode,
        epoch: u64,
    ) {
        if !self.epoch_is_current(epoch) {
            info!("Dictation was aborted before processing began");
            return;
        }
        let pcm = buffer.concat();
        info!(
            samples = pcm.len(),
            seconds = buffer.duration_secs(),
            mode = mode.as_str(),
            "Transcribing dictation"
        );
        self.ipc
            .status(StatusColor::Orange, "Speech ended. Transcribing...");

        let (asr_model, stt_endpoint, stt_api_key) = {
            let settings = self.settings.read().unwrap();
            (
                settings.selected_asr_model.clone(),
                settings.stt_endpoint.clone(),
                settings.stt_api_key.clone(),
            )
        };

        let transcriber = match create_transcriber(
            &asr_model,
            stt_endpoint.as_deref(),
            stt_api_key.as_deref(),
        ) {
            Ok(t) => t,
            Err(e) => {
                error!("Transcriber unavailable: {e}");
                self.ipc.transcription_error(&e.to_string());
                self.ipc.status(StatusColor::Red, &e.to_string());
                self.state.finish_processing();
                return;
            }
        };

        let result = transcriber
            .transcribe(&pcm, DEFAULT_TRANSCRIPTION_HINT)
            .await;

        if !self.epoch_is_current(epoch) {
            info!("Discarding transcription result from aborted session");
            return;
        }

        let transcription = match result {
            Ok(t) => t,
            Err(e) => {
                error!("Transcription failed: {e}");
                self.ipc.transcription_error(&e.to_string());
                self.ipc.status(StatusColor::Red, &e.to_string());
                self.state.finish_processing();
                return;
            }
        };

        if transcription.text.is_empty() {
            self.ipc
                .status(StatusColor::Orange, "Transcription returned empty.");
            self.state.finish_processing();
            return;
        }
        info!(
            elapsed_secs = transcription.elapsed.as_secs_f64(),
            "Transcription complete"
        );

        // Vocabulary correction, then filler-word filtering.
        let corrected = {
            let mut vocabulary = self.vocabulary.write().unwrap();
            let (corrected, applied) = vocabulary.apply_corrections(&transcription.text);
            if !applied.is_empty() {
                info!(corrections = applied.len(), "Applied vocabulary corrections");
            }
            corrected
        };
        let processed = {
            let settings = self.settings.read().unwrap();
            FillerWordFilter::new(settings.filter_filler_words, &settings.filler_words)
                .clean(&corrected)
        };

        if processed.is_empty() {
            self.ipc
                .status(StatusColor::Orange, "Transcription returned empty.");
            self.state.finish_processing();
            return;
        }

        self.ipc.final_transcript(&processed);

        match mode {
            Mode::Dictate => {
                self.deliver(&processed).await;
                self.ipc
                    .status(StatusColor::Green, "Transcription complete.");
                self.state.finish_processing();
            }
            Mode::Proofread | Mode::Letter => {
                self.shape_and_deliver(mode, &processed, epoch).await;
            }
        }
    }

    async fn shape_and_deliver(self: &Arc<Self>, mode: Mode, text: &str, epoch: u64) {
        let (endpoint, model, template) = {
            let settings = self.settings.read().unwrap();
            match mode {
                Mode::Letter => (
                    settings.llm_endpoint.clone(),
                    settings.selected_letter_model.clone(),
                    settings.letter_prompt.clone(),
                ),
                _ => (
                    settings.llm_endpoint.clone(),
                    settings.selected_proofing_model.clone(),
                    settings.proofing_prompt.clone(),
                ),
            }
        };

        self.ipc.status(
            StatusColor::Orange,
            &format!("Processing with LLM ({} mode)...", mode.as_str()),
        );

        let cancel = Arc::new(AtomicBool::new(false));
        *self.shaping_cancel.lock().unwrap() = Some(cancel.clone());
        self.state.set_proofing_active(true);

        let llm = LlmClient::new(&endpoint);
        let outcome = run_shaping(&llm, &model, mode, &template, text, &self.ipc, &cancel).await;

        self.state.set_proofing_active(false);
        self.shaping_cancel.lock().unwrap().take();

        if !self.epoch_is_current(epoch) {
            info!("Discarding LLM result from aborted session");
            return;
        }

        let label = if mode == Mode::Letter { "LETTER" } else { "PROOFED" };
        match outcome {
            Ok(Some(shaped)) if !shaped.is_empty() => {
                self.ipc.transcription_result(label, &shaped);
                self.deliver(&shaped).await;
                self.ipc.status(
                    StatusColor::Green,
                    &format!("LLM processing complete ({}).", mode.as_str()),
                );
                self.state.finish_processing();
            }
            Ok(Some(_)) => {
                warn!("LLM produced empty text after post-processing");
                self.ipc
                    .status(StatusColor::Orange, "LLM returned empty text.");
                self.state.finish_processing();
            }
            Ok(None) => {
                // Aborted mid-stream; the abort path already reset the state.
                info!("Shaping job cancelled");
            }
            Err(e) => {
                error!("LLM processing failed: {e}");
                self.ipc.transcription_error(&e.to_string());
                self.ipc
                    .status(StatusColor::Red, &format!("LLM Error ({}): {e}", mode.as_str()));
                self.state.finish_processing();
            }
        }
    }

    /// Clipboard + paste, with the trailing space the original always added.
    async fn deliver(self: &Arc<Self>, text: &str) {
        self.ipc
            .status(StatusColor::Blue, "Sending to target application...");
        let payload = format!("{text} ");
        let outcome = tokio::task::spawn_blocking(move || deliver_text(&payload)).await;
        match outcome {
            Ok(Ok(DeliveryOutcome::Pasted)) => {}
            Ok(Ok(DeliveryOutcome::ClipboardOnly)) => {
                self.ipc.status(
                    StatusColor::Blue,
                    "Copied to clipboard (paste keystroke unavailable).",
                );
            }
            Ok(Err(e)) => {
                error!("Delivery failed: {e}");
                self.ipc
                    .status(StatusColor::Red, &format!("Delivery failed: {e}"));
            }
            Err(e) => error!("Delivery task panicked: {e}"),
        }
    }
}

/// Human-readable status for a state snapshot, per the color contract.
fn status_for(snapshot: &StateSnapshot) -> (StatusColor, String) {
    match snapshot.audio_state {
        "activation" => (
            StatusColor::Blue,
            "Listening for activation words...".to_string(),
        ),
        "dictation" => {
            let suffix = snapshot
                .current_mode
                .map(|mode| format!(" ({mode} mode)"))
                .unwrap_or_default();
            (
                StatusColor::Green,
                format!("Listening for dictation...{suffix}"),
            )
        }
        "processing" => (StatusColor::Orange, "Processing audio...".to_string()),
        "preparing" => (
            StatusColor::Grey,
            "Preparing to listen (initializing audio/recognizer)...".to_string(),
        ),
        _ => {
            if snapshot.microphone_error.is_some() {
                (
                    StatusColor::Orange,
                    "Microphone not available (hotkeys still work).".to_string(),
                )
            } else {
                (StatusColor::Grey, "Microphone is not listening.".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(audio_state: &'static str, mode: Option<&'static str>) -> StateSnapshot {
        StateSnapshot {
            program_active: matches!(audio_state, "activation" | "dictation" | "processing"),
            audio_state,
            is_dictating: audio_state == "dictation",
            is_proofing_active: false,
            can_dictate: audio_state == "activation",
            current_mode: mode,
            microphone_error: None,
        }
    }

    #[test]
    fn status_colors_follow_state_contract() {
        assert_eq!(status_for(&snapshot("activation", None)).0, StatusColor::Blue);
        assert_eq!(
            status_for(&snapshot("dictation", Some("proofread"))).0,
            StatusColor::Green
        );
        assert_eq!(
            status_for(&snapshot("processing", Some("proofread"))).0,
            StatusColor::Orange
        );
        assert_eq!(status_for(&snapshot("preparing", None)).0, StatusColor::Grey);
        assert_eq!(status_for(&snapshot("inactive", None)).0, StatusColor::Grey);
    }

    #[test]
    fn dictation_status_carries_the_mode() {
        let (_, text) = status_for(&snapshot("dictation", Some("letter")));
        assert!(text.contains("(letter mode)"));
    }

    #[test]
    fn microphone_error_turns_inactive_orange() {
        let mut snap = snapshot("inactive", None);
        snap.microphone_error = Some("in use".into());
        assert_eq!(status_for(&snap).0, StatusColor::Orange);
    }
}
