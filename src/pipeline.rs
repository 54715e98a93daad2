//! Pipeline worker.
//!
//! Single-threaded consumer of the capture queue. Routes frames by session
//! state: to the wake-word recognizer in Activation, through VAD into the
//! dictation buffer in Dictation, and to the floor in Processing. Executes
//! the state transitions it observes (wake-word hit, silence timeout, forced
//! stop) under the state machine's mutex, and hands completed buffers to the
//! application loop by value. It never performs transcription or LLM work.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audio::conflict::check_for_audio_conflicts;
use crate::audio::{AudioFrame, DictationBuffer, FrameQueue, PreRollBuffer};
use crate::config::{Settings, FRAME_DURATION_MS};
use crate::ipc::{IpcWriter, StatusColor};
use crate::session::{Mode, SessionState, SessionStateMachine};
use crate::vad::Vad;
use crate::wake_word::{RecognizerSlot, WakeWordTable};

/// Audio held while the recognizer is still loading (2 s, drop-oldest).
const PREPARING_HOLD_FRAMES: usize = (2_000 / FRAME_DURATION_MS) as usize;

/// VAD and segmentation tuning, derived from settings.
#[derive(Debug, Clone)]
pub struct VadParams {
    pub aggressiveness: u8,
    pub essentially_silent_max: i16,
    pub silence_threshold_secs: f64,
    pub ring_buffer_ms: u32,
    pub conflict_silence_secs: f64,
}

impl From<&Settings> for VadParams {
    fn from(settings: &Settings) -> Self {
        Self {
            aggressiveness: settings.vad_aggressiveness,
            essentially_silent_max: settings.essentially_silent_max,
            silence_threshold_secs: settings.silence_threshold_secs,
            ring_buffer_ms: settings.ring_buffer_ms,
            conflict_silence_secs: settings.conflict_silence_secs,
        }
    }
}

/// Control inputs from the application loop.
#[derive(Debug)]
pub enum PipelineCommand {
    /// End dictation now and process whatever is buffered.
    StopDictation,
    /// Drop all buffered audio (abort, device loss).
    ResetBuffers,
    /// Re-tune VAD and segmentation.
    UpdateVad(VadParams),
}

/// Outputs to the application loop.
#[derive(Debug)]
pub enum PipelineEvent {
    /// An utterance completed; the buffer is moved out for transcription.
    SpeechEnded {
        buffer: DictationBuffer,
        mode: Mode,
        epoch: u64,
    },
}

pub struct Pipeline {
    queue: Arc<FrameQueue>,
    state: Arc<SessionStateMachine>,
    recognizer: Arc<RecognizerSlot>,
    wake_table: Arc<RwLock<WakeWordTable>>,
    commands: std_mpsc::Receiver<PipelineCommand>,
    events: mpsc::UnboundedSender<PipelineEvent>,
    ipc: Arc<IpcWriter>,
    amp_tx: std_mpsc::SyncSender<u8>,
    stop: Arc<AtomicBool>,
    epoch: Arc<AtomicU64>,

    vad: Vad,
    params: VadParams,
    pre_roll: PreRollBuffer,
    dictation: DictationBuffer,
    triggered: bool,
    silence_run_frames: usize,
    /// Consecutive all-zero frames seen while dictating.
    zero_frames: usize,
    conflict_warned: bool,
    /// Audio held back while the recognizer loads.
    hold: VecDeque<AudioFrame>,
}

#[allow(clippy::too_many_arguments)]
impl Pipeline {
    pub fn new(
        queue: Arc<FrameQueue>,
        state: Arc<SessionStateMachine>,
        recognizer: Arc<RecognizerSlot>,
        wake_table: Arc<RwLock<WakeWordTable>>,
        commands: std_mpsc::Receiver<PipelineCommand>,
        events: mpsc::UnboundedSender<PipelineEvent>,
        ipc: Arc<IpcWriter>,
        amp_tx: std_mpsc::SyncSender<u8>,
        stop: Arc<AtomicBool>,
        epoch: Arc<AtomicU64>,
        params: VadParams,
    ) -> Self {
        let vad = Vad::new(params.aggressiveness, params.essentially_silent_max);
        let pre_roll = PreRollBuffer::new(params.ring_buffer_ms, FRAME_DURATION_MS);
        Self {
            queue,
            state,
            recognizer,
            wake_table,
            commands,
            events,
            ipc,
            amp_tx,
            stop,
            epoch,
            vad,
            params,
            pre_roll,
            dictation: DictationBuffer::new(),
            triggered: false,
            silence_run_frames: 0,
            zero_frames: 0,
            conflict_warned: false,
            hold: VecDeque::new(),
        }
    }

    pub fn run(mut self) {
        info!("Pipeline worker started");
        while !self.stop.load(Ordering::Acquire) {
            while let Ok(command) = self.commands.try_recv() {
                self.handle_command(command);
            }
            let Some(frame) = self.queue.pop_timeout(Duration::from_millis(100)) else {
                continue;
            };
            self.handle_frame(frame);
        }
        info!("Pipeline worker exiting");
    }

    pub fn handle_command(&mut self, command: PipelineCommand) {
        match command {
            PipelineCommand::StopDictation => {
                if matches!(self.state.current(), SessionState::Dictation(_)) {
                    self.ipc.status(
                        StatusColor::Orange,
                        "Stopping dictation manually & processing...",
                    );
                    self.end_utterance();
                } else {
                    self.ipc
                        .status(StatusColor::Orange, "Not dictating, stop command ignored.");
                }
            }
            PipelineCommand::ResetBuffers => self.reset_buffers(),
            PipelineCommand::UpdateVad(params) => {
                self.vad = Vad::new(params.aggressiveness, params.essentially_silent_max);
                self.pre_roll = PreRollBuffer::new(params.ring_buffer_ms, FRAME_DURATION_MS);
                self.params = params;
                debug!("Pipeline VAD parameters updated");
            }
        }
    }

    pub fn handle_frame(&mut self, frame: AudioFrame) {
        match self.state.current() {
            SessionState::Inactive | SessionState::Processing(_) => {
                // Discard; capture keeps running so the queue never backs up.
            }
            SessionState::Preparing => self.hold_frame(frame),
            SessionState::Activation => self.activation_frame(frame),
            SessionState::Dictation(mode) => self.dictation_frame(frame, mode),
        }
    }

    fn hold_frame(&mut self, frame: AudioFrame) {
        if self.hold.len() >= PREPARING_HOLD_FRAMES {
            self.hold.pop_front();
        }
        self.hold.push_back(frame);
    }

    fn activation_frame(&mut self, frame: AudioFrame) {
        if !self.recognizer.is_ready() {
            self.hold_frame(frame);
            return;
        }

        // Replay audio held while the recognizer was loading.
        let mut phrase = None;
        while let Some(held) = self.hold.pop_front() {
            if let Some(Some(p)) = self.recognizer.with(|rec| rec.accept_frame(held.samples())) {
                phrase = Some(p);
            }
        }
        if phrase.is_none() {
            phrase = self
                .recognizer
                .with(|rec| rec.accept_frame(frame.samples()))
                .flatten();
        }

        let Some(phrase) = phrase else { return };
        debug!(phrase = %phrase, "Recognizer finalized phrase");

        let hit = {
            let table = self.wake_table.read().unwrap();
            table
                .lookup(&phrase)
                .map(|(word, mode)| (word.to_string(), mode))
        };
        let Some((word, mode)) = hit else { return };

        if self.state.try_begin_dictation(mode) {
            info!(word = %word, mode = mode.as_str(), "Wake word detected");
            self.ipc
                .status(StatusColor::Green, &format!("Wake word '{word}' detected."));
            self.reset_dictation_state();
            self.recognizer.with(|rec| rec.reset());
        }
    }

    fn dictation_frame(&mut self, frame: AudioFrame, _mode: Mode) {
        // Sustained all-zero audio is the signature of another process
        // holding the microphone; advise, but stay in Dictation.
        if frame.max_amplitude() == 0 {
            self.zero_frames += 1;
            let threshold =
                (self.params.conflict_silence_secs * 1000.0 / FRAME_DURATION_MS as f64) as usize;
            if self.zero_frames >= threshold.max(1) && !self.conflict_warned {
                self.conflict_warned = true;
                let advisory = check_for_audio_conflicts().unwrap_or_else(|| {
                    "Microphone is delivering silence; another application may be using it."
                        .to_string()
                });
                warn!(frames = self.zero_frames, "Sustained silent audio during dictation");
                self.ipc.status(StatusColor::Orange, &advisory);
            }
            let _ = self.amp_tx.try_send(0);
            return;
        }
        self.zero_frames = 0;
        self.conflict_warned = false;

        // Lossy amplitude sidecar for the UI waveform.
        let _ = self.amp_tx.try_send(frame.amplitude_percent());

        let is_speech = self.vad.is_speech(&frame);

        if !self.triggered {
            self.pre_roll.push(frame, is_speech);
            if self.pre_roll.majority_voiced() {
                self.triggered = true;
                self.silence_run_frames = 0;
                let pre_roll = self.pre_roll.drain();
                self.dictation.extend(pre_roll);
            }
            return;
        }

        self.dictation.push(frame);
        if self.dictation.warn_due() {
            let seconds = self.dictation.duration_secs();
            warn!(seconds, "Very long dictation buffer");
            self.ipc.status(
                StatusColor::Orange,
                &format!(
                    "Very long dictation ({:.0} s); consider breaking it into smaller segments.",
                    seconds
                ),
            );
        }

        if is_speech {
            self.silence_run_frames = 0;
            return;
        }
        self.silence_run_frames += 1;
        let silence_ms = self.silence_run_frames as f64 * FRAME_DURATION_MS as f64;
        if silence_ms >= self.params.silence_threshold_secs * 1000.0 {
            info!(silence_ms, "Silence timeout, ending utterance");
            self.end_utterance();
        }
    }

    /// Move the buffer out and enter Processing. An empty buffer short-
    /// circuits straight back to Activation.
    fn end_utterance(&mut self) {
        if self.dictation.is_empty() && !self.triggered {
            self.ipc
                .status(StatusColor::Blue, "No speech captured, nothing to process.");
            self.reset_dictation_state();
            self.state.abort_to_activation();
            return;
        }

        let Some(mode) = self.state.try_begin_processing() else {
            self.reset_dictation_state();
            return;
        };

        let buffer = self.dictation.take();
        self.reset_dictation_state();

        if buffer.is_empty() {
            self.state.finish_processing();
            self.ipc
                .status(StatusColor::Blue, "No speech captured, nothing to process.");
            return;
        }

        let epoch = self.epoch.load(Ordering::Acquire);
        debug!(
            frames = buffer.len(),
            seconds = buffer.duration_secs(),
            "Dictation buffer handed off"
        );
        let _ = self.events.send(PipelineEvent::SpeechEnded {
            buffer,
            mode,
            epoch,
        });
    }

    fn reset_dictation_state(&mut self) {
        self.pre_roll.clear();
        self.triggered = false;
        self.silence_run_frames = 0;
        self.zero_frames = 0;
        self.conflict_warned = false;
    }

    fn reset_buffers(&mut self) {
        self.dictation.clear();
        self.reset_dictation_state();
        self.hold.clear();
        self.queue.clear();
        debug!("Pipeline buffers cleared");
    }
}

/// Spawn the pipeline worker thread.
pub fn spawn_pipeline(pipeline: Pipeline) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("pipeline".into())
        .spawn(move || pipeline.run())
        .expect("spawn pipeline worker")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{WakeWords, FRAME_SIZE};
    use crate::wake_word::mock::ScriptedRecognizer;

    struct Harness {
        pipeline: Pipeline,
        state: Arc<SessionStateMachine>,
        events: mpsc::UnboundedReceiver<PipelineEvent>,
        _amp_rx: std_mpsc::Receiver<u8>,
        _cmd_tx: std_mpsc::Sender<PipelineCommand>,
    }

    fn harness(recognizer: Option<ScriptedRecognizer>) -> Harness {
        let queue = FrameQueue::new(50);
        let state = SessionStateMachine::new();
        let slot = RecognizerSlot::new();
        if let Some(rec) = recognizer {
            slot.install(Box::new(rec));
        }
        let table = Arc::new(RwLock::new(WakeWordTable::build(&WakeWords::default())));
        let (cmd_tx, cmd_rx) = std_mpsc::channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let ipc = IpcWriter::sink(Box::new(std::io::sink()));
        let (amp_tx, amp_rx) = std_mpsc::sync_channel(64);
        let stop = Arc::new(AtomicBool::new(false));
        let epoch = Arc::new(AtomicU64::new(0));
        let params = VadParams::from(&Settings::default());

        let pipeline = Pipeline::new(
            queue,
            state.clone(),
            slot,
            table,
            cmd_rx,
            event_tx,
            ipc,
            amp_tx,
            stop,
            epoch,
            params,
        );
        Harness {
            pipeline,
            state,
            events: event_rx,
            _amp_rx: amp_rx,
            _cmd_tx: cmd_tx,
        }
    }

    fn loud_frame() -> AudioFrame {
        let samples = (0..FRAME_SIZE)
            .map(|i| if i % 2 == 0 { 4000 } else { -4000 })
            .collect();
        AudioFrame::new(samples)
    }

    fn quiet_frame() -> AudioFrame {
        let samples = (0..FRAME_SIZE)
            .map(|i| if i % 2 == 0 { 20 } else { -20 })
            .collect();
        AudioFrame::new(samples)
    }

    fn zero_frame() -> AudioFrame {
        AudioFrame::new(vec![0; FRAME_SIZE])
    }

    #[test]
    fn wake_word_starts_dictation_in_mapped_mode() {
        let mut h = harness(Some(ScriptedRecognizer::new(vec![(3, "note")])));
        h.state.set_activation();
        for _ in 0..3 {
            h.pipeline.handle_frame(loud_frame());
        }
        assert_eq!(h.state.current(), SessionState::Dictation(Mode::Dictate));
    }

    #[test]
    fn unknown_phrase_is_ignored() {
        let mut h = harness(Some(ScriptedRecognizer::new(vec![(2, "banana")])));
        h.state.set_activation();
        for _ in 0..5 {
            h.pipeline.handle_frame(loud_frame());
        }
        assert_eq!(h.state.current(), SessionState::Activation);
    }

    #[test]
    fn silence_timeout_hands_off_buffer_with_pre_roll() {
        let mut h = harness(None);
        h.state.set_activation();
        assert!(h.state.try_begin_dictation(Mode::Proofread));

        // 11 voiced frames trip the >50% ring trigger (ring holds 20).
        for _ in 0..11 {
            h.pipeline.handle_frame(loud_frame());
        }
        // 1.5 s of silence = 50 frames at 30 ms ends the utterance.
        for _ in 0..50 {
            h.pipeline.handle_frame(quiet_frame());
        }

        let event = h.events.try_recv().expect("speech-ended event");
        let PipelineEvent::SpeechEnded { buffer, mode, .. } = event;
        assert_eq!(mode, Mode::Proofread);
        // Pre-roll (11) plus the silent tail (50).
        assert_eq!(buffer.len(), 61);
        assert_eq!(h.state.current(), SessionState::Processing(Mode::Proofread));
    }

    #[test]
    fn speech_resets_the_silence_run() {
        let mut h = harness(None);
        h.state.set_activation();
        h.state.try_begin_dictation(Mode::Dictate);
        for _ in 0..11 {
            h.pipeline.handle_frame(loud_frame());
        }
        // 49 quiet frames, one loud frame, 49 more quiet: no timeout yet.
        for _ in 0..49 {
            h.pipeline.handle_frame(quiet_frame());
        }
        h.pipeline.handle_frame(loud_frame());
        for _ in 0..49 {
            h.pipeline.handle_frame(quiet_frame());
        }
        assert!(h.events.try_recv().is_err());
        assert_eq!(h.state.current(), SessionState::Dictation(Mode::Dictate));
        // One more quiet frame tips it over.
        h.pipeline.handle_frame(quiet_frame());
        assert!(h.events.try_recv().is_ok());
    }

    #[test]
    fn forced_stop_without_speech_returns_to_activation() {
        let mut h = harness(None);
        h.state.set_activation();
        h.state.try_begin_dictation(Mode::Dictate);
        // A few quiet frames that never trigger.
        for _ in 0..5 {
            h.pipeline.handle_frame(quiet_frame());
        }
        h.pipeline.handle_command(PipelineCommand::StopDictation);
        assert!(h.events.try_recv().is_err());
        assert_eq!(h.state.current(), SessionState::Activation);
    }

    #[test]
    fn forced_stop_processes_triggered_audio() {
        let mut h = harness(None);
        h.state.set_activation();
        h.state.try_begin_dictation(Mode::Letter);
        for _ in 0..15 {
            h.pipeline.handle_frame(loud_frame());
        }
        h.pipeline.handle_command(PipelineCommand::StopDictation);
        let event = h.events.try_recv().expect("speech-ended event");
        let PipelineEvent::SpeechEnded { mode, .. } = event;
        assert_eq!(mode, Mode::Letter);
    }

    #[test]
    fn sustained_zero_frames_stay_in_dictation() {
        let mut h = harness(None);
        h.state.set_activation();
        h.state.try_begin_dictation(Mode::Dictate);
        // 2 s of all-zero frames (67 at 30 ms) plus margin.
        for _ in 0..70 {
            h.pipeline.handle_frame(zero_frame());
        }
        assert_eq!(h.state.current(), SessionState::Dictation(Mode::Dictate));
        assert!(h.events.try_recv().is_err());
    }

    #[test]
    fn frames_are_discarded_while_processing() {
        let mut h = harness(None);
        h.state.set_activation();
        h.state.try_begin_dictation(Mode::Dictate);
        for _ in 0..11 {
            h.pipeline.handle_frame(loud_frame());
        }
        for _ in 0..50 {
            h.pipeline.handle_frame(quiet_frame());
        }
        let _ = h.events.try_recv().expect("first event");
        // Further frames in Processing produce nothing.
        for _ in 0..100 {
            h.pipeline.handle_frame(loud_frame());
        }
        assert!(h.events.try_recv().is_err());
    }

    #[test]
    fn reset_buffers_discards_partial_dictation() {
        let mut h = harness(None);
        h.state.set_activation();
        h.state.try_begin_dictation(Mode::Dictate);
        for _ in 0..15 {
            h.pipeline.handle_frame(loud_frame());
        }
        h.pipeline.handle_command(PipelineCommand::ResetBuffers);
        h.state.abort_to_activation();
        // Nothing left to process on a later stop.
        h.state.try_begin_dictation(Mode::Dictate);
        h.pipeline.handle_command(PipelineCommand::StopDictation);
        assert!(h.events.try_recv().is_err());
        assert_eq!(h.state.current(), SessionState::Activation);
    }
}
