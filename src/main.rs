//! scribe-core: dictation backend for the desktop UI shell.
//!
//! Spawned as a child process by the UI; all communication is the line-based
//! protocol on stdin/stdout. This entry point initializes logging, spawns the
//! long-lived workers (capture supervisor, pipeline, recognizer loader,
//! hotkey listener, stdin reader), and runs the main event loop.

mod app;
mod audio;
mod config;
mod delivery;
mod hotkey;
mod ipc;
mod llm;
mod phonetics;
mod pipeline;
mod session;
mod stt;
mod text;
mod vad;
mod vocabulary;
mod wake_word;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};

use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use app::App;
use audio::{spawn_capture_supervisor, FrameQueue};
use config::paths::{get_data_dir, models_dir};
use config::{load_settings, FRAME_QUEUE_CAPACITY};
use hotkey::HotkeyListener;
use ipc::bridge::spawn_stdin_reader;
use ipc::{IpcWriter, StatusColor};
use pipeline::{spawn_pipeline, Pipeline, VadParams};
use session::SessionStateMachine;
use vocabulary::VocabularyStore;
use wake_word::RecognizerSlot;

#[tokio::main]
async fn main() {
    // Logging goes to a file (or stderr); stdout belongs to the protocol.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let data_dir = get_data_dir();
    let use_file = std::fs::create_dir_all(&data_dir).is_ok();

    let _guard: Option<tracing_appender::non_blocking::WorkerGuard>;
    if use_file {
        let file_appender = tracing_appender::rolling::never(&data_dir, "scribe-core.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        _guard = Some(guard);
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(non_blocking)
            .with_ansi(false)
            .init();
    } else {
        _guard = None;
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }
    info!("Backend starting");

    let ipc = IpcWriter::stdout();
    let settings = load_settings();
    let state = SessionStateMachine::new();
    let stop = Arc::new(AtomicBool::new(false));
    let epoch = Arc::new(AtomicU64::new(0));

    // ── Capture worker ───────────────────────────────────────────────
    let queue = FrameQueue::new(FRAME_QUEUE_CAPACITY);
    let (audio_tx, mut audio_rx) = mpsc::unbounded_channel();
    let capture_handle = spawn_capture_supervisor(
        queue.clone(),
        audio_tx,
        stop.clone(),
        settings.input_device.clone(),
    );

    // ── Wake-word recognizer (lazy load) ─────────────────────────────
    let recognizer = RecognizerSlot::new();
    let (recognizer_tx, mut recognizer_rx) = mpsc::unbounded_channel();
    recognizer.spawn_load(models_dir(), recognizer_tx);

    // ── Application state ────────────────────────────────────────────
    let vocabulary = VocabularyStore::load(&data_dir);
    let (pipeline_cmd_tx, pipeline_cmd_rx) = std_mpsc::channel();
    let app = App::new(
        settings.clone(),
        state.clone(),
        ipc.clone(),
        vocabulary,
        recognizer.clone(),
        epoch.clone(),
        pipeline_cmd_tx,
        stop.clone(),
    );
    app.install_state_observer();

    // ── Amplitude sidecar (lossy) ────────────────────────────────────
    let (amp_tx, amp_rx) = std_mpsc::sync_channel::<u8>(8);
    {
        let ipc = ipc.clone();
        std::thread::Builder::new()
            .name("amp-forwarder".into())
            .spawn(move || {
                while let Ok(amp) = amp_rx.recv() {
                    ipc.amplitude(amp);
                }
            })
            .expect("spawn amplitude forwarder");
    }

    // ── Pipeline worker ──────────────────────────────────────────────
    let (pipeline_event_tx, mut pipeline_event_rx) = mpsc::unbounded_channel();
    let pipeline = Pipeline::new(
        queue,
        state.clone(),
        recognizer.clone(),
        app.wake_table.clone(),
        pipeline_cmd_rx,
        pipeline_event_tx,
        ipc.clone(),
        amp_tx,
        stop.clone(),
        epoch,
        VadParams::from(&settings),
    );
    let pipeline_handle = spawn_pipeline(pipeline);

    // ── Hotkeys & stdin ──────────────────────────────────────────────
    let (hotkey_tx, mut hotkey_rx) = mpsc::unbounded_channel();
    let hotkey_listener = HotkeyListener::new();
    hotkey_listener.start(hotkey_tx);

    let mut commands = spawn_stdin_reader(ipc.clone());

    // Startup handshake: authoritative state, ready marker, config request.
    ipc.state(&state.snapshot());
    ipc.ready();
    ipc.request_config();
    info!("Backend ready, listening for commands");

    // ── Main loop ────────────────────────────────────────────────────
    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(command) => {
                        if !app.handle_ui_command(command) {
                            break;
                        }
                    }
                    None => {
                        // stdin closed: the UI is gone, treat as shutdown.
                        warn!("stdin closed, shutting down");
                        break;
                    }
                }
            }
            Some(hotkey) = hotkey_rx.recv() => app.handle_hotkey(hotkey),
            Some(event) = audio_rx.recv() => app.handle_audio_event(event),
            Some(event) = recognizer_rx.recv() => app.handle_recognizer_event(event),
            Some(event) = pipeline_event_rx.recv() => app.handle_pipeline_event(event),
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                break;
            }
        }
    }

    // ── Shutdown ─────────────────────────────────────────────────────
    ipc.status(StatusColor::Orange, "Shutting down...");
    stop.store(true, Ordering::Release);
    hotkey_listener.stop();
    if pipeline_handle.join().is_err() {
        warn!("Pipeline worker panicked during shutdown");
    }
    if capture_handle.join().is_err() {
        warn!("Capture supervisor panicked during shutdown");
    }
    info!("Backend shutdown complete");
    ipc.shutdown_finalized();
}
