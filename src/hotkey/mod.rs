//! Global hotkeys.
//!
//! System-wide capture via `rdev`. All bindings are primary-modifier +
//! Shift + letter chords (Cmd on macOS, Ctrl elsewhere); the chord table is
//! reported to the UI on `GET_HOTKEYS`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use rdev::{listen, Event, EventType, Key};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Commands a hotkey chord can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyCommand {
    ToggleActive,
    StartDictate,
    StartProofread,
    StartLetter,
    StopDictate,
    AbortDictate,
    Restart,
    ShowHotkeys,
}

impl HotkeyCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToggleActive => "toggle_active",
            Self::StartDictate => "start_dictate",
            Self::StartProofread => "start_proofread",
            Self::StartLetter => "start_letter",
            Self::StopDictate => "stop_dictate",
            Self::AbortDictate => "abort_dictate",
            Self::Restart => "restart",
            Self::ShowHotkeys => "show_hotkeys",
        }
    }
}

/// Letter key -> command bindings.
const BINDINGS: [(Key, char, HotkeyCommand); 8] = [
    (Key::KeyA, 'A', HotkeyCommand::ToggleActive),
    (Key::KeyD, 'D', HotkeyCommand::StartDictate),
    (Key::KeyP, 'P', HotkeyCommand::StartProofread),
    (Key::KeyL, 'L', HotkeyCommand::StartLetter),
    (Key::KeyS, 'S', HotkeyCommand::StopDictate),
    (Key::KeyX, 'X', HotkeyCommand::AbortDictate),
    (Key::KeyR, 'R', HotkeyCommand::Restart),
    (Key::KeyH, 'H', HotkeyCommand::ShowHotkeys),
];

fn primary_modifier_label() -> &'static str {
    if cfg!(target_os = "macos") {
        "Cmd"
    } else {
        "Ctrl"
    }
}

/// Chord table for the `HOTKEYS:` line, e.g. `{"Ctrl+Shift+D": "start_dictate"}`.
pub fn hotkey_map() -> BTreeMap<String, &'static str> {
    BINDINGS
        .iter()
        .map(|(_, letter, command)| {
            (
                format!("{}+Shift+{}", primary_modifier_label(), letter),
                command.as_str(),
            )
        })
        .collect()
}

fn is_primary_modifier(key: &Key) -> bool {
    if cfg!(target_os = "macos") {
        matches!(key, Key::MetaLeft | Key::MetaRight)
    } else {
        matches!(key, Key::ControlLeft | Key::ControlRight)
    }
}

fn is_shift(key: &Key) -> bool {
    matches!(key, Key::ShiftLeft | Key::ShiftRight)
}

pub struct HotkeyListener {
    running: Arc<AtomicBool>,
}

impl HotkeyListener {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the background listener; chords arrive on `tx`.
    pub fn start(&self, tx: mpsc::UnboundedSender<HotkeyCommand>) {
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();

        info!(modifier = primary_modifier_label(), "Starting hotkey listener");

        thread::spawn(move || {
            let mut primary_down = false;
            let mut shift_down = false;

            let callback = move |event: Event| {
                if !running.load(Ordering::SeqCst) {
                    return;
                }
                match event.event_type {
                    EventType::KeyPress(key) => {
                        if is_primary_modifier(&key) {
                            primary_down = true;
                        } else if is_shift(&key) {
                            shift_down = true;
                        } else if primary_down && shift_down {
                            if let Some((_, _, command)) =
                                BINDINGS.iter().find(|(k, _, _)| *k == key)
                            {
                                let _ = tx.send(*command);
                            }
                        }
                    }
                    EventType::KeyRelease(key) => {
                        if is_primary_modifier(&key) {
                            primary_down = false;
                        } else if is_shift(&key) {
                            shift_down = false;
                        }
                    }
                    _ => {}
                }
            };

            if let Err(e) = listen(callback) {
                warn!("Hotkey listener error: {:?}", e);
            }
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
