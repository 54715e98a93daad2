//! Session state machine.
//!
//! The authoritative back-end state. Mode is carried inside the `Dictation`
//! and `Processing` variants, so state and mode can never disagree. All
//! transitions are serialized through one mutex; observers are notified with
//! a snapshot after the writer releases, and a panicking observer is isolated
//! so its peers still receive the event.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{error, info};

/// Post-processing applied after transcription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Dictate,
    Proofread,
    Letter,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dictate => "dictate",
            Self::Proofread => "proofread",
            Self::Letter => "letter",
        }
    }
}

/// The session states of §4.4. `Inactive` optionally carries the microphone
/// error that put us there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Inactive,
    Preparing,
    Activation,
    Dictation(Mode),
    Processing(Mode),
}

impl SessionState {
    pub fn program_active(&self) -> bool {
        matches!(
            self,
            Self::Activation | Self::Dictation(_) | Self::Processing(_)
        )
    }

    pub fn is_dictating(&self) -> bool {
        matches!(self, Self::Dictation(_))
    }

    pub fn mode(&self) -> Option<Mode> {
        match self {
            Self::Dictation(m) | Self::Processing(m) => Some(*m),
            _ => None,
        }
    }

    pub fn audio_state(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Preparing => "preparing",
            Self::Activation => "activation",
            Self::Dictation(_) => "dictation",
            Self::Processing(_) => "processing",
        }
    }
}

/// Snapshot serialized onto the `STATE:` line.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub program_active: bool,
    pub audio_state: &'static str,
    pub is_dictating: bool,
    pub is_proofing_active: bool,
    pub can_dictate: bool,
    pub current_mode: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub microphone_error: Option<String>,
}

pub type Observer = Box<dyn Fn(&StateSnapshot) + Send + Sync>;

struct Inner {
    state: SessionState,
    microphone_error: Option<String>,
    /// Transition sequence number, used to keep notifications monotonic.
    seq: u64,
}

struct ObserverSet {
    list: Vec<Observer>,
    last_seq: u64,
}

pub struct SessionStateMachine {
    inner: Mutex<Inner>,
    observers: Mutex<ObserverSet>,
    proofing_active: AtomicBool,
}

impl SessionStateMachine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state: SessionState::Inactive,
                microphone_error: None,
                seq: 0,
            }),
            observers: Mutex::new(ObserverSet {
                list: Vec::new(),
                last_seq: 0,
            }),
            proofing_active: AtomicBool::new(false),
        })
    }

    pub fn subscribe(&self, observer: Observer) {
        self.observers.lock().unwrap().list.push(observer);
    }

    pub fn current(&self) -> SessionState {
        self.inner.lock().unwrap().state.clone()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.lock().unwrap();
        self.snapshot_of(&inner)
    }

    fn snapshot_of(&self, inner: &Inner) -> StateSnapshot {
        let state = &inner.state;
        StateSnapshot {
            program_active: state.program_active(),
            audio_state: state.audio_state(),
            is_dictating: state.is_dictating(),
            is_proofing_active: self.proofing_active.load(Ordering::Acquire),
            can_dictate: state.program_active() && matches!(state, SessionState::Activation),
            current_mode: state.mode().map(Mode::as_str),
            microphone_error: inner.microphone_error.clone(),
        }
    }

    /// Apply a transition under the state mutex, then notify observers.
    fn transition<F>(&self, f: F) -> bool
    where
        F: FnOnce(&SessionState) -> Option<(SessionState, Option<String>)>,
    {
        let (snapshot, seq) = {
            let mut inner = self.inner.lock().unwrap();
            let Some((next, mic_error)) = f(&inner.state) else {
                return false;
            };
            info!(from = inner.state.audio_state(), to = next.audio_state(), "State transition");
            inner.state = next;
            inner.microphone_error = mic_error;
            inner.seq += 1;
            (self.snapshot_of(&inner), inner.seq)
        };
        self.notify(&snapshot, seq);
        true
    }

    /// Notify observers, dropping snapshots that a later transition has
    /// already superseded so the UI never observes state going backwards.
    fn notify(&self, snapshot: &StateSnapshot, seq: u64) {
        let mut observers = self.observers.lock().unwrap();
        if seq <= observers.last_seq {
            return;
        }
        observers.last_seq = seq;
        for observer in observers.list.iter() {
            if catch_unwind(AssertUnwindSafe(|| observer(snapshot))).is_err() {
                error!("State observer panicked; continuing with remaining observers");
            }
        }
    }

    /// Re-broadcast the current state (config refresh, `isProofingActive`
    /// flips).
    pub fn rebroadcast(&self) {
        let (snapshot, seq) = {
            let mut inner = self.inner.lock().unwrap();
            inner.seq += 1;
            (self.snapshot_of(&inner), inner.seq)
        };
        self.notify(&snapshot, seq);
    }

    pub fn set_proofing_active(&self, active: bool) {
        if self.proofing_active.swap(active, Ordering::AcqRel) != active {
            self.rebroadcast();
        }
    }

    /// Audio device is up and the recognizer is still loading.
    pub fn set_preparing(&self) -> bool {
        self.transition(|state| match state {
            SessionState::Inactive | SessionState::Preparing => {
                Some((SessionState::Preparing, None))
            }
            _ => None,
        })
    }

    /// Recognizer (and device) ready: listen for wake words.
    pub fn set_activation(&self) -> bool {
        self.transition(|state| match state {
            SessionState::Dictation(_) => None,
            _ => Some((SessionState::Activation, None)),
        })
    }

    /// Deactivate entirely, optionally carrying a microphone error.
    pub fn set_inactive(&self, microphone_error: Option<String>) -> bool {
        self.transition(|_| Some((SessionState::Inactive, microphone_error)))
    }

    /// Wake word or hotkey starts a dictation. Only legal from Activation.
    pub fn try_begin_dictation(&self, mode: Mode) -> bool {
        self.transition(|state| match state {
            SessionState::Activation => Some((SessionState::Dictation(mode), None)),
            _ => None,
        })
    }

    /// Silence timeout or stop hotkey ends the utterance. Returns the mode
    /// that started the dictation.
    pub fn try_begin_processing(&self) -> Option<Mode> {
        let mut captured = None;
        self.transition(|state| match state {
            SessionState::Dictation(mode) => {
                captured = Some(*mode);
                Some((SessionState::Processing(*mode), None))
            }
            _ => None,
        });
        captured
    }

    /// Abort: drop whatever is in flight and return to Activation.
    pub fn abort_to_activation(&self) -> bool {
        self.transition(|state| match state {
            SessionState::Dictation(_) | SessionState::Processing(_) => {
                Some((SessionState::Activation, None))
            }
            _ => None,
        })
    }

    /// Delivery (or failure handling) finished; listen again.
    pub fn finish_processing(&self) -> bool {
        self.transition(|state| match state {
            SessionState::Processing(_) => Some((SessionState::Activation, None)),
            _ => None,
        })
    }
}
