//! Wake-word recognition.
//!
//! The recognizer is a pluggable streaming capability: it eats frames and
//! occasionally yields a finalized phrase. The phrase's double-metaphone
//! codes are looked up in the `WakeWordTable` built from configuration; a hit
//! starts a dictation in the mapped mode.

pub mod vosk;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::WakeWords;
use crate::phonetics::double_metaphone_codes;
use crate::session::Mode;

#[derive(Debug, Error)]
pub enum RecognizerError {
    #[error("wake-word model missing: {0}")]
    ModelMissing(String),
    #[error("wake-word model failed to load: {0}")]
    ModelLoadFailed(String),
    #[error("wake-word recognizer failure: {0}")]
    RuntimeFailure(String),
}

/// Streaming phrase recognizer: frames in, finalized phrases out.
pub trait PhraseRecognizer: Send {
    /// Feed one frame of 16 kHz PCM16. Returns the recognized phrase when an
    /// utterance finalizes, `None` while recognition is still in flight.
    fn accept_frame(&mut self, samples: &[i16]) -> Option<String>;

    /// Discard any partial utterance state.
    fn reset(&mut self);
}

/// Phonetic key -> (original word, dictation mode).
pub struct WakeWordTable {
    entries: HashMap<String, (String, Mode)>,
}

impl WakeWordTable {
    /// Rebuild from configuration. Both the primary and the alternate
    /// metaphone codes of each word are indexed. A key already mapped to a
    /// different mode is logged and overwritten: last write wins.
    pub fn build(words: &WakeWords) -> Self {
        let mut entries: HashMap<String, (String, Mode)> = HashMap::new();
        let groups = [
            (Mode::Dictate, &words.dictate),
            (Mode::Proofread, &words.proofread),
            (Mode::Letter, &words.letter),
        ];

        for (mode, list) in groups {
            for word in list {
                let word = word.trim().to_lowercase();
                if word.is_empty() {
                    continue;
                }
                for code in double_metaphone_codes(&word) {
                    if let Some((existing_word, existing_mode)) = entries.get(&code) {
                        if *existing_mode != mode {
                            warn!(
                                code,
                                old = %existing_word,
                                new = %word,
                                "Wake word phonetic collision across modes; last write wins"
                            );
                        }
                    }
                    entries.insert(code, (word.clone(), mode));
                }
            }
        }

        info!(entries = entries.len(), "Wake word table rebuilt");
        Self { entries }
    }

    /// Look up a recognized phrase by its phonetic codes.
    pub fn lookup(&self, phrase: &str) -> Option<(&str, Mode)> {
        let phrase = phrase.trim().to_lowercase();
        if phrase.is_empty() {
            return None;
        }
        for code in double_metaphone_codes(&phrase) {
            if let Some((word, mode)) = self.entries.get(&code) {
                return Some((word.as_str(), *mode));
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Loader outcome, reported to the application loop.
#[derive(Debug)]
pub enum RecognizerEvent {
    Ready,
    LoadFailed(String),
}

/// Lazily loaded recognizer shared between the loader thread and the
/// pipeline worker. The pipeline reports `Preparing` until `is_ready()`.
pub struct RecognizerSlot {
    inner: Mutex<Option<Box<dyn PhraseRecognizer>>>,
    ready: AtomicBool,
}

impl RecognizerSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(None),
            ready: AtomicBool::new(false),
        })
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Run `f` against the recognizer if it is loaded.
    pub fn with<R>(&self, f: impl FnOnce(&mut dyn PhraseRecognizer) -> R) -> Option<R> {
        let mut guard = self.inner.lock().unwrap();
        guard.as_mut().map(|rec| f(rec.as_mut()))
    }

    pub fn install(&self, recognizer: Box<dyn PhraseRecognizer>) {
        *self.inner.lock().unwrap() = Some(recognizer);
        self.ready.store(true, Ordering::Release);
    }

    /// Load the recognizer on a background thread; the result arrives as a
    /// `RecognizerEvent` on `events`.
    pub fn spawn_load(
        self: &Arc<Self>,
        model_dir: PathBuf,
        events: mpsc::UnboundedSender<RecognizerEvent>,
    ) {
        let slot = Arc::clone(self);
        std::thread::Builder::new()
            .name("recognizer-loader".into())
            .spawn(move || match vosk::load_recognizer(&model_dir) {
                Ok(recognizer) => {
                    slot.install(recognizer);
                    info!("Wake-word recognizer loaded");
                    let _ = events.send(RecognizerEvent::Ready);
                }
                Err(e) => {
                    warn!("Wake-word recognizer unavailable: {e}");
                    let _ = events.send(RecognizerEvent::LoadFailed(e.to_string()));
                }
            })
            .expect("spawn recognizer loader");
    }
}

#[cfg(test)]
pub mod mock {
    use super::PhraseRecognizer;
    use std::collections::VecDeque;

    /// Test recognizer that emits scripted phrases after a fixed number of
    /// frames each.
    pub struct ScriptedRecognizer {
        script: VecDeque<(usize, String)>,
        frames_seen: usize,
        pub resets: usize,
    }

    impl ScriptedRecognizer {
        pub fn new(script: Vec<(usize, &str)>) -> Self {
            Self {
                script: script
                    .into_iter()
                    .map(|(frames, phrase)| (frames, phrase.to_string()))
                    .collect(),
                frames_seen: 0,
                resets: 0,
            }
        }
    }

    impl PhraseRecognizer for ScriptedRecognizer {
        fn accept_frame(&mut self, _samples: &[i16]) -> Option<String> {
            self.frames_seen += 1;
            if let Some((frames, _)) = self.script.front() {
                if self.frames_seen >= *frames {
                    self.frames_seen = 0;
                    return self.script.pop_front().map(|(_, phrase)| phrase);
                }
            }
            None
        }

        fn reset(&mut self) {
            self.frames_seen = 0;
            self.resets += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> WakeWordTable {
        WakeWordTable::build(&WakeWords::default())
    }

    #[test]
    fn default_words_resolve_to_modes() {
        let table = table();
        assert_eq!(table.lookup("note").map(|(_, m)| m), Some(Mode::Dictate));
        assert_eq!(
            table.lookup("proofread").map(|(_, m)| m),
            Some(Mode::Proofread)
        );
        assert_eq!(table.lookup("letter").map(|(_, m)| m), Some(Mode::Letter));
        assert_eq!(table.lookup("banana"), None);
    }

    #[test]
    fn lookup_is_phonetic_not_literal() {
        let table = table();
        // Same sound, different spelling.
        assert_eq!(table.lookup("noat").map(|(_, m)| m), Some(Mode::Dictate));
        assert_eq!(table.lookup("  NOTE  ").map(|(_, m)| m), Some(Mode::Dictate));
    }

    #[test]
    fn collisions_last_write_wins() {
        let words = WakeWords {
            dictate: vec!["proof".into()],
            proofread: vec!["proof".into()],
            letter: vec![],
        };
        let table = WakeWordTable::build(&words);
        assert_eq!(table.lookup("proof").map(|(_, m)| m), Some(Mode::Proofread));
    }

    #[test]
    fn empty_config_yields_empty_table() {
        let words = WakeWords {
            dictate: vec!["  ".into()],
            proofread: vec![],
            letter: vec![],
        };
        assert!(WakeWordTable::build(&words).is_empty());
    }

    #[test]
    fn slot_reports_ready_after_install() {
        let slot = RecognizerSlot::new();
        assert!(!slot.is_ready());
        assert!(slot.with(|_| ()).is_none());
        slot.install(Box::new(mock::ScriptedRecognizer::new(vec![(1, "note")])));
        assert!(slot.is_ready());
        let phrase = slot.with(|rec| rec.accept_frame(&[0; 4])).unwrap();
        assert_eq!(phrase.as_deref(), Some("note"));
    }
}
