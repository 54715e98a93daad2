//! Text delivery: clipboard write plus a synthetic paste keystroke.
//!
//! The clipboard write always happens. The paste simulation (Cmd+V on macOS,
//! Ctrl+V elsewhere) follows after a short settle delay; when it is
//! unavailable the caller is told so it can surface an informational status
//! instead of failing the delivery.

use std::thread;
use std::time::Duration;

use arboard::Clipboard;
use tracing::{info, warn};

/// How long the clipboard gets to settle before the paste keystroke.
const PASTE_DELAY: Duration = Duration::from_millis(50);

/// Outcome of a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Clipboard written and paste keystroke issued.
    Pasted,
    /// Clipboard written; paste simulation unavailable or failed.
    ClipboardOnly,
}

/// Deliver `text` to the focused application.
pub fn deliver_text(text: &str) -> anyhow::Result<DeliveryOutcome> {
    if text.is_empty() {
        return Ok(DeliveryOutcome::ClipboardOnly);
    }

    let mut clipboard = Clipboard::new()
        .map_err(|e| anyhow::anyhow!("Failed to open clipboard: {}", e))?;
    clipboard
        .set_text(text)
        .map_err(|e| anyhow::anyhow!("Failed to set clipboard text: {}", e))?;
    info!(text_len = text.len(), "Text copied to clipboard");

    thread::sleep(PASTE_DELAY);

    match simulate_paste() {
        Ok(()) => Ok(DeliveryOutcome::Pasted),
        Err(e) => {
            warn!("Paste simulation unavailable: {}", e);
            Ok(DeliveryOutcome::ClipboardOnly)
        }
    }
}

/// Pause between the synthetic key transitions of the chord.
const KEY_STEP_DELAY: Duration = Duration::from_millis(20);

/// The platform paste chord as a press/release event sequence.
fn paste_chord() -> [rdev::EventType; 4] {
    use rdev::{EventType, Key};

    let modifier = if cfg!(target_os = "macos") {
        Key::MetaLeft
    } else {
        Key::ControlLeft
    };
    [
        EventType::KeyPress(modifier),
        EventType::KeyPress(Key::KeyV),
        EventType::KeyRelease(Key::KeyV),
        EventType::KeyRelease(modifier),
    ]
}

/// Play the paste chord through the OS input layer.
fn simulate_paste() -> anyhow::Result<()> {
    for event in paste_chord().iter() {
        rdev::simulate(event)
            .map_err(|e| anyhow::anyhow!("synthetic keystroke {event:?} failed: {e:?}"))?;
        thread::sleep(KEY_STEP_DELAY);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdev::EventType;

    #[test]
    fn chord_presses_then_releases_in_mirror_order() {
        let chord = paste_chord();
        assert!(matches!(chord[0], EventType::KeyPress(_)));
        assert!(matches!(chord[1], EventType::KeyPress(rdev::Key::KeyV)));
        assert!(matches!(chord[2], EventType::KeyRelease(rdev::Key::KeyV)));
        assert!(matches!(chord[3], EventType::KeyRelease(_)));
    }
}
