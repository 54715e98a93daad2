//! Microphone conflict advisory.
//!
//! When the device fails to open, or dictation sees sustained all-zero
//! frames, we probe for processes known to monopolize the microphone
//! (browsers running web dictation, conferencing apps) and attach a
//! human-readable suggestion to the error. Advisory only: it never blocks
//! the retry loop.

use std::process::Command;

use tracing::debug;

/// Probe for likely microphone holders. Returns a suggestion string, or
/// `None` when nothing recognizable is running or the probe itself fails.
pub fn check_for_audio_conflicts() -> Option<String> {
    let names = running_process_names()?;

    let browsers = ["Safari", "Chrome", "chrome", "chromium", "firefox", "msedge"];
    let conferencing = ["zoom", "Teams", "webex", "Slack", "discord"];

    if names
        .iter()
        .any(|name| browsers.iter().any(|b| name.contains(b)))
    {
        return Some(
            "A web browser may be using the microphone for dictation. \
             Try closing browser tabs with microphone access."
                .to_string(),
        );
    }
    if names
        .iter()
        .any(|name| conferencing.iter().any(|c| name.to_lowercase().contains(&c.to_lowercase())))
    {
        return Some(
            "A conferencing app may be using the microphone. \
             Please close video-call applications and try again."
                .to_string(),
        );
    }
    None
}

#[cfg(any(target_os = "macos", target_os = "linux"))]
fn running_process_names() -> Option<Vec<String>> {
    let output = Command::new("ps").args(["-A", "-o", "comm="]).output().ok()?;
    if !output.status.success() {
        debug!("Conflict probe: ps exited with {:?}", output.status);
        return None;
    }
    Some(
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect(),
    )
}

#[cfg(target_os = "windows")]
fn running_process_names() -> Option<Vec<String>> {
    let output = Command::new("tasklist").args(["/FO", "CSV", "/NH"]).output().ok()?;
    if !output.status.success() {
        debug!("Conflict probe: tasklist exited with {:?}", output.status);
        return None;
    }
    Some(
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|l| l.split(',').next())
            .map(|name| name.trim_matches('"').to_string())
            .collect(),
    )
}

#[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
fn running_process_names() -> Option<Vec<String>> {
    None
}
