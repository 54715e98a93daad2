//! Stdin reader: a blocking thread that parses command lines and forwards
//! them through an mpsc channel to the async main loop.
//!
//! The thread exits when stdin is closed (UI process gone) or on an
//! unrecoverable read error; either way the closed channel is the shutdown
//! signal for the main loop.

use std::io::{self, BufRead};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::{parse_command, IpcError, IpcWriter, UiCommand};

/// Spawn the stdin reader thread. Malformed or unknown lines are logged and
/// echoed back as `UNKNOWN_COMMAND:`; they never take the reader down.
pub fn spawn_stdin_reader(writer: Arc<IpcWriter>) -> mpsc::UnboundedReceiver<UiCommand> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        let stdin = io::stdin();
        let reader = stdin.lock();
        for line in reader.lines() {
            match line {
                Ok(text) => {
                    let trimmed = text.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match parse_command(trimmed) {
                        Ok(cmd) => {
                            debug!(?cmd, "Received command from UI");
                            if tx.send(cmd).is_err() {
                                break; // Receiver dropped, main loop is gone.
                            }
                        }
                        Err(IpcError::UnknownCommand(raw)) => {
                            warn!(line = %raw, "Unknown command from UI");
                            writer.unknown_command(&raw);
                        }
                        Err(IpcError::MalformedLine(detail)) => {
                            error!("Malformed command line: {}", detail);
                        }
                    }
                }
                Err(e) => {
                    error!("stdin read error: {}", e);
                    break; // stdin closed / broken pipe
                }
            }
        }
        debug!("stdin reader thread exiting");
    });

    rx
}
