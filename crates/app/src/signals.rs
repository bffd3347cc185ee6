//! Ctrl+C and interactive stdin commands.

use std::{
    io::{self, BufRead},
    sync::{Arc, Once},
};

use tracing::{debug, info, warn};
use vision::pipeline::{StateConsolidator, StopHandle, telemetry};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    Quit,
    Describe,
    Unknown,
}

fn parse_command(line: &str) -> Command {
    match line.trim().to_ascii_lowercase().as_str() {
        "q" | "quit" | "exit" => Command::Quit,
        "" | "?" | "d" | "describe" => Command::Describe,
        _ => Command::Unknown,
    }
}

pub fn install_ctrlc(stop: StopHandle) {
    static CTRL_HANDLER: Once = Once::new();

    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || stop.request_stop()) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });
}

/// Read commands from stdin until it closes or a quit is requested.
///
/// The thread is detached; a blocked `read_line` must not hold up shutdown.
pub fn spawn_stdin_watcher(stop: StopHandle, consolidator: Arc<StateConsolidator>) {
    let spawned = telemetry::spawn_thread("stdin-commands", move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match parse_command(&line) {
                Command::Quit => {
                    info!("quit requested from stdin");
                    stop.request_stop();
                    break;
                }
                Command::Describe => {
                    consolidator.query();
                }
                Command::Unknown => {
                    info!("unknown command {:?}; use `q` to quit or Enter to describe", line.trim())
                }
            }
            if stop.is_stop_requested() {
                break;
            }
        }
        debug!("stdin watcher finished");
    });
    if let Err(err) = spawned {
        warn!("Failed to start stdin watcher: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(parse_command("q"), Command::Quit);
        assert_eq!(parse_command(" Quit \n"), Command::Quit);
        assert_eq!(parse_command("exit"), Command::Quit);
        assert_eq!(parse_command(""), Command::Describe);
        assert_eq!(parse_command("?"), Command::Describe);
        assert_eq!(parse_command("describe"), Command::Describe);
        assert_eq!(parse_command("dance"), Command::Unknown);
    }
}
