//! Text-to-speech through an external command (`espeak -s`, `say -r`, ...).
//!
//! Speaking is slow compared to the frame rate, so narrations go through a
//! single-slot mailbox: the speech thread takes one utterance at a time and a
//! newer narration replaces one that is still waiting.

use std::{
    process::{Command, Stdio},
    sync::atomic::{AtomicU64, Ordering},
    thread,
    time::Instant,
};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use super::NarrationSink;
use crate::pipeline::{PipelineError, telemetry};

struct Utterance {
    text: String,
    rate: u32,
}

pub struct SpeechNarrator {
    mailbox: Option<Sender<Utterance>>,
    pending: Receiver<Utterance>,
    worker: Option<thread::JoinHandle<()>>,
    replaced: AtomicU64,
}

impl SpeechNarrator {
    /// Parse a command line such as `"espeak -s"`. The rate and the text are
    /// appended as the final two arguments of every invocation.
    pub fn spawn(command: &str) -> Result<Self, PipelineError> {
        let mut parts = command.split_whitespace().map(str::to_owned);
        let program = parts
            .next()
            .ok_or_else(|| PipelineError::config("speech command is empty"))?;
        Self::with_program(program, parts.collect())
    }

    pub fn with_program(program: String, args: Vec<String>) -> Result<Self, PipelineError> {
        let (mailbox, pending) = crossbeam_channel::bounded::<Utterance>(1);
        let inbox = pending.clone();
        let worker = telemetry::spawn_thread("narration-speech", move || {
            for utterance in inbox.iter() {
                speak(&program, &args, &utterance);
            }
        })
        .map_err(PipelineError::spawn("speech"))?;

        Ok(Self {
            mailbox: Some(mailbox),
            pending,
            worker: Some(worker),
            replaced: AtomicU64::new(0),
        })
    }

    /// Narrations that were superseded before they could be spoken.
    pub fn replaced(&self) -> u64 {
        self.replaced.load(Ordering::Relaxed)
    }
}

impl NarrationSink for SpeechNarrator {
    fn narrate(&self, text: &str, rate: u32) {
        let Some(mailbox) = self.mailbox.as_ref() else {
            return;
        };
        let mut utterance = Utterance {
            text: text.to_owned(),
            rate,
        };
        loop {
            match mailbox.try_send(utterance) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if self.pending.try_recv().is_ok() {
                        self.replaced.fetch_add(1, Ordering::Relaxed);
                        metrics::counter!("pipeline_narrations_dropped_total").increment(1);
                    }
                    utterance = back;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

impl Drop for SpeechNarrator {
    fn drop(&mut self) {
        self.mailbox.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("speech thread panicked");
            }
        }
    }
}

fn speak(program: &str, args: &[String], utterance: &Utterance) {
    let started = Instant::now();
    let status = Command::new(program)
        .args(args)
        .arg(utterance.rate.to_string())
        .arg(&utterance.text)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .status();
    match status {
        Ok(status) if status.success() => {
            debug!(elapsed_ms = started.elapsed().as_millis() as u64, "spoke narration");
        }
        Ok(status) => warn!("speech command `{program}` exited with {status}"),
        Err(err) => warn!("failed to run speech command `{program}`: {err}"),
    }
}
