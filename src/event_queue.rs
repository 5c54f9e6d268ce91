use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use anyhow::{bail, Result};

use crate::console;
use crate::event::Event;
use crate::file_system::{FileSystem, FsListener};
use crate::signals::SignalFlags;

/// How long `pop` waits on the filesystem channel before rechecking the
/// keyboard and signal flags.
const POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// How events reach the watch loop. A trait so tests can drive the loop
/// with a scripted sequence instead of a live terminal and filesystem.
pub trait EventSource {
    /// Begin the filesystem subscription. Fails if already active.
    fn start(&mut self) -> Result<()>;

    /// End the subscription. Safe to call when already stopped.
    fn stop(&mut self);

    /// Recover a subscription whose OS-level watch died with an interrupted
    /// test run.
    fn restart(&mut self) -> Result<()> {
        self.stop();
        self.start()
    }

    /// Block until the next event from either source.
    fn pop(&mut self) -> Result<Event>;
}

/// Merges debounced filesystem batches and raw keyboard input into one
/// ordered stream of events.
///
/// The channel pair lives as long as the queue, not as long as one
/// subscription, so batches that arrive while the listener is being
/// restarted are delivered rather than lost.
pub struct EventQueue {
    file_system: FileSystem,
    debounce: Duration,
    signals: SignalFlags,
    batch_tx: Sender<Vec<PathBuf>>,
    batch_rx: Receiver<Vec<PathBuf>>,
    listener: Option<FsListener>,
}

impl EventQueue {
    pub fn new(file_system: FileSystem, debounce: Duration, signals: SignalFlags) -> Self {
        let (batch_tx, batch_rx) = mpsc::channel();
        EventQueue {
            file_system,
            debounce,
            signals,
            batch_tx,
            batch_rx,
            listener: None,
        }
    }

    /// Merge every batch already queued behind `first` into one
    /// deduplicated set, preserving first-seen order. Editors that write
    /// through temp files fire several notifications for one logical save;
    /// collapsing them here avoids redundant re-runs.
    fn merge_pending(&self, first: Vec<PathBuf>) -> Vec<PathBuf> {
        let mut pending = first;
        while let Ok(more) = self.batch_rx.try_recv() {
            pending.extend(more);
        }
        let mut merged = Vec::new();
        for path in pending {
            if !merged.contains(&path) {
                merged.push(path);
            }
        }
        merged
    }
}

impl EventSource for EventQueue {
    fn start(&mut self) -> Result<()> {
        if self.listener.is_some() {
            bail!("event queue is already started");
        }
        let listener = self.file_system.listen(self.debounce, self.batch_tx.clone())?;
        self.listener = Some(listener);
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping the handle stops the OS watch.
        self.listener = None;
    }

    /// Raw-mode terminal access is held for the whole call and released on
    /// every exit path, so whatever runs next (a child test process, shell
    /// cleanup) sees a cooked terminal.
    fn pop(&mut self) -> Result<Event> {
        let _raw = console::RawInput::acquire()?;
        loop {
            if let Some(signal) = self.signals.pending_termination() {
                return Err(signal.into());
            }
            if let Some(key) = console::read_keypress()? {
                return Ok(Event::Keypress(key));
            }
            match self.batch_rx.recv_timeout(POLL_TIMEOUT) {
                Ok(first) => return Ok(Event::FileSystemChanged(self.merge_pending(first))),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => bail!("filesystem event channel closed"),
            }
        }
    }
}
