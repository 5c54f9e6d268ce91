use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use signal_hook::consts::{SIGINT, SIGTERM};

/// Termination observed while the watcher was idle. Carried inside an
/// `anyhow::Error` so the event loop can unwind through its shutdown path
/// and still exit with the conventional `128 + signal` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signaled(pub i32);

impl fmt::Display for Signaled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "terminated by signal {}", self.0)
    }
}

impl std::error::Error for Signaled {}

/// Process-wide delivery flags for SIGINT and SIGTERM.
///
/// The handlers only set flags; the watch loop polls them between events.
/// With raw input enabled Ctrl-C never reaches the kernel's signal path, so
/// these fire only while a child test run has the terminal (cooked), or when
/// another process signals us. Handler dispositions reset across `exec`,
/// which is what lets Ctrl-C still kill the child run while the watching
/// parent survives to recover.
#[derive(Clone)]
pub struct SignalFlags {
    int: Arc<AtomicBool>,
    term: Arc<AtomicBool>,
}

impl SignalFlags {
    /// Register flag-setting handlers for SIGINT and SIGTERM.
    pub fn install() -> Result<Self> {
        let flags = Self::inert();
        signal_hook::flag::register(SIGINT, Arc::clone(&flags.int))?;
        signal_hook::flag::register(SIGTERM, Arc::clone(&flags.term))?;
        Ok(flags)
    }

    /// Flags no signal handler ever sets. Used outside watch mode, where the
    /// default dispositions are the right behavior.
    pub fn inert() -> Self {
        SignalFlags {
            int: Arc::new(AtomicBool::new(false)),
            term: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Consume a pending SIGINT. Called after an interrupted test run so the
    /// interruption is treated as "cancel that run", not "quit the watcher".
    pub fn take_interrupt(&self) -> bool {
        self.int.swap(false, Ordering::Relaxed)
    }

    /// The signal that should end the process, if one is pending. SIGTERM
    /// wins over SIGINT when both have arrived.
    pub fn pending_termination(&self) -> Option<Signaled> {
        if self.term.load(Ordering::Relaxed) {
            Some(Signaled(SIGTERM))
        } else if self.int.load(Ordering::Relaxed) {
            Some(Signaled(SIGINT))
        } else {
            None
        }
    }

    #[cfg(test)]
    pub(crate) fn simulate_interrupt(&self) {
        self.int.store(true, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn simulate_term(&self) {
        self.term.store(true, Ordering::Relaxed);
    }
}
