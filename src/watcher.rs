use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;

use crate::console::{Console, Sound};
use crate::event::Event;
use crate::event_queue::EventSource;
use crate::file_system::FileSystem;
use crate::runner::RunStatus;
use crate::signals::Signaled;

pub const WATCHING_FOR_CHANGES: &str =
    "Watching for changes to source and test files. Press \"h\" for help or \"q\" to quit.";

const HELP_MENU: &str = "\
> Press Enter to run all tests.
> Press \"a\" to run all tests, including slow tests.
> Press \"d\" to run tests for files diffed or added since the last git commit.
> Press \"h\" to show this help menu.
> Press \"q\" to quit.";

/// How the watch loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The user pressed `q`. Process exits 0.
    Quit,
    /// A termination signal, or Ctrl-C read in raw mode. Process exits
    /// `128 + signal`.
    Signaled(i32),
}

/// The interactive control loop: pops one event at a time and turns it
/// into a test run, a printed message, or an exit.
///
/// Collaborators are injected so tests can script a whole session:
/// `run_tests` receives `(flags, paths)` for each child invocation and all
/// user-facing text goes through `out`.
pub struct Watcher<Q, C, R, W> {
    queue: Q,
    console: C,
    file_system: FileSystem,
    run_tests: R,
    out: W,
}

impl<Q, C, R, W> Watcher<Q, C, R, W>
where
    Q: EventSource,
    C: Console,
    R: FnMut(&[&str], &[String]) -> Result<RunStatus>,
    W: Write,
{
    pub fn new(queue: Q, console: C, file_system: FileSystem, run_tests: R, out: W) -> Self {
        Watcher {
            queue,
            console,
            file_system,
            run_tests,
            out,
        }
    }

    /// Run until quit or termination. Shutdown is guaranteed: whatever path
    /// leaves the loop, the subscription is stopped and the exit message
    /// printed before this returns.
    pub fn run(&mut self) -> Result<WatchOutcome> {
        let outcome = self.watch();
        let shutdown = self.shutdown();
        let outcome = outcome?;
        shutdown?;
        Ok(outcome)
    }

    fn watch(&mut self) -> Result<WatchOutcome> {
        self.queue.start()?;
        writeln!(self.out, "{WATCHING_FOR_CHANGES}")?;

        loop {
            match self.queue.pop() {
                Ok(Event::FileSystemChanged(paths)) => {
                    self.run_matching_tests(&paths)?;
                }
                Ok(Event::Keypress(key)) => match key {
                    '\r' | '\n' => self.run_all_tests(&[])?,
                    'a' => self.run_all_tests(&["--all"])?,
                    'd' => self.run_tests_for_git_changes()?,
                    'h' => self.show_help()?,
                    'q' => return Ok(WatchOutcome::Quit),
                    '\u{3}' => return Ok(WatchOutcome::Signaled(signal_hook::consts::SIGINT)),
                    _ => {}
                },
                Err(error) => {
                    return match error.downcast_ref::<Signaled>() {
                        Some(Signaled(signal)) => Ok(WatchOutcome::Signaled(*signal)),
                        None => Err(error),
                    };
                }
            }
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        self.queue.stop();
        writeln!(self.out, "\nExiting.")?;
        Ok(())
    }

    /// Map changed paths to their tests and run them. Returns whether
    /// anything ran.
    fn run_matching_tests(&mut self, changed: &[PathBuf]) -> Result<bool> {
        let mut test_paths: Vec<String> = Vec::new();
        for path in changed {
            if let Some(test_path) = self.file_system.find_matching_test_path(path) {
                let test_path = test_path.to_string_lossy().into_owned();
                if !test_paths.contains(&test_path) {
                    test_paths.push(test_path);
                }
            }
        }
        if test_paths.is_empty() {
            return Ok(false);
        }

        self.console.clear();
        for path in &test_paths {
            writeln!(self.out, "{path}")?;
        }
        writeln!(self.out)?;
        self.dispatch(&[], &test_paths)?;
        Ok(true)
    }

    fn run_all_tests(&mut self, flags: &[&str]) -> Result<()> {
        self.console.clear();
        if flags.is_empty() {
            writeln!(self.out, "Running tests...")?;
        } else {
            writeln!(self.out, "Running tests with {}...", flags.join(" "))?;
        }
        writeln!(self.out)?;
        self.dispatch(flags, &[])
    }

    fn run_tests_for_git_changes(&mut self) -> Result<()> {
        let changed = self.file_system.find_new_and_changed_paths();
        if self.run_matching_tests(&changed)? {
            return Ok(());
        }
        self.console.clear();
        writeln!(
            self.out,
            "No affected test files detected since the last git commit."
        )?;
        writeln!(self.out, "{WATCHING_FOR_CHANGES}")?;
        Ok(())
    }

    fn show_help(&mut self) -> Result<()> {
        writeln!(self.out, "\n{HELP_MENU}\n")?;
        Ok(())
    }

    /// One child run plus its reporting. An interrupted run produces no
    /// sound and no banner; the delivered signal also killed the OS-level
    /// filesystem watch, so the subscription is restarted instead.
    fn dispatch(&mut self, flags: &[&str], paths: &[String]) -> Result<()> {
        match (self.run_tests)(flags, paths)? {
            RunStatus::Interrupted => self.queue.restart(),
            status => {
                let sound = match status {
                    RunStatus::Passed => Sound::Pass,
                    _ => Sound::Fail,
                };
                self.console.play_sound(sound);
                writeln!(self.out, "\n{WATCHING_FOR_CHANGES}")?;
                self.out.flush()?;
                Ok(())
            }
        }
    }
}
