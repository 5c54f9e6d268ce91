use std::env;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};

use anyhow::{Context, Result};
use signal_hook::consts::SIGINT;

use crate::signals::SignalFlags;

/// Outcome of one child test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Passed,
    Failed,
    /// The run was cut short by Ctrl-C. Not a pass or a fail; the watch
    /// loop recovers and keeps going.
    Interrupted,
}

/// Loader handed to `ruby -e`. Minitest parses the arguments before the
/// `--` separator itself; everything after it is a test file to load.
/// `minitest/focus` and the `minitest/rg` color reporter are optional
/// equipment, so their absence is tolerated. Warnings stay off even under
/// `ruby -w` so test file loading is not drowned out.
const RUBY_LOADER: &str = r#"
$VERBOSE = false
split = ARGV.index("--") || ARGV.length
files = ARGV[(split + 1)..] || []
ARGV.replace(ARGV[0...split])
begin
  require "minitest/focus"
rescue LoadError
end
begin
  require "minitest/rg"
rescue LoadError
end
files.each { |file| require File.expand_path(file) }
require "minitest/autorun"
"#;

/// Runs test sets for the watch loop by re-invoking this binary in
/// run-once mode, inheriting the terminal for the duration.
pub struct TestRunner {
    program: PathBuf,
    extra_args: Vec<String>,
    signals: SignalFlags,
}

impl TestRunner {
    pub fn new(extra_args: Vec<String>, signals: SignalFlags) -> Result<Self> {
        let program = env::current_exe().context("cannot locate the running executable")?;
        Ok(TestRunner {
            program,
            extra_args,
            signals,
        })
    }

    /// Run one test set. `flags` are mode flags like `--all`; explicit
    /// `paths` follow a `--` separator so they are never mistaken for
    /// arguments. Blocks until the child exits.
    pub fn run(&mut self, flags: &[&str], paths: &[String]) -> Result<RunStatus> {
        let status = Command::new(&self.program)
            .args(child_args(&self.extra_args, flags, paths))
            .status()
            .with_context(|| format!("failed to run {}", self.program.display()))?;
        Ok(self.interpret(status))
    }

    /// A run counts as interrupted when the child died from SIGINT or when
    /// our own SIGINT flag was raised while it ran (a child that traps the
    /// signal exits normally, but the intent was still to cancel).
    /// Consuming the flag here keeps the interruption from also being read
    /// as a request to quit the watcher.
    fn interpret(&self, status: ExitStatus) -> RunStatus {
        let flagged = self.signals.take_interrupt();
        if flagged || status.signal() == Some(SIGINT) {
            return RunStatus::Interrupted;
        }
        if status.success() {
            RunStatus::Passed
        } else {
            RunStatus::Failed
        }
    }
}

fn child_args(extra_args: &[String], flags: &[&str], paths: &[String]) -> Vec<String> {
    let mut args: Vec<String> = extra_args.to_vec();
    args.extend(flags.iter().map(|flag| flag.to_string()));
    if !paths.is_empty() {
        args.push("--".to_string());
        args.extend(paths.iter().cloned());
    }
    args
}

/// Execute test files through the project's Ruby with minitest driving the
/// run. Returns the code the process should exit with: the child's own
/// code, or `128 + signal` if it was killed.
pub fn run_suite(minitest_args: &[String], paths: &[String]) -> Result<i32> {
    let status = Command::new("ruby")
        .args(suite_args(minitest_args, paths))
        .status()
        .context("failed to run ruby")?;
    Ok(exit_code(status))
}

fn suite_args(minitest_args: &[String], paths: &[String]) -> Vec<String> {
    let mut args = vec![
        "-Itest".to_string(),
        "-e".to_string(),
        RUBY_LOADER.to_string(),
        "--".to_string(),
    ];
    args.extend(minitest_args.iter().cloned());
    args.push("--".to_string());
    args.extend(paths.iter().cloned());
    args
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        code
    } else if let Some(signal) = status.signal() {
        128 + signal
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn exited(code: i32) -> ExitStatus {
        ExitStatus::from_raw(code << 8)
    }

    fn signaled(signal: i32) -> ExitStatus {
        ExitStatus::from_raw(signal)
    }

    fn runner_with(signals: SignalFlags) -> TestRunner {
        TestRunner {
            program: PathBuf::from("/bin/true"),
            extra_args: Vec::new(),
            signals,
        }
    }

    #[test]
    fn child_args_keep_extra_args_before_flags_and_paths_last() {
        let args = child_args(
            &strings(&["--fail-fast"]),
            &["--all"],
            &strings(&["test/a_test.rb", "test/b_test.rb"]),
        );
        assert_eq!(
            args,
            strings(&["--fail-fast", "--all", "--", "test/a_test.rb", "test/b_test.rb"])
        );
    }

    #[test]
    fn child_args_omit_the_separator_without_paths() {
        assert_eq!(child_args(&[], &["--all"], &[]), strings(&["--all"]));
        assert_eq!(child_args(&[], &[], &[]), Vec::<String>::new());
    }

    #[test]
    fn the_loader_sets_up_optional_minitest_extensions() {
        assert!(RUBY_LOADER.contains("$VERBOSE = false"));
        assert!(RUBY_LOADER.contains(r#"require "minitest/focus""#));
        assert!(RUBY_LOADER.contains(r#"require "minitest/rg""#));
        assert_eq!(RUBY_LOADER.matches("rescue LoadError").count(), 2);
    }

    #[test]
    fn suite_args_forward_minitest_args_before_the_files() {
        let args = suite_args(&strings(&["-n", "test_it_works"]), &strings(&["test/a_test.rb"]));
        assert_eq!(args[0], "-Itest");
        assert_eq!(args[1], "-e");
        assert_eq!(
            &args[3..],
            &strings(&["--", "-n", "test_it_works", "--", "test/a_test.rb"])[..]
        );
    }

    #[test]
    fn a_clean_exit_passes_and_a_nonzero_exit_fails() {
        let runner = runner_with(SignalFlags::inert());
        assert_eq!(runner.interpret(exited(0)), RunStatus::Passed);
        assert_eq!(runner.interpret(exited(1)), RunStatus::Failed);
    }

    #[test]
    fn a_child_killed_by_sigint_is_interrupted() {
        let runner = runner_with(SignalFlags::inert());
        assert_eq!(runner.interpret(signaled(SIGINT)), RunStatus::Interrupted);
    }

    #[test]
    fn a_flagged_interrupt_overrides_the_exit_status_and_is_consumed() {
        let signals = SignalFlags::inert();
        let runner = runner_with(signals.clone());
        signals.simulate_interrupt();
        assert_eq!(runner.interpret(exited(0)), RunStatus::Interrupted);
        assert_eq!(runner.interpret(exited(0)), RunStatus::Passed);
    }

    #[test]
    fn exit_codes_map_signals_to_128_plus_signal() {
        assert_eq!(exit_code(exited(0)), 0);
        assert_eq!(exit_code(exited(5)), 5);
        assert_eq!(exit_code(signaled(SIGINT)), 130);
        assert_eq!(exit_code(signaled(signal_hook::consts::SIGTERM)), 143);
    }
}
