mod console;
mod event;
mod event_queue;
mod file_system;
mod rng;
mod runner;
mod sharder;
mod signals;
mod test_parser;
mod watcher;

use std::env;
use std::fs;
use std::io;
use std::path::Path;
use std::process;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use crate::console::TerminalConsole;
use crate::event_queue::EventQueue;
use crate::file_system::FileSystem;
use crate::runner::TestRunner;
use crate::sharder::Sharder;
use crate::signals::SignalFlags;
use crate::test_parser::TestParser;
use crate::watcher::{WatchOutcome, Watcher};

#[derive(Parser)]
#[command(name = "mt", version, about = "Minitest runner and test file watcher")]
struct Cli {
    /// Run all tests, including slow tests
    #[arg(long)]
    all: bool,

    /// Run a deterministic fraction of the test suite (e.g. 1/4)
    #[arg(long, value_name = "INDEX/TOTAL")]
    shard: Option<String>,

    /// Shuffle shards with this seed instead of deriving one from CI
    #[arg(long, allow_hyphen_values = true, value_name = "SEED")]
    seed: Option<i64>,

    /// Rerun tests whenever source or test files change
    #[arg(short, long)]
    watch: bool,

    /// Debounce interval in milliseconds for filesystem events
    #[arg(long, default_value_t = 200)]
    debounce_ms: u64,

    /// Test files or directories to run
    #[arg(value_name = "PATHS")]
    paths: Vec<String>,
}

/// Flags `mt` claims for itself, matched exactly. Everything else with a
/// leading `-` belongs to minitest.
const BARE_FLAGS: &[&str] = &["-w", "--watch", "--all", "-h", "--help", "-V", "--version"];
const VALUE_FLAGS: &[&str] = &["--shard", "--seed", "--debounce-ms"];

fn main() -> Result<()> {
    let (cli_args, minitest_args, literal_paths) = partition_argv(env::args().collect());
    let cli = Cli::parse_from(cli_args);
    let code = run(cli, minitest_args, literal_paths)?;
    if code != 0 {
        process::exit(code);
    }
    Ok(())
}

fn run(cli: Cli, minitest_args: Vec<String>, literal_paths: Vec<String>) -> Result<i32> {
    let mut path_args = cli.paths.clone();
    path_args.extend(literal_paths);
    if cli.watch {
        watch(&cli, minitest_args)
    } else {
        run_tests_once(&cli, minitest_args, path_args)
    }
}

/// Split raw argv three ways before clap sees any of it: the arguments `mt`
/// parses, tokens with a leading `-` it does not recognize (forwarded to
/// minitest untouched), and everything after a literal `--`, which is a test
/// path no matter how it is spelled. Forwarding unknown flags instead of
/// rejecting them keeps flag position irrelevant: `mt test/a_test.rb --watch`
/// and `mt --watch test/a_test.rb` parse the same.
fn partition_argv(argv: Vec<String>) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut cli_args = Vec::new();
    let mut minitest_args = Vec::new();
    let mut literal_paths = Vec::new();

    let mut args = argv.into_iter();
    cli_args.extend(args.next());
    while let Some(arg) = args.next() {
        if arg == "--" {
            literal_paths.extend(args);
            break;
        }
        if VALUE_FLAGS.contains(&arg.as_str()) {
            // The next token is this flag's value, even when it starts
            // with a `-` (negative seeds).
            cli_args.push(arg);
            cli_args.extend(args.next());
        } else if is_cli_flag(&arg) || !is_flag_like(&arg) {
            cli_args.push(arg);
        } else {
            minitest_args.push(arg);
        }
    }
    (cli_args, minitest_args, literal_paths)
}

fn is_flag_like(arg: &str) -> bool {
    arg.len() > 1 && arg.starts_with('-')
}

fn is_cli_flag(arg: &str) -> bool {
    BARE_FLAGS.contains(&arg)
        || VALUE_FLAGS
            .iter()
            .any(|flag| arg.strip_prefix(flag).is_some_and(|rest| rest.starts_with('=')))
}

// ── Watch mode ──────────────────────────────────────────────────

fn watch(cli: &Cli, extra_args: Vec<String>) -> Result<i32> {
    let signals = SignalFlags::install()?;
    let queue = EventQueue::new(
        FileSystem::new("."),
        Duration::from_millis(cli.debounce_ms),
        signals.clone(),
    );
    let mut runner = TestRunner::new(extra_args, signals)?;
    let mut watcher = Watcher::new(
        queue,
        TerminalConsole::new(),
        FileSystem::new("."),
        |flags, paths| runner.run(flags, paths),
        io::stdout(),
    );

    match watcher.run()? {
        WatchOutcome::Quit => Ok(0),
        WatchOutcome::Signaled(signal) => Ok(128 + signal),
    }
}

// ── Single run ──────────────────────────────────────────────────

fn run_tests_once(
    cli: &Cli,
    mut minitest_args: Vec<String>,
    path_args: Vec<String>,
) -> Result<i32> {
    let file_system = FileSystem::new(".");

    // A single FILE:LINE argument focuses the test defined at that line.
    let focus = match &path_args[..] {
        [single] => test_parser::split_line_focus(single)
            .filter(|(file, _)| Path::new(file).is_file())
            .map(|(file, line)| (file.to_string(), line)),
        _ => None,
    };
    let path_args = if let Some((file, line)) = focus {
        let source = fs::read_to_string(&file)?;
        if let Some(name) = TestParser::new()?.test_name_at_line(&source, line) {
            minitest_args.push("-n".to_string());
            minitest_args.push(name);
        }
        vec![file]
    } else {
        path_args
    };

    let mut test_paths: Vec<String> = Vec::new();
    if path_args.is_empty() {
        for path in file_system.find_test_paths(Path::new("test")) {
            let path = path.to_string_lossy().into_owned();
            if cli.all || !file_system::is_slow_test_path(&path) {
                test_paths.push(path);
            }
        }
    } else {
        for arg in &path_args {
            if Path::new(arg).is_dir() {
                for path in file_system.find_test_paths(Path::new(arg)) {
                    push_unique(&mut test_paths, path.to_string_lossy().into_owned());
                }
            } else {
                push_unique(&mut test_paths, arg.clone());
            }
        }
    }

    let test_paths = match &cli.shard {
        Some(value) => {
            Sharder::from_flag(value, cli.seed, |key| env::var(key).ok())?.shard(&test_paths)
        }
        None => test_paths,
    };

    runner::run_suite(&minitest_args, &test_paths)
}

fn push_unique(paths: &mut Vec<String>, path: String) {
    if !paths.contains(&path) {
        paths.push(path);
    }
}
