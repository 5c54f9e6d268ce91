use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::Result;
use crossterm::cursor::MoveTo;
use crossterm::event::{self as ct_event, Event as TermEvent, KeyCode, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{self, Clear, ClearType};
use crossterm::tty::IsTty;

/// Scoped raw-mode acquisition, held for the duration of one event poll and
/// released on every exit path. Child test runs therefore always start with
/// a cooked terminal. When stdin is not a terminal the guard is inert, so
/// the watch loop still works under pipes and CI.
pub struct RawInput {
    active: bool,
}

impl RawInput {
    pub fn acquire() -> Result<Self> {
        if !io::stdin().is_tty() {
            return Ok(RawInput { active: false });
        }
        terminal::enable_raw_mode()?;
        Ok(RawInput { active: true })
    }
}

impl Drop for RawInput {
    fn drop(&mut self) {
        if self.active {
            let _ = terminal::disable_raw_mode();
        }
    }
}

/// Non-blocking read of a single keypress. `None` when nothing is pending or
/// stdin is not a terminal.
pub fn read_keypress() -> Result<Option<char>> {
    if !io::stdin().is_tty() {
        return Ok(None);
    }
    if !ct_event::poll(Duration::from_millis(0))? {
        return Ok(None);
    }
    match ct_event::read()? {
        TermEvent::Key(key) => Ok(decode_key(key.code, key.modifiers)),
        _ => Ok(None),
    }
}

/// Reduce a key event to the character a raw-mode byte read would produce:
/// Enter is `'\r'`, control chords are their control characters, and keys
/// with no character representation are dropped.
fn decode_key(code: KeyCode, modifiers: KeyModifiers) -> Option<char> {
    match code {
        KeyCode::Enter => Some('\r'),
        KeyCode::Char(c) if modifiers.contains(KeyModifiers::CONTROL) => {
            let lower = c.to_ascii_lowercase();
            lower
                .is_ascii_lowercase()
                .then(|| char::from(lower as u8 - b'a' + 1))
        }
        KeyCode::Char(c) => Some(c),
        _ => None,
    }
}

/// Audible cue for a finished test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sound {
    Pass,
    Fail,
}

/// Display and notification operations used by the watch loop. A trait so
/// tests can observe the calls without touching a real terminal.
pub trait Console {
    /// Erase the screen and home the cursor. False when stdout is not a
    /// terminal.
    fn clear(&mut self) -> bool;
    /// Fire and forget an audible cue. False when the player or every sound
    /// file is missing, or stdout is not a terminal.
    fn play_sound(&mut self, sound: Sound) -> bool;
}

const SOUND_PLAYER: &str = "/usr/bin/afplay";

const PASS_SOUNDS: &[&str] = &[
    "/System/Library/PrivateFrameworks/ToneLibrary.framework/Versions/A/Resources/AlertTones/EncoreInfinitum/Milestone-EncoreInfinitum.caf",
    "/System/Library/Sounds/Glass.aiff",
];

const FAIL_SOUNDS: &[&str] = &[
    "/System/Library/PrivateFrameworks/ToneLibrary.framework/Versions/A/Resources/AlertTones/EncoreInfinitum/Rebound-EncoreInfinitum.caf",
    "/System/Library/Sounds/Bottle.aiff",
];

pub struct TerminalConsole {
    sound_player: PathBuf,
    pass_sounds: Vec<PathBuf>,
    fail_sounds: Vec<PathBuf>,
}

impl TerminalConsole {
    pub fn new() -> Self {
        TerminalConsole {
            sound_player: PathBuf::from(SOUND_PLAYER),
            pass_sounds: PASS_SOUNDS.iter().map(PathBuf::from).collect(),
            fail_sounds: FAIL_SOUNDS.iter().map(PathBuf::from).collect(),
        }
    }

    #[cfg(test)]
    fn with_sounds(player: PathBuf, pass: Vec<PathBuf>, fail: Vec<PathBuf>) -> Self {
        TerminalConsole {
            sound_player: player,
            pass_sounds: pass,
            fail_sounds: fail,
        }
    }
}

impl Console for TerminalConsole {
    fn clear(&mut self) -> bool {
        if !io::stdout().is_tty() {
            return false;
        }
        execute!(io::stdout(), Clear(ClearType::All), MoveTo(0, 0)).is_ok()
    }

    fn play_sound(&mut self, sound: Sound) -> bool {
        if !io::stdout().is_tty() {
            return false;
        }
        let candidates = match sound {
            Sound::Pass => &self.pass_sounds,
            Sound::Fail => &self.fail_sounds,
        };
        let Some(path) = first_existing(candidates) else {
            return false;
        };
        if !self.sound_player.is_file() {
            return false;
        }
        let spawned = Command::new(&self.sound_player)
            .arg(path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            Ok(mut child) => {
                // Reap in the background; the cue must not block the loop.
                std::thread::spawn(move || {
                    let _ = child.wait();
                });
                true
            }
            Err(_) => false,
        }
    }
}

fn first_existing(paths: &[PathBuf]) -> Option<&PathBuf> {
    paths.iter().find(|path| path.exists())
}
