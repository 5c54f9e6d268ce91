use std::path::PathBuf;

/// All commands funnelled through the watch loop, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A single key typed while the watcher is idle. Control keys arrive as
    /// their control characters (Ctrl-C is `'\u{3}'`), Enter as `'\r'`.
    Keypress(char),
    /// A debounced batch of changed paths, relative to the project root.
    FileSystemChanged(Vec<PathBuf>),
}
