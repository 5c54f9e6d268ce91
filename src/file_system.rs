use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::mpsc::Sender;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use ignore::gitignore::Gitignore;
use ignore::WalkBuilder;
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};

/// Keep-alive handle for a running filesystem subscription. Dropping it
/// stops the underlying OS watch.
pub type FsListener = notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>;

/// Directories whose tests are considered slow and excluded from the
/// default run set.
const SLOW_TEST_DIRS: &[&str] = &["e2e", "feature", "features", "integration", "system"];

/// Path queries against one project tree, all answered relative to its root.
pub struct FileSystem {
    root: PathBuf,
}

impl FileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileSystem { root: root.into() }
    }

    /// Map a changed file to the test that covers it.
    ///
    /// Test files map to themselves. Implementation files under `lib/` or
    /// `app/` map to the same relative location under `test/` with a
    /// `_test.rb` suffix, provided that test exists. Everything else,
    /// including paths that no longer exist and directories, has no match.
    pub fn find_matching_test_path(&self, path: &Path) -> Option<PathBuf> {
        if !self.root.join(path).is_file() {
            return None;
        }
        let relative = path.to_str()?;
        if relative.starts_with("test/") && relative.ends_with("_test.rb") {
            return Some(PathBuf::from(relative));
        }

        let implementation = relative
            .strip_prefix("lib/")
            .or_else(|| relative.strip_prefix("app/"))?;
        let (stem, extension) = implementation.rsplit_once('.')?;
        if stem.is_empty() || extension.is_empty() {
            return None;
        }
        let candidate = format!("test/{stem}_test.rb");
        self.root
            .join(&candidate)
            .is_file()
            .then(|| PathBuf::from(candidate))
    }

    /// All `*_test.rb` files under `dir`, as sorted root-relative paths.
    /// A directory that does not exist contributes nothing.
    pub fn find_test_paths(&self, dir: &Path) -> Vec<PathBuf> {
        let base = self.root.join(dir);
        if !base.is_dir() {
            return Vec::new();
        }
        let mut paths: Vec<PathBuf> = WalkBuilder::new(&base)
            .build()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .filter(|entry| entry.file_name().to_string_lossy().ends_with("_test.rb"))
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(&self.root)
                    .ok()
                    .map(Path::to_path_buf)
            })
            .collect();
        paths.sort();
        paths
    }

    /// Paths git reports as modified or untracked, in git's order with
    /// duplicates removed. Degrades to an empty list when git is missing or
    /// the root is not a repository.
    pub fn find_new_and_changed_paths(&self) -> Vec<PathBuf> {
        self.changed_paths_from_git().unwrap_or_default()
    }

    fn changed_paths_from_git(&self) -> Result<Vec<PathBuf>> {
        let output = Command::new("git")
            .args(["-C", &self.root.to_string_lossy()])
            .args(["ls-files", "--modified", "--others", "--exclude-standard"])
            .output()
            .context("failed to run git ls-files")?;
        if !output.status.success() {
            bail!("git ls-files failed");
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut paths: Vec<PathBuf> = Vec::new();
        for line in stdout.lines().filter(|line| !line.is_empty()) {
            let path = PathBuf::from(line);
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    /// Start a debounced recursive watch on the project root.
    ///
    /// Every debounce window produces at most one message on `tx`: the
    /// deduplicated batch of root-relative paths that survived filtering.
    /// Changes under `.git/`, gitignored paths, and paths that no longer
    /// exist (removals are not re-run triggers) are dropped.
    pub fn listen(&self, debounce: Duration, tx: Sender<Vec<PathBuf>>) -> Result<FsListener> {
        let root = self
            .root
            .canonicalize()
            .with_context(|| format!("cannot watch {}", self.root.display()))?;
        let callback_root = root.clone();

        // Build the gitignore matcher from the project's .gitignore (if any)
        let (gitignore, _) = Gitignore::new(root.join(".gitignore"));

        let mut debouncer = new_debouncer(
            debounce,
            move |res: Result<Vec<notify_debouncer_mini::DebouncedEvent>, notify::Error>| {
                let events = match res {
                    Ok(events) => events,
                    Err(_) => return,
                };

                let mut batch: Vec<PathBuf> = Vec::new();
                for event in &events {
                    if event.kind != DebouncedEventKind::Any {
                        continue;
                    }
                    let Some(relative) =
                        relative_changed_path(&event.path, &callback_root, &gitignore)
                    else {
                        continue;
                    };
                    if !batch.contains(&relative) {
                        batch.push(relative);
                    }
                }
                if !batch.is_empty() {
                    let _ = tx.send(batch);
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&root, notify::RecursiveMode::Recursive)?;

        Ok(debouncer)
    }
}

/// True when any directory component of the path names a slow-test grouping
/// like `test/e2e` or `test/feature`. The file name itself never counts.
pub fn is_slow_test_path(path: &str) -> bool {
    let Some((dirs, _file)) = path.rsplit_once('/') else {
        return false;
    };
    dirs.split('/')
        .any(|component| SLOW_TEST_DIRS.contains(&component))
}

/// Decide whether a filesystem event path should reach the watch loop, and
/// under which root-relative name.
fn relative_changed_path(path: &Path, root: &Path, gitignore: &Gitignore) -> Option<PathBuf> {
    let relative = path.strip_prefix(root).ok()?;
    if relative.components().any(|c| c.as_os_str() == ".git") {
        return None;
    }
    // Parent directories count: a `tmp/` rule must also cover `tmp/a.rb`.
    if gitignore
        .matched_path_or_any_parents(relative, path.is_dir())
        .is_ignore()
    {
        return None;
    }
    if !path.is_file() {
        return None;
    }
    Some(relative.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::mpsc;

    fn write(root: &Path, relative: &str) {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"").unwrap();
    }

    fn example_project() -> (tempfile::TempDir, FileSystem) {
        let dir = tempfile::tempdir().unwrap();
        for relative in [
            "lib/example.rb",
            "lib/example/version.rb",
            "app/models/user.rb",
            "test/test_helper.rb",
            "test/example_test.rb",
            "test/models/user_test.rb",
            "test/models/account_test.rb",
            "test/system/users_system_test.rb",
        ] {
            write(dir.path(), relative);
        }
        let fs = FileSystem::new(dir.path());
        (dir, fs)
    }

    #[test]
    fn matching_test_path_is_none_for_a_nonexistent_path() {
        let (_dir, fs) = example_project();
        assert_eq!(fs.find_matching_test_path(Path::new("path/to/nowhere.rb")), None);
    }

    #[test]
    fn matching_test_path_is_none_for_a_directory() {
        let (_dir, fs) = example_project();
        assert_eq!(fs.find_matching_test_path(Path::new("lib/example")), None);
    }

    #[test]
    fn matching_test_path_is_none_when_no_test_corresponds() {
        let (_dir, fs) = example_project();
        assert_eq!(fs.find_matching_test_path(Path::new("lib/example/version.rb")), None);
    }

    #[test]
    fn matching_test_path_is_none_for_a_test_support_file() {
        let (_dir, fs) = example_project();
        assert_eq!(fs.find_matching_test_path(Path::new("test/test_helper.rb")), None);
    }

    #[test]
    fn a_test_file_matches_itself() {
        let (_dir, fs) = example_project();
        assert_eq!(
            fs.find_matching_test_path(Path::new("test/example_test.rb")),
            Some(PathBuf::from("test/example_test.rb"))
        );
    }

    #[test]
    fn a_lib_file_matches_its_test() {
        let (_dir, fs) = example_project();
        assert_eq!(
            fs.find_matching_test_path(Path::new("lib/example.rb")),
            Some(PathBuf::from("test/example_test.rb"))
        );
    }

    #[test]
    fn an_app_file_matches_its_test() {
        let (_dir, fs) = example_project();
        assert_eq!(
            fs.find_matching_test_path(Path::new("app/models/user.rb")),
            Some(PathBuf::from("test/models/user_test.rb"))
        );
    }

    #[test]
    fn test_paths_are_discovered_recursively_and_sorted() {
        let (_dir, fs) = example_project();
        assert_eq!(
            fs.find_test_paths(Path::new("test")),
            vec![
                PathBuf::from("test/example_test.rb"),
                PathBuf::from("test/models/account_test.rb"),
                PathBuf::from("test/models/user_test.rb"),
                PathBuf::from("test/system/users_system_test.rb"),
            ]
        );
    }

    #[test]
    fn test_paths_can_be_scoped_to_a_subdirectory() {
        let (_dir, fs) = example_project();
        assert_eq!(
            fs.find_test_paths(Path::new("test/models")),
            vec![
                PathBuf::from("test/models/account_test.rb"),
                PathBuf::from("test/models/user_test.rb"),
            ]
        );
    }

    #[test]
    fn test_paths_of_a_nonexistent_directory_are_empty() {
        let (_dir, fs) = example_project();
        assert!(fs.find_test_paths(Path::new("path/to/nowhere")).is_empty());
    }

    #[test]
    fn slow_test_paths_are_recognized_by_directory() {
        for path in [
            "test/e2e/editor_test.rb",
            "test/feature/login_test.rb",
            "test/features/search_test.rb",
            "test/integration/flow_test.rb",
            "test/system/email_test.rb",
            "test/system/deep/nested_test.rb",
        ] {
            assert!(is_slow_test_path(path), "expected slow: {path}");
        }
        for path in [
            "test/post_test.rb",
            "test/models/user_test.rb",
            "test/features_test.rb",
            "system",
        ] {
            assert!(!is_slow_test_path(path), "expected fast: {path}");
        }
    }

    #[test]
    fn changed_paths_degrade_to_empty_outside_a_repository() {
        let (_dir, fs) = example_project();
        assert!(fs.find_new_and_changed_paths().is_empty());
    }

    #[test]
    fn changed_paths_come_from_git_when_available() {
        if Command::new("git").arg("--version").output().is_err() {
            return;
        }
        let (dir, fs) = example_project();
        let init = Command::new("git")
            .args(["-C", &dir.path().to_string_lossy(), "init", "-q"])
            .status()
            .unwrap();
        assert!(init.success());

        let changed = fs.find_new_and_changed_paths();
        assert!(changed.contains(&PathBuf::from("lib/example.rb")));
        assert!(changed.contains(&PathBuf::from("test/example_test.rb")));
    }

    #[test]
    fn event_filter_keeps_project_files_only() {
        let (dir, _fs) = example_project();
        let root = dir.path().canonicalize().unwrap();
        write(&root, ".git/index");
        write(&root, "tmp/scratch.rb");
        write(&root, "tmp/cache/fragment.rb");
        fs::write(root.join(".gitignore"), "tmp/\n").unwrap();
        let (gitignore, _) = Gitignore::new(root.join(".gitignore"));

        assert_eq!(
            relative_changed_path(&root.join("lib/example.rb"), &root, &gitignore),
            Some(PathBuf::from("lib/example.rb"))
        );
        assert_eq!(relative_changed_path(&root.join(".git/index"), &root, &gitignore), None);
        assert_eq!(relative_changed_path(&root.join("tmp/scratch.rb"), &root, &gitignore), None);
        assert_eq!(
            relative_changed_path(&root.join("tmp/cache/fragment.rb"), &root, &gitignore),
            None
        );
        assert_eq!(relative_changed_path(&root.join("lib/deleted.rb"), &root, &gitignore), None);
        assert_eq!(relative_changed_path(Path::new("/somewhere/else.rb"), &root, &gitignore), None);
    }

    #[test]
    fn listen_reports_changed_files_relative_to_the_root() {
        let (dir, fs) = example_project();
        let (tx, rx) = mpsc::channel();
        let _listener = fs.listen(Duration::from_millis(50), tx).unwrap();

        // Give the recursive watch a moment to become effective.
        std::thread::sleep(Duration::from_millis(250));
        std::fs::write(dir.path().join("lib/example.rb"), b"changed").unwrap();

        let batch = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(batch.contains(&PathBuf::from("lib/example.rb")), "got {batch:?}");
    }
}
